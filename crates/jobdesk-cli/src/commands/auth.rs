use clap::{Subcommand, ValueEnum};
use jobdesk_core::credentials;
use serde::Serialize;

use super::{CmdResult, Context};

#[derive(Clone, Copy, ValueEnum)]
pub enum Secret {
    /// Project API key for the hosted store
    ApiKey,
    /// Signed-in user's access token for the hosted store
    AccessToken,
    /// OAuth access token for the calendar
    CalendarToken,
}

impl Secret {
    fn key(self) -> &'static str {
        match self {
            Secret::ApiKey => credentials::REMOTE_API_KEY,
            Secret::AccessToken => credentials::REMOTE_ACCESS_TOKEN,
            Secret::CalendarToken => credentials::CALENDAR_ACCESS_TOKEN,
        }
    }
}

#[derive(Subcommand)]
pub enum AuthAction {
    /// Store a credential in the OS keyring
    Set {
        #[arg(value_enum)]
        secret: Secret,
        value: String,
    },
    /// Remove one credential, or all of them and the cached tenant
    Clear {
        #[arg(value_enum)]
        secret: Option<Secret>,
    },
    /// Show which credentials are stored and the current tenant
    Status,
}

#[derive(Serialize)]
struct Status {
    credentials: Vec<(&'static str, bool)>,
    remote: bool,
    calendar: bool,
    tenant: Option<String>,
}

pub async fn run(action: AuthAction, ctx: &Context) -> CmdResult {
    match action {
        AuthAction::Set { secret, value } => {
            credentials::set(secret.key(), &value)?;
            println!("stored {}", secret.key());
        }
        AuthAction::Clear { secret: Some(secret) } => {
            credentials::delete(secret.key())?;
            println!("removed {}", secret.key());
        }
        AuthAction::Clear { secret: None } => {
            for key in credentials::ALL_KEYS {
                credentials::delete(key)?;
            }
            ctx.workspace()?.store().tenant().invalidate()?;
            println!("signed out");
        }
        AuthAction::Status => {
            let mut stored = Vec::with_capacity(credentials::ALL_KEYS.len());
            for key in credentials::ALL_KEYS {
                stored.push((key, credentials::get(key)?.is_some()));
            }
            let ws = ctx.workspace()?;
            let status = Status {
                credentials: stored,
                remote: ws.store().has_remote(),
                calendar: ws.reconciler().is_some(),
                tenant: ws.store().tenant().resolve().await,
            };

            if ctx.json {
                ctx.print_json(&status)?;
            } else {
                for (key, present) in &status.credentials {
                    println!("{key}: {}", if *present { "stored" } else { "missing" });
                }
                println!("remote store: {}", if status.remote { "configured" } else { "off" });
                println!("calendar: {}", if status.calendar { "connected" } else { "off" });
                println!("tenant: {}", status.tenant.as_deref().unwrap_or("(none)"));
            }
        }
    }
    Ok(())
}
