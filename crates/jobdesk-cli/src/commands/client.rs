//! Client management commands for CLI.

use chrono::Utc;
use clap::Subcommand;
use jobdesk_core::models::new_id;
use jobdesk_core::{Client, Filter};

use super::{report_status, CmdResult, Context};

#[derive(Subcommand)]
pub enum ClientAction {
    /// List all clients
    List,
    /// Add a client
    Add {
        /// Legal or full name
        name: String,
        /// Name shown on calendar events
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
    },
    /// Remove a client
    Remove { id: String },
}

pub async fn run(action: ClientAction, ctx: &Context) -> CmdResult {
    let ws = ctx.workspace()?;
    let store = ws.store();

    match action {
        ClientAction::List => {
            let fetched = store.select_as::<Client>(&Filter::new()).await?;
            report_status(&fetched.status);
            if ctx.json {
                ctx.print_json(&fetched.records)?;
            } else {
                for client in &fetched.records {
                    println!("{}  {}", client.id, client.label());
                }
            }
        }
        ClientAction::Add {
            name,
            display_name,
            email,
            phone,
        } => {
            let now = Utc::now();
            let client = Client {
                id: new_id(),
                name,
                display_name,
                email,
                phone,
                created_at: Some(now),
                updated_at: Some(now),
                ..Client::default()
            };
            let written = store.upsert_as(std::slice::from_ref(&client)).await?;
            report_status(&written.status);
            println!("Client created: {}", client.id);
        }
        ClientAction::Remove { id } => {
            let deleted = store.delete_by_id::<Client>(&id).await?;
            report_status(&deleted.status);
            println!("Client removed: {id}");
        }
    }
    Ok(())
}
