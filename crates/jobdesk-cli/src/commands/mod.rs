pub mod auth;
pub mod client;
pub mod config;
pub mod job;
pub mod mileage;
pub mod refresh;

use jobdesk_core::{Config, RemoteStatus, Workspace};
use serde::Serialize;

pub type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Flags shared by every command.
pub struct Context {
    pub json: bool,
    pub tenant: Option<String>,
}

impl Context {
    pub fn workspace(&self) -> Result<Workspace, Box<dyn std::error::Error>> {
        let config = Config::load()?;
        Ok(Workspace::open(&config, self.tenant.clone())?)
    }

    /// Print `value` as pretty JSON.
    pub fn print_json<T: Serialize>(&self, value: &T) -> CmdResult {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

/// Warn on stderr when the remote side did not take part.
pub fn report_status(status: &RemoteStatus) {
    match status {
        RemoteStatus::Synced => {}
        RemoteStatus::Offline => eprintln!("note: offline, local cache only"),
        RemoteStatus::Degraded { reason } => eprintln!("warning: remote unavailable ({reason})"),
    }
}
