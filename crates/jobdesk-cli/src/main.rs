use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::Context;

#[derive(Parser)]
#[command(name = "jobdesk-cli", version, about = "Jobdesk CLI")]
struct Cli {
    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Act as this tenant instead of asking the remote session
    #[arg(long, global = true)]
    tenant: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Credentials for the remote store and the calendar
    Auth {
        #[command(subcommand)]
        action: commands::auth::AuthAction,
    },
    /// Client management
    Client {
        #[command(subcommand)]
        action: commands::client::ClientAction,
    },
    /// Job management and calendar projection
    Job {
        #[command(subcommand)]
        action: commands::job::JobAction,
    },
    /// Mileage log
    Mileage {
        #[command(subcommand)]
        action: commands::mileage::MileageAction,
    },
    /// Pull every record from the remote store into the local cache
    Refresh,
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("JOBDESK_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();
    let ctx = Context {
        json: cli.json,
        tenant: cli.tenant,
    };

    let result = match cli.command {
        Commands::Config { action } => commands::config::run(action, &ctx),
        Commands::Auth { action } => commands::auth::run(action, &ctx).await,
        Commands::Client { action } => commands::client::run(action, &ctx).await,
        Commands::Job { action } => commands::job::run(action, &ctx).await,
        Commands::Mileage { action } => commands::mileage::run(action, &ctx).await,
        Commands::Refresh => commands::refresh::run(&ctx).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
