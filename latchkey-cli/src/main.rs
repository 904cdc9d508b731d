mod handlers;
mod run;
mod server;
mod storage;


use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "latchkey",
    about = "latchkey: distributed locks around guarded work",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP lock service
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3100")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Storage backend: "memory" or "sqlite:<path>"
        #[arg(long, default_value = "memory", env = "LATCHKEY_STORAGE")]
        storage: String,
    },

    /// Run a command while holding a lock
    Run(run::RunArgs),

    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, host, storage } => {
            let store = storage::open_store(&storage)?;
            server::run(&host, port, store).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run(args) => run::run(args).await.map(ExitCode::from),
        Commands::Version => {
            println!("latchkey {}", env!("CARGO_PKG_VERSION"));
            println!("Distributed locks around guarded work");
            Ok(ExitCode::SUCCESS)
        }
    }
}
