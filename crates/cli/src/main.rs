//! Duckling CLI, the main entry point.
//!
//! Commands:
//! - `onboard`  Write a starter config
//! - `chat`     Interactive or single-message debugging chat
//! - `gateway`  Start the HTTP/SSE server
//! - `tools`    List the tools the assistant can call

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "duckling",
    about = "Duckling, a rubber-duck debugging assistant",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Onboard,

    /// Talk a bug through with Duckling
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Use a running gateway instead of calling the provider directly
        #[arg(long, value_name = "URL", env = "DUCKLING_REMOTE")]
        remote: Option<String>,
    },

    /// Start the HTTP gateway server
    Gateway {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List the enabled tools
    Tools,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Chat { message, remote } => commands::chat::run(message, remote).await?,
        Commands::Gateway { port } => commands::gateway::run(port).await?,
        Commands::Tools => commands::tools::run().await?,
    }

    Ok(())
}
