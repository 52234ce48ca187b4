//! dechat client - connects to one or more chat servers.

use clap::Parser;
use dechat::client::{self, ClientConfig};

#[derive(Parser)]
#[command(name = "dechat-client", version, about = "Federated chat client")]
struct Cli {
    /// Multi-connection mode: numbered displays and display switching.
    #[arg(long)]
    ui: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    client::run(ClientConfig { ui: cli.ui }).await?;
    Ok(())
}
