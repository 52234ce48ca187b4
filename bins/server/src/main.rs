//! dechat server - hosts channels and links them across servers.
//!
//! Reads `config/MOTD.txt`, `config/HELP.txt`, and `config/RULES.txt`
//! from the working directory on demand; each file is optional.

use std::time::Duration;

use clap::Parser;
use dechat::server::Server;
use tracing::warn;

#[derive(Parser)]
#[command(name = "dechat-server", version, about = "Federated chat server")]
struct Cli {
    /// Hostname to bind and advertise to peers.
    #[arg(default_value = "localhost")]
    host: String,

    /// Port to bind.
    #[arg(default_value_t = 9996)]
    port: u16,

    /// Retry a failed bind every 3 seconds instead of exiting.
    #[arg(long)]
    auto_retry: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let server = loop {
        match Server::bind(&cli.host, cli.port).await {
            Ok(server) => break server,
            Err(e) if cli.auto_retry => {
                warn!(error = %e, "bind failed, retrying in 3s");
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
            Err(e) => return Err(e.into()),
        }
    };

    server.run().await?;
    Ok(())
}
