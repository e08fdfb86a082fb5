//! Validator client binary

use anyhow::anyhow;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use validator_client::cli::{self, Cli};

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("validator_client=info"))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().try_init().map_err(|e| anyhow!(e))
    } else {
        builder.try_init().map_err(|e| anyhow!(e))
    }
}

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    if let Err(e) = init_tracing(args.log_json) {
        eprintln!("warning: logging disabled: {}", e);
    }

    if let Err(e) = cli::run(args).await {
        tracing::debug!(error = ?e, "Command failed");
        eprintln!("error: {}", e);
        std::process::exit(e.exit_code());
    }
}
