mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use mediagate::config::Config;
use mediagate::orchestrator::Orchestrator;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let config = Config::load().map_err(|e| format!("Failed to load config: {}", e))?;
    mediagate::telemetry::init(&config.telemetry);
    info!("Configuration loaded");

    match cli.command {
        Commands::Server(args) => mediagate::api::run(config, args.address).await?,
        Commands::Formats(args) => {
            let orchestrator = Orchestrator::new(&config);
            let info = orchestrator
                .resolve(&args.url)
                .await
                .map_err(|e| format!("{}: {}", e.code(), e.message()))?;
            println!("{}", serde_json::to_string_pretty(info.as_ref())?);
        }
    }

    Ok(())
}
