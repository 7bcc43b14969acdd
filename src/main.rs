use anyhow::Result;
use clap::Parser;
use pattern_archive::cli::{execute_command, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    execute_command(cli.command).await
}
