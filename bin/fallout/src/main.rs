//! fallout is a CLI tool to deploy, configure and hand over the Fallout contracts.

mod cli;
mod summary;

use anyhow::Result;
use clap::Parser;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let deployment = cli.deployment()?;

    tracing::info!(
        plan = %deployment.plan.display(),
        rpc_url = %deployment.rpc_url,
        signer = %deployment.signer.kind,
        record_dir = %deployment.record_dir.display(),
        "Loaded deployment configuration"
    );

    if cli.save_config {
        deployment.save_config()?;
    }

    let report = deployment.run(!cli.yes).await?;
    println!("{}", summary::render(&report));

    Ok(())
}
