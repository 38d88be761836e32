//! Sundew CLI: polls grouped accounts for new posts, transforms them with a
//! language model and saves the results.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);

    if let Err(e) = commands::run(cli).await {
        tracing::error!(error = %e, "fatal error, exiting");
        return Err(e);
    }
    Ok(())
}
