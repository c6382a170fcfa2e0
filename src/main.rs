use clap::Parser;
use colored::Colorize;

use escreen_fetcher::{runner, Config};

#[derive(Parser)]
#[command(name = "escreen-fetcher")]
#[command(version = "0.2.0")]
#[command(about = "Automated retrieval of the eScreen drug-test summary report", long_about = None)]
struct Cli {}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let _cli = Cli::parse();

    println!(
        "{} Starting summary-report retrieval…",
        "🛠".green().bold()
    );

    // Secrets are validated here, before any browser is launched.
    let config = Config::from_env()?;
    println!("  Portal: {}", config.portal_url.cyan());
    println!(
        "  Output: {}",
        config.download_dir.display().to_string().cyan()
    );
    if config.in_container {
        println!("  Profile: {}", "container".yellow());
    }

    std::fs::create_dir_all(&config.download_dir)?;
    std::fs::create_dir_all(&config.debug_dir)?;

    let artifact = runner::run(&config).await?;
    println!(
        "{} Report saved → {}",
        "✅".green().bold(),
        artifact.display()
    );
    Ok(())
}
