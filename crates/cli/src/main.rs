mod config;
mod simulate;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{CommitConfig, COMMIT_DIR, CONFIG_FILE};
use simulate::SimulateArgs;

#[derive(Parser)]
#[command(name = "circle-commit")]
#[command(about = "Approve-then-act ledger flows", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default .circle-commit/config.toml
    Init,
    /// Run a flow against the simulated ledger
    Simulate(SimulateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => init_project().await,
        Commands::Simulate(args) => {
            let cwd = std::env::current_dir()?;
            let config = CommitConfig::load(&cwd).await?;
            init_tracing();
            simulate::simulate(args, &config).await
        }
    }
}

async fn init_project() -> Result<()> {
    let cwd = std::env::current_dir()?;
    let commit_dir = cwd.join(COMMIT_DIR);
    let config_path = commit_dir.join(CONFIG_FILE);

    if config_path.exists() {
        println!("Already initialized at {}", commit_dir.display());
        return Ok(());
    }

    tokio::fs::create_dir_all(&commit_dir)
        .await
        .with_context(|| format!("Failed to create {}", commit_dir.display()))?;

    let config_content = toml::to_string_pretty(&CommitConfig::default())?;
    tokio::fs::write(&config_path, config_content)
        .await
        .context("Failed to write config file")?;

    println!();
    println!("Initialized circle-commit in {}", cwd.display());
    println!();
    println!("Created:");
    println!("  {}/", COMMIT_DIR);
    println!("  └── {}", CONFIG_FILE);
    println!();
    println!("Next steps:");
    println!("  circle-commit simulate --scenario happy");
    println!("  circle-commit simulate --scenario stuck --guard-timeout-secs 3 --on-manual-check confirm");

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "circle_commit=info,orchestrator=info".into()),
        )
        .init();
}
