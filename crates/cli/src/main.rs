use std::path::PathBuf;
use std::sync::Arc;

use a3s_selfupdate::{BackgroundPoller, UpdateCoordinator, UpdateEvent, UpdateStatus, UpdaterConfig};
use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::sync::broadcast;

#[derive(Parser)]
#[command(
    name = "a3s-update",
    about = "a3s-update: check for, download and apply app updates"
)]
struct Cli {
    /// Path to the updater config
    #[arg(short, long, default_value = "a3s-update.toml")]
    config: PathBuf,

    /// Repository owner (overrides the config)
    #[arg(long)]
    owner: Option<String>,

    /// Repository name (overrides the config)
    #[arg(long)]
    repo: Option<String>,

    /// Executable to update (default: from config, else this binary)
    #[arg(long)]
    target: Option<PathBuf>,

    /// Version of the installed app
    #[arg(long = "current", default_value = env!("CARGO_PKG_VERSION"))]
    current_version: String,

    /// Print statuses as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the release service for the latest release
    Check,
    /// Download the latest release into the staging file
    Download,
    /// Hand the staged update to the swap watchdog and exit
    Apply,
    /// Poll for new releases until interrupted
    Watch,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => fail(e),
    };

    // stderr keeps --json output parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback_filter(&config)),
        )
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    if let Err(e) = run(cli, config).await {
        fail(e);
    }
}

fn fail(e: anyhow::Error) -> ! {
    eprintln!("{} {e:#}", "[a3s-update]".red().bold());
    std::process::exit(1);
}

/// Filter used when `RUST_LOG` is unset.
fn fallback_filter(config: &UpdaterConfig) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::new(&config.log_level)
}

fn load_config(cli: &Cli) -> anyhow::Result<UpdaterConfig> {
    let mut config = UpdaterConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(owner) = &cli.owner {
        config.owner = owner.clone();
    }
    if let Some(repo) = &cli.repo {
        config.repo = repo.clone();
    }
    if let Some(target) = &cli.target {
        config.target_exe = Some(target.clone());
    }
    if !config.is_configured() {
        anyhow::bail!("no release source configured; set owner and repo in {} or pass --owner/--repo", cli.config.display());
    }
    Ok(config)
}

async fn run(cli: Cli, config: UpdaterConfig) -> anyhow::Result<()> {
    let coordinator = Arc::new(UpdateCoordinator::new(config)?);
    coordinator.set_current_version(cli.current_version.clone()).await;

    match cli.command {
        Commands::Check => {
            let status = coordinator.check("").await;
            print_status(&status, cli.json)?;
            fail_on_error(&status)
        }
        Commands::Download => {
            let events = coordinator.subscribe();
            let printer = tokio::spawn(print_events(events));
            let status = coordinator.download().await;
            printer.abort();
            print_status(&status, cli.json)?;
            fail_on_error(&status)
        }
        Commands::Apply => {
            let plan = coordinator.plan_apply_on_exit().await?;
            println!(
                "{} swap planned for {}",
                "✓".green(),
                plan.target_exe.display().to_string().cyan()
            );
            println!("  the watchdog log is {}", plan.log_path.display().to_string().dimmed());
            Ok(())
        }
        Commands::Watch => {
            let shutdown = coordinator.shutdown_token();
            let printer = tokio::spawn(print_events(coordinator.subscribe()));
            let poller = BackgroundPoller::new(coordinator.clone(), shutdown.clone()).spawn();
            println!(
                "{} watching {} for releases newer than {}",
                "→".cyan(),
                coordinator.config().latest_release_url().dimmed(),
                cli.current_version.cyan()
            );

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    println!("\n{} shutting down...", "→".yellow());
                    shutdown.cancel();
                }
                _ = shutdown.cancelled() => {}
            }
            poller.await?;
            printer.abort();
            Ok(())
        }
    }
}

async fn print_events(mut events: broadcast::Receiver<UpdateEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => print_event(&event),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_event(event: &UpdateEvent) {
    let name = event.name().dimmed();
    match event {
        UpdateEvent::Progress(p) => match p.total {
            Some(total) if total > 0 => {
                println!("{name} {} / {} bytes ({}%)", p.downloaded, total, p.downloaded * 100 / total)
            }
            _ => println!("{name} {} bytes", p.downloaded),
        },
        UpdateEvent::Downloaded { path } => {
            println!("{name} {}", path.display().to_string().cyan())
        }
        UpdateEvent::Available { tag } => println!("{name} {} {}", "↑".green(), tag.green()),
    }
}

fn print_status(status: &UpdateStatus, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(status)?);
        return Ok(());
    }

    let latest = if status.latest_version.is_empty() {
        "none".dimmed().to_string()
    } else {
        status.latest_version.cyan().to_string()
    };
    println!("  current    {}", status.current_version);
    println!("  latest     {latest}");
    if status.available {
        println!("  {} update available", "↑".green());
    } else if status.error.is_none() {
        println!("  {} up to date", "✓".green());
    }
    if status.downloaded {
        println!("  {} downloaded, run {} to install", "✓".green(), "a3s-update apply".cyan());
    }
    Ok(())
}

fn fail_on_error(status: &UpdateStatus) -> anyhow::Result<()> {
    match &status.error {
        Some(error) => anyhow::bail!("{error}"),
        None => Ok(()),
    }
}
