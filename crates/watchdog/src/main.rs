use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use a3s_selfupdate::config::duration_serde::parse_duration;
use a3s_selfupdate::platform;
use a3s_selfupdate::watchdog::resolve_target;
use a3s_selfupdate::{SwapPlan, Watchdog, WatchdogOutcome};
use anyhow::Context;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "a3s-swap-watchdog",
    about = "Swap a staged binary into place once the running app exits, then relaunch it"
)]
struct Args {
    /// Swap plan written by the app. Takes precedence over the other flags.
    #[arg(long)]
    plan: Option<PathBuf>,

    /// Executable to replace (default: the app found beside this watchdog)
    #[arg(long)]
    exe: Option<PathBuf>,

    /// Expected app name when --exe is not given
    #[arg(long, default_value = "app")]
    app_name: String,

    /// Staged binary (default: <exe>.pending)
    #[arg(long = "new")]
    staging: Option<PathBuf>,

    /// Maximum time to wait for the app to exit and the swap to land
    #[arg(long, default_value = "60s", value_parser = parse_duration)]
    wait: Duration,

    /// Log file (default: launcher.log beside this watchdog)
    #[arg(long)]
    log: Option<PathBuf>,

    /// Pid of the app to wait for; 0 skips waiting
    #[arg(long, default_value_t = 0)]
    pid: u32,
}

/// Turn the command line into a plan. Also returns the plan file to delete
/// after the run, if one was given.
fn build_plan(args: Args, self_exe: Option<&Path>) -> anyhow::Result<(SwapPlan, Option<PathBuf>)> {
    if let Some(plan_file) = args.plan {
        let plan = SwapPlan::load(&plan_file)
            .with_context(|| format!("loading swap plan {}", plan_file.display()))?;
        return Ok((plan, Some(plan_file)));
    }

    let home = self_exe
        .map(platform::parent_dir)
        .unwrap_or_else(|| PathBuf::from("."));
    let target_exe = match args.exe {
        Some(exe) => exe,
        None => {
            let expected = home.join(format!("{}{}", args.app_name, platform::exe_suffix()));
            resolve_target(&expected, self_exe)
        }
    };
    let staging_path = args
        .staging
        .unwrap_or_else(|| platform::with_suffix(&target_exe, ".pending"));
    let log_path = args.log.unwrap_or_else(|| home.join("launcher.log"));

    Ok((
        SwapPlan {
            parent_pid: args.pid,
            target_exe,
            staging_path,
            max_wait: args.wait,
            log_path,
        },
        None,
    ))
}

/// Log to the plan's log file, or to stderr if it cannot be opened.
fn init_logging(log_path: &Path) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let dir = platform::parent_dir(log_path);
    let file_name = log_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "launcher.log".into());
    let appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::NEVER)
        .filename_prefix(file_name)
        .build(&dir);

    match appender {
        Ok(appender) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(appender)
            .with_ansi(false)
            .init(),
        Err(e) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            tracing::warn!(path = %log_path.display(), error = %e, "cannot open log file, logging to stderr");
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let self_exe = std::env::current_exe().ok();

    let (plan, plan_file) = match build_plan(args, self_exe.as_deref()) {
        Ok(built) => built,
        Err(e) => {
            eprintln!("[a3s-swap-watchdog] {e:#}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&plan.log_path);

    let outcome = Watchdog::new().with_self_exe(self_exe).run(&plan);

    if let Some(plan_file) = plan_file {
        if let Err(e) = std::fs::remove_file(&plan_file) {
            tracing::warn!(path = %plan_file.display(), error = %e, "could not remove swap plan");
        }
    }

    match &outcome {
        WatchdogOutcome::Swapped { launched } => {
            tracing::info!(path = %launched.display(), "update applied");
        }
        WatchdogOutcome::Passthrough { launched } => {
            tracing::info!(path = %launched.display(), "no update, app relaunched");
        }
        WatchdogOutcome::RolledBack { launched, error } => {
            tracing::error!(path = %launched.display(), error = %error, "update rolled back");
        }
        WatchdogOutcome::Failed(error) => {
            tracing::error!(error = %error, "watchdog failed");
        }
    }

    if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
