mod aggregate;
mod badge;
mod cache;
mod config;
mod domain;
mod gerrit;
mod monitor;
mod notify;
mod refresh;
mod storage;

use std::{
    io::{self, BufRead},
    path::PathBuf,
    process::ExitCode,
    sync::{
        Arc,
        mpsc::{self, RecvTimeoutError},
    },
    thread,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

use badge::BadgeState;
use cache::ResultCache;
use config::Config;
use gerrit::GerritClient;
use monitor::{CycleReport, Monitor, RefreshScheduler, Trigger};
use notify::{LogNotifier, NotificationCenter};
use storage::{JsonFileStore, KeyValueStore, MemoryStore};

/// Watches code reviews across Gerrit hosts and reports what needs attention
#[derive(Parser, Debug)]
#[command(name = "cl-monitor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to ~/.cl-monitor/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Refresh once and list CLs by category
    Once,
    /// Print only the summary indicator
    Status,
    /// Keep refreshing on a timer; press Enter to refresh immediately
    Watch,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "cl_monitor=debug"
    } else {
        "cl_monitor=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<ExitCode> {
    let path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let config =
        Config::load(&path).with_context(|| format!("loading {}", path.display()))?;
    let monitor = build_monitor(&config)?;

    match cli.command {
        Commands::Once => Ok(report_exit(monitor.refresh(Trigger::User), true)),
        Commands::Status => Ok(report_exit(monitor.refresh(Trigger::User), false)),
        Commands::Watch => watch(&monitor, RefreshScheduler::new(config.refresh_interval())),
    }
}

fn build_monitor(config: &Config) -> Result<Monitor> {
    let client = GerritClient::new(config.credentials(), config.only_attention_set)
        .context("building HTTP client")?;

    let store: Arc<dyn KeyValueStore> = match JsonFileStore::initialize() {
        Ok(store) => {
            debug!(path = %store.path().display(), "persisting notification state");
            Arc::new(store)
        }
        Err(err) => {
            warn!("Notification state cannot be persisted ({err}); using memory only.");
            Arc::new(MemoryStore::default())
        }
    };

    Ok(Monitor::new(
        config.enabled_hosts(),
        config.notification_settings(),
        Arc::new(client),
        ResultCache::new(config.cache_freshness()),
        NotificationCenter::new(store, Arc::new(LogNotifier)),
    ))
}

fn watch(monitor: &Monitor, mut scheduler: RefreshScheduler) -> ! {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            if line.is_err() || tx.send(()).is_err() {
                break;
            }
        }
    });

    let mut stdin_open = true;
    loop {
        let trigger = if stdin_open {
            match rx.recv_timeout(scheduler.time_until_due()) {
                Ok(()) => Trigger::User,
                Err(RecvTimeoutError::Timeout) => Trigger::Timer,
                Err(RecvTimeoutError::Disconnected) => {
                    stdin_open = false;
                    continue;
                }
            }
        } else {
            if !scheduler.should_trigger() {
                thread::sleep(scheduler.time_until_due());
            }
            Trigger::Timer
        };

        print_report(monitor.refresh(trigger), trigger == Trigger::User);
        scheduler.mark_triggered();
    }
}

fn report_exit(outcome: Result<CycleReport, refresh::RefreshError>, detailed: bool) -> ExitCode {
    let failed = outcome.is_err();
    print_report(outcome, detailed);
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn print_report(outcome: Result<CycleReport, refresh::RefreshError>, detailed: bool) {
    let report = match outcome {
        Ok(report) => report,
        Err(err) => {
            println!("{}", BadgeState::error(&err));
            return;
        }
    };

    println!("{}", report.badge);
    if !detailed {
        return;
    }

    for record in &report.errors {
        let hint = if record.needs_login() {
            format!(" (log in at {})", record.host)
        } else {
            String::new()
        };
        println!("  ! {record}{hint}");
    }
    for (category, cls) in report.results.sections() {
        println!();
        println!("{}", category.section_header(cls.len()));
        for cl in cls {
            let reviewers = cl
                .reviewers
                .iter()
                .map(|reviewer| {
                    if reviewer.approved() {
                        format!("{}+", reviewer.name)
                    } else {
                        reviewer.name.clone()
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            println!("  {:<24} {:<32} {}", cl.author, reviewers, cl.subject);
            println!(
                "  {} (#{}, updated {})",
                cl.url,
                cl.number,
                cl.updated_at.format("%Y-%m-%d %H:%M")
            );
        }
    }
}
