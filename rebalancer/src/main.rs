//! CLI entry point for the volatility-regime rebalancer.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::{info, warn};

use volregime_broker::Broker;
use volregime_rebalancer::audit::AuditLog;
use volregime_rebalancer::broker;
use volregime_rebalancer::calendar::MarketCalendar;
use volregime_rebalancer::config::Config;
use volregime_rebalancer::error::Error;
use volregime_rebalancer::execution::{self, CycleOutcome, RunOptions, StrategyRunner};
use volregime_rebalancer::notify::DailySummary;
use volregime_rebalancer::orchestrator::{self, Orchestrator};

#[derive(Parser)]
#[command(name = "rebalancer")]
#[command(about = "Volatility-regime rebalancer for Alpaca accounts")]
#[command(version)]
struct Cli {
    /// Path to config.toml
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduling loop for every enabled strategy
    Run {
        /// Stop gracefully once this file exists [default: <state dir>/STOP]
        #[arg(long)]
        stop_file: Option<PathBuf>,
    },

    /// Run one strategy cycle now
    Once {
        /// Strategy name from the config
        name: String,

        /// Ignore the rebalance schedule
        #[arg(long)]
        force: bool,

        /// Show decision and trade plan without saving state or trading
        #[arg(long)]
        dry_run: bool,

        /// Skip the confirmation prompt for --force (for automation/cron)
        #[arg(long)]
        yes: bool,
    },

    /// Show persisted state for every strategy
    Status,

    /// Show live positions for every enabled account
    Positions,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Run { stop_file } => {
            let stop_file = stop_file.unwrap_or_else(|| config.state_dir().join("STOP"));
            run_loop(&config, &stop_file)
        }
        Command::Once {
            name,
            force,
            dry_run,
            yes,
        } => run_once(&config, &name, RunOptions { dry_run, force }, yes),
        Command::Status => execution::show_status(&config).map_err(Into::into),
        Command::Positions => show_all_positions(&config),
    };

    if let Err(e) = result {
        match e.downcast_ref::<Error>() {
            Some(Error::Aborted(msg)) => {
                eprintln!("{msg}");
                process::exit(0);
            }
            Some(Error::Initialization { .. }) => {
                eprintln!("\nError: {e:#}");
                process::exit(2);
            }
            _ => {
                eprintln!("Error: {e:#}");
                process::exit(1);
            }
        }
    }
}

fn run_loop(config: &Config, stop_file: &Path) -> anyhow::Result<()> {
    let audit = Arc::new(AuditLog::open(&config.audit_path()).context("opening audit log")?);
    let calendar = MarketCalendar::from_config(&config.calendar)?;
    let data = broker::alpaca_data(config).context("creating market data client")?;

    let mut orchestrator = Orchestrator::new(
        calendar,
        data,
        Box::new(DailySummary::new(config.log_dir())),
        audit.clone(),
        Duration::from_secs(config.calendar.poll_interval_secs),
    );

    let now = Utc::now();
    for strategy in config.enabled_strategies() {
        let runner = broker::alpaca_account(strategy)
            .and_then(|b| StrategyRunner::from_config(config, strategy, b, audit.clone()));
        orchestrator.register(&strategy.name, runner, now);
    }

    if orchestrator.runners().is_empty() {
        return Err(Error::Initialization {
            name: "*".into(),
            reason: "no strategy could be initialized".into(),
        }
        .into());
    }

    // A stale stop file would end the loop before the first tick.
    if stop_file.exists() {
        fs::remove_file(stop_file).with_context(|| format!("removing {}", stop_file.display()))?;
    }
    let shutdown = Arc::new(AtomicBool::new(false));
    orchestrator::install_interrupt_handler(shutdown.clone())?;
    watch_stop_file(stop_file.to_path_buf(), shutdown.clone());
    info!("Press Ctrl-C or create {} to stop", stop_file.display());

    orchestrator.run(&shutdown);
    Ok(())
}

fn watch_stop_file(path: PathBuf, shutdown: Arc<AtomicBool>) {
    thread::spawn(move || {
        while !shutdown.load(Ordering::SeqCst) {
            if path.exists() {
                info!("Stop file {} found, shutting down", path.display());
                if let Err(e) = fs::remove_file(&path) {
                    warn!("Could not remove stop file: {e}");
                }
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            thread::sleep(Duration::from_secs(1));
        }
    });
}

fn run_once(config: &Config, name: &str, opts: RunOptions, yes: bool) -> anyhow::Result<()> {
    let strategy = config.strategy(name)?;
    let audit = Arc::new(AuditLog::open(&config.audit_path()).context("opening audit log")?);

    if opts.force && !opts.dry_run && !yes {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!("Force rebalance of {name}, ignoring its schedule?"))
            .default(false)
            .interact()
            .map_err(|e| Error::Aborted(format!("confirmation prompt failed: {e}")))?;

        audit.log("user_confirmed", name, serde_json::json!({ "approved": confirmed }))?;
        if !confirmed {
            return Err(Error::Aborted("Aborted.".into()).into());
        }
    }

    let data = broker::alpaca_data(config).context("creating market data client")?;
    let account = broker::alpaca_account(strategy)?;
    let mut runner = StrategyRunner::from_config(config, strategy, account, audit)?;
    runner.initialize(&*data, Utc::now())?;

    let calendar = MarketCalendar::from_config(&config.calendar)?;
    let outcome = runner.run_cycle(calendar.now(), &*data, &opts)?;

    match &outcome {
        CycleOutcome::NotScheduled => {
            println!("Not scheduled today. Use --force to rebalance anyway.");
        }
        CycleOutcome::DryRun { plan, .. } => {
            print!("\n{plan}");
            println!("\n[DRY RUN] State not saved, no orders submitted.");
        }
        CycleOutcome::Executed { report, .. } => {
            print!("\n{}", report.plan);
            println!(
                "\n{} submitted, {} failed. Audit logged to {}",
                report.submitted(),
                report.failed(),
                config.audit_path().display()
            );
        }
    }
    println!("{}", outcome.summary(name));
    Ok(())
}

fn show_all_positions(config: &Config) -> anyhow::Result<()> {
    for strategy in config.enabled_strategies() {
        let shown = broker::alpaca_account(strategy).and_then(|mut account| {
            broker::as_connection_error(account.connect())?;
            execution::show_positions(&strategy.name, &*account)
        });
        if let Err(e) = shown {
            println!("{}: {e}", strategy.name);
        }
        println!();
    }
    Ok(())
}
