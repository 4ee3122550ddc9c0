//! Multi-strategy polling loop.
//!
//! Ticks once per poll interval in market time. At the trigger minute each
//! active runner gets one cycle, all runners in parallel on scoped threads.
//! At the summary minute the notifier is flushed. Both fire at most once
//! per day however many ticks land in the minute.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use log::{error, info, warn};

use crate::audit::{self, AuditLog};
use crate::broker::SharedMarketData;
use crate::calendar::MarketCalendar;
use crate::error::{Error, Result};
use crate::execution::{CycleOutcome, RunOptions, StrategyRunner};
use crate::notify::Notifier;

const HEARTBEAT_TICKS: u64 = 30;
const SLEEP_SLICE: Duration = Duration::from_millis(250);

/// Loop counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub ticks: u64,
    pub rebalances: u64,
    pub errors: u64,
}

pub struct Orchestrator {
    calendar: MarketCalendar,
    runners: Vec<StrategyRunner>,
    data: SharedMarketData,
    notifier: Box<dyn Notifier>,
    audit: Arc<AuditLog>,
    poll_interval: Duration,
    stats: TickStats,
    last_trigger: Option<NaiveDate>,
    last_summary: Option<NaiveDate>,
}

impl Orchestrator {
    pub fn new(
        calendar: MarketCalendar,
        data: SharedMarketData,
        notifier: Box<dyn Notifier>,
        audit: Arc<AuditLog>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            calendar,
            runners: Vec::new(),
            data,
            notifier,
            audit,
            poll_interval,
            stats: TickStats::default(),
            last_trigger: None,
            last_summary: None,
        }
    }

    /// Initialize a runner and add it to the active set. A runner that
    /// could not be built or initialized is excluded and reported.
    pub fn register(
        &mut self,
        name: &str,
        runner: Result<StrategyRunner>,
        now: DateTime<Utc>,
    ) -> bool {
        let mut runner = match runner {
            Ok(r) => r,
            Err(e) => {
                let logged = audit::log_strategy_failed(&self.audit, name, &e.to_string());
                if let Err(audit_err) = logged {
                    warn!("Audit write failed: {audit_err}");
                }
                self.exclude(name, &e);
                return false;
            }
        };

        match runner.initialize(&*self.data, now) {
            Ok(()) => {
                let regime = runner.strategy().current_regime();
                info!("{name} active, regime {regime}");
                self.notifier.record(&format!("{name} initialized, regime {regime}"));
                self.runners.push(runner);
                true
            }
            Err(e) => {
                self.exclude(name, &e);
                false
            }
        }
    }

    fn exclude(&mut self, name: &str, e: &Error) {
        error!("{name} excluded: {e}");
        self.notifier.record(&format!("{name} failed to initialize: {e}"));
    }

    pub fn runners(&self) -> &[StrategyRunner] {
        &self.runners
    }

    pub fn stats(&self) -> TickStats {
        self.stats
    }

    pub fn notifier(&self) -> &dyn Notifier {
        &*self.notifier
    }

    /// One pass of the loop at `now`.
    pub fn tick(&mut self, now: DateTime<Tz>) {
        self.stats.ticks += 1;
        if self.stats.ticks % HEARTBEAT_TICKS == 1 {
            info!(
                "Heartbeat: tick {}, {} active strategies, {}, {} rebalances, {} errors",
                self.stats.ticks,
                self.runners.len(),
                self.market_status(&now),
                self.stats.rebalances,
                self.stats.errors
            );
        }

        let today = now.date_naive();
        if self.calendar.is_rebalance_trigger_time(&now) && self.last_trigger != Some(today) {
            self.last_trigger = Some(today);
            self.run_rebalance_check(now);
        }

        if self.calendar.is_summary_time(&now) && self.last_summary != Some(today) {
            self.last_summary = Some(today);
            if let Err(e) = self.notifier.flush("Daily Report") {
                warn!("Daily summary failed: {e}");
            }
        }
    }

    fn market_status(&self, now: &DateTime<Tz>) -> String {
        if self.calendar.is_market_open(now) {
            "market open".into()
        } else {
            let next = self.calendar.next_open(now);
            format!("market closed until {}", next.format("%a %Y-%m-%d %H:%M %Z"))
        }
    }

    /// Give every active runner one cycle, in parallel.
    pub fn run_rebalance_check(&mut self, now: DateTime<Tz>) {
        info!("Rebalance check for {} strategies at {now}", self.runners.len());
        let opts = RunOptions::default();
        let data: &(dyn volregime_broker::MarketData + Send + Sync) = &*self.data;
        let names: Vec<String> = self.runners.iter().map(|r| r.name().to_string()).collect();

        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = self
                .runners
                .iter_mut()
                .map(|runner| s.spawn(move || runner.run_cycle(now, data, &opts)))
                .collect();
            handles.into_iter().map(|h| h.join()).collect()
        });

        for (name, joined) in names.iter().zip(results) {
            match joined {
                Ok(Ok(outcome)) => self.record_outcome(name, &outcome),
                Ok(Err(e)) => {
                    self.stats.errors += 1;
                    error!("{name}: cycle failed: {e}");
                    self.notifier.record(&format!("{name}: cycle failed: {e}"));
                }
                Err(_) => {
                    self.stats.errors += 1;
                    error!("{name}: cycle panicked");
                    self.notifier.record(&format!("{name}: cycle panicked"));
                }
            }
        }
    }

    fn record_outcome(&mut self, name: &str, outcome: &CycleOutcome) {
        if outcome.rebalanced() {
            self.stats.rebalances += 1;
        }
        self.notifier.record(&outcome.summary(name));
    }

    /// Tick until `shutdown` is set, then flush a final summary.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        let names: Vec<&str> = self.runners.iter().map(|r| r.name()).collect();
        info!(
            "Orchestrator running {} strategies, polling every {}s",
            names.len(),
            self.poll_interval.as_secs()
        );
        if let Err(e) = audit::log_run_started(&self.audit, &names, false) {
            warn!("Audit write failed: {e}");
        }

        while !shutdown.load(Ordering::SeqCst) {
            self.tick(self.calendar.now());
            self.sleep(shutdown);
        }
        self.shutdown();
    }

    fn sleep(&self, shutdown: &AtomicBool) {
        let mut remaining = self.poll_interval;
        while !remaining.is_zero() && !shutdown.load(Ordering::SeqCst) {
            let slice = remaining.min(SLEEP_SLICE);
            thread::sleep(slice);
            remaining -= slice;
        }
    }

    /// Final summary; called once when the loop exits.
    pub fn shutdown(&mut self) {
        info!(
            "Shutting down after {} ticks ({} rebalances, {} errors)",
            self.stats.ticks, self.stats.rebalances, self.stats.errors
        );
        self.notifier.record(&format!(
            "Trading system stopped after {} ticks: {} rebalances, {} errors",
            self.stats.ticks, self.stats.rebalances, self.stats.errors
        ));
        if let Err(e) = self.notifier.flush("Trading System Shutdown") {
            warn!("Shutdown summary failed: {e}");
        }
    }
}

/// Route Ctrl-C and SIGTERM into `shutdown` so the loop exits through
/// [`Orchestrator::shutdown`]. A second interrupt exits immediately.
pub fn install_interrupt_handler(shutdown: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        if on_interrupt(&shutdown) {
            warn!("Second interrupt, exiting without shutdown summary");
            std::process::exit(130);
        }
    })
    .map_err(|e| Error::Interrupt(e.to_string()))
}

/// Set the flag; true if it was already set.
fn on_interrupt(shutdown: &AtomicBool) -> bool {
    let repeated = shutdown.swap(true, Ordering::SeqCst);
    if !repeated {
        info!("Interrupt received, stopping after the current tick");
    }
    repeated
}
