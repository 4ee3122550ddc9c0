//! Per-strategy pipeline: schedule → refresh → decide → persist → trade.
//!
//! A [`StrategyRunner`] owns everything one strategy needs (decision core,
//! broker handle, state file) and shares only the audit log. The state file
//! is written before any order goes out, so a crash mid-execution never
//! causes a second rebalance on restart.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use log::{debug, info, warn};
use volregime::{Decision, RecoveryTransition, Strategy, VolatilityRegime};
use volregime_broker::{Broker, MarketData, cents_to_dollars};

use crate::audit::{self, AuditLog};
use crate::broker::as_connection_error;
use crate::config::{Config, StrategyConfig};
use crate::error::{Error, Result};
use crate::reconcile::{self, ExecutionReport, ReconcilerSettings, TradePlan};
use crate::state::{PersistedState, StateStore};

/// Options for a rebalance run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Decide and plan, but neither persist nor trade.
    pub dry_run: bool,
    /// Ignore the schedule.
    pub force: bool,
}

/// What one cycle did.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    NotScheduled,
    DryRun { decision: Decision, plan: TradePlan },
    Executed { decision: Decision, report: ExecutionReport },
}

impl CycleOutcome {
    pub fn rebalanced(&self) -> bool {
        matches!(self, CycleOutcome::Executed { .. })
    }

    /// One summary line for the operator.
    pub fn summary(&self, strategy: &str) -> String {
        match self {
            CycleOutcome::NotScheduled => format!("{strategy}: No rebalance needed"),
            CycleOutcome::DryRun { decision, plan } => format!(
                "{strategy}: [DRY RUN] {} -> {} ({} to close, {} to buy)",
                describe(decision),
                decision.allocation,
                plan.to_liquidate.len(),
                plan.to_adjust.len()
            ),
            CycleOutcome::Executed { decision, report } => format!(
                "{strategy}: {} -> {}; {} closed, {} submitted, {} failed",
                describe(decision),
                decision.allocation,
                report.plan.to_liquidate.len(),
                report.submitted(),
                report.failed()
            ),
        }
    }
}

fn describe(decision: &Decision) -> String {
    match decision.volatility {
        Some(vol) => format!("{} (vol {:.1}%)", decision.regime, vol * 100.0),
        None => format!("{} (vol n/a)", decision.regime),
    }
}

/// One strategy bound to one brokerage account.
pub struct StrategyRunner {
    strategy: Box<dyn Strategy + Send>,
    broker: Box<dyn Broker + Send>,
    store: StateStore,
    audit: Arc<AuditLog>,
    settings: ReconcilerSettings,
}

impl StrategyRunner {
    pub fn new(
        strategy: Box<dyn Strategy + Send>,
        broker: Box<dyn Broker + Send>,
        store: StateStore,
        audit: Arc<AuditLog>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            strategy,
            broker,
            store,
            audit,
            settings,
        }
    }

    /// Build the volatility-regime runner a `[[strategy]]` block describes.
    pub fn from_config(
        config: &Config,
        strategy: &StrategyConfig,
        broker: Box<dyn Broker + Send>,
        audit: Arc<AuditLog>,
    ) -> Result<Self> {
        let core = VolatilityRegime::new(&strategy.name, strategy.frequency, strategy.params())?;
        Ok(Self::new(
            Box::new(core),
            broker,
            StateStore::new(&config.state_dir(), &strategy.name),
            audit,
            ReconcilerSettings::from_config(&config.execution),
        ))
    }

    pub fn name(&self) -> &str {
        self.strategy.name()
    }

    pub fn strategy(&self) -> &dyn Strategy {
        &*self.strategy
    }

    pub fn broker(&self) -> &dyn Broker {
        &*self.broker
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Connect, restore persisted state and seed the price window.
    pub fn initialize(&mut self, data: &dyn MarketData, now: DateTime<Utc>) -> Result<()> {
        let result = self.try_initialize(data, now);
        if let Err(e) = &result {
            warn!("{}: initialization failed: {e}", self.name());
            note(audit::log_strategy_failed(&self.audit, self.name(), &e.to_string()));
        }
        result
    }

    fn try_initialize(&mut self, data: &dyn MarketData, now: DateTime<Utc>) -> Result<()> {
        let name = self.name().to_string();
        let init_err = |reason: String| Error::Initialization {
            name: name.clone(),
            reason,
        };

        as_connection_error(self.broker.connect()).map_err(|e| init_err(e.to_string()))?;

        let restored = match self.store.load() {
            Ok(Some(persisted)) => {
                info!(
                    "{name}: restored state (last rebalance {:?}, {} trades)",
                    persisted.last_rebalance_date, persisted.trade_count
                );
                Some(persisted.to_strategy(now))
            }
            Ok(None) => None,
            Err(e) => {
                warn!("{name}: could not load state, starting fresh: {e}");
                None
            }
        };
        let was_restored = restored.is_some();

        let symbol = self.strategy.signal_symbol();
        let bars = data
            .historical_bars(&symbol, self.strategy.history_days())
            .map_err(|e| init_err(format!("historical data for {symbol}: {e}")))?;
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        self.strategy
            .initialize(&closes, restored, now)
            .map_err(|e| init_err(e.to_string()))?;

        let regime = self.strategy.current_regime();
        info!(
            "{name}: initialized with {} bars of {symbol}, regime {regime}",
            closes.len()
        );
        note(audit::log_strategy_initialized(
            &self.audit,
            &name,
            regime.as_str(),
            closes.len(),
            was_restored,
        ));
        Ok(())
    }

    /// Push the newest close into the window. A failed fetch keeps the
    /// window as it was.
    pub fn refresh_market_data(&mut self, data: &dyn MarketData) {
        let symbol = self.strategy.signal_symbol();
        match data.historical_bars(&symbol, 2) {
            Ok(bars) => match bars.last() {
                Some(bar) => {
                    debug!("{}: latest {symbol} close {:.2}", self.name(), bar.close);
                    self.strategy.on_price(bar.close);
                }
                None => warn!("{}: no recent bars for {symbol}", self.name()),
            },
            Err(e) => warn!("{}: market data refresh failed: {e}", self.name()),
        }
    }

    /// Run one cycle at `now` (market time).
    pub fn run_cycle(
        &mut self,
        now: DateTime<Tz>,
        data: &dyn MarketData,
        opts: &RunOptions,
    ) -> Result<CycleOutcome> {
        let result = self.try_run_cycle(now, data, opts);
        if let Err(e) = &result {
            note(audit::log_cycle_error(&self.audit, self.name(), &e.to_string()));
        }
        result
    }

    fn try_run_cycle(
        &mut self,
        now: DateTime<Tz>,
        data: &dyn MarketData,
        opts: &RunOptions,
    ) -> Result<CycleOutcome> {
        let name = self.name().to_string();
        if !self.strategy.is_initialized() {
            return Err(Error::Initialization {
                name,
                reason: "strategy not initialized".into(),
            });
        }

        // 1. Schedule
        if opts.force {
            warn!("{name}: forced rebalance, schedule bypassed");
        } else if !self.strategy.should_rebalance_today(now.date_naive()) {
            debug!("{name}: no rebalance needed today");
            note(audit::log_cycle_skipped(&self.audit, &name, "not scheduled"));
            return Ok(CycleOutcome::NotScheduled);
        }

        info!("{name}: executing rebalance");

        // 2-3. Fresh data, then the decision
        self.refresh_market_data(data);
        let decision = self.strategy.calculate_signals(now.fixed_offset());
        log_decision(&name, &decision);
        note(audit::log_decision(&self.audit, &name, &decision, opts.force));

        if opts.dry_run {
            let plan =
                reconcile::build_plan(&*self.broker, &decision.allocation, self.settings.policy)?;
            info!("{name}: [DRY RUN] state not saved, no orders submitted");
            return Ok(CycleOutcome::DryRun { decision, plan });
        }

        // 4. Persist before touching the broker
        let persisted = PersistedState::from_strategy(&self.strategy.state());
        match self.store.save(&persisted) {
            Ok(()) => note(audit::log_state_saved(
                &self.audit,
                &name,
                self.store.path(),
                persisted.trade_count,
            )),
            Err(e) => {
                warn!("{name}: state save failed, trading anyway: {e}");
                note(audit::log_state_save_failed(&self.audit, &name, &e.to_string()));
            }
        }

        let plan =
            reconcile::build_plan(&*self.broker, &decision.allocation, self.settings.policy)?;

        // 5. Trade
        let report = reconcile::execute(&*self.broker, plan, &self.settings)?;
        note(audit::log_execution(&self.audit, &name, &report));
        note(audit::log_cycle_completed(&self.audit, &name, &report));
        info!(
            "{name}: rebalance complete, {} submitted, {} failed",
            report.submitted(),
            report.failed()
        );

        Ok(CycleOutcome::Executed { decision, report })
    }
}

fn log_decision(name: &str, decision: &Decision) {
    match decision.volatility {
        Some(vol) => info!("{name}: volatility {:.2}%", vol * 100.0),
        None => warn!("{name}: volatility unavailable, holding benchmark"),
    }
    match decision.recovery {
        RecoveryTransition::Entered => warn!("{name}: RECOVERY MODE ACTIVATED"),
        RecoveryTransition::Exited { days_active } => {
            info!("{name}: recovery mode ended after {days_active} days")
        }
        RecoveryTransition::Unchanged => {}
    }
    info!("{name}: regime {} -> {}", decision.regime, decision.allocation);
}

/// Audit writes never abort a cycle.
fn note(result: Result<()>) {
    if let Err(e) = result {
        warn!("Audit write failed: {e}");
    }
}

/// Print persisted state for every configured strategy.
pub fn show_status(config: &Config) -> Result<()> {
    println!("STRATEGIES:");
    for strategy in &config.strategies {
        let store = StateStore::new(&config.state_dir(), &strategy.name);
        let enabled = if strategy.enabled { "" } else { " (disabled)" };
        println!("  {} [{}]{enabled}", strategy.name, strategy.frequency);
        match store.load() {
            Ok(Some(state)) => {
                println!(
                    "    last rebalance: {}",
                    state
                        .last_rebalance_date
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "never".into())
                );
                println!(
                    "    last regime:    {}",
                    state.last_regime.as_deref().unwrap_or("-")
                );
                println!("    trades:         {}", state.trade_count);
                if state.in_recovery_mode {
                    println!(
                        "    recovery since: {}",
                        state
                            .recovery_mode_start
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| "?".into())
                    );
                }
            }
            Ok(None) => println!("    no saved state"),
            Err(e) => println!("    unreadable state: {e}"),
        }
    }
    Ok(())
}

/// Print an account's positions and weights.
pub fn show_positions(name: &str, broker: &dyn Broker) -> Result<()> {
    let account = as_connection_error(broker.account())?;
    let positions = as_connection_error(broker.positions())?;

    println!(
        "{name}: ${} equity, ${} cash",
        cents_to_dollars(account.equity_cents),
        cents_to_dollars(account.cash_cents)
    );
    if positions.is_empty() {
        println!("  No positions.");
        return Ok(());
    }

    let weights = reconcile::current_allocation(&positions, account.equity_cents);
    for p in &positions {
        println!(
            "  {:8} {:>12.4} @ ${:>9} = ${:>12}  ({:.1}%)",
            p.symbol,
            p.quantity,
            cents_to_dollars(p.current_price_cents),
            cents_to_dollars(p.market_value_cents),
            weights.weight(&p.symbol) * 100.0
        );
    }
    Ok(())
}
