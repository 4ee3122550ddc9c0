//! Trade reconciliation: current holdings vs. target allocation.
//!
//! A plan lists the symbols to close and the symbols to buy up to their
//! target weight. Execution closes first, waits (bounded) for the broker to
//! report the closes, then submits buys sized by the remaining deficit.

use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};
use volregime::{Allocation, Symbol};
use volregime_broker::{Broker, OrderId, OrderSize, Position};

use crate::broker::as_connection_error;
use crate::config::{ExecutionConfig, ExecutionPolicy};
use crate::error::Result;

/// Weight drift below this is not worth trading.
pub const DRIFT_TOLERANCE: f64 = 0.001;

/// Execution knobs, resolved from `[execution]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcilerSettings {
    pub close_timeout: Duration,
    pub close_poll: Duration,
    pub cycle_deadline: Duration,
    pub use_fractional: bool,
    pub min_notional_cents: i64,
    pub policy: ExecutionPolicy,
}

impl ReconcilerSettings {
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            close_timeout: Duration::from_secs(config.close_timeout_secs),
            close_poll: Duration::from_millis(config.close_poll_ms),
            cycle_deadline: Duration::from_secs(config.cycle_deadline_secs),
            use_fractional: config.use_fractional,
            min_notional_cents: (config.min_notional_usd * 100.0).round() as i64,
            policy: config.policy,
        }
    }
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self::from_config(&ExecutionConfig::default())
    }
}

/// Weights of the positions a broker reports, noise dropped.
pub fn current_allocation(positions: &[Position], equity_cents: i64) -> Allocation {
    Allocation::from_market_values(
        positions
            .iter()
            .map(|p| (p.symbol, p.market_value_cents as f64)),
        equity_cents as f64,
    )
}

/// One symbol to move toward its target weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adjustment {
    pub symbol: Symbol,
    pub target_weight: f64,
    pub current_weight: f64,
}

impl Adjustment {
    /// Signed weight still missing.
    pub fn delta(&self) -> f64 {
        self.target_weight - self.current_weight
    }
}

/// What a cycle intends to trade.
#[derive(Debug, Clone, PartialEq)]
pub struct TradePlan {
    pub target: Allocation,
    pub current: Allocation,
    pub to_liquidate: Vec<Symbol>,
    pub to_adjust: Vec<Adjustment>,
    /// Close through a single close-everything request.
    pub close_all: bool,
}

impl TradePlan {
    pub fn is_empty(&self) -> bool {
        self.to_liquidate.is_empty() && self.to_adjust.is_empty()
    }
}

impl std::fmt::Display for TradePlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "TRADE PLAN:")?;
        writeln!(f, "  Current: {}", self.current)?;
        writeln!(f, "  Target:  {}", self.target)?;
        if self.is_empty() {
            return writeln!(f, "  Nothing to trade.");
        }
        for symbol in &self.to_liquidate {
            writeln!(f, "  CLOSE  {symbol}")?;
        }
        for adj in &self.to_adjust {
            writeln!(
                f,
                "  BUY    {:8} {:>6.1}% -> {:>6.1}%",
                adj.symbol,
                adj.current_weight * 100.0,
                adj.target_weight * 100.0
            )?;
        }
        Ok(())
    }
}

/// Diff-based plan: close what the target drops, top up what drifted.
pub fn plan_trades(current: &Allocation, target: &Allocation) -> TradePlan {
    let target = target.normalized();

    let to_liquidate = current
        .symbols()
        .filter(|s| target.weight(s) <= 0.0)
        .collect();

    let to_adjust = target
        .iter()
        .filter(|&(_, weight)| weight > 0.0)
        .map(|(symbol, target_weight)| Adjustment {
            symbol,
            target_weight,
            current_weight: current.weight(&symbol),
        })
        .filter(|adj| adj.delta().abs() > DRIFT_TOLERANCE)
        .collect();

    TradePlan {
        target,
        current: current.clone(),
        to_liquidate,
        to_adjust,
        close_all: false,
    }
}

/// Close everything held, then enter the full target from cash.
pub fn plan_liquidate_all(current: &Allocation, target: &Allocation) -> TradePlan {
    let target = target.normalized();
    let to_adjust = target
        .iter()
        .filter(|&(_, weight)| weight > 0.0)
        .map(|(symbol, target_weight)| Adjustment {
            symbol,
            target_weight,
            current_weight: 0.0,
        })
        .collect();

    TradePlan {
        target,
        current: current.clone(),
        to_liquidate: current.symbols().collect(),
        to_adjust,
        close_all: !current.is_empty(),
    }
}

/// Build a plan from the broker's live holdings.
pub fn build_plan(
    broker: &dyn Broker,
    target: &Allocation,
    policy: ExecutionPolicy,
) -> Result<TradePlan> {
    let account = as_connection_error(broker.account())?;
    let positions = as_connection_error(broker.positions())?;
    let current = current_allocation(&positions, account.equity_cents);
    Ok(match policy {
        ExecutionPolicy::Reconcile => plan_trades(&current, target),
        ExecutionPolicy::LiquidateAll => plan_liquidate_all(&current, target),
    })
}

/// How the wait for closed positions ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CloseWait {
    NotNeeded,
    Closed { polls: u32 },
    TimedOut { still_open: Vec<Symbol> },
}

/// Poll positions until none of `symbols` is held or `budget` runs out.
pub fn wait_for_closure(
    broker: &dyn Broker,
    symbols: &[Symbol],
    poll: Duration,
    budget: Duration,
) -> CloseWait {
    if symbols.is_empty() {
        return CloseWait::NotNeeded;
    }

    let start = Instant::now();
    let mut polls = 0;
    loop {
        polls += 1;
        let still_open = match broker.positions() {
            Ok(positions) => symbols
                .iter()
                .filter(|s| positions.iter().any(|p| p.symbol == **s))
                .copied()
                .collect::<Vec<_>>(),
            Err(e) => {
                warn!("Position check failed while waiting for closes: {e}");
                symbols.to_vec()
            }
        };

        if still_open.is_empty() {
            info!("Liquidations settled after {polls} poll(s)");
            return CloseWait::Closed { polls };
        }

        let elapsed = start.elapsed();
        if elapsed >= budget {
            warn!(
                "Positions still open after {:.1}s: {:?}; proceeding",
                elapsed.as_secs_f64(),
                still_open.iter().map(|s| s.as_str()).collect::<Vec<_>>()
            );
            return CloseWait::TimedOut { still_open };
        }

        thread::sleep(poll.min(budget - elapsed));
    }
}

/// Per-symbol result of an adjustment.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderOutcome {
    Submitted {
        id: OrderId,
        size: OrderSize,
        /// The notional order failed and whole shares were bought instead.
        fallback: bool,
    },
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderFill {
    pub symbol: Symbol,
    pub target_weight: f64,
    pub outcome: OrderOutcome,
}

/// Everything one execution did.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub plan: TradePlan,
    pub close_failures: Vec<(Symbol, String)>,
    pub close_wait: CloseWait,
    /// Equity the adjustments were sized against.
    pub equity_cents: i64,
    pub orders: Vec<OrderFill>,
}

impl ExecutionReport {
    pub fn submitted(&self) -> usize {
        self.orders
            .iter()
            .filter(|o| matches!(o.outcome, OrderOutcome::Submitted { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.orders
            .iter()
            .filter(|o| matches!(o.outcome, OrderOutcome::Failed(_)))
            .count()
    }
}

/// Carry out a plan: liquidations, bounded wait, then adjustments.
///
/// Per-symbol failures are recorded in the report and do not stop the
/// batch. Only failing to read the account is an error.
pub fn execute(
    broker: &dyn Broker,
    plan: TradePlan,
    settings: &ReconcilerSettings,
) -> Result<ExecutionReport> {
    let deadline = Instant::now() + settings.cycle_deadline;

    if plan.is_empty() {
        info!("Portfolio already matches target {}; nothing to trade", plan.target);
        let equity_cents = as_connection_error(broker.account())?.equity_cents;
        return Ok(ExecutionReport {
            plan,
            close_failures: Vec::new(),
            close_wait: CloseWait::NotNeeded,
            equity_cents,
            orders: Vec::new(),
        });
    }

    // 1. Liquidations
    let mut close_failures = Vec::new();
    let mut pending = Vec::new();
    if plan.close_all {
        info!("Closing all positions");
        match broker.close_all_positions() {
            Ok(()) => pending.extend(plan.to_liquidate.iter().copied()),
            Err(e) => {
                warn!("Close-all request failed: {e}");
                close_failures.extend(plan.to_liquidate.iter().map(|s| (*s, e.to_string())));
            }
        }
    } else {
        for symbol in &plan.to_liquidate {
            info!("Closing {symbol}");
            match broker.close_position(symbol) {
                Ok(()) => pending.push(*symbol),
                Err(e) => {
                    warn!("Close {symbol} failed: {e}");
                    close_failures.push((*symbol, e.to_string()));
                }
            }
        }
    }

    // 2. Wait for the closes to settle before buying
    let budget = settings
        .close_timeout
        .min(deadline.saturating_duration_since(Instant::now()));
    let close_wait = wait_for_closure(broker, &pending, settings.close_poll, budget);

    // 3. Adjustments against post-liquidation equity
    let equity_cents = as_connection_error(broker.account())?.equity_cents;
    let orders = plan
        .to_adjust
        .iter()
        .map(|adj| OrderFill {
            symbol: adj.symbol,
            target_weight: adj.target_weight,
            outcome: submit_adjustment(broker, adj, equity_cents, settings),
        })
        .collect();

    Ok(ExecutionReport {
        plan,
        close_failures,
        close_wait,
        equity_cents,
        orders,
    })
}

fn submit_adjustment(
    broker: &dyn Broker,
    adj: &Adjustment,
    equity_cents: i64,
    settings: &ReconcilerSettings,
) -> OrderOutcome {
    let symbol = adj.symbol;
    let delta = adj.delta();
    if delta <= 0.0 {
        warn!(
            "{symbol} is {:.1}% over target; partial sells are not supported, skipping",
            -delta * 100.0
        );
        return OrderOutcome::Skipped("over target".into());
    }

    let notional_cents = (delta * equity_cents as f64).round() as i64;

    if settings.use_fractional {
        if notional_cents < settings.min_notional_cents {
            warn!(
                "{symbol}: notional ${:.2} below minimum, skipping",
                notional_cents as f64 / 100.0
            );
            return OrderOutcome::Skipped("below minimum notional".into());
        }
        match broker.submit_notional_order(&symbol, notional_cents) {
            Ok(id) => {
                info!(
                    "BUY {symbol} ${:.2} ({:.1}% -> {:.1}%), order {id}",
                    notional_cents as f64 / 100.0,
                    adj.current_weight * 100.0,
                    adj.target_weight * 100.0
                );
                return OrderOutcome::Submitted {
                    id,
                    size: OrderSize::Notional {
                        cents: notional_cents,
                    },
                    fallback: false,
                };
            }
            Err(e) => warn!("Notional order for {symbol} failed: {e}; trying whole shares"),
        }
    }

    let Some(price_cents) = broker.current_price(&symbol) else {
        warn!("No price for {symbol}; cannot size a share order");
        return OrderOutcome::Failed("no price for quantity order".into());
    };
    let quantity = (notional_cents as f64 / price_cents as f64).floor() as u64;
    if quantity == 0 {
        warn!(
            "{symbol}: ${:.2} buys less than one share at ${:.2}, skipping",
            notional_cents as f64 / 100.0,
            price_cents as f64 / 100.0
        );
        return OrderOutcome::Skipped("zero shares".into());
    }

    match broker.submit_quantity_order(&symbol, quantity) {
        Ok(id) => {
            info!("BUY {symbol} {quantity} shares, order {id}");
            OrderOutcome::Submitted {
                id,
                size: OrderSize::Quantity(quantity),
                fallback: settings.use_fractional,
            }
        }
        Err(e) => {
            warn!("Share order for {symbol} failed: {e}");
            OrderOutcome::Failed(e.to_string())
        }
    }
}
