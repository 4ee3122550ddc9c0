// Allow our dollar.cents digit grouping convention (e.g., 100_00 = $100.00)
#![allow(clippy::inconsistent_digit_grouping)]

//! Integration tests driving a strategy runner against the mock broker.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::America::New_York;
use chrono_tz::Tz;

use volregime::{Frequency, Regime, Symbol, VolRegimeParams, VolatilityRegime};
use volregime_broker::mock::{BrokerCall, MockBroker};
use volregime_broker::{Account, Broker, BrokerError, OrderId, OrderSize, Position, Quote};
use volregime_rebalancer::audit::AuditLog;
use volregime_rebalancer::config::Config;
use volregime_rebalancer::error::Error;
use volregime_rebalancer::execution::{CycleOutcome, RunOptions, StrategyRunner};
use volregime_rebalancer::reconcile::ReconcilerSettings;
use volregime_rebalancer::state::{PersistedState, StateStore};

fn spy() -> Symbol {
    Symbol::new("SPY")
}
fn upro() -> Symbol {
    Symbol::new("UPRO")
}

/// Friday 2026-03-06 at the default trigger minute.
fn friday() -> DateTime<Tz> {
    New_York.with_ymd_and_hms(2026, 3, 6, 15, 30, 0).unwrap()
}

fn monday() -> DateTime<Tz> {
    New_York.with_ymd_and_hms(2026, 3, 9, 15, 30, 0).unwrap()
}

fn init_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 6, 14, 0, 0).unwrap()
}

fn flat_data() -> MockBroker {
    MockBroker::builder().with_closes(spy(), &[400.0; 30]).build()
}

fn settings() -> ReconcilerSettings {
    ReconcilerSettings {
        close_timeout: Duration::from_millis(50),
        close_poll: Duration::from_millis(1),
        ..ReconcilerSettings::default()
    }
}

struct Fixture {
    dir: tempfile::TempDir,
    audit: Arc<AuditLog>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let audit = Arc::new(AuditLog::open(&dir.path().join("logs").join("audit.jsonl")).unwrap());
        Self { dir, audit }
    }

    fn state_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    fn runner(&self, frequency: Frequency, broker: Box<dyn Broker + Send>) -> StrategyRunner {
        self.runner_with_store(frequency, broker, StateStore::new(&self.state_dir(), "vol"))
    }

    fn runner_with_store(
        &self,
        frequency: Frequency,
        broker: Box<dyn Broker + Send>,
        store: StateStore,
    ) -> StrategyRunner {
        let core = VolatilityRegime::new("vol", frequency, VolRegimeParams::default()).unwrap();
        StrategyRunner::new(Box::new(core), broker, store, self.audit.clone(), settings())
    }

    fn audit_events(&self) -> Vec<String> {
        let contents =
            std::fs::read_to_string(self.dir.path().join("logs").join("audit.jsonl")).unwrap();
        contents
            .lines()
            .map(|l| {
                let v: serde_json::Value = serde_json::from_str(l).unwrap();
                v["event"].as_str().unwrap().to_string()
            })
            .collect()
    }
}

/// Shares the mock with the test so calls can be inspected after the
/// runner takes ownership of its broker.
struct SharedBroker(Arc<MockBroker>);

impl SharedBroker {
    fn new(broker: MockBroker) -> (Box<dyn Broker + Send>, Arc<MockBroker>) {
        let shared = Arc::new(broker);
        (Box::new(SharedBroker(shared.clone())), shared)
    }
}

impl Broker for SharedBroker {
    fn connect(&mut self) -> Result<(), BrokerError> {
        Ok(())
    }
    fn account(&self) -> Result<Account, BrokerError> {
        self.0.account()
    }
    fn positions(&self) -> Result<Vec<Position>, BrokerError> {
        self.0.positions()
    }
    fn quote(&self, symbol: &Symbol) -> Result<Quote, BrokerError> {
        self.0.quote(symbol)
    }
    fn submit_notional_order(&self, symbol: &Symbol, cents: i64) -> Result<OrderId, BrokerError> {
        self.0.submit_notional_order(symbol, cents)
    }
    fn submit_quantity_order(&self, symbol: &Symbol, qty: u64) -> Result<OrderId, BrokerError> {
        self.0.submit_quantity_order(symbol, qty)
    }
    fn close_position(&self, symbol: &Symbol) -> Result<(), BrokerError> {
        self.0.close_position(symbol)
    }
    fn close_all_positions(&self) -> Result<(), BrokerError> {
        self.0.close_all_positions()
    }
}

fn connected_mock(builder: volregime_broker::mock::MockBrokerBuilder) -> MockBroker {
    let mut broker = builder.build();
    broker.connect().unwrap();
    broker
}

// ============================================================================
// Full cycle
// ============================================================================

#[test]
fn calm_market_rotates_into_leveraged_long() {
    let fx = Fixture::new();
    let (broker, mock) = SharedBroker::new(connected_mock(
        MockBroker::builder()
            .with_account(100_000_00)
            .with_position(spy(), 250.0, 400_00),
    ));
    let mut runner = fx.runner(Frequency::Weekly, broker);
    runner.initialize(&flat_data(), init_time()).unwrap();

    let outcome = runner
        .run_cycle(friday(), &flat_data(), &RunOptions::default())
        .unwrap();

    let CycleOutcome::Executed { decision, report } = &outcome else {
        panic!("expected an executed cycle, got {outcome:?}");
    };
    assert_eq!(decision.regime, Regime::LowVolLeverage);
    assert_eq!(decision.volatility, Some(0.0));
    assert_eq!(report.plan.to_liquidate, vec![spy()]);
    assert_eq!(report.submitted(), 1);

    assert_eq!(
        mock.calls(),
        vec![
            BrokerCall::ClosePosition(spy()),
            BrokerCall::Order(volregime_broker::mock::RecordedOrder {
                symbol: upro(),
                size: OrderSize::Notional { cents: 100_000_00 },
                accepted: true,
            }),
        ]
    );

    let saved = StateStore::new(&fx.state_dir(), "vol").load().unwrap().unwrap();
    assert_eq!(saved.last_rebalance_date, NaiveDate::from_ymd_opt(2026, 3, 6));
    assert_eq!(saved.last_regime.as_deref(), Some("LOW_VOL_LEVERAGE"));
    assert_eq!(saved.trade_count, 1);
    assert!(!saved.in_recovery_mode);

    let events = fx.audit_events();
    let order = [
        "strategy_initialized",
        "decision",
        "state_saved",
        "liquidation",
        "order_submitted",
        "cycle_completed",
    ];
    let positions: Vec<usize> = order
        .iter()
        .map(|e| events.iter().position(|x| x == e).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "audit order: {events:?}");
}

#[test]
fn second_cycle_same_day_is_not_scheduled() {
    let fx = Fixture::new();
    let (broker, mock) = SharedBroker::new(connected_mock(MockBroker::builder()));
    let mut runner = fx.runner(Frequency::Weekly, broker);
    runner.initialize(&flat_data(), init_time()).unwrap();

    assert!(runner.run_cycle(friday(), &flat_data(), &RunOptions::default()).unwrap().rebalanced());
    let second = runner
        .run_cycle(friday() + chrono::Duration::minutes(1), &flat_data(), &RunOptions::default())
        .unwrap();
    assert!(matches!(second, CycleOutcome::NotScheduled));
    assert_eq!(mock.submitted_orders().len(), 1);
    assert!(fx.audit_events().contains(&"cycle_skipped".to_string()));
}

#[test]
fn matching_portfolio_saves_state_but_trades_nothing() {
    let fx = Fixture::new();
    let (broker, mock) = SharedBroker::new(connected_mock(
        MockBroker::builder()
            .with_account(100_000_00)
            .with_position(upro(), 1_000.0, 100_00),
    ));
    let mut runner = fx.runner(Frequency::Weekly, broker);
    runner.initialize(&flat_data(), init_time()).unwrap();

    let outcome = runner.run_cycle(friday(), &flat_data(), &RunOptions::default()).unwrap();
    let CycleOutcome::Executed { report, .. } = outcome else {
        panic!("expected an executed cycle");
    };
    assert!(report.plan.is_empty());
    assert!(mock.calls().is_empty());
    assert_eq!(StateStore::new(&fx.state_dir(), "vol").load().unwrap().unwrap().trade_count, 1);
}

// ============================================================================
// Persistence ordering
// ============================================================================

/// Records, at each order submission, whether the state file was on disk.
struct StateCheckingBroker {
    inner: MockBroker,
    state_path: PathBuf,
    seen: Arc<Mutex<Vec<bool>>>,
}

impl Broker for StateCheckingBroker {
    fn connect(&mut self) -> Result<(), BrokerError> {
        self.inner.connect()
    }
    fn account(&self) -> Result<Account, BrokerError> {
        self.inner.account()
    }
    fn positions(&self) -> Result<Vec<Position>, BrokerError> {
        self.inner.positions()
    }
    fn quote(&self, symbol: &Symbol) -> Result<Quote, BrokerError> {
        self.inner.quote(symbol)
    }
    fn submit_notional_order(&self, symbol: &Symbol, cents: i64) -> Result<OrderId, BrokerError> {
        self.seen.lock().unwrap().push(self.state_path.exists());
        self.inner.submit_notional_order(symbol, cents)
    }
    fn submit_quantity_order(&self, symbol: &Symbol, qty: u64) -> Result<OrderId, BrokerError> {
        self.seen.lock().unwrap().push(self.state_path.exists());
        self.inner.submit_quantity_order(symbol, qty)
    }
    fn close_position(&self, symbol: &Symbol) -> Result<(), BrokerError> {
        self.seen.lock().unwrap().push(self.state_path.exists());
        self.inner.close_position(symbol)
    }
    fn close_all_positions(&self) -> Result<(), BrokerError> {
        self.inner.close_all_positions()
    }
}

#[test]
fn state_is_on_disk_before_any_order() {
    let fx = Fixture::new();
    let store = StateStore::new(&fx.state_dir(), "vol");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let broker = StateCheckingBroker {
        inner: MockBroker::builder().with_position(spy(), 100.0, 400_00).build(),
        state_path: store.path().to_path_buf(),
        seen: seen.clone(),
    };
    let mut runner = fx.runner_with_store(Frequency::Weekly, Box::new(broker), store);
    runner.initialize(&flat_data(), init_time()).unwrap();
    runner.run_cycle(friday(), &flat_data(), &RunOptions::default()).unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2, "one close and one buy");
    assert!(seen.iter().all(|&on_disk| on_disk));
}

#[test]
fn save_failure_does_not_block_trading() {
    let fx = Fixture::new();
    let blocker = fx.dir.path().join("not_a_dir");
    std::fs::write(&blocker, "x").unwrap();

    let (broker, mock) = SharedBroker::new(connected_mock(MockBroker::builder()));
    let store = StateStore::new(&blocker.join("state"), "vol");
    let mut runner = fx.runner_with_store(Frequency::Weekly, broker, store);
    runner.initialize(&flat_data(), init_time()).unwrap();

    let outcome = runner.run_cycle(friday(), &flat_data(), &RunOptions::default()).unwrap();
    assert!(outcome.rebalanced());
    assert_eq!(mock.submitted_orders().len(), 1);
    assert!(fx.audit_events().contains(&"state_save_failed".to_string()));
}

/// Connects fine but cannot read the account.
struct AccountDownBroker;

impl Broker for AccountDownBroker {
    fn connect(&mut self) -> Result<(), BrokerError> {
        Ok(())
    }
    fn account(&self) -> Result<Account, BrokerError> {
        Err(BrokerError::Connection("down".into()))
    }
    fn positions(&self) -> Result<Vec<Position>, BrokerError> {
        Err(BrokerError::Connection("down".into()))
    }
    fn quote(&self, _symbol: &Symbol) -> Result<Quote, BrokerError> {
        Err(BrokerError::Connection("down".into()))
    }
    fn submit_notional_order(&self, _symbol: &Symbol, _cents: i64) -> Result<OrderId, BrokerError> {
        Err(BrokerError::Connection("down".into()))
    }
    fn submit_quantity_order(&self, _symbol: &Symbol, _qty: u64) -> Result<OrderId, BrokerError> {
        Err(BrokerError::Connection("down".into()))
    }
    fn close_position(&self, _symbol: &Symbol) -> Result<(), BrokerError> {
        Err(BrokerError::Connection("down".into()))
    }
    fn close_all_positions(&self) -> Result<(), BrokerError> {
        Err(BrokerError::Connection("down".into()))
    }
}

#[test]
fn decision_is_saved_even_when_account_read_fails() {
    let fx = Fixture::new();
    let mut runner = fx.runner(Frequency::Weekly, Box::new(AccountDownBroker));
    runner.initialize(&flat_data(), init_time()).unwrap();

    let err = runner
        .run_cycle(friday(), &flat_data(), &RunOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::Connection(_)), "got {err:?}");

    let saved = StateStore::new(&fx.state_dir(), "vol").load().unwrap().unwrap();
    assert_eq!(saved.last_rebalance_date, NaiveDate::from_ymd_opt(2026, 3, 6));
    assert_eq!(saved.last_regime.as_deref(), Some("LOW_VOL_LEVERAGE"));
    assert_eq!(saved.trade_count, 1);
    assert_eq!(runner.strategy().state().schedule.trade_count, 1);

    let events = fx.audit_events();
    assert!(events.contains(&"state_saved".to_string()));
    assert!(events.contains(&"cycle_error".to_string()));
}

#[test]
fn restored_state_suppresses_repeat_rebalance() {
    let fx = Fixture::new();
    StateStore::new(&fx.state_dir(), "vol")
        .save(&PersistedState {
            last_rebalance_date: NaiveDate::from_ymd_opt(2026, 3, 6),
            last_regime: Some("LOW_VOL_LEVERAGE".into()),
            trade_count: 4,
            ..PersistedState::default()
        })
        .unwrap();

    let (broker, mock) = SharedBroker::new(connected_mock(MockBroker::builder()));
    let mut runner = fx.runner(Frequency::Weekly, broker);
    runner.initialize(&flat_data(), init_time()).unwrap();
    assert_eq!(runner.strategy().state().schedule.trade_count, 4);

    let outcome = runner.run_cycle(friday(), &flat_data(), &RunOptions::default()).unwrap();
    assert!(matches!(outcome, CycleOutcome::NotScheduled));
    assert!(mock.calls().is_empty());
}

// ============================================================================
// Options
// ============================================================================

#[test]
fn dry_run_neither_persists_nor_trades() {
    let fx = Fixture::new();
    let (broker, mock) = SharedBroker::new(connected_mock(
        MockBroker::builder().with_position(spy(), 100.0, 400_00),
    ));
    let mut runner = fx.runner(Frequency::Weekly, broker);
    runner.initialize(&flat_data(), init_time()).unwrap();

    let opts = RunOptions {
        dry_run: true,
        force: false,
    };
    let outcome = runner.run_cycle(friday(), &flat_data(), &opts).unwrap();
    let CycleOutcome::DryRun { plan, .. } = outcome else {
        panic!("expected a dry run");
    };
    assert_eq!(plan.to_liquidate, vec![spy()]);
    assert_eq!(plan.to_adjust[0].symbol, upro());
    assert!(mock.calls().is_empty());
    assert_eq!(StateStore::new(&fx.state_dir(), "vol").load().unwrap(), None);
}

#[test]
fn force_bypasses_schedule() {
    let fx = Fixture::new();
    let (broker, mock) = SharedBroker::new(connected_mock(MockBroker::builder()));
    let mut runner = fx.runner(Frequency::Monthly, broker);
    runner.initialize(&flat_data(), init_time()).unwrap();

    let plain = runner.run_cycle(monday(), &flat_data(), &RunOptions::default()).unwrap();
    assert!(matches!(plain, CycleOutcome::NotScheduled));

    let forced = RunOptions {
        dry_run: false,
        force: true,
    };
    assert!(runner.run_cycle(monday(), &flat_data(), &forced).unwrap().rebalanced());
    assert_eq!(mock.submitted_orders().len(), 1);
}

// ============================================================================
// Initialization
// ============================================================================

#[test]
fn missing_history_fails_initialization() {
    let fx = Fixture::new();
    let mut runner = fx.runner(Frequency::Weekly, Box::new(MockBroker::builder().build()));
    let empty = MockBroker::builder().build();

    let err = runner.initialize(&empty, init_time()).unwrap_err();
    assert!(matches!(err, Error::Initialization { .. }));
    assert!(!runner.strategy().is_initialized());
    assert!(fx.audit_events().contains(&"strategy_failed".to_string()));

    let err = runner
        .run_cycle(friday(), &empty, &RunOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::Initialization { .. }));
}

#[test]
fn rejected_credentials_fail_initialization() {
    let fx = Fixture::new();
    let mut runner = fx.runner(
        Frequency::Weekly,
        Box::new(MockBroker::builder().fail_connect().build()),
    );
    let err = runner.initialize(&flat_data(), init_time()).unwrap_err();
    assert!(err.to_string().contains("authentication"));
}

#[test]
fn short_history_holds_benchmark() {
    let fx = Fixture::new();
    let (broker, mock) = SharedBroker::new(connected_mock(MockBroker::builder()));
    let mut runner = fx.runner(Frequency::Weekly, broker);
    let short = MockBroker::builder().with_closes(spy(), &[400.0, 401.0, 399.0]).build();
    runner.initialize(&short, init_time()).unwrap();

    let outcome = runner.run_cycle(friday(), &short, &RunOptions::default()).unwrap();
    let CycleOutcome::Executed { decision, .. } = outcome else {
        panic!("expected an executed cycle");
    };
    assert_eq!(decision.regime, Regime::NoDataNeutral);
    assert_eq!(mock.submitted_orders()[0].symbol, spy());
}

// ============================================================================
// Config wiring
// ============================================================================

fn config_for(state_dir: &Path) -> Config {
    let toml = format!(
        r#"
        [state]
        dir = "{}"

        [[strategy]]
        name = "vol_regime_weekly"
        frequency = "weekly"
        [strategy.account]
        api_key_env = "ALPACA_TEST_KEY"
        secret_key_env = "ALPACA_TEST_SECRET"

        [[strategy]]
        name = "vol_regime_monthly"
        frequency = "monthly"
        enabled = false
        [strategy.account]
        api_key_env = "ALPACA_TEST_KEY"
        secret_key_env = "ALPACA_TEST_SECRET"
        "#,
        state_dir.display()
    );
    Config::from_toml(&toml).unwrap()
}

#[test]
fn runner_from_config_uses_named_state_file() {
    let fx = Fixture::new();
    let config = config_for(&fx.state_dir());
    let strategy = config.strategy("vol_regime_weekly").unwrap();

    let runner = StrategyRunner::from_config(
        &config,
        strategy,
        Box::new(MockBroker::builder().build()),
        fx.audit.clone(),
    )
    .unwrap();
    assert_eq!(runner.name(), "vol_regime_weekly");
    assert_eq!(runner.strategy().history_days(), 25);
    assert!(runner.store().path().ends_with("vol_regime_weekly_state.json"));
    assert_eq!(config.enabled_strategies().count(), 1);
    assert!(matches!(config.strategy("nope"), Err(Error::UnknownStrategy(_))));
}
