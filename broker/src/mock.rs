//! Mock broker for testing. Implements [`Broker`] and [`MarketData`] with
//! configurable behavior.
//!
//! Use this in integration tests to simulate broker responses without
//! network calls.
//!
//! ```
//! use volregime::Symbol;
//! use volregime_broker::Broker;
//! use volregime_broker::mock::{CloseBehavior, MockBroker};
//!
//! let mut broker = MockBroker::builder()
//!     .with_account(100_000_00)
//!     .with_position(Symbol::new("SPY"), 100.0, 450_00)
//!     .with_quote(Symbol::new("UPRO"), 70_00)
//!     .close_behavior(CloseBehavior::AfterPolls(2))
//!     .build();
//! broker.connect().unwrap();
//! assert_eq!(broker.positions().unwrap().len(), 1);
//! ```

use std::sync::Mutex;

use chrono::{Duration, TimeZone, Utc};
use volregime::Symbol;

use crate::error::BrokerError;
use crate::types::*;
use crate::{Broker, MarketData};

/// How closed positions disappear from `positions()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseBehavior {
    /// Closed positions are gone on the next query.
    Immediate,
    /// Closed positions linger for this many `positions()` calls.
    AfterPolls(u32),
    /// Closed positions never go away.
    Never,
}

/// Which order submissions the mock rejects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderRejection {
    None,
    /// Notional orders fail; whole-share orders succeed.
    Notional,
    /// Every order fails.
    All,
}

/// A broker call recorded in submission order.
#[derive(Clone, Debug, PartialEq)]
pub enum BrokerCall {
    Order(RecordedOrder),
    ClosePosition(Symbol),
    CloseAll,
}

/// A recorded order submission for assertion in tests.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedOrder {
    pub symbol: Symbol,
    pub size: OrderSize,
    pub accepted: bool,
}

#[derive(Debug)]
struct MockState {
    positions: Vec<Position>,
    /// Closed symbols still reported, with remaining polls.
    closing: Vec<(Symbol, u32)>,
    calls: Vec<BrokerCall>,
    next_order_id: u64,
}

/// Builder for `MockBroker`.
pub struct MockBrokerBuilder {
    equity_cents: i64,
    cash_cents: i64,
    positions: Vec<Position>,
    quotes: Vec<(Symbol, i64)>,
    bars: Vec<(Symbol, Vec<Bar>)>,
    close_behavior: CloseBehavior,
    rejection: OrderRejection,
    fail_connect: bool,
    fill_orders: bool,
}

impl MockBrokerBuilder {
    /// Account equity and cash, both in cents.
    pub fn with_account(mut self, equity_cents: i64) -> Self {
        self.equity_cents = equity_cents;
        self.cash_cents = equity_cents;
        self
    }

    pub fn with_position(mut self, symbol: Symbol, quantity: f64, price_cents: i64) -> Self {
        self.positions.push(Position {
            symbol,
            quantity,
            market_value_cents: (quantity * price_cents as f64).round() as i64,
            current_price_cents: price_cents,
        });
        self
    }

    /// Ask price in cents.
    pub fn with_quote(mut self, symbol: Symbol, ask_cents: i64) -> Self {
        self.quotes.push((symbol, ask_cents));
        self
    }

    /// Daily closes, oldest first, stamped on consecutive days.
    pub fn with_closes(mut self, symbol: Symbol, closes: &[f64]) -> Self {
        let start = Utc
            .with_ymd_and_hms(2026, 1, 2, 21, 0, 0)
            .single()
            .unwrap_or_default();
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                timestamp: start + Duration::days(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1_000_000,
            })
            .collect();
        self.bars.push((symbol, bars));
        self
    }

    pub fn close_behavior(mut self, behavior: CloseBehavior) -> Self {
        self.close_behavior = behavior;
        self
    }

    pub fn reject(mut self, rejection: OrderRejection) -> Self {
        self.rejection = rejection;
        self
    }

    /// Make `connect()` fail with an auth error.
    pub fn fail_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Whether accepted orders turn into positions (default true).
    pub fn fill_orders(mut self, fill: bool) -> Self {
        self.fill_orders = fill;
        self
    }

    pub fn build(self) -> MockBroker {
        MockBroker {
            connected: false,
            equity_cents: self.equity_cents,
            cash_cents: self.cash_cents,
            quotes: self.quotes,
            bars: self.bars,
            close_behavior: self.close_behavior,
            rejection: self.rejection,
            fail_connect: self.fail_connect,
            fill_orders: self.fill_orders,
            state: Mutex::new(MockState {
                positions: self.positions,
                closing: Vec::new(),
                calls: Vec::new(),
                next_order_id: 1,
            }),
        }
    }
}

/// A mock broker that records every call and returns configurable responses.
#[derive(Debug)]
pub struct MockBroker {
    connected: bool,
    equity_cents: i64,
    cash_cents: i64,
    quotes: Vec<(Symbol, i64)>,
    bars: Vec<(Symbol, Vec<Bar>)>,
    close_behavior: CloseBehavior,
    rejection: OrderRejection,
    fail_connect: bool,
    fill_orders: bool,
    state: Mutex<MockState>,
}

impl MockBroker {
    pub fn builder() -> MockBrokerBuilder {
        MockBrokerBuilder {
            equity_cents: 100_000_00,
            cash_cents: 100_000_00,
            positions: Vec::new(),
            quotes: Vec::new(),
            bars: Vec::new(),
            close_behavior: CloseBehavior::Immediate,
            rejection: OrderRejection::None,
            fail_connect: false,
            fill_orders: true,
        }
    }

    /// Every call in the order it was made.
    pub fn calls(&self) -> Vec<BrokerCall> {
        self.lock().calls.clone()
    }

    /// Only the order submissions, accepted or not.
    pub fn submitted_orders(&self) -> Vec<RecordedOrder> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                BrokerCall::Order(o) => Some(o.clone()),
                _ => None,
            })
            .collect()
    }

    /// Symbols passed to `close_position`, in order.
    pub fn closed_symbols(&self) -> Vec<Symbol> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                BrokerCall::ClosePosition(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // A poisoned lock only means a test thread panicked mid-call.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn require_connected(&self) -> Result<(), BrokerError> {
        if self.connected {
            Ok(())
        } else {
            Err(BrokerError::NotConnected)
        }
    }

    fn price_of(&self, symbol: &Symbol) -> Option<i64> {
        self.quotes
            .iter()
            .find(|(s, _)| s == symbol)
            .map(|(_, p)| *p)
    }

    fn submit(&self, symbol: &Symbol, size: OrderSize) -> Result<OrderId, BrokerError> {
        self.require_connected()?;
        let accepted = match (self.rejection, size) {
            (OrderRejection::All, _) => false,
            (OrderRejection::Notional, OrderSize::Notional { .. }) => false,
            _ => true,
        };

        let mut state = self.lock();
        state.calls.push(BrokerCall::Order(RecordedOrder {
            symbol: *symbol,
            size,
            accepted,
        }));
        if !accepted {
            return Err(BrokerError::Order(format!("mock: {symbol} order rejected")));
        }

        if self.fill_orders {
            let price = self.price_of(symbol).unwrap_or(100_00);
            let (quantity, value) = match size {
                OrderSize::Notional { cents } => (cents as f64 / price as f64, cents),
                OrderSize::Quantity(q) => (q as f64, q as i64 * price),
            };
            match state.positions.iter_mut().find(|p| p.symbol == *symbol) {
                Some(p) => {
                    p.quantity += quantity;
                    p.market_value_cents += value;
                }
                None => state.positions.push(Position {
                    symbol: *symbol,
                    quantity,
                    market_value_cents: value,
                    current_price_cents: price,
                }),
            }
        }

        let id = state.next_order_id;
        state.next_order_id += 1;
        Ok(OrderId(format!("mock-{id}")))
    }

    fn begin_close(&self, state: &mut MockState, symbol: Symbol) {
        match self.close_behavior {
            CloseBehavior::Immediate => state.positions.retain(|p| p.symbol != symbol),
            CloseBehavior::AfterPolls(n) => {
                if state.positions.iter().any(|p| p.symbol == symbol) {
                    state.closing.retain(|(s, _)| *s != symbol);
                    state.closing.push((symbol, n));
                }
            }
            CloseBehavior::Never => {}
        }
    }
}

impl Broker for MockBroker {
    fn connect(&mut self) -> Result<(), BrokerError> {
        if self.fail_connect {
            return Err(BrokerError::Auth("mock: invalid credentials".into()));
        }
        self.connected = true;
        Ok(())
    }

    fn account(&self) -> Result<Account, BrokerError> {
        self.require_connected()?;
        Ok(Account {
            equity_cents: self.equity_cents,
            buying_power_cents: self.cash_cents,
            cash_cents: self.cash_cents,
        })
    }

    fn positions(&self) -> Result<Vec<Position>, BrokerError> {
        self.require_connected()?;
        let mut state = self.lock();

        // Count down lingering closes; expired ones vanish before reporting.
        let mut expired = Vec::new();
        for (symbol, remaining) in state.closing.iter_mut() {
            if *remaining == 0 {
                expired.push(*symbol);
            } else {
                *remaining -= 1;
            }
        }
        state.positions.retain(|p| !expired.contains(&p.symbol));
        state.closing.retain(|(s, _)| !expired.contains(s));

        Ok(state.positions.clone())
    }

    fn quote(&self, symbol: &Symbol) -> Result<Quote, BrokerError> {
        self.require_connected()?;
        self.price_of(symbol)
            .map(|ask| Quote {
                symbol: *symbol,
                bid_cents: ask,
                ask_cents: ask,
            })
            .ok_or_else(|| BrokerError::InvalidSymbol(symbol.as_str().to_string()))
    }

    fn submit_notional_order(
        &self,
        symbol: &Symbol,
        notional_cents: i64,
    ) -> Result<OrderId, BrokerError> {
        self.submit(symbol, OrderSize::Notional { cents: notional_cents })
    }

    fn submit_quantity_order(
        &self,
        symbol: &Symbol,
        quantity: u64,
    ) -> Result<OrderId, BrokerError> {
        self.submit(symbol, OrderSize::Quantity(quantity))
    }

    fn close_position(&self, symbol: &Symbol) -> Result<(), BrokerError> {
        self.require_connected()?;
        let mut state = self.lock();
        state.calls.push(BrokerCall::ClosePosition(*symbol));
        self.begin_close(&mut state, *symbol);
        Ok(())
    }

    fn close_all_positions(&self) -> Result<(), BrokerError> {
        self.require_connected()?;
        let mut state = self.lock();
        state.calls.push(BrokerCall::CloseAll);
        let held: Vec<Symbol> = state.positions.iter().map(|p| p.symbol).collect();
        for symbol in held {
            self.begin_close(&mut state, symbol);
        }
        Ok(())
    }
}

impl MarketData for MockBroker {
    fn historical_bars(&self, symbol: &Symbol, days: usize) -> Result<Vec<Bar>, BrokerError> {
        let bars = self
            .bars
            .iter()
            .find(|(s, _)| s == symbol)
            .map(|(_, b)| b.as_slice())
            .unwrap_or(&[]);
        let start = bars.len().saturating_sub(days);
        Ok(bars[start..].to_vec())
    }
}
