//! Broker and market-data contracts for volregime.
//!
//! Provides the [`Broker`] trait a rebalancer drives to reach a target
//! allocation, and the [`MarketData`] trait used to seed and refresh the
//! volatility signal. Implementations:
//!
//! - **Mock** ([`mock::MockBroker`]): in-memory, records every call
//! - **Alpaca** (feature `alpaca`): trading and market-data REST APIs

pub mod error;
pub mod mock;
pub mod types;

#[cfg(feature = "alpaca")]
pub mod alpaca;

pub use error::BrokerError;
pub use types::*;

use volregime::Symbol;

/// A broker account that can report holdings and take market orders.
pub trait Broker {
    /// Verify credentials and connectivity.
    fn connect(&mut self) -> Result<(), BrokerError>;

    /// Get account summary (equity, buying power, cash).
    fn account(&self) -> Result<Account, BrokerError>;

    /// Get all open positions.
    fn positions(&self) -> Result<Vec<Position>, BrokerError>;

    /// Get the latest quote for a symbol.
    fn quote(&self, symbol: &Symbol) -> Result<Quote, BrokerError>;

    /// Submit a market buy sized by dollar amount.
    fn submit_notional_order(
        &self,
        symbol: &Symbol,
        notional_cents: i64,
    ) -> Result<OrderId, BrokerError>;

    /// Submit a market buy for whole shares.
    fn submit_quantity_order(&self, symbol: &Symbol, quantity: u64) -> Result<OrderId, BrokerError>;

    /// Close the whole position in `symbol`. Closing a symbol that is not
    /// held is not an error.
    fn close_position(&self, symbol: &Symbol) -> Result<(), BrokerError>;

    /// Close every position and cancel open orders.
    fn close_all_positions(&self) -> Result<(), BrokerError>;

    /// Ask price in cents, or `None` when no usable quote is available.
    fn current_price(&self, symbol: &Symbol) -> Option<i64> {
        self.quote(symbol)
            .ok()
            .map(|q| q.ask_cents)
            .filter(|&cents| cents > 0)
    }
}

/// Historical daily bars for the signal symbol.
pub trait MarketData {
    /// The most recent `days` daily bars, oldest first. May return fewer
    /// bars than requested (weekends, holidays, new listings).
    fn historical_bars(&self, symbol: &Symbol, days: usize) -> Result<Vec<Bar>, BrokerError>;
}
