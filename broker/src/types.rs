//! Shared broker types: accounts, positions, quotes, bars, orders.

use chrono::{DateTime, Utc};
use volregime::Symbol;

/// Account summary from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub equity_cents: i64,
    pub buying_power_cents: i64,
    pub cash_cents: i64,
}

/// Open position at the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: Symbol,
    /// Shares held, fractional allowed. Negative = short.
    pub quantity: f64,
    pub market_value_cents: i64,
    pub current_price_cents: i64,
}

/// Latest quote for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub symbol: Symbol,
    pub bid_cents: i64,
    pub ask_cents: i64,
}

/// One daily OHLCV bar.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// How a buy order is sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSize {
    /// Dollar amount; the broker buys fractional shares.
    Notional { cents: i64 },
    /// Whole shares.
    Quantity(u64),
}

/// Opaque order ID returned by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderId(pub String);

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Format cents as a dollar string with two decimals (e.g. 12345 -> "123.45").
pub fn cents_to_dollars(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

/// Parse a decimal dollar string to cents, rounding to the nearest cent.
///
/// Returns `None` for anything that is not a finite number.
pub fn dollars_to_cents(s: &str) -> Option<i64> {
    let val: f64 = s.trim().parse().ok()?;
    if !val.is_finite() {
        return None;
    }
    Some((val * 100.0).round() as i64)
}
