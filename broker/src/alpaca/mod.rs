//! Alpaca broker and market-data implementation.

pub mod client;
pub mod types;

use chrono::{DateTime, Utc};
use log::{info, warn};
use volregime::Symbol;
use zeroize::Zeroizing;

use crate::error::BrokerError;
use crate::types::*;
use crate::{Broker, MarketData};
use client::AlpacaClient;
use types::{BarData, OrderRequest, PositionResponse};

/// Alpaca trading account implementing the generic Broker trait.
///
/// Uses the REST API for all operations. Blocking (sync) via reqwest::blocking.
pub struct AlpacaBroker {
    api_key: String,
    secret_key: Zeroizing<String>,
    paper: bool,
    client: Option<AlpacaClient>,
}

impl AlpacaBroker {
    /// Create a new broker handle (not yet connected).
    pub fn new(api_key: &str, secret_key: &str, paper: bool) -> Self {
        Self {
            api_key: api_key.to_string(),
            secret_key: Zeroizing::new(secret_key.to_string()),
            paper,
            client: None,
        }
    }

    pub fn is_paper(&self) -> bool {
        self.paper
    }

    fn require_client(&self) -> Result<&AlpacaClient, BrokerError> {
        self.client.as_ref().ok_or(BrokerError::NotConnected)
    }
}

impl Broker for AlpacaBroker {
    fn connect(&mut self) -> Result<(), BrokerError> {
        let client = AlpacaClient::new(&self.api_key, &self.secret_key, self.paper);
        let account = client.account()?;
        if account.trading_blocked {
            return Err(BrokerError::Auth("account is blocked from trading".into()));
        }
        info!(
            "Connected to Alpaca ({}), equity ${}, status {}",
            if self.paper { "paper" } else { "live" },
            account.equity,
            account.status
        );
        self.client = Some(client);
        Ok(())
    }

    fn account(&self) -> Result<Account, BrokerError> {
        let resp = self.require_client()?.account()?;
        let field = |name: &str, value: &str| {
            dollars_to_cents(value).ok_or_else(|| {
                BrokerError::Data(format!("account {name} is not a number: {value:?}"))
            })
        };
        Ok(Account {
            equity_cents: field("equity", &resp.equity)?,
            buying_power_cents: field("buying_power", &resp.buying_power)?,
            cash_cents: field("cash", &resp.cash)?,
        })
    }

    fn positions(&self) -> Result<Vec<Position>, BrokerError> {
        let resp = self.require_client()?.positions()?;
        Ok(resp.iter().filter_map(convert_position).collect())
    }

    fn quote(&self, symbol: &Symbol) -> Result<Quote, BrokerError> {
        let resp = self.require_client()?.latest_quote(symbol.as_str())?;
        Ok(Quote {
            symbol: *symbol,
            bid_cents: (resp.quote.bid_price * 100.0).round() as i64,
            ask_cents: (resp.quote.ask_price * 100.0).round() as i64,
        })
    }

    fn submit_notional_order(
        &self,
        symbol: &Symbol,
        notional_cents: i64,
    ) -> Result<OrderId, BrokerError> {
        let order = OrderRequest::notional_buy(symbol.as_str(), cents_to_dollars(notional_cents));
        let resp = self.require_client()?.submit_order(&order)?;
        Ok(OrderId(resp.id))
    }

    fn submit_quantity_order(
        &self,
        symbol: &Symbol,
        quantity: u64,
    ) -> Result<OrderId, BrokerError> {
        let order = OrderRequest::quantity_buy(symbol.as_str(), quantity);
        let resp = self.require_client()?.submit_order(&order)?;
        Ok(OrderId(resp.id))
    }

    fn close_position(&self, symbol: &Symbol) -> Result<(), BrokerError> {
        self.require_client()?.close_position(symbol.as_str())
    }

    fn close_all_positions(&self) -> Result<(), BrokerError> {
        self.require_client()?.close_all_positions()
    }
}

/// Convert an Alpaca position, skipping symbols that do not fit a
/// [`Symbol`] (options, crypto pairs).
pub fn convert_position(p: &PositionResponse) -> Option<Position> {
    let Some(symbol) = Symbol::try_new(&p.symbol) else {
        warn!("Skipping position with unsupported symbol {:?}", p.symbol);
        return None;
    };
    Some(Position {
        symbol,
        quantity: p.qty.trim().parse().unwrap_or(0.0),
        market_value_cents: dollars_to_cents(&p.market_value).unwrap_or(0),
        current_price_cents: dollars_to_cents(&p.current_price).unwrap_or(0),
    })
}

/// Convert an Alpaca bar; `None` when the timestamp is not RFC 3339.
pub fn convert_bar(b: &BarData) -> Option<Bar> {
    let timestamp = DateTime::parse_from_rfc3339(&b.timestamp)
        .ok()?
        .with_timezone(&Utc);
    Some(Bar {
        timestamp,
        open: b.open,
        high: b.high,
        low: b.low,
        close: b.close,
        volume: b.volume,
    })
}

/// Shared market-data client (IEX feed).
pub struct AlpacaData {
    client: AlpacaClient,
}

impl AlpacaData {
    pub fn new(api_key: &str, secret_key: &str) -> Self {
        Self {
            client: AlpacaClient::new(api_key, secret_key, true),
        }
    }
}

impl MarketData for AlpacaData {
    fn historical_bars(&self, symbol: &Symbol, days: usize) -> Result<Vec<Bar>, BrokerError> {
        let resp = self.client.daily_bars(symbol.as_str(), days)?;
        let mut bars: Vec<Bar> = resp
            .bars
            .unwrap_or_default()
            .iter()
            .filter_map(convert_bar)
            .collect();
        bars.sort_by_key(|b| b.timestamp);
        let start = bars.len().saturating_sub(days);
        info!("Fetched {} bars for {symbol} (IEX feed)", bars.len() - start);
        Ok(bars.split_off(start))
    }
}
