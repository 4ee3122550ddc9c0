//! Broker and market-data handles used by the rebalancer runtime.

use log::info;
use volregime_broker::alpaca::{AlpacaBroker, AlpacaData};
use volregime_broker::{Broker, BrokerError, MarketData};

use crate::config::{Config, StrategyConfig};
use crate::error::{Error, Result};

pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

/// Shared market-data provider, read by every runner in a tick.
pub type SharedMarketData = Box<dyn MarketData + Send + Sync>;

pub fn as_connection_error<T>(result: BrokerResult<T>) -> Result<T> {
    result.map_err(|e| Error::Connection(e.to_string()))
}

/// An unconnected Alpaca account for one strategy.
pub fn alpaca_account(strategy: &StrategyConfig) -> Result<Box<dyn Broker + Send>> {
    let creds = strategy.account.credentials()?;
    info!(
        "{}: using {} account",
        strategy.name,
        if creds.paper { "paper" } else { "LIVE" }
    );
    Ok(Box::new(AlpacaBroker::new(
        &creds.api_key,
        &creds.secret_key,
        creds.paper,
    )))
}

/// Market data client built from the first enabled strategy's credentials.
pub fn alpaca_data(config: &Config) -> Result<SharedMarketData> {
    let first = config
        .enabled_strategies()
        .next()
        .ok_or_else(|| Error::Config("no enabled strategy to take data credentials from".into()))?;
    let creds = first.account.credentials()?;
    info!("Market data via {}'s credentials", first.name);
    Ok(Box::new(AlpacaData::new(&creds.api_key, &creds.secret_key)))
}
