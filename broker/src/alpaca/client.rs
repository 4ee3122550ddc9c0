//! Alpaca REST API client.

use chrono::{Duration, Utc};
use log::debug;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use zeroize::Zeroizing;

use super::types::{
    AccountResponse, BarsResponse, LatestQuoteResponse, OrderRequest, OrderResponse,
    PositionResponse,
};
use crate::error::BrokerError;

const PAPER_URL: &str = "https://paper-api.alpaca.markets";
const LIVE_URL: &str = "https://api.alpaca.markets";
const DATA_URL: &str = "https://data.alpaca.markets";

/// Extra calendar days requested on top of the wanted trading days, to
/// cover weekends and holidays.
const CALENDAR_BUFFER_DAYS: i64 = 10;

/// Blocking Alpaca REST client for the trading and market-data APIs.
pub struct AlpacaClient {
    client: Client,
    api_key: String,
    secret_key: Zeroizing<String>,
    trading_url: String,
    data_url: String,
}

impl AlpacaClient {
    /// Create a new client. `paper` selects the paper-trading endpoint.
    pub fn new(api_key: &str, secret_key: &str, paper: bool) -> Self {
        let trading_url = if paper { PAPER_URL } else { LIVE_URL };
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            secret_key: Zeroizing::new(secret_key.to_string()),
            trading_url: trading_url.to_string(),
            data_url: DATA_URL.to_string(),
        }
    }

    /// Override both base URLs (for a local test server).
    pub fn with_base_urls(mut self, trading_url: &str, data_url: &str) -> Self {
        self.trading_url = trading_url.trim_end_matches('/').to_string();
        self.data_url = data_url.trim_end_matches('/').to_string();
        self
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", self.secret_key.as_str())
    }

    /// Get account information (GET /v2/account).
    pub fn account(&self) -> Result<AccountResponse, BrokerError> {
        let url = format!("{}/v2/account", self.trading_url);
        let resp = self
            .authed(self.client.get(&url))
            .send()
            .map_err(|e| BrokerError::Connection(format!("account request failed: {e}")))?;
        parse_json(check_status(resp, "account", BrokerError::Connection)?, "account")
    }

    /// Get all open positions (GET /v2/positions).
    pub fn positions(&self) -> Result<Vec<PositionResponse>, BrokerError> {
        let url = format!("{}/v2/positions", self.trading_url);
        let resp = self
            .authed(self.client.get(&url))
            .send()
            .map_err(|e| BrokerError::Connection(format!("positions request failed: {e}")))?;
        parse_json(check_status(resp, "positions", BrokerError::Connection)?, "positions")
    }

    /// Submit a market order (POST /v2/orders).
    pub fn submit_order(&self, order: &OrderRequest) -> Result<OrderResponse, BrokerError> {
        let url = format!("{}/v2/orders", self.trading_url);
        debug!("Submitting Alpaca order: {order:?}");

        let resp = self
            .authed(self.client.post(&url))
            .json(order)
            .send()
            .map_err(|e| BrokerError::Order(format!("order request failed: {e}")))?;
        let resp = check_status(resp, "order", BrokerError::Order)?;
        resp.json::<OrderResponse>()
            .map_err(|e| BrokerError::Order(format!("failed to parse order response: {e}")))
    }

    /// Close one position (DELETE /v2/positions/{symbol}). A position that
    /// does not exist counts as closed.
    pub fn close_position(&self, symbol: &str) -> Result<(), BrokerError> {
        let url = format!("{}/v2/positions/{symbol}", self.trading_url);
        let resp = self
            .authed(self.client.delete(&url))
            .send()
            .map_err(|e| BrokerError::Order(format!("close request failed: {e}")))?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!("No open position in {symbol} to close");
            return Ok(());
        }
        check_status(resp, "close position", BrokerError::Order)?;
        Ok(())
    }

    /// Close every position and cancel open orders
    /// (DELETE /v2/positions?cancel_orders=true).
    pub fn close_all_positions(&self) -> Result<(), BrokerError> {
        let url = format!("{}/v2/positions?cancel_orders=true", self.trading_url);
        let resp = self
            .authed(self.client.delete(&url))
            .send()
            .map_err(|e| BrokerError::Order(format!("close-all request failed: {e}")))?;
        check_status(resp, "close all positions", BrokerError::Order)?;
        Ok(())
    }

    /// Latest IEX quote (GET /v2/stocks/{symbol}/quotes/latest).
    pub fn latest_quote(&self, symbol: &str) -> Result<LatestQuoteResponse, BrokerError> {
        let url = format!("{}/v2/stocks/{symbol}/quotes/latest?feed=iex", self.data_url);
        let resp = self
            .authed(self.client.get(&url))
            .send()
            .map_err(|e| BrokerError::Data(format!("quote request failed: {e}")))?;
        parse_json(check_status(resp, "quote", BrokerError::Data)?, "quote")
    }

    /// Daily IEX bars covering at least the last `days` trading days
    /// (GET /v2/stocks/{symbol}/bars), following pagination.
    pub fn daily_bars(&self, symbol: &str, days: usize) -> Result<BarsResponse, BrokerError> {
        let start = Utc::now() - Duration::days(days as i64 + CALENDAR_BUFFER_DAYS);
        let base = format!(
            "{}/v2/stocks/{symbol}/bars?timeframe=1Day&feed=iex&adjustment=raw&limit=1000&start={}",
            self.data_url,
            start.format("%Y-%m-%d")
        );

        let mut all = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let url = match &page_token {
                Some(token) => format!("{base}&page_token={token}"),
                None => base.clone(),
            };
            let resp = self
                .authed(self.client.get(&url))
                .send()
                .map_err(|e| BrokerError::Data(format!("bars request failed: {e}")))?;
            let resp = check_status(resp, "bars", BrokerError::Data)?;
            let page: BarsResponse = parse_json(resp, "bars")?;
            all.extend(page.bars.unwrap_or_default());
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(BarsResponse {
            bars: Some(all),
            symbol: symbol.to_string(),
            next_page_token: None,
        })
    }
}

/// Map an HTTP error status to a `BrokerError`, using `kind` for anything
/// that is not an auth or rate-limit failure.
fn check_status(
    resp: Response,
    what: &str,
    kind: fn(String) -> BrokerError,
) -> Result<Response, BrokerError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            BrokerError::Auth(format!("{what} returned {status}: {body}"))
        }
        StatusCode::TOO_MANY_REQUESTS => BrokerError::RateLimit,
        _ => kind(format!("{what} returned {status}: {body}")),
    })
}

fn parse_json<T: DeserializeOwned>(resp: Response, what: &str) -> Result<T, BrokerError> {
    resp.json::<T>()
        .map_err(|e| BrokerError::Data(format!("failed to parse {what}: {e}")))
}
