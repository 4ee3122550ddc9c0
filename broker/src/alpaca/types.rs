//! Alpaca-specific API request and response types.
//!
//! Alpaca encodes money and quantities as decimal strings.

use serde::{Deserialize, Serialize};

/// Trading account (GET /v2/account).
#[derive(Debug, Deserialize)]
pub struct AccountResponse {
    pub equity: String,
    pub buying_power: String,
    pub cash: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub trading_blocked: bool,
}

/// Open position (GET /v2/positions).
#[derive(Debug, Deserialize)]
pub struct PositionResponse {
    pub symbol: String,
    pub qty: String,
    pub market_value: String,
    #[serde(default)]
    pub current_price: String,
    #[serde(default)]
    pub side: String,
}

/// Market order request body (POST /v2/orders). Exactly one of
/// `notional` and `qty` is set.
#[derive(Debug, Serialize)]
pub struct OrderRequest {
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notional: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qty: Option<String>,
    pub side: &'static str,
    #[serde(rename = "type")]
    pub order_type: &'static str,
    pub time_in_force: &'static str,
}

impl OrderRequest {
    /// Day market buy for a dollar amount.
    pub fn notional_buy(symbol: &str, dollars: String) -> Self {
        Self {
            symbol: symbol.to_string(),
            notional: Some(dollars),
            qty: None,
            side: "buy",
            order_type: "market",
            time_in_force: "day",
        }
    }

    /// Day market buy for whole shares.
    pub fn quantity_buy(symbol: &str, quantity: u64) -> Self {
        Self {
            symbol: symbol.to_string(),
            notional: None,
            qty: Some(quantity.to_string()),
            side: "buy",
            order_type: "market",
            time_in_force: "day",
        }
    }
}

/// Order acknowledgement.
#[derive(Debug, Deserialize)]
pub struct OrderResponse {
    pub id: String,
    pub symbol: String,
    pub status: String,
    #[serde(default)]
    pub filled_qty: String,
}

/// Latest quote wrapper (GET /v2/stocks/{symbol}/quotes/latest).
#[derive(Debug, Deserialize)]
pub struct LatestQuoteResponse {
    pub symbol: String,
    pub quote: QuoteData,
}

/// Quote payload. Field names are Alpaca's single-letter keys.
#[derive(Debug, Deserialize)]
pub struct QuoteData {
    #[serde(rename = "ap")]
    pub ask_price: f64,
    #[serde(rename = "bp")]
    pub bid_price: f64,
    #[serde(rename = "t", default)]
    pub timestamp: String,
}

/// Historical bars page (GET /v2/stocks/{symbol}/bars).
#[derive(Debug, Deserialize)]
pub struct BarsResponse {
    /// `null` when the range holds no bars.
    #[serde(default)]
    pub bars: Option<Vec<BarData>>,
    pub symbol: String,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// One OHLCV bar.
#[derive(Debug, Deserialize)]
pub struct BarData {
    #[serde(rename = "t")]
    pub timestamp: String,
    #[serde(rename = "o")]
    pub open: f64,
    #[serde(rename = "h")]
    pub high: f64,
    #[serde(rename = "l")]
    pub low: f64,
    #[serde(rename = "c")]
    pub close: f64,
    #[serde(rename = "v")]
    pub volume: u64,
}
