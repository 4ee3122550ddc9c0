//! Rolling price window and realized-volatility estimate.
//!
//! The window keeps the most recent `lookback + 1` closes so that exactly
//! `lookback` daily returns can be formed from it.

use std::collections::VecDeque;

/// Trading days per year, used to annualize daily volatility.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Default number of daily returns in the volatility estimate.
pub const DEFAULT_LOOKBACK: usize = 20;

/// Fixed-capacity window of closing prices, oldest first.
///
/// Pushing into a full window evicts the oldest price.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceWindow {
    prices: VecDeque<f64>,
    capacity: usize,
}

impl PriceWindow {
    /// Create an empty window. A zero capacity is bumped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            prices: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, price: f64) {
        if self.prices.len() == self.capacity {
            self.prices.pop_front();
        }
        self.prices.push_back(price);
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.prices.len() == self.capacity
    }

    /// Most recent close, if any.
    pub fn latest(&self) -> Option<f64> {
        self.prices.back().copied()
    }

    /// Prices from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.prices.iter().copied()
    }

    pub fn clear(&mut self) {
        self.prices.clear();
    }
}

/// Owns the price window and derives the volatility estimate from it.
#[derive(Debug, Clone)]
pub struct SignalCalculator {
    lookback: usize,
    window: PriceWindow,
}

impl SignalCalculator {
    pub fn new(lookback: usize) -> Self {
        Self {
            lookback,
            window: PriceWindow::new(lookback + 1),
        }
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    pub fn window(&self) -> &PriceWindow {
        &self.window
    }

    /// Append the latest close, evicting the oldest at capacity.
    pub fn update(&mut self, latest_price: f64) {
        self.window.push(latest_price);
    }

    /// Replace the window contents with the tail of `closes`.
    pub fn seed<I: IntoIterator<Item = f64>>(&mut self, closes: I) {
        self.window.clear();
        for close in closes {
            self.window.push(close);
        }
    }

    /// Annualized volatility of the window, or `None` while fewer than
    /// `lookback` usable returns exist.
    pub fn volatility(&self) -> Option<f64> {
        if self.window.len() < self.lookback + 1 {
            return None;
        }
        let returns = daily_returns(self.window.iter());
        if returns.len() < self.lookback {
            return None;
        }
        sample_std_dev(&returns).map(|sd| sd * TRADING_DAYS_PER_YEAR.sqrt())
    }
}

/// Simple returns `(p[i-1] - p[i]) / p[i]` over consecutive prices.
///
/// A zero price at `p[i]` contributes no observation.
pub fn daily_returns<I: IntoIterator<Item = f64>>(prices: I) -> Vec<f64> {
    let mut returns = Vec::new();
    let mut prev: Option<f64> = None;
    for price in prices {
        if let Some(p_prev) = prev {
            if price != 0.0 {
                returns.push((p_prev - price) / price);
            }
        }
        prev = Some(price);
    }
    returns
}

/// Sample standard deviation (n - 1 denominator). `None` below two values.
pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let ss: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    Some((ss / (n - 1) as f64).sqrt())
}
