//! Target and current allocations, and the regime-to-allocation planner.

use crate::regime::Regime;
use crate::Symbol;

/// Weights below this fraction of equity are treated as noise.
pub const NOISE_FLOOR: f64 = 0.001;

/// Mapping from symbol to portfolio weight, one entry per symbol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Allocation {
    weights: Vec<(Symbol, f64)>,
}

impl Allocation {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fully-invested single-instrument allocation.
    pub fn single(symbol: Symbol, weight: f64) -> Self {
        Self {
            weights: vec![(symbol, weight)],
        }
    }

    /// Build from pairs; a repeated symbol keeps the last weight.
    pub fn from_pairs<I: IntoIterator<Item = (Symbol, f64)>>(pairs: I) -> Self {
        let mut alloc = Self::new();
        for (symbol, weight) in pairs {
            alloc.set(symbol, weight);
        }
        alloc
    }

    /// Derive weights from market values, dropping anything whose magnitude
    /// is under the noise floor. Zero or negative equity yields an empty allocation.
    pub fn from_market_values<I>(values: I, equity: f64) -> Self
    where
        I: IntoIterator<Item = (Symbol, f64)>,
    {
        if equity <= 0.0 {
            return Self::new();
        }
        Self::from_pairs(
            values
                .into_iter()
                .map(|(symbol, value)| (symbol, value / equity))
                .filter(|(_, weight)| weight.abs() >= NOISE_FLOOR),
        )
    }

    pub fn set(&mut self, symbol: Symbol, weight: f64) {
        match self.weights.iter_mut().find(|(s, _)| *s == symbol) {
            Some(entry) => entry.1 = weight,
            None => self.weights.push((symbol, weight)),
        }
    }

    /// Weight for `symbol`, zero when absent.
    pub fn weight(&self, symbol: &Symbol) -> f64 {
        self.weights
            .iter()
            .find(|(s, _)| s == symbol)
            .map(|(_, w)| *w)
            .unwrap_or(0.0)
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.weights.iter().any(|(s, _)| s == symbol)
    }

    pub fn total(&self) -> f64 {
        self.weights.iter().map(|(_, w)| w).sum()
    }

    /// Rescale so the weights sum to 1.0. Left unchanged when the sum is
    /// not positive.
    pub fn normalized(&self) -> Self {
        let total = self.total();
        if total <= 0.0 {
            return self.clone();
        }
        Self {
            weights: self.weights.iter().map(|&(s, w)| (s, w / total)).collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Symbol, f64)> + '_ {
        self.weights.iter().copied()
    }

    pub fn symbols(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.weights.iter().map(|(s, _)| *s)
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

impl std::fmt::Display for Allocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.weights.is_empty() {
            return write!(f, "{{}}");
        }
        write!(f, "{{")?;
        for (i, (symbol, weight)) in self.weights.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{symbol}: {:.1}%", weight * 100.0)?;
        }
        write!(f, "}}")
    }
}

/// The three instruments a volatility-regime strategy rotates between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruments {
    pub leveraged_long: Symbol,
    pub inverse_hedge: Symbol,
    pub benchmark: Symbol,
}

impl Default for Instruments {
    fn default() -> Self {
        Self {
            leveraged_long: Symbol::new("UPRO"),
            inverse_hedge: Symbol::new("SH"),
            benchmark: Symbol::new("SPY"),
        }
    }
}

impl Instruments {
    pub fn all(&self) -> [Symbol; 3] {
        [self.leveraged_long, self.inverse_hedge, self.benchmark]
    }

    /// Fixed regime lookup. An unresolved regime holds the benchmark.
    pub fn target_for(&self, regime: Regime) -> Allocation {
        let symbol = match regime {
            Regime::LowVolLeverage | Regime::RecoveryLeverage => self.leveraged_long,
            Regime::HighVolDefensive => self.inverse_hedge,
            Regime::MediumVolNeutral
            | Regime::RecoveryNeutral
            | Regime::NoDataNeutral
            | Regime::Unknown => self.benchmark,
        };
        Allocation::single(symbol, 1.0)
    }
}
