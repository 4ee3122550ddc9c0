//! Errors raised by the decision core.

use crate::Symbol;

/// Errors returned when building or initialising a strategy.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The data provider returned no bars for the signal symbol.
    #[error("no price history available for {0}")]
    NoHistory(Symbol),

    #[error("invalid symbol '{0}': expected 1-8 ASCII characters")]
    InvalidSymbol(String),

    #[error("unknown rebalance frequency '{0}' (expected daily, weekly, monthly or adaptive)")]
    UnknownFrequency(String),

    #[error("unknown regime label '{0}'")]
    UnknownRegime(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(
            Error::NoHistory(Symbol::new("SPY")).to_string(),
            "no price history available for SPY"
        );
        assert!(
            Error::UnknownFrequency("hourly".into())
                .to_string()
                .contains("hourly")
        );
    }

    #[test]
    fn is_error() {
        let err: Box<dyn std::error::Error> = Box::new(Error::InvalidParameter("lookback".into()));
        assert!(err.to_string().contains("lookback"));
    }
}
