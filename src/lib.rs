//! # volregime
//!
//! Decision core of a volatility-regime rebalancing system: when to act,
//! what regime the market is in, and what to hold.
//!
//! ## Features
//!
//! - **Signal**: rolling window of closes and annualized realized volatility
//! - **Regimes**: pure resolution from volatility plus a recovery-mode
//!   state machine entered after extreme spikes
//! - **Scheduling**: daily / weekly / monthly / adaptive rebalance
//!   predicates over persisted state, idempotent per period
//! - **Planning**: fixed regime-to-instrument lookup
//!
//! The core does no I/O. Brokers, persistence and the polling loop live in
//! the `volregime-broker` and `volregime-rebalancer` crates.
//!
//! ## Quick Start
//!
//! ```
//! use chrono::{FixedOffset, TimeZone, Utc};
//! use volregime::{Frequency, Regime, Strategy, Symbol, VolRegimeParams, VolatilityRegime};
//!
//! let params = VolRegimeParams::default();
//! let mut strategy = VolatilityRegime::new("vol-monthly", Frequency::Monthly, params).unwrap();
//!
//! // 21 flat closes: zero volatility.
//! strategy.initialize(&[450.0; 21], None, Utc::now()).unwrap();
//! assert_eq!(strategy.current_regime(), Regime::LowVolLeverage);
//!
//! let et = FixedOffset::west_opt(4 * 3600).unwrap();
//! let now = et.with_ymd_and_hms(2026, 3, 30, 15, 30, 0).unwrap();
//! assert!(strategy.should_rebalance_today(now.date_naive()));
//!
//! let decision = strategy.calculate_signals(now);
//! assert_eq!(decision.allocation.weight(&Symbol::new("UPRO")), 1.0);
//!
//! // The decision is recorded: no second rebalance this month.
//! assert!(!strategy.should_rebalance_today(now.date_naive()));
//! ```
//!
//! ## Regimes
//!
//! | Volatility | Normal | Recovery mode |
//! |------------|--------|---------------|
//! | unavailable | `UNKNOWN` | `UNKNOWN` |
//! | < 15% | `LOW_VOL_LEVERAGE` | `RECOVERY_LEVERAGE` (< 22.5%) |
//! | 15%-25% | `MEDIUM_VOL_NEUTRAL` | `RECOVERY_NEUTRAL` |
//! | > 25% | `HIGH_VOL_DEFENSIVE` | `RECOVERY_NEUTRAL` |

pub mod allocation;
mod error;
pub mod regime;
pub mod schedule;
pub mod signal;
pub mod strategy;
mod types;

pub use allocation::{Allocation, Instruments, NOISE_FLOOR};
pub use error::{Error, Result};
pub use regime::{RecoveryPolicy, RecoveryState, RecoveryTransition, Regime, RegimeThresholds};
pub use schedule::{Frequency, ScheduleState, Scheduler};
pub use signal::{PriceWindow, SignalCalculator};
pub use strategy::{Decision, Strategy, StrategyState, VolRegimeParams, VolatilityRegime};
pub use types::{SYMBOL_MAX_LEN, Symbol};
