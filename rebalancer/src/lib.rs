//! volregime-rebalancer: scheduled volatility-regime rebalancing for Alpaca accounts.
//!
//! Each configured strategy watches the realized volatility of a signal
//! symbol, picks one of three instruments for the current regime, persists
//! its decision, then trades its own account toward that target. A polling
//! loop drives all strategies at a fixed market-time trigger, with a JSONL
//! audit trail and a daily summary file.

pub mod audit;
pub mod broker;
pub mod calendar;
pub mod config;
pub mod error;
pub mod execution;
pub mod notify;
pub mod orchestrator;
pub mod reconcile;
pub mod state;
