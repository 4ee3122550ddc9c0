//! TOML configuration loading and validation.

use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use chrono_tz::Tz;
use rustc_hash::FxHashSet;
use serde::Deserialize;
use volregime::{
    Frequency, Instruments, RecoveryPolicy, RegimeThresholds, Symbol, VolRegimeParams,
};

use crate::error::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(rename = "strategy")]
    pub strategies: Vec<StrategyConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Local time (HH:MM) at which rebalance checks fire on weekdays.
    #[serde(default = "default_trigger_time")]
    pub trigger_time: String,
    /// Local time (HH:MM) at which the daily summary is flushed.
    #[serde(default = "default_summary_time")]
    pub summary_time: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_timezone() -> String {
    "America/New_York".into()
}
fn default_trigger_time() -> String {
    "15:30".into()
}
fn default_summary_time() -> String {
    "17:00".into()
}
fn default_poll_interval() -> u64 {
    60
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            trigger_time: default_trigger_time(),
            summary_time: default_summary_time(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl CalendarConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse()
            .map_err(|_| Error::Config(format!("unknown timezone: {}", self.timezone)))
    }

    pub fn trigger(&self) -> Result<NaiveTime> {
        parse_hhmm("trigger_time", &self.trigger_time)
    }

    pub fn summary(&self) -> Result<NaiveTime> {
        parse_hhmm("summary_time", &self.summary_time)
    }
}

fn parse_hhmm(field: &str, value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| Error::Config(format!("{field} must be HH:MM, got {value:?}")))
}

/// How a decision is turned into orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPolicy {
    /// Liquidate only what the target drops, adjust only what drifted.
    #[default]
    Reconcile,
    /// Close everything, then enter the target from cash.
    LiquidateAll,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_close_timeout")]
    pub close_timeout_secs: u64,
    #[serde(default = "default_close_poll")]
    pub close_poll_ms: u64,
    #[serde(default = "default_cycle_deadline")]
    pub cycle_deadline_secs: u64,
    #[serde(default = "default_true")]
    pub use_fractional: bool,
    #[serde(default = "default_min_notional")]
    pub min_notional_usd: f64,
    #[serde(default)]
    pub policy: ExecutionPolicy,
}

fn default_close_timeout() -> u64 {
    30
}
fn default_close_poll() -> u64 {
    500
}
fn default_cycle_deadline() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_min_notional() -> f64 {
    1.0
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            close_timeout_secs: default_close_timeout(),
            close_poll_ms: default_close_poll(),
            cycle_deadline_secs: default_cycle_deadline(),
            use_fractional: true,
            min_notional_usd: default_min_notional(),
            policy: ExecutionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_dir")]
    pub dir: String,
}

fn default_state_dir() -> String {
    "./data".into()
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,
    #[serde(default = "default_audit_file")]
    pub audit_file: String,
}

fn default_log_dir() -> String {
    "./logs".into()
}
fn default_audit_file() -> String {
    "audit.jsonl".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            audit_file: default_audit_file(),
        }
    }
}

/// One strategy instance bound to one broker account.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub frequency: Frequency,
    pub account: AccountConfig,
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub instruments: InstrumentsConfig,
}

/// Names of the environment variables holding the account credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub api_key_env: String,
    pub secret_key_env: String,
    /// Variable holding "true"/"false"; paper trading when unset.
    #[serde(default)]
    pub paper_env: Option<String>,
}

/// Credentials resolved from the environment.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub secret_key: String,
    pub paper: bool,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .field("paper", &self.paper)
            .finish()
    }
}

impl AccountConfig {
    /// Resolve credentials through `lookup` (normally `std::env::var`).
    pub fn credentials_from<F>(&self, lookup: F) -> Result<Credentials>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |var: &str| {
            lookup(var)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::Credentials(format!("environment variable {var} is not set")))
        };
        let api_key = require(&self.api_key_env)?;
        let secret_key = require(&self.secret_key_env)?;
        let paper = match self.paper_env.as_deref().and_then(|var| lookup(var)) {
            None => true,
            Some(v) => parse_bool(&v).ok_or_else(|| {
                Error::Credentials(format!("paper flag must be true or false, got {v:?}"))
            })?,
        };
        Ok(Credentials {
            api_key,
            secret_key,
            paper,
        })
    }

    pub fn credentials(&self) -> Result<Credentials> {
        self.credentials_from(|var| std::env::var(var).ok())
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalConfig {
    #[serde(default = "default_signal_symbol")]
    pub symbol: Symbol,
    #[serde(default = "default_lookback")]
    pub lookback: usize,
    #[serde(default = "default_low")]
    pub low_threshold: f64,
    #[serde(default = "default_high")]
    pub high_threshold: f64,
    #[serde(default = "default_recovery_multiplier")]
    pub recovery_multiplier: f64,
    #[serde(default = "default_extreme")]
    pub extreme_threshold: f64,
    #[serde(default = "default_recovery_exit")]
    pub recovery_exit_threshold: f64,
    #[serde(default = "default_max_recovery_days")]
    pub max_recovery_days: i64,
}

fn default_signal_symbol() -> Symbol {
    Symbol::new("SPY")
}
fn default_lookback() -> usize {
    20
}
fn default_low() -> f64 {
    0.15
}
fn default_high() -> f64 {
    0.25
}
fn default_recovery_multiplier() -> f64 {
    1.5
}
fn default_extreme() -> f64 {
    0.50
}
fn default_recovery_exit() -> f64 {
    0.20
}
fn default_max_recovery_days() -> i64 {
    45
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            symbol: default_signal_symbol(),
            lookback: default_lookback(),
            low_threshold: default_low(),
            high_threshold: default_high(),
            recovery_multiplier: default_recovery_multiplier(),
            extreme_threshold: default_extreme(),
            recovery_exit_threshold: default_recovery_exit(),
            max_recovery_days: default_max_recovery_days(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentsConfig {
    #[serde(default = "default_leveraged_long")]
    pub leveraged_long: Symbol,
    #[serde(default = "default_inverse_hedge")]
    pub inverse_hedge: Symbol,
    #[serde(default = "default_benchmark")]
    pub benchmark: Symbol,
}

fn default_leveraged_long() -> Symbol {
    Symbol::new("UPRO")
}
fn default_inverse_hedge() -> Symbol {
    Symbol::new("SH")
}
fn default_benchmark() -> Symbol {
    Symbol::new("SPY")
}

impl Default for InstrumentsConfig {
    fn default() -> Self {
        Self {
            leveraged_long: default_leveraged_long(),
            inverse_hedge: default_inverse_hedge(),
            benchmark: default_benchmark(),
        }
    }
}

impl StrategyConfig {
    /// Strategy parameters for the decision core.
    pub fn params(&self) -> VolRegimeParams {
        let s = &self.signal;
        VolRegimeParams {
            signal_symbol: s.symbol,
            lookback: s.lookback,
            thresholds: RegimeThresholds {
                low: s.low_threshold,
                high: s.high_threshold,
                recovery_multiplier: s.recovery_multiplier,
            },
            recovery: RecoveryPolicy {
                extreme_threshold: s.extreme_threshold,
                exit_threshold: s.recovery_exit_threshold,
                max_days: s.max_recovery_days,
            },
            instruments: Instruments {
                leveraged_long: self.instruments.leveraged_long,
                inverse_hedge: self.instruments.inverse_hedge,
                benchmark: self.instruments.benchmark,
            },
        }
    }
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&contents)
    }

    /// Parse and validate config text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate config invariants.
    fn validate(&self) -> Result<()> {
        self.calendar.tz()?;
        self.calendar.trigger()?;
        self.calendar.summary()?;
        if self.calendar.poll_interval_secs == 0 {
            return Err(Error::Config("poll_interval_secs must be > 0".into()));
        }
        if self.execution.close_poll_ms == 0 {
            return Err(Error::Config("close_poll_ms must be > 0".into()));
        }
        if self.execution.cycle_deadline_secs == 0 {
            return Err(Error::Config("cycle_deadline_secs must be > 0".into()));
        }
        if self.execution.min_notional_usd.is_nan() || self.execution.min_notional_usd < 0.0 {
            return Err(Error::Config("min_notional_usd must be >= 0".into()));
        }
        if self.enabled_strategies().next().is_none() {
            return Err(Error::Config("at least one strategy must be enabled".into()));
        }

        let mut names = FxHashSet::default();
        for strategy in &self.strategies {
            if strategy.name.trim().is_empty() {
                return Err(Error::Config("strategy name must not be empty".into()));
            }
            // The name becomes a file name under the state directory.
            if !strategy.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                return Err(Error::Config(format!(
                    "strategy name {:?} may only contain letters, digits, '_' and '-'",
                    strategy.name
                )));
            }
            if !names.insert(strategy.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate strategy name: {}",
                    strategy.name
                )));
            }
            strategy
                .params()
                .validate()
                .map_err(|e| Error::Config(format!("strategy {}: {e}", strategy.name)))?;
        }
        Ok(())
    }

    pub fn enabled_strategies(&self) -> impl Iterator<Item = &StrategyConfig> {
        self.strategies.iter().filter(|s| s.enabled)
    }

    /// Look up a strategy by name, enabled or not.
    pub fn strategy(&self, name: &str) -> Result<&StrategyConfig> {
        self.strategies
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::UnknownStrategy(name.to_string()))
    }

    /// Full path to the audit log file.
    pub fn audit_path(&self) -> PathBuf {
        Path::new(&self.logging.dir).join(&self.logging.audit_file)
    }

    pub fn state_dir(&self) -> PathBuf {
        PathBuf::from(&self.state.dir)
    }

    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.logging.dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_toml() -> &'static str {
        r#"
[calendar]
timezone = "America/New_York"
trigger_time = "15:30"
summary_time = "17:00"
poll_interval_secs = 60

[execution]
close_timeout_secs = 30
close_poll_ms = 500
use_fractional = true
policy = "reconcile"

[state]
dir = "./data"

[logging]
dir = "./logs"
audit_file = "audit.jsonl"

[[strategy]]
name = "vol_regime_monthly"
frequency = "monthly"
[strategy.account]
api_key_env = "ALPACA_MONTHLY_KEY"
secret_key_env = "ALPACA_MONTHLY_SECRET"
paper_env = "ALPACA_MONTHLY_PAPER"

[[strategy]]
name = "vol_regime_adaptive"
frequency = "adaptive"
enabled = false
[strategy.account]
api_key_env = "ALPACA_ADAPTIVE_KEY"
secret_key_env = "ALPACA_ADAPTIVE_SECRET"
[strategy.signal]
lookback = 30
low_threshold = 0.12
[strategy.instruments]
leveraged_long = "SSO"
"#
    }

    fn example() -> Config {
        Config::from_toml(example_toml()).unwrap()
    }

    #[test]
    fn parse_example_config() {
        let config = example();
        assert_eq!(config.calendar.poll_interval_secs, 60);
        assert_eq!(config.execution.policy, ExecutionPolicy::Reconcile);
        assert_eq!(config.execution.cycle_deadline_secs, 30);
        assert_eq!(config.strategies.len(), 2);
        assert_eq!(config.strategies[0].frequency, Frequency::Monthly);
        assert!(config.strategies[0].enabled);
        assert!(!config.strategies[1].enabled);
        assert_eq!(config.enabled_strategies().count(), 1);
    }

    #[test]
    fn strategy_params_apply_overrides_and_defaults() {
        let config = example();
        let params = config.strategy("vol_regime_adaptive").unwrap().params();
        assert_eq!(params.lookback, 30);
        assert_eq!(params.thresholds.low, 0.12);
        assert_eq!(params.thresholds.high, 0.25);
        assert_eq!(params.recovery.max_days, 45);
        assert_eq!(params.instruments.leveraged_long, Symbol::new("SSO"));
        assert_eq!(params.instruments.benchmark, Symbol::new("SPY"));

        let defaults = config.strategy("vol_regime_monthly").unwrap().params();
        assert_eq!(defaults, VolRegimeParams::default());
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::from_toml(
            r#"
[[strategy]]
name = "only"
frequency = "daily"
[strategy.account]
api_key_env = "K"
secret_key_env = "S"
"#,
        )
        .unwrap();
        assert_eq!(config.calendar.timezone, "America/New_York");
        assert_eq!(config.calendar.trigger().unwrap(), NaiveTime::from_hms_opt(15, 30, 0).unwrap());
        assert_eq!(config.execution.close_poll_ms, 500);
        assert_eq!(config.execution.min_notional_usd, 1.0);
        assert_eq!(config.state_dir(), PathBuf::from("./data"));
    }

    #[test]
    fn audit_path() {
        assert_eq!(example().audit_path(), PathBuf::from("./logs/audit.jsonl"));
    }

    #[test]
    fn liquidate_all_policy() {
        let toml = example_toml().replace("\"reconcile\"", "\"liquidate_all\"");
        let config = Config::from_toml(&toml).unwrap();
        assert_eq!(config.execution.policy, ExecutionPolicy::LiquidateAll);
    }

    #[test]
    fn validate_catches_unknown_frequency() {
        let toml = example_toml().replace("\"monthly\"", "\"hourly\"");
        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn validate_catches_bad_timezone() {
        let toml = example_toml().replace("America/New_York", "Mars/Olympus");
        assert!(matches!(Config::from_toml(&toml), Err(Error::Config(_))));
    }

    #[test]
    fn validate_catches_bad_time() {
        let toml = example_toml().replace("\"15:30\"", "\"3:30pm\"");
        assert!(matches!(Config::from_toml(&toml), Err(Error::Config(_))));
    }

    #[test]
    fn validate_catches_duplicate_names() {
        let toml = example_toml().replace("vol_regime_adaptive", "vol_regime_monthly");
        let err = Config::from_toml(&toml).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn validate_rejects_names_that_escape_the_state_dir() {
        for bad in ["../outside", "nested/name", "back\\\\slash", "..", "with space"] {
            let toml = example_toml().replace("vol_regime_adaptive", bad);
            let err = Config::from_toml(&toml).unwrap_err();
            assert!(err.to_string().contains("may only contain"), "{bad}: {err}");
        }
        let toml = example_toml().replace("vol_regime_adaptive", "vol-regime-2");
        assert!(Config::from_toml(&toml).is_ok());
    }

    #[test]
    fn validate_requires_an_enabled_strategy() {
        let mut config = example();
        config.strategies[0].enabled = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_catches_inverted_thresholds() {
        let mut config = example();
        config.strategies[0].signal.low_threshold = 0.40;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_catches_bad_symbol() {
        let toml = example_toml().replace("\"SSO\"", "\"NOT-A-TICKER\"");
        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn unknown_strategy_lookup() {
        assert!(matches!(example().strategy("nope"), Err(Error::UnknownStrategy(_))));
    }

    #[test]
    fn credentials_from_lookup() {
        let config = example();
        let account = &config.strategy("vol_regime_monthly").unwrap().account;
        let env = |var: &str| match var {
            "ALPACA_MONTHLY_KEY" => Some("key".to_string()),
            "ALPACA_MONTHLY_SECRET" => Some("secret".to_string()),
            "ALPACA_MONTHLY_PAPER" => Some("False".to_string()),
            _ => None,
        };
        let creds = account.credentials_from(env).unwrap();
        assert_eq!(creds.api_key, "key");
        assert!(!creds.paper);
        assert!(!format!("{creds:?}").contains("secret\""));
    }

    #[test]
    fn credentials_missing_or_blank() {
        let config = example();
        let account = &config.strategy("vol_regime_adaptive").unwrap().account;
        assert!(matches!(
            account.credentials_from(|_| None),
            Err(Error::Credentials(_))
        ));
        let blank = |var: &str| Some(if var.ends_with("KEY") { "k" } else { " " }.to_string());
        assert!(account.credentials_from(blank).is_err());

        let present = |_: &str| Some("x".to_string());
        assert!(account.credentials_from(present).unwrap().paper);
    }
}
