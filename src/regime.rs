//! Volatility regimes and the recovery-mode state machine.
//!
//! Regime resolution is a pure function of the volatility estimate and
//! whether recovery mode is active. Recovery mode is entered after an
//! extreme volatility spike and left once volatility normalizes or the
//! maximum duration passes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::Error;

/// Market-volatility state driving the allocation choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum Regime {
    LowVolLeverage,
    HighVolDefensive,
    MediumVolNeutral,
    RecoveryLeverage,
    RecoveryNeutral,
    NoDataNeutral,
    Unknown,
}

impl Regime {
    pub const ALL: [Regime; 7] = [
        Regime::LowVolLeverage,
        Regime::HighVolDefensive,
        Regime::MediumVolNeutral,
        Regime::RecoveryLeverage,
        Regime::RecoveryNeutral,
        Regime::NoDataNeutral,
        Regime::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::LowVolLeverage => "LOW_VOL_LEVERAGE",
            Regime::HighVolDefensive => "HIGH_VOL_DEFENSIVE",
            Regime::MediumVolNeutral => "MEDIUM_VOL_NEUTRAL",
            Regime::RecoveryLeverage => "RECOVERY_LEVERAGE",
            Regime::RecoveryNeutral => "RECOVERY_NEUTRAL",
            Regime::NoDataNeutral => "NO_DATA_NEUTRAL",
            Regime::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Regime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Regime::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| Error::UnknownRegime(s.to_string()))
    }
}

/// Volatility cut-offs for regime resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegimeThresholds {
    /// Below this, lever up.
    pub low: f64,
    /// Above this, go defensive.
    pub high: f64,
    /// In recovery mode the leverage cut-off is `low * recovery_multiplier`.
    pub recovery_multiplier: f64,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            low: 0.15,
            high: 0.25,
            recovery_multiplier: 1.5,
        }
    }
}

impl RegimeThresholds {
    /// Resolve the regime for a volatility estimate.
    ///
    /// `None` volatility resolves to [`Regime::Unknown`].
    pub fn resolve(&self, volatility: Option<f64>, in_recovery: bool) -> Regime {
        let Some(vol) = volatility else {
            return Regime::Unknown;
        };
        if in_recovery {
            if vol < self.low * self.recovery_multiplier {
                Regime::RecoveryLeverage
            } else {
                Regime::RecoveryNeutral
            }
        } else if vol < self.low {
            Regime::LowVolLeverage
        } else if vol > self.high {
            Regime::HighVolDefensive
        } else {
            Regime::MediumVolNeutral
        }
    }
}

/// Whether recovery mode is active, and since when.
///
/// The start time is present exactly when recovery is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryState {
    started_at: Option<DateTime<Utc>>,
}

impl RecoveryState {
    pub fn normal() -> Self {
        Self { started_at: None }
    }

    pub fn active_since(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at: Some(started_at),
        }
    }

    /// Rebuild from a persisted `(active, start)` pair.
    ///
    /// An active record without a start time is restarted at `now`; an
    /// inactive record drops any leftover start time.
    pub fn from_persisted(
        active: bool,
        started_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        if active {
            Self::active_since(started_at.unwrap_or(now))
        } else {
            Self::normal()
        }
    }

    pub fn is_active(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Whole days spent in recovery as of `now`.
    pub fn days_active(&self, now: DateTime<Utc>) -> Option<i64> {
        self.started_at.map(|start| (now - start).num_days())
    }
}

/// What a recovery update did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryTransition {
    Unchanged,
    Entered,
    Exited { days_active: i64 },
}

/// Entry and exit rules for recovery mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecoveryPolicy {
    /// Volatility strictly above this enters recovery.
    pub extreme_threshold: f64,
    /// Volatility strictly below this leaves recovery.
    pub exit_threshold: f64,
    /// Recovery ends once more than this many days have elapsed.
    pub max_days: i64,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            extreme_threshold: 0.50,
            exit_threshold: 0.20,
            max_days: 45,
        }
    }
}

impl RecoveryPolicy {
    /// Advance the recovery state for a fresh volatility reading.
    ///
    /// With no volatility estimate only the timeout can end recovery.
    pub fn update(
        &self,
        state: &mut RecoveryState,
        volatility: Option<f64>,
        now: DateTime<Utc>,
    ) -> RecoveryTransition {
        match state.started_at {
            None => match volatility {
                Some(vol) if vol > self.extreme_threshold => {
                    *state = RecoveryState::active_since(now);
                    RecoveryTransition::Entered
                }
                _ => RecoveryTransition::Unchanged,
            },
            Some(start) => {
                let days_active = (now - start).num_days();
                let normalized = volatility.is_some_and(|vol| vol < self.exit_threshold);
                if normalized || days_active > self.max_days {
                    *state = RecoveryState::normal();
                    RecoveryTransition::Exited { days_active }
                } else {
                    RecoveryTransition::Unchanged
                }
            }
        }
    }
}
