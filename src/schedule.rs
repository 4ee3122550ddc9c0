//! Rebalance scheduling predicates.
//!
//! A [`Scheduler`] answers "should this strategy act today?" from the
//! persisted [`ScheduleState`] and the regime observed right now. Every
//! frequency is idempotent: once a decision has been recorded for the
//! current period, further calls in that period return `false`.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, Weekday};

use crate::error::Error;
use crate::regime::Regime;

/// How often a strategy is allowed to rebalance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum Frequency {
    /// On regime change, at most once per day.
    Daily,
    /// Every Friday, once per ISO week.
    Weekly,
    /// In the last three calendar days of the month, once per month.
    Monthly,
    /// On regime change (once per day), plus a Friday safety net.
    Adaptive,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Adaptive => "adaptive",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "adaptive" => Ok(Frequency::Adaptive),
            _ => Err(Error::UnknownFrequency(s.to_string())),
        }
    }
}

/// Persisted record of the last decision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleState {
    pub last_rebalance_date: Option<NaiveDate>,
    pub last_regime: Option<Regime>,
    pub trade_count: u64,
}

impl ScheduleState {
    /// Record a decision taken on `date` for `regime`.
    pub fn record(&mut self, date: NaiveDate, regime: Regime) {
        self.last_rebalance_date = Some(date);
        self.last_regime = Some(regime);
        self.trade_count += 1;
    }

    fn rebalanced_on(&self, date: NaiveDate) -> bool {
        self.last_rebalance_date == Some(date)
    }

    fn regime_changed(&self, current: Regime) -> bool {
        self.last_regime.is_some_and(|last| last != current)
    }
}

/// Frequency-specific rebalance predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduler {
    frequency: Frequency,
}

impl Scheduler {
    pub fn new(frequency: Frequency) -> Self {
        Self { frequency }
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    /// Decide whether to rebalance on `today`.
    pub fn should_rebalance(
        &self,
        today: NaiveDate,
        state: &ScheduleState,
        current: Regime,
    ) -> bool {
        match self.frequency {
            Frequency::Daily => daily(today, state, current),
            Frequency::Weekly => weekly(today, state),
            Frequency::Monthly => monthly(today, state),
            Frequency::Adaptive => adaptive(today, state, current),
        }
    }
}

fn daily(today: NaiveDate, state: &ScheduleState, current: Regime) -> bool {
    if state.rebalanced_on(today) {
        return false;
    }
    state.last_regime.is_none() || state.regime_changed(current)
}

fn weekly(today: NaiveDate, state: &ScheduleState) -> bool {
    if today.weekday() != Weekday::Fri {
        return false;
    }
    match state.last_rebalance_date {
        Some(last) => last.iso_week() != today.iso_week(),
        None => true,
    }
}

fn monthly(today: NaiveDate, state: &ScheduleState) -> bool {
    if !is_month_end(today) {
        return false;
    }
    match state.last_rebalance_date {
        Some(last) => (last.year(), last.month()) != (today.year(), today.month()),
        None => true,
    }
}

fn adaptive(today: NaiveDate, state: &ScheduleState, current: Regime) -> bool {
    if state.regime_changed(current) {
        return !state.rebalanced_on(today);
    }
    if today.weekday() != Weekday::Fri {
        return false;
    }
    match state.last_rebalance_date {
        Some(last) => (today - last).num_days() >= 7,
        None => true,
    }
}

/// True on the last three calendar days of the month.
pub fn is_month_end(date: NaiveDate) -> bool {
    date.day() + 2 >= days_in_month(date.year(), date.month())
}

/// Number of days in the given month.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}
