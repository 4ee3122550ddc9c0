//! US equity market clock: trigger minute, market hours, next session.
//!
//! Weekends are closed; exchange holidays are not modelled.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;

use crate::config::CalendarConfig;
use crate::error::Result;

/// Market timezone clock with the configured trigger times.
#[derive(Debug, Clone, Copy)]
pub struct MarketCalendar {
    tz: Tz,
    trigger: NaiveTime,
    summary: NaiveTime,
    open: NaiveTime,
    close: NaiveTime,
}

impl MarketCalendar {
    pub fn new(tz: Tz, trigger: NaiveTime, summary: NaiveTime) -> Self {
        Self {
            tz,
            trigger,
            summary,
            open: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or_default(),
            close: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default(),
        }
    }

    pub fn from_config(config: &CalendarConfig) -> Result<Self> {
        Ok(Self::new(config.tz()?, config.trigger()?, config.summary()?))
    }

    /// Current time in the market timezone.
    pub fn now(&self) -> DateTime<Tz> {
        self.localize(Utc::now())
    }

    pub fn localize(&self, t: DateTime<Utc>) -> DateTime<Tz> {
        t.with_timezone(&self.tz)
    }

    pub fn is_weekday(now: &DateTime<Tz>) -> bool {
        !matches!(now.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// True during the trigger minute on weekdays.
    pub fn is_rebalance_trigger_time(&self, now: &DateTime<Tz>) -> bool {
        Self::is_weekday(now) && same_minute(now, self.trigger)
    }

    /// True during the summary minute, any day.
    pub fn is_summary_time(&self, now: &DateTime<Tz>) -> bool {
        same_minute(now, self.summary)
    }

    /// Regular session, 09:30-16:00 inclusive, weekdays.
    pub fn is_market_open(&self, now: &DateTime<Tz>) -> bool {
        let t = now.time();
        Self::is_weekday(now) && self.open <= t && t <= self.close
    }

    /// Opening time of the next weekday after `from`.
    pub fn next_market_day(&self, from: &DateTime<Tz>) -> DateTime<Tz> {
        let mut date = from.date_naive();
        loop {
            date += Duration::days(1);
            if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
                break;
            }
        }
        let open = date.and_time(self.open);
        // Opening time never falls in a DST gap for US markets.
        self.tz
            .from_local_datetime(&open)
            .earliest()
            .unwrap_or_else(|| self.tz.from_utc_datetime(&open))
    }

    /// Start of the next regular session: today's open if it is still
    /// ahead, otherwise the next weekday's.
    pub fn next_open(&self, now: &DateTime<Tz>) -> DateTime<Tz> {
        let today = now.date_naive().and_time(self.open);
        match self.tz.from_local_datetime(&today).earliest() {
            Some(open) if Self::is_weekday(now) && *now < open => open,
            _ => self.next_market_day(now),
        }
    }
}

fn same_minute(now: &DateTime<Tz>, at: NaiveTime) -> bool {
    now.hour() == at.hour() && now.minute() == at.minute()
}
