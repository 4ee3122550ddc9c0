//! Per-strategy persisted state with atomic overwrite.
//!
//! Each strategy owns one JSON file, `<dir>/<name>_state.json`. Saves write
//! a sibling temp file and rename it over the target, so a crash leaves
//! either the old record or the new one, never a torn file.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use volregime::{RecoveryState, Regime, ScheduleState, StrategyState};

use crate::error::{Error, Result};

/// The on-disk record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub last_rebalance_date: Option<NaiveDate>,
    /// Regime label, kept as text so an unknown label does not make the
    /// whole file unreadable.
    pub last_regime: Option<String>,
    #[serde(default)]
    pub trade_count: u64,
    #[serde(default)]
    pub in_recovery_mode: bool,
    #[serde(default)]
    pub recovery_mode_start: Option<DateTime<Utc>>,
}

impl PersistedState {
    pub fn from_strategy(state: &StrategyState) -> Self {
        Self {
            last_rebalance_date: state.schedule.last_rebalance_date,
            last_regime: state.schedule.last_regime.map(|r| r.as_str().to_string()),
            trade_count: state.schedule.trade_count,
            in_recovery_mode: state.recovery.is_active(),
            recovery_mode_start: state.recovery.started_at(),
        }
    }

    /// Rebuild strategy state. An unrecognised regime label is dropped;
    /// an active recovery without a start time restarts at `now`.
    pub fn to_strategy(&self, now: DateTime<Utc>) -> StrategyState {
        let last_regime = self.last_regime.as_deref().and_then(|label| {
            label
                .parse::<Regime>()
                .map_err(|e| warn!("Ignoring persisted regime: {e}"))
                .ok()
        });
        StrategyState {
            schedule: ScheduleState {
                last_rebalance_date: self.last_rebalance_date,
                last_regime,
                trade_count: self.trade_count,
            },
            recovery: RecoveryState::from_persisted(
                self.in_recovery_mode,
                self.recovery_mode_start,
                now,
            ),
        }
    }
}

/// File-backed store for one strategy.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(dir: &Path, strategy_name: &str) -> Self {
        Self {
            path: dir.join(format!("{strategy_name}_state.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Load the record, `None` on first run.
    pub fn load(&self) -> Result<Option<PersistedState>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::StateRead {
                    path: self.path.clone(),
                    source: e,
                });
            }
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| Error::StateParse {
                path: self.path.clone(),
                source: e,
            })
    }

    /// Atomically replace the record.
    pub fn save(&self, state: &PersistedState) -> Result<()> {
        let write_err = |e: std::io::Error| Error::StateWrite {
            path: self.path.clone(),
            source: e,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let json = serde_json::to_string_pretty(state)
            .map_err(|e| write_err(std::io::Error::new(ErrorKind::InvalidData, e)))?;

        let tmp = self.temp_path();
        {
            let mut file = File::create(&tmp).map_err(write_err)?;
            file.write_all(json.as_bytes()).map_err(write_err)?;
            file.sync_all().map_err(write_err)?;
        }
        fs::rename(&tmp, &self.path).map_err(write_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> PersistedState {
        PersistedState {
            last_rebalance_date: NaiveDate::from_ymd_opt(2026, 3, 6),
            last_regime: Some("RECOVERY_NEUTRAL".into()),
            trade_count: 12,
            in_recovery_mode: true,
            recovery_mode_start: Some(Utc.with_ymd_and_hms(2026, 2, 27, 20, 30, 0).unwrap()),
        }
    }

    #[test]
    fn load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), "vol");
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn save_then_load_preserves_all_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(&dir.path().join("nested"), "vol_regime_weekly");
        store.save(&sample()).unwrap();

        assert!(store.path().ends_with("vol_regime_weekly_state.json"));
        assert_eq!(store.load().unwrap(), Some(sample()));
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn save_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), "vol");
        store.save(&sample()).unwrap();

        let mut next = sample();
        next.trade_count = 13;
        next.in_recovery_mode = false;
        next.recovery_mode_start = None;
        store.save(&next).unwrap();
        assert_eq!(store.load().unwrap(), Some(next));
    }

    #[test]
    fn corrupt_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), "vol");
        fs::write(store.path(), "{ not json").unwrap();
        assert!(matches!(store.load(), Err(Error::StateParse { .. })));
    }

    #[test]
    fn file_format_uses_plain_labels() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), "vol");
        store.save(&sample()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["last_rebalance_date"], "2026-03-06");
        assert_eq!(raw["last_regime"], "RECOVERY_NEUTRAL");
        assert_eq!(raw["trade_count"], 12);
        assert_eq!(raw["in_recovery_mode"], true);
    }

    #[test]
    fn minimal_record_parses() {
        let state: PersistedState =
            serde_json::from_str(r#"{"last_rebalance_date": null, "last_regime": null}"#).unwrap();
        assert_eq!(state, PersistedState::default());
    }

    #[test]
    fn strategy_state_round_trip() {
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 20, 30, 0).unwrap();
        let persisted = sample();
        let state = persisted.to_strategy(now);
        assert_eq!(state.schedule.last_regime, Some(Regime::RecoveryNeutral));
        assert_eq!(state.recovery.started_at(), persisted.recovery_mode_start);
        assert_eq!(PersistedState::from_strategy(&state), persisted);
    }

    #[test]
    fn inconsistent_records_are_normalized() {
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 20, 30, 0).unwrap();
        let persisted = PersistedState {
            last_regime: Some("SIDEWAYS".into()),
            in_recovery_mode: true,
            recovery_mode_start: None,
            ..PersistedState::default()
        };
        let state = persisted.to_strategy(now);
        assert_eq!(state.schedule.last_regime, None);
        assert_eq!(state.recovery.started_at(), Some(now));
    }
}
