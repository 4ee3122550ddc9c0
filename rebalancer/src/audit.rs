//! JSONL audit trail logging.
//!
//! Every strategy runner appends events to a shared audit.jsonl file, one
//! JSON object per line. The writer is guarded by a mutex so runners on
//! different threads never interleave partial lines.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use volregime::Decision;

use crate::error::Result;
use crate::reconcile::{CloseWait, ExecutionReport, OrderOutcome};

/// An audit event written to the JSONL trail.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent<'a> {
    pub event: &'static str,
    pub ts: DateTime<Utc>,
    pub strategy: &'a str,
    #[serde(flatten)]
    pub data: serde_json::Value,
}

/// Append-only audit logger.
pub struct AuditLog {
    writer: Mutex<BufWriter<std::fs::File>>,
}

impl AuditLog {
    /// Open (or create) the audit log file for appending.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Log an event with arbitrary JSON data.
    pub fn log(&self, event: &'static str, strategy: &str, data: serde_json::Value) -> Result<()> {
        let entry = AuditEvent {
            event,
            ts: Utc::now(),
            strategy,
            data,
        };
        let json = serde_json::to_string(&entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(writer, "{json}")?;
        writer.flush()?;
        Ok(())
    }

    /// Log a simple event with no additional data.
    pub fn log_simple(&self, event: &'static str, strategy: &str) -> Result<()> {
        self.log(event, strategy, serde_json::json!({}))
    }
}

pub fn log_run_started(audit: &AuditLog, strategies: &[&str], dry_run: bool) -> Result<()> {
    audit.log(
        "run_started",
        "*",
        serde_json::json!({
            "strategies": strategies,
            "dry_run": dry_run,
        }),
    )
}

pub fn log_strategy_initialized(
    audit: &AuditLog,
    strategy: &str,
    regime: &str,
    history_bars: usize,
    restored: bool,
) -> Result<()> {
    audit.log(
        "strategy_initialized",
        strategy,
        serde_json::json!({
            "regime": regime,
            "history_bars": history_bars,
            "restored_state": restored,
        }),
    )
}

pub fn log_strategy_failed(audit: &AuditLog, strategy: &str, reason: &str) -> Result<()> {
    audit.log("strategy_failed", strategy, serde_json::json!({ "reason": reason }))
}

pub fn log_cycle_skipped(audit: &AuditLog, strategy: &str, reason: &str) -> Result<()> {
    audit.log("cycle_skipped", strategy, serde_json::json!({ "reason": reason }))
}

pub fn log_decision(
    audit: &AuditLog,
    strategy: &str,
    decision: &Decision,
    forced: bool,
) -> Result<()> {
    let target: serde_json::Map<String, serde_json::Value> = decision
        .allocation
        .iter()
        .map(|(s, w)| (s.as_str().to_string(), serde_json::json!(w)))
        .collect();
    audit.log(
        "decision",
        strategy,
        serde_json::json!({
            "date": decision.date,
            "regime": decision.regime.as_str(),
            "volatility": decision.volatility,
            "recovery": format!("{:?}", decision.recovery),
            "target": target,
            "forced": forced,
        }),
    )
}

pub fn log_state_saved(
    audit: &AuditLog,
    strategy: &str,
    path: &Path,
    trade_count: u64,
) -> Result<()> {
    audit.log(
        "state_saved",
        strategy,
        serde_json::json!({
            "path": path.display().to_string(),
            "trade_count": trade_count,
        }),
    )
}

pub fn log_state_save_failed(audit: &AuditLog, strategy: &str, error: &str) -> Result<()> {
    audit.log("state_save_failed", strategy, serde_json::json!({ "error": error }))
}

/// Log the liquidation, closure wait and every order outcome of a report.
pub fn log_execution(audit: &AuditLog, strategy: &str, report: &ExecutionReport) -> Result<()> {
    if !report.plan.to_liquidate.is_empty() {
        let symbols: Vec<&str> = report.plan.to_liquidate.iter().map(|s| s.as_str()).collect();
        let failures: Vec<_> = report
            .close_failures
            .iter()
            .map(|(s, e)| serde_json::json!({ "symbol": s.as_str(), "error": e }))
            .collect();
        audit.log(
            "liquidation",
            strategy,
            serde_json::json!({ "symbols": symbols, "failures": failures }),
        )?;
    }

    match &report.close_wait {
        CloseWait::NotNeeded => {}
        CloseWait::Closed { polls } => audit.log(
            "close_wait",
            strategy,
            serde_json::json!({ "closed": true, "polls": polls }),
        )?,
        CloseWait::TimedOut { still_open } => {
            let open: Vec<&str> = still_open.iter().map(|s| s.as_str()).collect();
            audit.log(
                "close_wait",
                strategy,
                serde_json::json!({ "closed": false, "still_open": open }),
            )?
        }
    }

    for fill in &report.orders {
        match &fill.outcome {
            OrderOutcome::Submitted { id, size, fallback } => audit.log(
                "order_submitted",
                strategy,
                serde_json::json!({
                    "symbol": fill.symbol.as_str(),
                    "target_weight": fill.target_weight,
                    "size": format!("{size:?}"),
                    "order_id": id.0,
                    "fallback": fallback,
                }),
            )?,
            OrderOutcome::Skipped(reason) => audit.log(
                "order_skipped",
                strategy,
                serde_json::json!({ "symbol": fill.symbol.as_str(), "reason": reason }),
            )?,
            OrderOutcome::Failed(error) => audit.log(
                "order_failed",
                strategy,
                serde_json::json!({ "symbol": fill.symbol.as_str(), "error": error }),
            )?,
        }
    }
    Ok(())
}

pub fn log_cycle_completed(
    audit: &AuditLog,
    strategy: &str,
    report: &ExecutionReport,
) -> Result<()> {
    audit.log(
        "cycle_completed",
        strategy,
        serde_json::json!({
            "liquidated": report.plan.to_liquidate.len(),
            "submitted": report.submitted(),
            "failed": report.failed(),
            "no_op": report.plan.is_empty(),
        }),
    )
}

pub fn log_cycle_error(audit: &AuditLog, strategy: &str, error: &str) -> Result<()> {
    audit.log("cycle_error", strategy, serde_json::json!({ "error": error }))
}
