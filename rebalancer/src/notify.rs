//! Best-effort operator notifications.
//!
//! Runtime events are buffered as timestamped lines and flushed once a day
//! (and on shutdown) to a dated summary file next to the logs.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use log::info;

use crate::error::Result;

/// A sink for human-readable run summaries.
pub trait Notifier: Send {
    /// Buffer one line.
    fn record(&mut self, message: &str);

    /// Deliver and clear the buffer. An empty buffer is a no-op.
    fn flush(&mut self, subject: &str) -> Result<()>;

    /// Lines buffered since the last flush.
    fn pending(&self) -> &[String];
}

/// Appends summaries to `<dir>/summary-YYYY-MM-DD.txt`.
#[derive(Debug)]
pub struct DailySummary {
    dir: PathBuf,
    buffer: Vec<String>,
}

impl DailySummary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            buffer: Vec::new(),
        }
    }

    fn file_path(&self) -> PathBuf {
        self.dir
            .join(format!("summary-{}.txt", Utc::now().format("%Y-%m-%d")))
    }
}

impl Notifier for DailySummary {
    fn record(&mut self, message: &str) {
        let ts = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        self.buffer.push(format!("[{ts}] {message}"));
    }

    fn flush(&mut self, subject: &str) -> Result<()> {
        if self.buffer.is_empty() {
            info!("No summary lines to write");
            return Ok(());
        }

        fs::create_dir_all(&self.dir)?;
        let path = self.file_path();
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "== {subject} ==")?;
        for line in &self.buffer {
            writeln!(file, "{line}")?;
        }
        writeln!(file)?;
        file.flush()?;

        info!(
            "{subject}: {} summary lines written to {}",
            self.buffer.len(),
            path.display()
        );
        self.buffer.clear();
        Ok(())
    }

    fn pending(&self) -> &[String] {
        &self.buffer
    }
}
