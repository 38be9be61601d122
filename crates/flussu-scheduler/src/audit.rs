//! Audit log for timed-call runs.
//! Fire-and-forget: a sink that cannot write only warns, it never stops a run.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;

/// Destination for per-run audit lines.
pub trait AuditSink: Send + Sync {
    fn append(&self, line: &str);
}

/// Appends timestamped lines to a plain text file.
pub struct FileAuditSink {
    path: PathBuf,
}

impl FileAuditSink {
    pub fn new(path: &Path) -> Self {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{} {}", Utc::now().format("%Y-%m-%d %H:%M:%S"), line)
    }
}

impl AuditSink for FileAuditSink {
    fn append(&self, line: &str) {
        if let Err(e) = self.write_line(line) {
            tracing::warn!("⚠️ Failed to write audit log {}: {e}", self.path.display());
        }
    }
}

/// Keeps lines in memory.
#[derive(Default)]
pub struct MemoryAuditSink {
    lines: Mutex<Vec<String>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}
