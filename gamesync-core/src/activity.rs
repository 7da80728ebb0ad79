//! User-visible activity log.
//!
//! Lines are appended to `activity.log` next to the journal, under the same
//! file lock. The file is size-bounded: past the soft limit it is rotated to
//! `activity.log.1` and restarted with a marker line; if it still exceeds the
//! hard limit (rotation failed), it is truncated.

use std::fs::{self, OpenOptions};
use std::io::Write;
use tracing::Level;

use crate::journal::{SharedLogFiles, lock};

/// Receiver of user-facing log lines.
pub trait ActivitySink: Send + Sync {
    fn emit(&self, level: Level, text: &str);
}

/// Sink that drops everything; used where no user log is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ActivitySink for NullSink {
    fn emit(&self, _level: Level, _text: &str) {}
}

/// Size bounds for the activity log file.
#[derive(Debug, Clone, Copy)]
pub struct RotationPolicy {
    pub soft_limit: u64,
    pub hard_limit: u64,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            soft_limit: 1024 * 1024,
            hard_limit: 4 * 1024 * 1024,
        }
    }
}

pub struct ActivityLog {
    files: SharedLogFiles,
    policy: RotationPolicy,
}

impl ActivityLog {
    pub fn new(files: SharedLogFiles, policy: RotationPolicy) -> Self {
        Self { files, policy }
    }

    fn write_line(&self, level: Level, text: &str) -> std::io::Result<()> {
        let files = lock(&self.files);
        fs::create_dir_all(files.dir())?;
        let path = files.activity_path();
        let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

        let mut marker = None;
        if size >= self.policy.soft_limit {
            let rotated = path.with_extension("log.1");
            match fs::rename(&path, &rotated) {
                Ok(()) => marker = Some("rotated"),
                Err(e) if size >= self.policy.hard_limit => {
                    tracing::warn!("Activity log rotation failed ({}), truncating", e);
                    OpenOptions::new().write(true).truncate(true).open(&path)?;
                    marker = Some("truncated");
                }
                Err(e) => tracing::warn!("Activity log rotation failed: {}", e),
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        if let Some(what) = marker {
            writeln!(file, "{} INFO --- log {} ---", now, what)?;
        }
        writeln!(file, "{} {} {}", now, level, crate::model::sanitize_text(text))?;
        Ok(())
    }
}

impl ActivitySink for ActivityLog {
    fn emit(&self, level: Level, text: &str) {
        if let Err(e) = self.write_line(level, text) {
            tracing::warn!("Failed to write activity log: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{ACTIVITY_FILE, LogFiles};
    use tempfile::TempDir;

    #[test]
    fn test_emit_appends_lines() {
        let tmp = TempDir::new().unwrap();
        let log = ActivityLog::new(LogFiles::shared(tmp.path()), RotationPolicy::default());
        log.emit(Level::WARN, "sync failed");
        log.emit(Level::INFO, "sync ok");
        let content = fs::read_to_string(tmp.path().join(ACTIVITY_FILE)).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("WARN sync failed"));
    }

    #[test]
    fn test_rotation_past_soft_limit() {
        let tmp = TempDir::new().unwrap();
        let policy = RotationPolicy {
            soft_limit: 64,
            hard_limit: 1024,
        };
        let log = ActivityLog::new(LogFiles::shared(tmp.path()), policy);
        for i in 0..5 {
            log.emit(Level::INFO, &format!("line number {}", i));
        }
        assert!(tmp.path().join("activity.log.1").exists());
        let current = fs::read_to_string(tmp.path().join(ACTIVITY_FILE)).unwrap();
        assert!(current.contains("--- log rotated ---"));
        assert!(current.len() < 256);
    }

    #[test]
    fn test_truncated_past_hard_limit_when_rotation_fails() {
        let tmp = TempDir::new().unwrap();
        let policy = RotationPolicy {
            soft_limit: 64,
            hard_limit: 128,
        };
        // Renaming onto a non-empty directory always fails.
        let blocked = tmp.path().join("activity.log.1");
        fs::create_dir(&blocked).unwrap();
        fs::write(blocked.join("keep"), "x").unwrap();

        let path = tmp.path().join(ACTIVITY_FILE);
        fs::write(&path, "a".repeat(100)).unwrap();
        let log = ActivityLog::new(LogFiles::shared(tmp.path()), policy);
        log.emit(Level::INFO, "between limits");
        let grown = fs::read_to_string(&path).unwrap();
        assert!(grown.starts_with(&"a".repeat(100)));
        assert!(grown.ends_with("INFO between limits\n"));

        fs::write(&path, "a".repeat(200)).unwrap();
        log.emit(Level::WARN, "after truncate");
        let current = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = current.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("INFO --- log truncated ---"));
        assert!(lines[1].ends_with("WARN after truncate"));
        assert!(blocked.is_dir());
    }
}
