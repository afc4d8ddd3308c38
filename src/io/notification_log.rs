//! Notification log - durable alert history
//!
//! Every created notification is appended in JSONL format (one JSON object
//! per line) to the file specified in config.

use crate::domain::types::Notification;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Append-only JSONL writer for notifications
///
/// Safe to share between threads: each record goes out as a single write
/// under the file lock, so lines never interleave.
#[derive(Debug)]
pub struct NotificationLog {
    path: PathBuf,
    /// Opened on first append
    file: Mutex<Option<File>>,
}

impl NotificationLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        info!(file_path = %path.display(), "notification_log_initialized");
        Self { path, file: Mutex::new(None) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one notification as a JSON line
    pub fn append(&self, notification: &Notification) -> std::io::Result<()> {
        let mut line = serde_json::to_string(notification)?;
        line.push('\n');

        let mut guard = self.file.lock();
        if guard.is_none() {
            *guard = Some(self.open()?);
        }
        if let Some(file) = guard.as_mut() {
            file.write_all(line.as_bytes())?;
        }
        drop(guard);

        debug!(
            notification_id = %notification.id,
            user_id = %notification.user_id,
            bytes = %line.len(),
            "notification_logged"
        );

        Ok(())
    }

    fn open(&self) -> std::io::Result<File> {
        // Create parent directories if they don't exist
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        OpenOptions::new().create(true).append(true).open(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::UserId;
    use tempfile::tempdir;

    #[test]
    fn test_appends_one_line_per_notification() {
        let dir = tempdir().unwrap();
        let log = NotificationLog::new(dir.path().join("alerts/notifications.jsonl"));

        let user = UserId::new_v7();
        let first = Notification::new(user, "Smoke detected! Evacuation route: A -> B".into());
        let second = Notification::new(user, "Smoke detected! Evacuation route: C".into());
        log.append(&first).unwrap();
        log.append(&second).unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: Notification = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed, first);
        assert!(lines[1].contains("\"userId\""));
        assert!(lines[1].contains("\"read\":false"));
    }

    #[test]
    fn test_concurrent_appends_keep_one_record_per_line() {
        let dir = tempdir().unwrap();
        let log = NotificationLog::new(dir.path().join("notifications.jsonl"));
        let threads = 16;
        let per_thread = 500;

        std::thread::scope(|scope| {
            for _ in 0..threads {
                let log = &log;
                scope.spawn(move || {
                    let user = UserId::new_v7();
                    for n in 0..per_thread {
                        let message = format!("Smoke detected! Evacuation route: room-{n}");
                        log.append(&Notification::new(user, message)).unwrap();
                    }
                });
            }
        });

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), threads * per_thread);
        let unparseable = lines.iter().filter(|l| serde_json::from_str::<Notification>(l).is_err()).count();
        assert_eq!(unparseable, 0);
    }

    #[test]
    fn test_unwritable_path_reports_error() {
        let dir = tempdir().unwrap();
        // A directory cannot be opened for append
        let log = NotificationLog::new(dir.path());
        let notification = Notification::new(UserId::new_v7(), "x".into());
        assert!(log.append(&notification).is_err());
    }
}
