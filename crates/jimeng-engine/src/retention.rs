use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use jimeng_contracts::activity::{ActivityKind, ActivityLog};
use serde_json::json;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
    pub kept: usize,
    /// Set when the directory itself could not be listed.
    pub scan_error: Option<String>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.scan_error.is_none()
    }
}

/// Age-based cleanup of the image output directory.
#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    dir: PathBuf,
    window: Duration,
    activity: Option<ActivityLog>,
}

impl RetentionSweeper {
    pub fn new(dir: impl Into<PathBuf>, window: Duration) -> Self {
        Self {
            dir: dir.into(),
            window,
            activity: None,
        }
    }

    pub fn with_activity(mut self, activity: ActivityLog) -> Self {
        self.activity = Some(activity);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Deletes files created more than one retention window ago.
    pub fn clean_old_images(&self) -> SweepReport {
        match SystemTime::now().checked_sub(self.window) {
            Some(cutoff) => self.sweep_before(cutoff),
            // A window reaching before the epoch makes nothing eligible.
            None => self.sweep_before(SystemTime::UNIX_EPOCH),
        }
    }

    /// Deletes every regular file whose creation time precedes `cutoff`.
    /// Failures are logged and reported, never raised.
    pub fn sweep_before(&self, cutoff: SystemTime) -> SweepReport {
        let mut report = SweepReport::default();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::error!(target: "jimeng", dir = %self.dir.display(), "failed to scan image directory: {err}");
                report.scan_error = Some(err.to_string());
                self.record(&report);
                return report;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::error!(target: "jimeng", "failed to read directory entry: {err}");
                    report.failed.push((self.dir.clone(), err.to_string()));
                    continue;
                }
            };
            let path = entry.path();
            match sweep_entry(&entry, cutoff) {
                Ok(true) => {
                    tracing::debug!(target: "jimeng", path = %path.display(), "deleted old image");
                    report.removed.push(path);
                }
                Ok(false) => report.kept += 1,
                Err(err) => {
                    tracing::error!(target: "jimeng", path = %path.display(), "failed to clean old image: {err:#}");
                    report.failed.push((path, format!("{err:#}")));
                }
            }
        }

        report.removed.sort();
        self.record(&report);
        report
    }

    fn record(&self, report: &SweepReport) {
        let Some(activity) = &self.activity else {
            return;
        };
        if report.removed.is_empty() && report.is_clean() {
            return;
        }
        let details = json!({
            "dir": self.dir.to_string_lossy(),
            "removed": report.removed.len(),
            "failed": report.failed.len(),
            "kept": report.kept,
            "scan_error": report.scan_error,
        });
        if let Err(err) = activity.record(ActivityKind::OldImagesSwept, details) {
            tracing::warn!(target: "jimeng", "failed to record sweep event: {err:#}");
        }
    }
}

/// Returns whether the entry was old enough to be removed.
fn sweep_entry(entry: &fs::DirEntry, cutoff: SystemTime) -> Result<bool> {
    let path = entry.path();
    let metadata = entry
        .metadata()
        .with_context(|| format!("failed to stat {}", path.display()))?;
    if !metadata.is_file() {
        return Ok(false);
    }
    let created = file_birth_time(&metadata)
        .with_context(|| format!("no timestamp for {}", path.display()))?;
    if created >= cutoff {
        return Ok(false);
    }
    fs::remove_file(&path).with_context(|| format!("failed to remove {}", path.display()))?;
    Ok(true)
}

// Not every filesystem records birth time; the write time stands in for it.
fn file_birth_time(metadata: &fs::Metadata) -> io::Result<SystemTime> {
    metadata.created().or_else(|_| metadata.modified())
}

/// Background thread running a sweep every `interval`. The thread exits
/// once the timer is stopped or dropped.
#[derive(Debug)]
pub struct RetentionTimer {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl RetentionTimer {
    pub fn start(sweeper: RetentionSweeper, interval: Duration) -> Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("jimeng-retention".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let report = sweeper.clean_old_images();
                        tracing::debug!(
                            target: "jimeng",
                            removed = report.removed.len(),
                            failed = report.failed.len(),
                            "retention sweep finished"
                        );
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .context("failed to spawn retention thread")?;
        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RetentionTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use serde_json::Value;

    use super::*;

    fn write_file(dir: &Path, name: &str) -> anyhow::Result<PathBuf> {
        let path = dir.join(name);
        fs::write(&path, b"img")?;
        Ok(path)
    }

    fn birth_time(path: &Path) -> anyhow::Result<SystemTime> {
        Ok(file_birth_time(&fs::metadata(path)?)?)
    }

    #[test]
    fn sweep_removes_only_files_older_than_cutoff() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let old = write_file(temp.path(), "jimeng_old.jpg")?;
        thread::sleep(Duration::from_millis(50));
        let cutoff = SystemTime::now();
        thread::sleep(Duration::from_millis(50));
        let fresh = write_file(temp.path(), "jimeng_new.jpg")?;
        assert!(birth_time(&old)? < cutoff && birth_time(&fresh)? >= cutoff);

        let report = RetentionSweeper::new(temp.path(), Duration::ZERO).sweep_before(cutoff);

        assert_eq!(report.removed, vec![old.clone()]);
        assert_eq!(report.kept, 1);
        assert!(report.is_clean());
        assert!(!old.exists());
        assert!(fresh.exists());
        Ok(())
    }

    #[test]
    fn clean_old_images_keeps_files_inside_window() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let recent = write_file(temp.path(), "recent.jpg")?;

        let sweeper = RetentionSweeper::new(temp.path(), Duration::from_secs(3 * 86_400));
        let report = sweeper.clean_old_images();

        assert!(report.removed.is_empty());
        assert_eq!(report.kept, 1);
        assert!(recent.exists());
        Ok(())
    }

    #[test]
    fn zero_window_expires_existing_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = write_file(temp.path(), "a.jpg")?;
        thread::sleep(Duration::from_millis(20));

        let report = RetentionSweeper::new(temp.path(), Duration::ZERO).clean_old_images();
        assert_eq!(report.removed, vec![path]);
        Ok(())
    }

    #[test]
    fn subdirectories_are_left_alone() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::create_dir(temp.path().join("nested"))?;
        thread::sleep(Duration::from_millis(20));

        let report = RetentionSweeper::new(temp.path(), Duration::ZERO).clean_old_images();
        assert!(report.removed.is_empty());
        assert!(temp.path().join("nested").is_dir());
        Ok(())
    }

    #[test]
    fn missing_directory_is_reported_not_raised() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let report =
            RetentionSweeper::new(temp.path().join("missing"), Duration::ZERO).clean_old_images();
        assert!(report.scan_error.is_some());
        assert!(!report.is_clean());
        Ok(())
    }

    #[test]
    fn sweep_with_removals_is_recorded() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let images = temp.path().join("images");
        fs::create_dir(&images)?;
        write_file(&images, "a.jpg")?;
        thread::sleep(Duration::from_millis(20));
        let activity_path = temp.path().join("activity.jsonl");

        RetentionSweeper::new(&images, Duration::ZERO)
            .with_activity(ActivityLog::new(&activity_path, "s"))
            .clean_old_images();

        let raw = fs::read_to_string(&activity_path)?;
        let row: Value = serde_json::from_str(raw.lines().next().unwrap_or("{}"))?;
        assert_eq!(row["type"], Value::String("old_images_swept".to_string()));
        assert_eq!(row["removed"], Value::from(1));
        Ok(())
    }

    #[test]
    fn timer_sweeps_periodically_and_stops() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let first = write_file(temp.path(), "first.jpg")?;

        let timer = RetentionTimer::start(
            RetentionSweeper::new(temp.path(), Duration::ZERO),
            Duration::from_millis(20),
        )?;

        let deadline = Instant::now() + Duration::from_secs(5);
        while first.exists() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!first.exists(), "first sweep did not run");

        let second = write_file(temp.path(), "second.jpg")?;
        while second.exists() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!second.exists(), "timer did not re-arm");

        timer.stop();
        let third = write_file(temp.path(), "third.jpg")?;
        thread::sleep(Duration::from_millis(100));
        assert!(third.exists());
        Ok(())
    }
}
