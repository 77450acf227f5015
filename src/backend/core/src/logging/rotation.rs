//! Size-based log file rotation.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::warn;

/// Rotation policy for a file sink.
#[derive(Debug, Clone)]
pub struct RotationPolicy {
    /// Rotate before a write would push the file past this size. 0 disables.
    pub max_bytes: u64,
    /// Rotated siblings kept (oldest removed first). 0 keeps everything.
    pub max_files: usize,
}

/// Renames the active log to `path.<yyyymmdd-HHMMSS>.<n>` and prunes the
/// oldest rotated siblings by modification time.
pub struct LogRotation {
    policy: RotationPolicy,
}

impl LogRotation {
    pub fn new(policy: RotationPolicy) -> Self {
        Self { policy }
    }

    pub fn should_rotate(&self, current_size: u64, add_bytes: u64) -> bool {
        self.policy.max_bytes > 0 && current_size + add_bytes > self.policy.max_bytes
    }

    fn rotated_name(base: &Path, index: u32) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d-%H%M%S");
        PathBuf::from(format!("{}.{}.{}", base.display(), stamp, index))
    }

    /// Rename falls back to copy+delete when the rename crosses devices.
    fn rename(from: &Path, to: &Path) {
        if fs::rename(from, to).is_err() {
            if let Err(e) = fs::copy(from, to) {
                warn!(from = %from.display(), to = %to.display(), error = %e, "log rotation copy failed");
                return;
            }
            let _ = fs::remove_file(from);
        }
    }

    pub fn rotate(&self, base: &Path) {
        if !base.exists() {
            return;
        }

        let mut index = 1;
        let mut rotated = Self::rotated_name(base, index);
        while rotated.exists() && index < 10_000 {
            index += 1;
            rotated = Self::rotated_name(base, index);
        }

        Self::rename(base, &rotated);
        self.prune(base);
    }

    /// Keep only the newest `max_files` rotated siblings of `base`.
    fn prune(&self, base: &Path) {
        if self.policy.max_files == 0 {
            return;
        }

        let dir = match base.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let Some(file_name) = base.file_name().map(|n| n.to_string_lossy().to_string()) else {
            return;
        };
        let prefix = format!("{file_name}.");

        let Ok(entries) = fs::read_dir(&dir) else {
            return;
        };
        let mut rotated: Vec<(PathBuf, std::time::SystemTime)> = entries
            .flatten()
            .filter(|e| e.path().is_file())
            .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
            .filter_map(|e| {
                let mtime = e.metadata().and_then(|m| m.modified()).ok()?;
                Some((e.path(), mtime))
            })
            .collect();

        rotated.sort_by_key(|(_, mtime)| *mtime);
        while rotated.len() > self.policy.max_files {
            let (victim, _) = rotated.remove(0);
            let _ = fs::remove_file(victim);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn should_rotate_respects_threshold() {
        let rot = LogRotation::new(RotationPolicy { max_bytes: 100, max_files: 3 });
        assert!(!rot.should_rotate(50, 10));
        assert!(rot.should_rotate(95, 10));

        let disabled = LogRotation::new(RotationPolicy { max_bytes: 0, max_files: 3 });
        assert!(!disabled.should_rotate(u64::MAX / 2, 10));
    }

    #[test]
    fn rotate_moves_file_and_prunes_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("taskhub.log");
        let rot = LogRotation::new(RotationPolicy { max_bytes: 10, max_files: 2 });

        for i in 0..4 {
            let mut f = fs::File::create(&base).unwrap();
            writeln!(f, "generation {i}").unwrap();
            drop(f);
            rot.rotate(&base);
            assert!(!base.exists());
            // distinct mtimes so prune ordering is deterministic
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        let rotated: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with("taskhub.log."))
            .collect();
        assert_eq!(rotated.len(), 2);
    }
}
