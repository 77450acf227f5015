//! Log sinks: console and rotating file.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::warn;

use super::{format_line, LogRecord, LogRotation, RotationPolicy};

/// A destination for formatted log records.
pub trait LogSink: Send + Sync {
    fn consume(&self, rec: &LogRecord);
}

/// Writes formatted lines to stdout.
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn consume(&self, rec: &LogRecord) {
        println!("{}", format_line(rec));
    }
}

/// Options for the file sink.
#[derive(Debug, Clone)]
pub struct FileSinkOptions {
    pub path: PathBuf,
    pub rotate_bytes: u64,
    pub max_files: usize,
    pub flush_each_line: bool,
}

struct FileSinkState {
    file: Option<File>,
}

/// Appends one line per record, rotating by size before the write that
/// would cross the threshold.
pub struct FileSink {
    opt: FileSinkOptions,
    rotation: LogRotation,
    state: Mutex<FileSinkState>,
}

impl FileSink {
    pub fn new(opt: FileSinkOptions) -> Self {
        let rotation = LogRotation::new(RotationPolicy { max_bytes: opt.rotate_bytes, max_files: opt.max_files });
        Self { opt, rotation, state: Mutex::new(FileSinkState { file: None }) }
    }

    fn ensure_open(&self, state: &mut FileSinkState) {
        if state.file.is_some() {
            return;
        }
        if let Some(parent) = self.opt.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                let _ = fs::create_dir_all(parent);
            }
        }
        match OpenOptions::new().create(true).append(true).open(&self.opt.path) {
            Ok(f) => state.file = Some(f),
            Err(e) => warn!(path = %self.opt.path.display(), error = %e, "failed to open log sink"),
        }
    }

    fn rotate_if_needed(&self, state: &mut FileSinkState, add_bytes: u64) {
        if self.opt.rotate_bytes == 0 {
            return;
        }
        let current = fs::metadata(&self.opt.path).map(|m| m.len()).unwrap_or(0);
        if self.rotation.should_rotate(current, add_bytes) {
            state.file = None;
            self.rotation.rotate(&self.opt.path);
        }
    }
}

impl LogSink for FileSink {
    fn consume(&self, rec: &LogRecord) {
        let line = format_line(rec);
        let mut state = self.state.lock();

        self.rotate_if_needed(&mut state, line.len() as u64 + 1);
        self.ensure_open(&mut state);

        if let Some(f) = state.file.as_mut() {
            if writeln!(f, "{line}").is_err() {
                state.file = None;
                return;
            }
            if self.opt.flush_each_line {
                let _ = f.flush();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogLevel, LogRecord};
    use crate::task::TaskId;

    fn rec(msg: &str) -> LogRecord {
        LogRecord::event(TaskId::new("t"), LogLevel::Info, msg)
    }

    #[test]
    fn file_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        let sink = FileSink::new(FileSinkOptions {
            path: path.clone(),
            rotate_bytes: 0,
            max_files: 0,
            flush_each_line: true,
        });
        sink.consume(&rec("first"));
        sink.consume(&rec("second"));

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("msg=\"first\""));
    }

    #[test]
    fn rotation_preserves_every_record_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        let sink = FileSink::new(FileSinkOptions {
            path: path.clone(),
            rotate_bytes: 160,
            max_files: 10,
            flush_each_line: true,
        });

        for i in 0..12 {
            sink.consume(&rec(&format!("record-{i:02}")));
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let mut all = String::new();
        for entry in fs::read_dir(dir.path()).unwrap().flatten() {
            all.push_str(&fs::read_to_string(entry.path()).unwrap());
        }
        for i in 0..12 {
            assert!(all.contains(&format!("record-{i:02}")), "missing record-{i:02}");
        }
    }
}
