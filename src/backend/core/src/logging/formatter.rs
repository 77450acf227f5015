//! Single-line log record formatting for file and console sinks.

use super::LogRecord;

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '"' => out.push_str("\\\""),
            _ => out.push(c),
        }
    }
    out
}

/// Format one record per line:
/// `ts_ms=[<ms>] level=[LEVEL] stream=STREAM task_id=<id> seq=<n> [dag_run_id=...] [worker_id=...] [attempt=n] [duration_ms=n] msg="<escaped>" [k=v ...]`
pub fn format_line(r: &LogRecord) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(128);
    let _ = write!(
        out,
        "ts_ms=[{}] level=[{}] stream={} task_id={} seq={}",
        r.ts_ms(),
        r.level.as_str(),
        r.stream.as_str(),
        r.task_id.value,
        r.seq
    );

    if !r.dag_run_id.is_empty() {
        let _ = write!(out, " dag_run_id={}", r.dag_run_id);
    }
    if !r.cron_job_id.is_empty() {
        let _ = write!(out, " cron_job_id={}", r.cron_job_id);
    }
    if !r.worker_id.is_empty() {
        let _ = write!(out, " worker_id={}", r.worker_id);
    }
    if r.attempt > 0 {
        let _ = write!(out, " attempt={}", r.attempt);
    }
    if r.duration_ms > 0 {
        let _ = write!(out, " duration_ms={}", r.duration_ms);
    }

    let _ = write!(out, " msg=\"{}\"", escape(&r.message));

    let mut keys: Vec<&String> = r.fields.keys().collect();
    keys.sort();
    for k in keys {
        let _ = write!(out, " {}={}", k, escape(&r.fields[k]));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogLevel, LogRecord};
    use crate::task::TaskId;

    #[test]
    fn formats_required_and_optional_fields() {
        let mut r = LogRecord::event(TaskId::new("t1"), LogLevel::Warn, "line1\nline2 \"quoted\"");
        r.seq = 7;
        r.attempt = 2;
        r.duration_ms = 15;
        r.dag_run_id = "run-9".into();
        r.fields.insert("status".into(), "3".into());

        let line = format_line(&r);
        assert!(line.contains("level=[WARN]"));
        assert!(line.contains("task_id=t1 seq=7"));
        assert!(line.contains("dag_run_id=run-9"));
        assert!(line.contains("attempt=2"));
        assert!(line.contains("duration_ms=15"));
        assert!(line.contains(r#"msg="line1\nline2 \"quoted\"""#));
        assert!(line.ends_with("status=3"));
        assert!(!line.contains('\n'));
    }
}
