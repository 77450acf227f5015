//! Output rendering: tables for humans, raw JSON for scripts.

use clap::ValueEnum;
use colored::Colorize;
use serde_json::Value;
use tabled::builder::Builder;
use tabled::settings::Style;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

pub fn print_json(value: &Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()));
}

/// Render an array of objects as a table with the given columns. Falls
/// back to JSON when the data is not an array.
pub fn print_table(value: &Value, columns: &[&str]) {
    let Some(rows) = value.as_array() else {
        print_json(value);
        return;
    };
    if rows.is_empty() {
        println!("{}", "(no results)".dimmed());
        return;
    }

    let mut builder = Builder::default();
    builder.push_record(columns.iter().map(|c| c.to_string()));
    for row in rows {
        builder.push_record(columns.iter().map(|col| cell(row, col)));
    }

    let mut table = builder.build();
    table.with(Style::rounded());
    println!("{table}");
}

fn cell(row: &Value, column: &str) -> String {
    match row.get(column) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

pub fn task_status_name(status: i64) -> &'static str {
    match status {
        0 => "Pending",
        1 => "Running",
        2 => "Success",
        3 => "Failed",
        4 => "Skipped",
        5 => "Canceled",
        6 => "Timeout",
        _ => "Unknown",
    }
}

pub fn print_ok(message: &str) {
    println!("{} {message}", "ok:".green().bold());
}
