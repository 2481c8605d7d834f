//! Terminal rendering of dispatch results.
//!
//! One header per address, then each command with its outcome. Cache
//! replies arrive already rendered in redis-cli style and are printed as
//! they are; SQL rows print as tab-separated columns.

use colored::Colorize;
use dbrelay_core::{AddressResult, CmdResult, Row};
use serde_json::Value;

const INDENT: &str = "    ";

pub fn format_results(results: &[AddressResult]) -> String {
    let mut out = Vec::new();
    for r in results {
        out.push(format_address(r));
    }
    let failed = results.iter().filter(|r| r.has_errors()).count();
    let noun = if results.len() == 1 { "address" } else { "addresses" };
    let summary = format!("{} {noun}, {failed} with errors", results.len());
    out.push(if failed == 0 {
        summary.dimmed().to_string()
    } else {
        summary.red().to_string()
    });
    out.join("\n")
}

fn format_address(r: &AddressResult) -> String {
    let mut lines = Vec::new();
    let status = if r.has_errors() {
        "error".red()
    } else {
        "ok".green()
    };
    lines.push(format!("{} [{status}]", r.address.bold()));

    if !r.error_msg.is_empty() {
        lines.push(format!("  {} {}", "(error)".red(), r.error_msg.red()));
    }
    for c in &r.cmd_results {
        lines.push(format!("  {} {}", ">".dimmed(), c.cmd));
        lines.push(indent(&format_cmd(c)));
    }
    lines.join("\n")
}

fn format_cmd(c: &CmdResult) -> String {
    if c.is_error() {
        return format!("{} {}", "(error)".red(), c.error_msg.red());
    }
    if c.table_data.is_empty() {
        return format!(
            "{} {}",
            "(affected)".yellow(),
            c.rows_affected.to_string().yellow()
        );
    }
    match single_result(&c.table_data) {
        Some(text) => text,
        None => format_rows(&c.table_data),
    }
}

/// A cache reply: one row with only a string `result` column.
fn single_result(rows: &[Row]) -> Option<String> {
    let [row] = rows else { return None };
    if row.len() != 1 {
        return None;
    }
    match row.get(dbrelay_core::redis::RESULT_COLUMN)? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn format_rows(rows: &[Row]) -> String {
    let mut lines = Vec::with_capacity(rows.len() + 1);
    if let Some(first) = rows.first() {
        let header: Vec<&str> = first.keys().map(String::as_str).collect();
        lines.push(header.join("\t").dimmed().to_string());
    }
    for row in rows {
        let cells: Vec<String> = row.values().map(cell).collect();
        lines.push(cells.join("\t"));
    }
    lines.join("\n")
}

fn cell(v: &Value) -> String {
    match v {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|l| format!("{INDENT}{l}"))
        .collect::<Vec<_>>()
        .join("\n")
}
