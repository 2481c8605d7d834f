//! Reply rendering for cache-engine results.
//!
//! A reply ends up as the single `result` column of a row. Console mode
//! renders it the way redis-cli prints it; plain mode keeps the reply
//! structure as JSON.

use dbrelay_protocol::Frame;
use serde_json::{Map, Number, Value};

/// Renders a frame as redis-cli style text.
///
/// - simple strings unquoted
/// - bulk strings quoted, unless multiline (like `INFO`)
/// - `(integer)`, `(double)`, `(nil)`, `(true)`/`(false)` prefixes
/// - arrays and maps as numbered lists, nested levels indented
pub fn console(frame: &Frame) -> String {
    let mut out = String::new();
    write_frame(&mut out, frame, 0);
    out
}

/// Converts a frame into a JSON value: strings, numbers, arrays and
/// objects. Binary bulk strings are decoded lossily.
pub fn to_json(frame: &Frame) -> Value {
    match frame {
        Frame::Simple(s) | Frame::Error(s) => Value::String(s.clone()),
        Frame::Integer(n) => Value::Number((*n).into()),
        Frame::Bulk(data) => Value::String(String::from_utf8_lossy(data).into_owned()),
        Frame::Null => Value::Null,
        Frame::Double(d) => Number::from_f64(*d)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(d.to_string())),
        Frame::Boolean(b) => Value::Bool(*b),
        Frame::Array(items) => Value::Array(items.iter().map(to_json).collect()),
        Frame::Map(pairs) => {
            let mut map = Map::with_capacity(pairs.len());
            for (k, v) in pairs {
                let key = match to_json(k) {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                map.insert(key, to_json(v));
            }
            Value::Object(map)
        }
    }
}

fn write_frame(out: &mut String, frame: &Frame, indent: usize) {
    match frame {
        Frame::Simple(s) => out.push_str(&sanitize(s)),
        Frame::Error(e) => {
            out.push_str("(error) ");
            out.push_str(&sanitize(e));
        }
        Frame::Integer(n) => out.push_str(&format!("(integer) {n}")),
        Frame::Double(d) => out.push_str(&format!("(double) {d}")),
        Frame::Boolean(b) => out.push_str(&format!("({b})")),
        Frame::Null => out.push_str("(nil)"),
        Frame::Bulk(data) => match std::str::from_utf8(data) {
            Ok(s) if s.contains('\n') => out.push_str(&sanitize(s)),
            Ok(s) => {
                out.push('"');
                out.push_str(&sanitize(s));
                out.push('"');
            }
            // binary data as hex
            Err(_) => out.extend(data.iter().map(|b| format!("{b:02x}"))),
        },
        Frame::Array(items) if items.is_empty() => out.push_str("(empty array)"),
        Frame::Array(items) => {
            let width = items.len().to_string().len();
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push('\n');
                    out.push_str(&" ".repeat(indent));
                }
                let label = format!("{:>width$}) ", i + 1);
                out.push_str(&label);
                write_frame(out, item, indent + label.len());
            }
        }
        Frame::Map(pairs) if pairs.is_empty() => out.push_str("(empty map)"),
        Frame::Map(pairs) => {
            let width = pairs.len().to_string().len();
            for (i, (key, val)) in pairs.iter().enumerate() {
                if i > 0 {
                    out.push('\n');
                    out.push_str(&" ".repeat(indent));
                }
                let label = format!("{:>width$}) ", i + 1);
                out.push_str(&label);
                write_frame(out, key, indent + label.len());
                out.push_str(" => ");
                write_frame(out, val, indent + label.len());
            }
        }
    }
}

/// Drops ANSI escape sequences and control characters from
/// server-supplied text. Tabs and line breaks are kept.
fn sanitize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' {
            if let Some('[') = chars.next() {
                // CSI sequence, runs until a letter
                for c in chars.by_ref() {
                    if c.is_ascii_alphabetic() {
                        break;
                    }
                }
            }
        } else if ch == '\t' || ch == '\n' || ch == '\r' || !ch.is_control() {
            out.push(ch);
        }
    }
    out
}
