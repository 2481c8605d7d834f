//! Command-line splitting with redis-cli quoting rules.
//!
//! Callers submit commands as single strings (`hset h f "a b"`). Before
//! anything can be sent they must be split into the argument vector the
//! server expects. Unquoted text splits on whitespace. Double quotes
//! accept C-style escapes and `\xHH`; single quotes only unescape `\'`.

use crate::error::ProtocolError;

/// Splits a raw command line into arguments.
///
/// Returns an empty vector for blank input. A closing quote must be
/// followed by whitespace or the end of the line.
pub fn split_args(line: &str) -> Result<Vec<String>, ProtocolError> {
    let bytes = line.as_bytes();
    let mut args = Vec::new();
    let mut i = 0;

    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            return Ok(args);
        }

        let mut current: Vec<u8> = Vec::new();
        let mut in_double = false;
        let mut in_single = false;

        loop {
            let Some(&c) = bytes.get(i) else {
                if in_double || in_single {
                    return Err(ProtocolError::UnbalancedQuotes);
                }
                break;
            };

            if in_double {
                if c == b'\\' && i + 3 < bytes.len() && bytes[i + 1] == b'x' {
                    if let Some(byte) = hex_pair(bytes[i + 2], bytes[i + 3]) {
                        current.push(byte);
                        i += 4;
                        continue;
                    }
                }
                if c == b'\\' && i + 1 < bytes.len() {
                    i += 1;
                    current.push(match bytes[i] {
                        b'n' => b'\n',
                        b'r' => b'\r',
                        b't' => b'\t',
                        b'b' => 0x08,
                        b'a' => 0x07,
                        other => other,
                    });
                } else if c == b'"' {
                    if bytes.get(i + 1).is_some_and(|n| !n.is_ascii_whitespace()) {
                        return Err(ProtocolError::TrailingAfterQuote);
                    }
                    i += 1;
                    break;
                } else {
                    current.push(c);
                }
            } else if in_single {
                if c == b'\\' && bytes.get(i + 1) == Some(&b'\'') {
                    i += 1;
                    current.push(b'\'');
                } else if c == b'\'' {
                    if bytes.get(i + 1).is_some_and(|n| !n.is_ascii_whitespace()) {
                        return Err(ProtocolError::TrailingAfterQuote);
                    }
                    i += 1;
                    break;
                } else {
                    current.push(c);
                }
            } else {
                match c {
                    b' ' | b'\n' | b'\r' | b'\t' | 0x0c | 0x0b => break,
                    b'"' => in_double = true,
                    b'\'' => in_single = true,
                    _ => current.push(c),
                }
            }
            i += 1;
        }

        args.push(String::from_utf8_lossy(&current).into_owned());
    }
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}
