//! Incremental RESP reply parser.
//!
//! Works on whatever bytes the caller has buffered so far. A reply that
//! isn't fully buffered yet yields `Ok(None)` and leaves the buffer
//! untouched, so the caller can read more from the socket and retry.
//!
//! Servers speak RESP2 by default, where a missing value is encoded as a
//! bulk or array of length -1. Both decode to [`Frame::Null`], the same
//! as the RESP3 `_` frame.

use std::io::Cursor;

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::types::Frame;

/// Maximum nesting depth for arrays and maps.
const MAX_NESTING_DEPTH: usize = 64;

/// Maximum number of elements in one aggregate.
const MAX_ARRAY_ELEMENTS: usize = 1_048_576;

/// Maximum length of a bulk string in bytes (512 MB, matching the server).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Upper bound on `Vec::with_capacity` for declared aggregate sizes, so a
/// hostile length header can't force a huge upfront allocation.
const PREALLOC_CAP: usize = 1024;

/// Parses one complete frame from the front of `buf`.
///
/// Returns `Ok(Some((frame, consumed)))` when a full frame is available,
/// `Ok(None)` when more data is needed, or an error for malformed input.
pub fn parse_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, ProtocolError> {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut cursor = Cursor::new(buf);
    match read_frame(&mut cursor, 0) {
        Ok(frame) => Ok(Some((frame, cursor.position() as usize))),
        Err(ProtocolError::Incomplete) => Ok(None),
        Err(e) => Err(e),
    }
}

fn read_frame(cursor: &mut Cursor<&[u8]>, depth: usize) -> Result<Frame, ProtocolError> {
    match read_byte(cursor)? {
        b'+' => Ok(Frame::Simple(read_utf8_line(cursor, "simple string")?)),
        b'-' => Ok(Frame::Error(read_utf8_line(cursor, "error")?)),
        b':' => Ok(Frame::Integer(read_integer_line(cursor)?)),
        b'$' => read_bulk(cursor),
        b'*' => {
            let Some(count) = read_aggregate_len(cursor, depth)? else {
                return Ok(Frame::Null);
            };
            let mut items = Vec::with_capacity(count.min(PREALLOC_CAP));
            for _ in 0..count {
                items.push(read_frame(cursor, depth + 1)?);
            }
            Ok(Frame::Array(items))
        }
        b'%' => {
            let Some(count) = read_aggregate_len(cursor, depth)? else {
                return Ok(Frame::Null);
            };
            let mut pairs = Vec::with_capacity(count.min(PREALLOC_CAP));
            for _ in 0..count {
                let key = read_frame(cursor, depth + 1)?;
                let val = read_frame(cursor, depth + 1)?;
                pairs.push((key, val));
            }
            Ok(Frame::Map(pairs))
        }
        b'_' => {
            read_line(cursor)?;
            Ok(Frame::Null)
        }
        b',' => {
            let line = read_utf8_line(cursor, "double")?;
            let value = match line.as_str() {
                "inf" => f64::INFINITY,
                "-inf" => f64::NEG_INFINITY,
                other => other.parse().map_err(|_| ProtocolError::InvalidDouble)?,
            };
            Ok(Frame::Double(value))
        }
        b'#' => match read_line(cursor)? {
            b"t" => Ok(Frame::Boolean(true)),
            b"f" => Ok(Frame::Boolean(false)),
            _ => Err(ProtocolError::InvalidFrame("boolean must be t or f".into())),
        },
        other => Err(ProtocolError::InvalidPrefix(other)),
    }
}

fn read_bulk(cursor: &mut Cursor<&[u8]>) -> Result<Frame, ProtocolError> {
    let len = read_integer_line(cursor)?;
    if len == -1 {
        return Ok(Frame::Null);
    }
    if len < 0 {
        return Err(ProtocolError::InvalidFrameLength(len));
    }
    if len > MAX_BULK_LEN {
        return Err(ProtocolError::BulkStringTooLarge(len as usize));
    }
    let len = len as usize;

    let start = cursor.position() as usize;
    let buf = *cursor.get_ref();
    if buf.len() < start + len + 2 {
        return Err(ProtocolError::Incomplete);
    }
    if &buf[start + len..start + len + 2] != b"\r\n" {
        return Err(ProtocolError::InvalidFrameLength(len as i64));
    }
    cursor.set_position((start + len + 2) as u64);
    Ok(Frame::Bulk(Bytes::copy_from_slice(&buf[start..start + len])))
}

/// Reads an aggregate header. `None` means the RESP2 null array (`*-1`).
fn read_aggregate_len(
    cursor: &mut Cursor<&[u8]>,
    depth: usize,
) -> Result<Option<usize>, ProtocolError> {
    if depth + 1 > MAX_NESTING_DEPTH {
        return Err(ProtocolError::NestingTooDeep(MAX_NESTING_DEPTH));
    }
    let count = read_integer_line(cursor)?;
    if count == -1 {
        return Ok(None);
    }
    if count < 0 {
        return Err(ProtocolError::InvalidFrameLength(count));
    }
    if count as usize > MAX_ARRAY_ELEMENTS {
        return Err(ProtocolError::TooManyElements(count as usize));
    }
    Ok(Some(count as usize))
}

fn read_byte(cursor: &mut Cursor<&[u8]>) -> Result<u8, ProtocolError> {
    let pos = cursor.position() as usize;
    let byte = *cursor.get_ref().get(pos).ok_or(ProtocolError::Incomplete)?;
    cursor.set_position((pos + 1) as u64);
    Ok(byte)
}

/// Returns the bytes up to the next `\r\n` and moves the cursor past it.
fn read_line<'a>(cursor: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], ProtocolError> {
    let buf: &'a [u8] = *cursor.get_ref();
    let start = cursor.position() as usize;
    let mut pos = start;

    while pos < buf.len() {
        let Some(offset) = memchr::memchr(b'\r', &buf[pos..]) else {
            break;
        };
        let cr = pos + offset;
        if cr + 1 >= buf.len() {
            break;
        }
        if buf[cr + 1] == b'\n' {
            cursor.set_position((cr + 2) as u64);
            return Ok(&buf[start..cr]);
        }
        pos = cr + 1;
    }

    Err(ProtocolError::Incomplete)
}

fn read_utf8_line(cursor: &mut Cursor<&[u8]>, what: &str) -> Result<String, ProtocolError> {
    let line = read_line(cursor)?;
    std::str::from_utf8(line)
        .map(str::to_owned)
        .map_err(|_| ProtocolError::InvalidFrame(format!("invalid utf-8 in {what}")))
}

fn read_integer_line(cursor: &mut Cursor<&[u8]>) -> Result<i64, ProtocolError> {
    parse_i64_bytes(read_line(cursor)?)
}

/// Parses an i64 from ASCII digits without going through a `String`.
///
/// Negative values accumulate downward so `i64::MIN` doesn't overflow.
fn parse_i64_bytes(buf: &[u8]) -> Result<i64, ProtocolError> {
    let (negative, digits) = match buf.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some(_) => (false, buf),
        None => return Err(ProtocolError::InvalidInteger),
    };
    if digits.is_empty() {
        return Err(ProtocolError::InvalidInteger);
    }

    let mut n: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(ProtocolError::InvalidInteger);
        }
        let d = (b - b'0') as i64;
        n = n
            .checked_mul(10)
            .and_then(|n| if negative { n.checked_sub(d) } else { n.checked_add(d) })
            .ok_or(ProtocolError::InvalidInteger)?;
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn must_parse(input: &[u8]) -> Frame {
        let (frame, consumed) = parse_frame(input)
            .expect("parse should not error")
            .expect("parse should return a frame");
        assert_eq!(consumed, input.len(), "should consume entire input");
        frame
    }

    #[test]
    fn simple_and_error_lines() {
        assert_eq!(must_parse(b"+OK\r\n"), Frame::Simple("OK".into()));
        assert_eq!(
            must_parse(b"-WRONGTYPE Operation against a key\r\n"),
            Frame::Error("WRONGTYPE Operation against a key".into())
        );
    }

    #[test]
    fn integers() {
        assert_eq!(must_parse(b":42\r\n"), Frame::Integer(42));
        assert_eq!(must_parse(b":-1\r\n"), Frame::Integer(-1));
        assert_eq!(
            must_parse(b":-9223372036854775808\r\n"),
            Frame::Integer(i64::MIN)
        );
    }

    #[test]
    fn bulk_string() {
        assert_eq!(
            must_parse(b"$5\r\nhello\r\n"),
            Frame::Bulk(Bytes::from_static(b"hello"))
        );
        assert_eq!(must_parse(b"$0\r\n\r\n"), Frame::Bulk(Bytes::new()));
    }

    #[test]
    fn bulk_with_embedded_crlf() {
        assert_eq!(
            must_parse(b"$4\r\na\r\nb\r\n"),
            Frame::Bulk(Bytes::from_static(b"a\r\nb"))
        );
    }

    #[test]
    fn resp2_nulls() {
        assert_eq!(must_parse(b"$-1\r\n"), Frame::Null);
        assert_eq!(must_parse(b"*-1\r\n"), Frame::Null);
        assert_eq!(must_parse(b"_\r\n"), Frame::Null);
    }

    #[test]
    fn nested_array_with_null() {
        let input = b"*2\r\n*2\r\n:1\r\n$-1\r\n+x\r\n";
        assert_eq!(
            must_parse(input),
            Frame::Array(vec![
                Frame::Array(vec![Frame::Integer(1), Frame::Null]),
                Frame::Simple("x".into()),
            ])
        );
    }

    #[test]
    fn resp3_scalars_and_map() {
        assert_eq!(must_parse(b",1.5\r\n"), Frame::Double(1.5));
        assert_eq!(must_parse(b",-inf\r\n"), Frame::Double(f64::NEG_INFINITY));
        assert_eq!(must_parse(b"#t\r\n"), Frame::Boolean(true));
        assert_eq!(
            must_parse(b"%1\r\n+k\r\n:1\r\n"),
            Frame::Map(vec![(Frame::Simple("k".into()), Frame::Integer(1))])
        );
    }

    #[test]
    fn incomplete_returns_none() {
        assert_eq!(parse_frame(b"").unwrap(), None);
        assert_eq!(parse_frame(b"+OK").unwrap(), None);
        assert_eq!(parse_frame(b"+OK\r").unwrap(), None);
        assert_eq!(parse_frame(b"$5\r\nhel").unwrap(), None);
        assert_eq!(parse_frame(b"*2\r\n+OK\r\n").unwrap(), None);
    }

    #[test]
    fn consumes_only_one_frame() {
        let (frame, consumed) = parse_frame(b":1\r\n:2\r\n").unwrap().unwrap();
        assert_eq!(frame, Frame::Integer(1));
        assert_eq!(consumed, 4);
    }

    #[test]
    fn malformed_input() {
        assert_eq!(
            parse_frame(b"~3\r\n").unwrap_err(),
            ProtocolError::InvalidPrefix(b'~')
        );
        assert_eq!(
            parse_frame(b":abc\r\n").unwrap_err(),
            ProtocolError::InvalidInteger
        );
        assert_eq!(
            parse_frame(b"$-2\r\n").unwrap_err(),
            ProtocolError::InvalidFrameLength(-2)
        );
        assert_eq!(
            parse_frame(b"$2\r\nabcd\r\n").unwrap_err(),
            ProtocolError::InvalidFrameLength(2)
        );
    }

    #[test]
    fn nesting_limit() {
        let mut buf = Vec::new();
        for _ in 0..65 {
            buf.extend_from_slice(b"*1\r\n");
        }
        buf.extend_from_slice(b":1\r\n");
        assert_eq!(
            parse_frame(&buf).unwrap_err(),
            ProtocolError::NestingTooDeep(MAX_NESTING_DEPTH)
        );

        let mut ok = Vec::new();
        for _ in 0..64 {
            ok.extend_from_slice(b"*1\r\n");
        }
        ok.extend_from_slice(b":1\r\n");
        assert!(parse_frame(&ok).unwrap().is_some());
    }

    #[test]
    fn parse_i64_bytes_edges() {
        assert_eq!(parse_i64_bytes(b"9223372036854775807").unwrap(), i64::MAX);
        assert!(parse_i64_bytes(b"9223372036854775808").is_err());
        assert!(parse_i64_bytes(b"-").is_err());
        assert!(parse_i64_bytes(b"1a").is_err());
    }
}
