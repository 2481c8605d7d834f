//! Direct-to-buffer RESP serialization.
//!
//! Requests only ever need arrays of bulk strings, but every frame type
//! can be written so tests can stand up fake servers with the same code.
//! Nulls are written in the RESP2 form (`$-1`) since that is what a
//! default server sends.

use bytes::{BufMut, BytesMut};

use crate::types::Frame;

impl Frame {
    /// Writes the wire representation of this frame into `dst`.
    pub fn serialize(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => write_line(dst, b'+', s.as_bytes()),
            Frame::Error(msg) => write_line(dst, b'-', msg.as_bytes()),
            Frame::Integer(n) => {
                dst.put_u8(b':');
                write_i64(*n, dst);
                dst.put_slice(b"\r\n");
            }
            Frame::Bulk(data) => {
                dst.put_u8(b'$');
                write_i64(data.len() as i64, dst);
                dst.put_slice(b"\r\n");
                dst.put_slice(data);
                dst.put_slice(b"\r\n");
            }
            Frame::Array(items) => {
                dst.put_u8(b'*');
                write_i64(items.len() as i64, dst);
                dst.put_slice(b"\r\n");
                for item in items {
                    item.serialize(dst);
                }
            }
            Frame::Null => dst.put_slice(b"$-1\r\n"),
            Frame::Map(pairs) => {
                dst.put_u8(b'%');
                write_i64(pairs.len() as i64, dst);
                dst.put_slice(b"\r\n");
                for (key, val) in pairs {
                    key.serialize(dst);
                    val.serialize(dst);
                }
            }
            Frame::Double(v) => {
                let text = if v.is_infinite() {
                    if v.is_sign_positive() { "inf".to_string() } else { "-inf".to_string() }
                } else {
                    v.to_string()
                };
                write_line(dst, b',', text.as_bytes());
            }
            Frame::Boolean(b) => write_line(dst, b'#', if *b { b"t" } else { b"f" }),
        }
    }
}

fn write_line(dst: &mut BytesMut, prefix: u8, body: &[u8]) {
    dst.put_u8(prefix);
    dst.put_slice(body);
    dst.put_slice(b"\r\n");
}

fn write_i64(val: i64, dst: &mut BytesMut) {
    let mut buf = itoa::Buffer::new();
    dst.put_slice(buf.format(val).as_bytes());
}
