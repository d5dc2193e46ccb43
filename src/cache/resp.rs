//! Minimal RESP2 codec for the Valkey client.
//!
//! Decoding never consumes a partial frame; `decode` either removes one whole
//! value from the buffer or leaves it untouched.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::str;

use crate::error::CacheError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    Simple(String),
    Error(String),
    Integer(i64),
    /// `None` is the null bulk string.
    Bulk(Option<Bytes>),
    /// `None` is the null array.
    Array(Option<Vec<RespValue>>),
}

/// Encode a command as an array of bulk strings.
pub fn encode_command(args: &[&[u8]], buf: &mut BytesMut) {
    buf.put_u8(b'*');
    buf.put_slice(args.len().to_string().as_bytes());
    buf.put_slice(b"\r\n");
    for arg in args {
        buf.put_u8(b'$');
        buf.put_slice(arg.len().to_string().as_bytes());
        buf.put_slice(b"\r\n");
        buf.put_slice(arg);
        buf.put_slice(b"\r\n");
    }
}

/// Encode a single value. Used for replies by test servers.
pub fn encode_value(value: &RespValue, buf: &mut BytesMut) {
    match value {
        RespValue::Simple(s) => {
            buf.put_u8(b'+');
            buf.put_slice(s.as_bytes());
            buf.put_slice(b"\r\n");
        }
        RespValue::Error(s) => {
            buf.put_u8(b'-');
            buf.put_slice(s.as_bytes());
            buf.put_slice(b"\r\n");
        }
        RespValue::Integer(n) => {
            buf.put_u8(b':');
            buf.put_slice(n.to_string().as_bytes());
            buf.put_slice(b"\r\n");
        }
        RespValue::Bulk(None) => buf.put_slice(b"$-1\r\n"),
        RespValue::Bulk(Some(data)) => {
            buf.put_u8(b'$');
            buf.put_slice(data.len().to_string().as_bytes());
            buf.put_slice(b"\r\n");
            buf.put_slice(data);
            buf.put_slice(b"\r\n");
        }
        RespValue::Array(None) => buf.put_slice(b"*-1\r\n"),
        RespValue::Array(Some(items)) => {
            buf.put_u8(b'*');
            buf.put_slice(items.len().to_string().as_bytes());
            buf.put_slice(b"\r\n");
            for item in items {
                encode_value(item, buf);
            }
        }
    }
}

/// Remove and return one complete value from `buf`, or `None` if more bytes
/// are needed.
pub fn decode(buf: &mut BytesMut) -> Result<Option<RespValue>, CacheError> {
    match parse_at(buf, 0)? {
        Some((value, consumed)) => {
            buf.advance(consumed);
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Position just past the `\r\n` that ends the line starting at `pos`, and
/// the line content.
fn line_at(src: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rest = src.get(pos..)?;
    let end = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((&rest[..end], pos + end + 2))
}

fn parse_int(line: &[u8]) -> Result<i64, CacheError> {
    let text = str::from_utf8(line).map_err(|e| CacheError::protocol(e.to_string()))?;
    text.parse()
        .map_err(|_| CacheError::protocol(format!("invalid integer '{text}'")))
}

fn parse_text(line: &[u8]) -> Result<String, CacheError> {
    str::from_utf8(line)
        .map(str::to_string)
        .map_err(|e| CacheError::protocol(e.to_string()))
}

fn parse_at(src: &[u8], pos: usize) -> Result<Option<(RespValue, usize)>, CacheError> {
    let Some(&kind) = src.get(pos) else {
        return Ok(None);
    };
    let Some((line, next)) = line_at(src, pos + 1) else {
        return Ok(None);
    };

    match kind {
        b'+' => Ok(Some((RespValue::Simple(parse_text(line)?), next))),
        b'-' => Ok(Some((RespValue::Error(parse_text(line)?), next))),
        b':' => Ok(Some((RespValue::Integer(parse_int(line)?), next))),
        b'$' => {
            let len = parse_int(line)?;
            if len == -1 {
                return Ok(Some((RespValue::Bulk(None), next)));
            }
            let len = usize::try_from(len)
                .map_err(|_| CacheError::protocol(format!("invalid bulk length {len}")))?;
            let end = next + len;
            if src.len() < end + 2 {
                return Ok(None);
            }
            if &src[end..end + 2] != b"\r\n" {
                return Err(CacheError::protocol("missing CRLF after bulk string"));
            }
            let data = Bytes::copy_from_slice(&src[next..end]);
            Ok(Some((RespValue::Bulk(Some(data)), end + 2)))
        }
        b'*' => {
            let count = parse_int(line)?;
            if count == -1 {
                return Ok(Some((RespValue::Array(None), next)));
            }
            let count = usize::try_from(count)
                .map_err(|_| CacheError::protocol(format!("invalid array length {count}")))?;
            let mut items = Vec::with_capacity(count.min(64));
            let mut cursor = next;
            for _ in 0..count {
                match parse_at(src, cursor)? {
                    Some((item, after)) => {
                        items.push(item);
                        cursor = after;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((RespValue::Array(Some(items)), cursor)))
        }
        other => Err(CacheError::protocol(format!(
            "unknown RESP type byte '{}'",
            other as char
        ))),
    }
}
