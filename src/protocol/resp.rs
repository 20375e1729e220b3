use crate::error::{Error, Result};
use bytes::{BufMut, Bytes};
use memchr::memchr;

/// A RESP2 value, used for replies and for decoding replies on the client side
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    SimpleString(Bytes),
    Error(String),
    Integer(i64),
    BulkString(Option<Bytes>),
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    pub fn ok() -> Self {
        RespValue::SimpleString(Bytes::from_static(b"OK"))
    }

    pub fn nil() -> Self {
        RespValue::BulkString(None)
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    pub fn array(items: Vec<RespValue>) -> Self {
        RespValue::Array(Some(items))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Serialize into a fresh buffer
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(estimate_resp_size(self));
        write_resp_value(&mut buf, self);
        buf
    }
}

/// Write RESP value directly to buffer
pub fn write_resp_value<B: BufMut>(buf: &mut B, value: &RespValue) {
    match value {
        RespValue::SimpleString(s) => {
            buf.put_u8(b'+');
            buf.put_slice(s);
            buf.put_slice(b"\r\n");
        }
        RespValue::Error(e) => {
            buf.put_u8(b'-');
            buf.put_slice(e.as_bytes());
            buf.put_slice(b"\r\n");
        }
        RespValue::Integer(n) => {
            buf.put_u8(b':');
            let mut num_buf = itoa::Buffer::new();
            buf.put_slice(num_buf.format(*n).as_bytes());
            buf.put_slice(b"\r\n");
        }
        RespValue::BulkString(Some(s)) => {
            write_bulk_header(buf, s.len());
            buf.put_slice(s);
            buf.put_slice(b"\r\n");
        }
        RespValue::BulkString(None) => {
            buf.put_slice(b"$-1\r\n");
        }
        RespValue::Array(Some(arr)) => {
            buf.put_u8(b'*');
            let mut num_buf = itoa::Buffer::new();
            buf.put_slice(num_buf.format(arr.len()).as_bytes());
            buf.put_slice(b"\r\n");
            for item in arr {
                write_resp_value(buf, item);
            }
        }
        RespValue::Array(None) => {
            buf.put_slice(b"*-1\r\n");
        }
    }
}

/// Write the `$<len>\r\n` prefix of a bulk string
#[inline]
pub fn write_bulk_header<B: BufMut>(buf: &mut B, len: usize) {
    buf.put_u8(b'$');
    let mut num_buf = itoa::Buffer::new();
    buf.put_slice(num_buf.format(len).as_bytes());
    buf.put_slice(b"\r\n");
}

/// Encode a command as a multi-bulk request, the way clients send it
pub fn encode_request<B: BufMut>(buf: &mut B, args: &[&[u8]]) {
    buf.put_u8(b'*');
    let mut num_buf = itoa::Buffer::new();
    buf.put_slice(num_buf.format(args.len()).as_bytes());
    buf.put_slice(b"\r\n");
    for arg in args {
        write_bulk_header(buf, arg.len());
        buf.put_slice(arg);
        buf.put_slice(b"\r\n");
    }
}

/// Decode one complete RESP value from the front of `buf`.
///
/// Returns the value and the number of bytes it occupied, or `None` if the
/// buffer does not yet hold a complete value.
pub fn decode_value(buf: &[u8]) -> Result<Option<(RespValue, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }

    match buf[0] {
        b'+' => Ok(read_line(buf)?.map(|(line, used)| {
            (RespValue::SimpleString(Bytes::copy_from_slice(line)), used)
        })),
        b'-' => Ok(read_line(buf)?.map(|(line, used)| {
            (
                RespValue::Error(String::from_utf8_lossy(line).into_owned()),
                used,
            )
        })),
        b':' => match read_line(buf)? {
            Some((line, used)) => {
                let n = parse_i64(line).ok_or_else(|| {
                    Error::Protocol(format!(
                        "invalid integer: {}",
                        String::from_utf8_lossy(line)
                    ))
                })?;
                Ok(Some((RespValue::Integer(n), used)))
            }
            None => Ok(None),
        },
        b'$' => {
            let (len, header) = match read_length(buf, "bulk")? {
                Some(v) => v,
                None => return Ok(None),
            };
            if len < 0 {
                return Ok(Some((RespValue::BulkString(None), header)));
            }
            let data_end = header + len as usize;
            if buf.len() < data_end + 2 {
                return Ok(None);
            }
            if &buf[data_end..data_end + 2] != b"\r\n" {
                return Err(Error::Protocol("missing CRLF after bulk string".into()));
            }
            let data = Bytes::copy_from_slice(&buf[header..data_end]);
            Ok(Some((RespValue::BulkString(Some(data)), data_end + 2)))
        }
        b'*' => {
            let (len, header) = match read_length(buf, "multibulk")? {
                Some(v) => v,
                None => return Ok(None),
            };
            if len < 0 {
                return Ok(Some((RespValue::Array(None), header)));
            }
            let mut elements = Vec::with_capacity((len as usize).min(1024));
            let mut pos = header;
            for _ in 0..len {
                match decode_value(&buf[pos..])? {
                    Some((value, consumed)) => {
                        elements.push(value);
                        pos += consumed;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((RespValue::Array(Some(elements)), pos)))
        }
        other => Err(Error::Protocol(format!(
            "invalid RESP type: {}",
            other as char
        ))),
    }
}

/// Split off the first CRLF-terminated line, excluding the type byte
fn read_line(buf: &[u8]) -> Result<Option<(&[u8], usize)>> {
    match find_crlf(buf) {
        Some(end) => Ok(Some((&buf[1..end], end + 2))),
        None => Ok(None),
    }
}

fn read_length(buf: &[u8], what: &str) -> Result<Option<(i64, usize)>> {
    match read_line(buf)? {
        Some((line, used)) => {
            let len = parse_i64(line)
                .ok_or_else(|| Error::Protocol(format!("invalid {} length", what)))?;
            Ok(Some((len, used)))
        }
        None => Ok(None),
    }
}

/// Find the position of the first `\r\n` in the buffer
#[inline]
pub fn find_crlf(buf: &[u8]) -> Option<usize> {
    let mut pos = 0;
    while let Some(nl) = memchr(b'\n', &buf[pos..]) {
        let nl = pos + nl;
        if nl > 0 && buf[nl - 1] == b'\r' {
            return Some(nl - 1);
        }
        pos = nl + 1;
    }
    None
}

/// Parse a strict decimal `i64`: optional `-`, no `+`, no spaces, no
/// leading zeros, no `-0`.
pub fn parse_i64(bytes: &[u8]) -> Option<i64> {
    let (negative, digits) = match bytes.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some(_) => (false, bytes),
        None => return None,
    };
    if digits.is_empty() || digits.len() > 19 {
        return None;
    }
    if digits[0] == b'0' && (digits.len() > 1 || negative) {
        return None;
    }

    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        let digit = (b - b'0') as i64;
        value = if negative {
            value.checked_mul(10)?.checked_sub(digit)?
        } else {
            value.checked_mul(10)?.checked_add(digit)?
        };
    }
    Some(value)
}

/// Estimate the size needed for a RESP value (for pre-allocation)
#[inline]
fn estimate_resp_size(value: &RespValue) -> usize {
    match value {
        RespValue::SimpleString(s) => s.len() + 3,
        RespValue::Error(e) => e.len() + 3,
        RespValue::Integer(_) => 24,
        RespValue::BulkString(Some(s)) => s.len() + 20,
        RespValue::BulkString(None) => 5,
        RespValue::Array(Some(arr)) => 10 + arr.iter().map(estimate_resp_size).sum::<usize>(),
        RespValue::Array(None) => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_reply_types() {
        assert_eq!(RespValue::ok().to_bytes(), b"+OK\r\n");
        assert_eq!(RespValue::Integer(-42).to_bytes(), b":-42\r\n");
        assert_eq!(RespValue::nil().to_bytes(), b"$-1\r\n");
        assert_eq!(RespValue::bulk("hello").to_bytes(), b"$5\r\nhello\r\n");
        assert_eq!(RespValue::bulk("").to_bytes(), b"$0\r\n\r\n");
        assert_eq!(RespValue::Array(None).to_bytes(), b"*-1\r\n");
        assert_eq!(
            RespValue::Error("ERR boom".into()).to_bytes(),
            b"-ERR boom\r\n"
        );
        assert_eq!(
            RespValue::array(vec![RespValue::bulk("a"), RespValue::Integer(1)]).to_bytes(),
            b"*2\r\n$1\r\na\r\n:1\r\n"
        );
    }

    #[test]
    fn test_encode_request() {
        let mut buf = Vec::new();
        encode_request(&mut buf, &[b"GET".as_slice(), b"name"]);
        assert_eq!(buf, b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n");
    }

    #[test]
    fn test_decode_complete_values() {
        let (value, used) = decode_value(b"+PONG\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::SimpleString(Bytes::from_static(b"PONG")));
        assert_eq!(used, 7);

        let (value, used) = decode_value(b"$5\r\nhello\r\n:1\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::bulk("hello"));
        assert_eq!(used, 11);

        let (value, _) = decode_value(b"*2\r\n$-1\r\n:7\r\n").unwrap().unwrap();
        assert_eq!(
            value,
            RespValue::array(vec![RespValue::nil(), RespValue::Integer(7)])
        );
    }

    #[test]
    fn test_decode_incomplete() {
        assert!(decode_value(b"").unwrap().is_none());
        assert!(decode_value(b"+OK").unwrap().is_none());
        assert!(decode_value(b"$5\r\nhel").unwrap().is_none());
        assert!(decode_value(b"*2\r\n:1\r\n").unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_value(b"?what\r\n").is_err());
        assert!(decode_value(b":abc\r\n").is_err());
        assert!(decode_value(b"$3\r\nabcXY").is_err());
    }

    #[test]
    fn test_find_crlf_skips_bare_newlines() {
        assert_eq!(find_crlf(b"ab\ncd\r\n"), Some(5));
        assert_eq!(find_crlf(b"\n"), None);
        assert_eq!(find_crlf(b""), None);
        assert_eq!(find_crlf(b"\r\n"), Some(0));
    }

    #[test]
    fn test_parse_i64_strictness() {
        assert_eq!(parse_i64(b"0"), Some(0));
        assert_eq!(parse_i64(b"-15"), Some(-15));
        assert_eq!(parse_i64(b"9223372036854775807"), Some(i64::MAX));
        assert_eq!(parse_i64(b"-9223372036854775808"), Some(i64::MIN));
        assert_eq!(parse_i64(b"9223372036854775808"), None);
        assert_eq!(parse_i64(b"+1"), None);
        assert_eq!(parse_i64(b"01"), None);
        assert_eq!(parse_i64(b"-0"), None);
        assert_eq!(parse_i64(b" 1"), None);
        assert_eq!(parse_i64(b"1.5"), None);
        assert_eq!(parse_i64(b""), None);
        assert_eq!(parse_i64(b"-"), None);
    }
}
