//! Incremental request framing.
//!
//! Socket reads are appended to a single `BytesMut`. When a complete frame is
//! available it is split off and frozen, and every argument becomes a
//! reference-counted slice of that frame, so command arguments are never
//! copied between the socket and the dispatcher.

use super::resp::parse_i64;
use crate::error::{Error, Result};
use bytes::{Bytes, BytesMut};
use memchr::memchr;
use std::ops::Range;

/// Upper bound on the element count of a single multi-bulk request
pub const MAX_MULTIBULK_LEN: i64 = 1024 * 1024;

/// Longest header or inline line accepted without a terminating newline
pub const MAX_INLINE_LEN: usize = 64 * 1024;

/// Default bulk argument limit (512MB, same as Redis)
pub const DEFAULT_MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// A decoded command invocation: name followed by its arguments
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub name: Bytes,
    pub args: Vec<Bytes>,
}

impl Request {
    pub fn new(name: impl Into<Bytes>, args: Vec<Bytes>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Outcome of scanning the buffered bytes once
enum Scan {
    /// A frame of `len` bytes whose arguments are at `self.ranges`
    Frame(usize),
    /// An empty frame of `len` bytes to discard
    Skip(usize),
    /// At least this many bytes are needed before scanning again
    Incomplete(usize),
}

/// RESP request parser
pub struct RequestParser {
    buffer: BytesMut,
    ranges: Vec<Range<usize>>,
    /// Buffered length required before a rescan can make progress
    needed: usize,
    max_bulk_len: usize,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::with_limits(16 * 1024, DEFAULT_MAX_BULK_LEN)
    }

    pub fn with_limits(capacity: usize, max_bulk_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            ranges: Vec::with_capacity(8),
            needed: 0,
            max_bulk_len,
        }
    }

    /// Feed data into the parser
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes received but not yet consumed as a complete request
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop all buffered input
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.ranges.clear();
        self.needed = 0;
    }

    /// Decode the next complete request.
    ///
    /// `Ok(None)` means more bytes are required; the partial tail stays
    /// buffered and the next `feed` appends to it.
    pub fn next_request(&mut self) -> Result<Option<Request>> {
        loop {
            if self.buffer.is_empty() || self.buffer.len() < self.needed {
                return Ok(None);
            }

            let scan = if self.buffer[0] == b'*' {
                self.scan_multibulk()?
            } else {
                self.scan_inline()?
            };

            match scan {
                Scan::Incomplete(needed) => {
                    self.needed = needed;
                    if needed > self.buffer.capacity() {
                        self.buffer.reserve(needed - self.buffer.len());
                    }
                    return Ok(None);
                }
                Scan::Skip(len) => {
                    self.needed = 0;
                    let _ = self.buffer.split_to(len);
                }
                Scan::Frame(len) => {
                    self.needed = 0;
                    let frame = self.buffer.split_to(len).freeze();
                    let mut parts = self.ranges.drain(..).map(|r| frame.slice(r));
                    let name = match parts.next() {
                        Some(name) => name,
                        None => continue,
                    };
                    let args = parts.collect();
                    return Ok(Some(Request { name, args }));
                }
            }
        }
    }

    /// Scan `*N\r\n` followed by N bulk strings
    fn scan_multibulk(&mut self) -> Result<Scan> {
        self.ranges.clear();
        let buf = &self.buffer[..];

        let (count, mut pos) = match read_header_line(buf, 0)? {
            Some(v) => v,
            None => return Ok(Scan::Incomplete(buf.len() + 1)),
        };
        let count = parse_i64(count).filter(|n| *n <= MAX_MULTIBULK_LEN).ok_or_else(|| {
            Error::Protocol("invalid multibulk length".into())
        })?;
        if count <= 0 {
            return Ok(Scan::Skip(pos));
        }

        for _ in 0..count {
            if pos >= buf.len() {
                return Ok(Scan::Incomplete(pos + 1));
            }
            if buf[pos] != b'$' {
                return Err(Error::Protocol(format!(
                    "expected '$', got '{}'",
                    buf[pos] as char
                )));
            }
            let (len, data_start) = match read_header_line(buf, pos)? {
                Some(v) => v,
                None => return Ok(Scan::Incomplete(buf.len() + 1)),
            };
            let len = parse_i64(len)
                .filter(|n| *n >= 0 && *n as usize <= self.max_bulk_len)
                .ok_or_else(|| Error::Protocol("invalid bulk length".into()))?
                as usize;

            let data_end = data_start + len;
            if buf.len() < data_end + 2 {
                return Ok(Scan::Incomplete(data_end + 2));
            }
            if &buf[data_end..data_end + 2] != b"\r\n" {
                return Err(Error::Protocol("missing CRLF after bulk string".into()));
            }
            self.ranges.push(data_start..data_end);
            pos = data_end + 2;
        }

        Ok(Scan::Frame(pos))
    }

    /// Scan a single whitespace-separated command line
    fn scan_inline(&mut self) -> Result<Scan> {
        self.ranges.clear();
        let buf = &self.buffer[..];

        let newline = match memchr(b'\n', buf) {
            Some(pos) => pos,
            None if buf.len() > MAX_INLINE_LEN => {
                return Err(Error::Protocol("too big inline request".into()));
            }
            None => return Ok(Scan::Incomplete(buf.len() + 1)),
        };
        let line_end = if newline > 0 && buf[newline - 1] == b'\r' {
            newline - 1
        } else {
            newline
        };

        let mut pos = 0;
        while pos < line_end {
            while pos < line_end && buf[pos].is_ascii_whitespace() {
                pos += 1;
            }
            let start = pos;
            while pos < line_end && !buf[pos].is_ascii_whitespace() {
                pos += 1;
            }
            if start < pos {
                self.ranges.push(start..pos);
            }
        }

        if self.ranges.is_empty() {
            Ok(Scan::Skip(newline + 1))
        } else {
            Ok(Scan::Frame(newline + 1))
        }
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a `*N` / `$N` header starting at `start`, returning the digits and
/// the offset just past its CRLF.
fn read_header_line(buf: &[u8], start: usize) -> Result<Option<(&[u8], usize)>> {
    let rest = &buf[start..];
    match memchr(b'\r', rest) {
        Some(cr) if cr + 1 < rest.len() => {
            if rest[cr + 1] != b'\n' {
                return Err(Error::Protocol("expected CRLF after length".into()));
            }
            Ok(Some((&rest[1..cr], start + cr + 2)))
        }
        Some(_) => Ok(None),
        None if rest.len() > MAX_INLINE_LEN => {
            Err(Error::Protocol("too big length header".into()))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(name: &'static [u8], args: &[&'static [u8]]) -> Request {
        Request::new(
            Bytes::from_static(name),
            args.iter().map(|a| Bytes::from_static(a)).collect(),
        )
    }

    #[test]
    fn test_parse_multibulk() {
        let mut parser = RequestParser::new();
        parser.feed(b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n");
        assert_eq!(
            parser.next_request().unwrap(),
            Some(req(b"SET", &[b"key", b"value"]))
        );
        assert_eq!(parser.next_request().unwrap(), None);
        assert_eq!(parser.buffered_len(), 0);
    }

    #[test]
    fn test_pipelined_requests_in_order() {
        let mut parser = RequestParser::new();
        parser.feed(b"*1\r\n$4\r\nPING\r\n*2\r\n$3\r\nGET\r\n$1\r\na\r\n*2\r\n$4\r\nINCR\r\n$1\r\nn\r\n");
        assert_eq!(parser.next_request().unwrap(), Some(req(b"PING", &[])));
        assert_eq!(parser.next_request().unwrap(), Some(req(b"GET", &[b"a"])));
        assert_eq!(parser.next_request().unwrap(), Some(req(b"INCR", &[b"n"])));
        assert_eq!(parser.next_request().unwrap(), None);
    }

    #[test]
    fn test_byte_at_a_time() {
        let input = b"*2\r\n$3\r\nGET\r\n$10\r\nsome\r\nkey!\r\n";
        let mut parser = RequestParser::new();
        let mut decoded = Vec::new();
        for b in input.iter() {
            parser.feed(std::slice::from_ref(b));
            while let Some(request) = parser.next_request().unwrap() {
                decoded.push(request);
            }
        }
        assert_eq!(decoded, vec![req(b"GET", &[b"some\r\nkey!"])]);
    }

    #[test]
    fn test_partial_tail_is_retained() {
        let mut parser = RequestParser::new();
        parser.feed(b"*1\r\n$4\r\nPING\r\n*2\r\n$3\r\nGE");
        assert_eq!(parser.next_request().unwrap(), Some(req(b"PING", &[])));
        assert_eq!(parser.next_request().unwrap(), None);
        parser.feed(b"T\r\n$1\r\nx\r\n");
        assert_eq!(parser.next_request().unwrap(), Some(req(b"GET", &[b"x"])));
    }

    #[test]
    fn test_large_bulk_waits_for_payload() {
        let value = vec![b'v'; 100_000];
        let mut frame = Vec::new();
        crate::protocol::resp::encode_request(&mut frame, &[b"SET".as_slice(), b"big", value.as_slice()]);

        let mut parser = RequestParser::new();
        let (head, tail) = frame.split_at(30);
        parser.feed(head);
        assert_eq!(parser.next_request().unwrap(), None);
        assert!(parser.needed > parser.buffered_len());
        parser.feed(tail);
        let request = parser.next_request().unwrap().unwrap();
        assert_eq!(request.args[1].len(), 100_000);
    }

    #[test]
    fn test_arguments_share_frame_storage() {
        let mut parser = RequestParser::new();
        parser.feed(b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
        let request = parser.next_request().unwrap().unwrap();
        let name_ptr = request.name.as_ptr() as usize;
        let arg_ptr = request.args[0].as_ptr() as usize;
        assert_eq!(arg_ptr - name_ptr, 9);
    }

    #[test]
    fn test_inline_commands() {
        let mut parser = RequestParser::new();
        parser.feed(b"PING\r\nSET  a   b\n\r\n");
        assert_eq!(parser.next_request().unwrap(), Some(req(b"PING", &[])));
        assert_eq!(parser.next_request().unwrap(), Some(req(b"SET", &[b"a", b"b"])));
        assert_eq!(parser.next_request().unwrap(), None);
        assert_eq!(parser.buffered_len(), 0);
    }

    #[test]
    fn test_empty_multibulk_is_skipped() {
        let mut parser = RequestParser::new();
        parser.feed(b"*0\r\n*-1\r\n*1\r\n$4\r\nPING\r\n");
        assert_eq!(parser.next_request().unwrap(), Some(req(b"PING", &[])));
    }

    #[test]
    fn test_protocol_errors() {
        let cases: &[&[u8]] = &[
            b"*1\r\n:12\r\n",
            b"*x\r\n",
            b"*2000000\r\n",
            b"*1\r\n$-5\r\n",
            b"*1\r\n$abc\r\n",
            b"*1\r\n$3\r\nGETXY",
            b"*1\r$3",
        ];
        for input in cases {
            let mut parser = RequestParser::new();
            parser.feed(input);
            let err = parser.next_request().unwrap_err();
            assert!(matches!(err, Error::Protocol(_)), "input {:?}", input);
        }
    }

    #[test]
    fn test_bulk_limit() {
        let mut parser = RequestParser::with_limits(64, 8);
        parser.feed(b"*1\r\n$9\r\n");
        assert!(matches!(parser.next_request(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_oversized_inline_line() {
        let mut parser = RequestParser::new();
        parser.feed(&vec![b'a'; MAX_INLINE_LEN + 1]);
        assert!(matches!(parser.next_request(), Err(Error::Protocol(_))));
    }
}
