use crate::protocol::resp::{write_bulk_header, write_resp_value, RespValue};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::VecDeque;
use std::io::{self, IoSlice, Write};

/// Bulk replies at least this large are queued by reference instead of copied
pub const LARGE_REPLY: usize = 16 * 1024;

/// Upper bound on slices handed to a single `write_vectored` call
pub const MAX_IOVECS: usize = 64;

/// Outcome of one [`OutputBuffer::write_to`] call
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteProgress {
    /// Bytes accepted by the writer
    pub bytes: usize,
    /// Successful `write_vectored` calls
    pub calls: u64,
    /// Everything queued has been written
    pub drained: bool,
}

/// Per-connection reply queue.
///
/// Small replies are encoded back to back into `current`; large bulk
/// payloads are kept as their own chunk so the stored `Bytes` is written
/// without copying. Pending chunks are flushed with vectored writes.
pub struct OutputBuffer {
    sealed: VecDeque<Bytes>,
    current: BytesMut,
    pending: usize,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::with_capacity(4096)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sealed: VecDeque::new(),
            current: BytesMut::with_capacity(capacity),
            pending: 0,
        }
    }

    /// Queue an encoded reply
    pub fn push(&mut self, value: &RespValue) {
        let before = self.current.len();
        match value {
            RespValue::BulkString(Some(data)) if data.len() >= LARGE_REPLY => {
                write_bulk_header(&mut self.current, data.len());
                self.pending += self.current.len() - before;
                self.seal();
                self.pending += data.len();
                self.sealed.push_back(data.clone());
                self.current.put_slice(b"\r\n");
                self.pending += 2;
            }
            _ => {
                write_resp_value(&mut self.current, value);
                self.pending += self.current.len() - before;
            }
        }
    }

    /// Bytes waiting to be written
    pub fn pending_len(&self) -> usize {
        self.pending
    }

    /// Write as much as the writer accepts without blocking
    pub fn write_to<W: Write>(&mut self, writer: &mut W) -> io::Result<WriteProgress> {
        self.seal();
        let mut progress = WriteProgress::default();

        while !self.sealed.is_empty() {
            let result = {
                let mut slices = [IoSlice::new(&[]); MAX_IOVECS];
                let mut count = 0;
                for (slot, chunk) in slices.iter_mut().zip(self.sealed.iter()) {
                    *slot = IoSlice::new(chunk);
                    count += 1;
                }
                writer.write_vectored(&slices[..count])
            };

            match result {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    progress.bytes += n;
                    progress.calls += 1;
                    self.advance(n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(progress),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        progress.drained = true;
        Ok(progress)
    }

    fn seal(&mut self) {
        if !self.current.is_empty() {
            self.sealed.push_back(self.current.split().freeze());
        }
    }

    fn advance(&mut self, mut n: usize) {
        self.pending -= n;
        while n > 0 {
            let Some(front) = self.sealed.front_mut() else {
                break;
            };
            if front.len() <= n {
                n -= front.len();
                self.sealed.pop_front();
            } else {
                front.advance(n);
                n = 0;
            }
        }
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}
