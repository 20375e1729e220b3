//! In-memory keyspace.
//!
//! A single [`Store`] owns every key. It is driven from the event loop only,
//! so it takes `&mut self` and carries no synchronization.

mod table;

pub use table::{djb2, HashTable, MIN_BUCKETS};

use crate::error::{Error, Result};
use crate::protocol::parse_i64;
use bytes::Bytes;

/// Approximate per-entry bookkeeping cost on top of key and value bytes
pub const ENTRY_OVERHEAD: usize = 48;

/// A stored value: raw bytes, or a counter produced by INCR/DECR
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(Bytes),
    Int(i64),
}

impl Value {
    /// Bytes as a client sees them through GET
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Value::Str(b) => b.clone(),
            Value::Int(n) => {
                let mut buf = itoa::Buffer::new();
                Bytes::copy_from_slice(buf.format(*n).as_bytes())
            }
        }
    }

    fn payload_size(&self) -> usize {
        match self {
            Value::Str(b) => b.len(),
            Value::Int(_) => std::mem::size_of::<i64>(),
        }
    }

    fn as_integer(&self) -> Result<i64> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Str(b) => parse_i64(b).ok_or(Error::NotAnInteger),
        }
    }
}

#[inline]
fn entry_size(key_len: usize, value: &Value) -> usize {
    ENTRY_OVERHEAD + key_len + value.payload_size()
}

/// Keyspace with memory accounting and hit/miss counters
pub struct Store {
    table: HashTable<Value>,
    used_memory: usize,
    max_memory: Option<usize>,
    hits: u64,
    misses: u64,
}

impl Store {
    pub fn new() -> Self {
        Self::with_capacity(0, None)
    }

    pub fn with_capacity(capacity: usize, max_memory: Option<usize>) -> Self {
        Self {
            table: HashTable::with_capacity(capacity),
            used_memory: 0,
            max_memory,
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, key: &[u8]) -> Option<Bytes> {
        match self.table.get(key) {
            Some(value) => {
                self.hits += 1;
                Some(value.to_bytes())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store a string value, copying key and value out of the request frame
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let new = Value::Str(Bytes::copy_from_slice(value));
        let new_size = entry_size(key.len(), &new);
        let old_size = self
            .table
            .get(key)
            .map(|old| entry_size(key.len(), old))
            .unwrap_or(0);
        self.reserve(old_size, new_size)?;

        self.table.insert(Bytes::copy_from_slice(key), new);
        self.used_memory = self.used_memory - old_size + new_size;
        Ok(())
    }

    pub fn delete(&mut self, key: &[u8]) -> bool {
        match self.table.remove(key) {
            Some((key, value)) => {
                self.used_memory -= entry_size(key.len(), &value);
                true
            }
            None => false,
        }
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.table.contains_key(key)
    }

    /// Add `delta` to the integer stored at `key`, starting from 0 if absent.
    ///
    /// A non-integer value is left untouched.
    pub fn incr_by(&mut self, key: &[u8], delta: i64) -> Result<i64> {
        if let Some(value) = self.table.get(key) {
            let current = value.as_integer()?;
            let next = current.checked_add(delta).ok_or(Error::Overflow)?;
            let old_size = entry_size(key.len(), value);
            let new = Value::Int(next);
            let new_size = entry_size(key.len(), &new);
            // "1" stored as a string grows to a full counter
            self.reserve(old_size, new_size)?;

            if let Some(slot) = self.table.get_mut(key) {
                *slot = new;
            }
            self.used_memory = self.used_memory - old_size + new_size;
            return Ok(next);
        }

        let value = Value::Int(delta);
        let size = entry_size(key.len(), &value);
        self.reserve(0, size)?;
        self.table.insert(Bytes::copy_from_slice(key), value);
        self.used_memory += size;
        Ok(delta)
    }

    /// Remove every key
    pub fn flush(&mut self) {
        self.table.clear();
        self.used_memory = 0;
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn used_memory(&self) -> usize {
        self.used_memory
    }

    pub fn max_memory(&self) -> Option<usize> {
        self.max_memory
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn table(&self) -> &HashTable<Value> {
        &self.table
    }

    /// Refuse growth that would push usage past `max_memory`
    fn reserve(&self, old_size: usize, new_size: usize) -> Result<()> {
        if let Some(limit) = self.max_memory {
            if new_size > old_size && self.used_memory - old_size + new_size > limit {
                return Err(Error::OutOfMemory);
            }
        }
        Ok(())
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
