//! Chained hash table keyed by byte strings.
//!
//! Bucket count is always a power of two so the bucket index is
//! `hash & (buckets - 1)`. Keys are hashed with DJB2 and the hash is kept in
//! the slot, so growing the table never touches key bytes again. The table
//! doubles once an insertion would bring the load factor to 0.75.

use bytes::Bytes;

/// Smallest bucket array the table will allocate
pub const MIN_BUCKETS: usize = 16;

/// Load factor at which the bucket array doubles, as a fraction
const LOAD_FACTOR_NUM: usize = 3;
const LOAD_FACTOR_DEN: usize = 4;

/// DJB2 string hash: `h = h * 33 + c`, seeded with 5381
#[inline]
pub fn djb2(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(5381u64, |hash, &b| hash.wrapping_mul(33).wrapping_add(b as u64))
}

struct Slot<V> {
    hash: u64,
    key: Bytes,
    value: V,
}

pub struct HashTable<V> {
    buckets: Vec<Vec<Slot<V>>>,
    len: usize,
    initial_buckets: usize,
}

impl<V> HashTable<V> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a table that can hold `capacity` entries without resizing
    pub fn with_capacity(capacity: usize) -> Self {
        let wanted = capacity.saturating_mul(LOAD_FACTOR_DEN) / LOAD_FACTOR_NUM + 1;
        let buckets = wanted.max(MIN_BUCKETS).next_power_of_two();
        Self {
            buckets: empty_buckets(buckets),
            len: 0,
            initial_buckets: buckets,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn load_factor(&self) -> f64 {
        self.len as f64 / self.buckets.len() as f64
    }

    #[inline]
    fn index(&self, hash: u64) -> usize {
        (hash as usize) & (self.buckets.len() - 1)
    }

    pub fn get(&self, key: &[u8]) -> Option<&V> {
        let hash = djb2(key);
        self.buckets[self.index(hash)]
            .iter()
            .find(|slot| slot.hash == hash && slot.key.as_ref() == key)
            .map(|slot| &slot.value)
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        let hash = djb2(key);
        let idx = self.index(hash);
        self.buckets[idx]
            .iter_mut()
            .find(|slot| slot.hash == hash && slot.key.as_ref() == key)
            .map(|slot| &mut slot.value)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace, returning the previous value
    pub fn insert(&mut self, key: Bytes, value: V) -> Option<V> {
        let hash = djb2(&key);
        let idx = self.index(hash);
        if let Some(slot) = self.buckets[idx]
            .iter_mut()
            .find(|slot| slot.hash == hash && slot.key == key)
        {
            return Some(std::mem::replace(&mut slot.value, value));
        }

        if (self.len + 1) * LOAD_FACTOR_DEN >= self.buckets.len() * LOAD_FACTOR_NUM {
            self.grow();
        }
        let idx = self.index(hash);
        self.buckets[idx].push(Slot { hash, key, value });
        self.len += 1;
        None
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<(Bytes, V)> {
        let hash = djb2(key);
        let idx = self.index(hash);
        let chain = &mut self.buckets[idx];
        let pos = chain
            .iter()
            .position(|slot| slot.hash == hash && slot.key.as_ref() == key)?;
        let slot = chain.swap_remove(pos);
        self.len -= 1;
        Some((slot.key, slot.value))
    }

    /// Remove every entry and return to the initial bucket count
    pub fn clear(&mut self) {
        self.buckets = empty_buckets(self.initial_buckets);
        self.len = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, &V)> {
        self.buckets
            .iter()
            .flat_map(|chain| chain.iter().map(|slot| (&slot.key, &slot.value)))
    }

    /// Length of the longest chain, for diagnostics
    pub fn max_chain_len(&self) -> usize {
        self.buckets.iter().map(Vec::len).max().unwrap_or(0)
    }

    fn grow(&mut self) {
        let new_size = self.buckets.len() * 2;
        let mask = new_size - 1;
        let old = std::mem::replace(&mut self.buckets, empty_buckets(new_size));
        for slot in old.into_iter().flatten() {
            self.buckets[(slot.hash as usize) & mask].push(slot);
        }
    }
}

impl<V> Default for HashTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

fn empty_buckets<V>(n: usize) -> Vec<Vec<Slot<V>>> {
    let mut buckets = Vec::with_capacity(n);
    buckets.resize_with(n, Vec::new);
    buckets
}
