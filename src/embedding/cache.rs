//! Bounded least-recently-used cache for computed embeddings.
//!
//! Keys are the exact raw text passed in; no normalization. Recency is a
//! monotonically increasing tick, so lookups and evictions are `O(log n)`.

use std::collections::{BTreeMap, HashMap};

#[derive(Debug)]
pub struct LruCache<V> {
    cap: usize,
    tick: u64,
    map: HashMap<String, (V, u64)>,
    order: BTreeMap<u64, String>,
}

impl<V: Clone> LruCache<V> {
    /// A cache holding at most `cap` entries. `cap == 0` disables caching.
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            tick: 0,
            map: HashMap::new(),
            order: BTreeMap::new(),
        }
    }

    pub fn get(&mut self, key: &str) -> Option<V> {
        let next = self.next_tick();
        let (value, stamp) = self.map.get_mut(key)?;
        self.order.remove(stamp);
        *stamp = next;
        self.order.insert(next, key.to_string());
        Some(value.clone())
    }

    pub fn insert(&mut self, key: String, value: V) {
        if self.cap == 0 {
            return;
        }

        let next = self.next_tick();
        if let Some((_, old)) = self.map.insert(key.clone(), (value, next)) {
            self.order.remove(&old);
        }
        self.order.insert(next, key);

        while self.map.len() > self.cap {
            match self.order.pop_first() {
                Some((_, evict)) => {
                    self.map.remove(&evict);
                }
                None => break,
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let (value, stamp) = self.map.remove(key)?;
        self.order.remove(&stamp);
        Some(value)
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}
