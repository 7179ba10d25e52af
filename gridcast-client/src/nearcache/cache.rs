//! The near-cache record store: reservations, expiration, eviction, stats.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use rand::Rng;

use super::config::{EvictionCandidate, EvictionPolicy, NearCacheConfig};
use super::MemoryCost;

/// Reservation id returned when a slot could not be reserved.
pub const NOT_RESERVED: i64 = -1;

/// A point-in-time snapshot of near-cache statistics.
#[derive(Debug, Clone, Default)]
pub struct NearCacheStats {
    /// Number of reads answered from the cache.
    pub hits: u64,
    /// Number of reads that fell through to the remote.
    pub misses: u64,
    /// Number of entries evicted by the size policy.
    pub evictions: u64,
    /// Number of entries removed by TTL or max-idle expiry.
    pub expirations: u64,
    /// Number of entries removed by invalidation.
    pub invalidations: u64,
    /// Number of entries currently held.
    pub owned_entry_count: u64,
    /// Estimated memory cost of the held entries in bytes.
    pub owned_entry_memory_cost: u64,
}

impl NearCacheStats {
    /// Returns the hit/miss ratio as a percentage.
    ///
    /// Defined as +∞ when there are hits but no misses, and NaN when there
    /// are neither.
    pub fn ratio(&self) -> f64 {
        if self.misses == 0 {
            if self.hits == 0 {
                return f64::NAN;
            }
            return f64::INFINITY;
        }
        (self.hits as f64 / self.misses as f64) * 100.0
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
}

#[derive(Debug)]
struct Record<V> {
    /// `None` while the slot is reserved and the value is being fetched.
    value: Option<V>,
    /// The reservation that may publish into this slot; `NOT_RESERVED`
    /// once a value has been committed.
    reservation_id: i64,
    created_at: Instant,
    last_accessed: Instant,
    access_count: u64,
}

impl<V> Record<V> {
    fn reserved(reservation_id: i64, now: Instant) -> Self {
        Self {
            value: None,
            reservation_id,
            created_at: now,
            last_accessed: now,
            access_count: 0,
        }
    }

    fn candidate(&self) -> EvictionCandidate {
        EvictionCandidate {
            created_at: self.created_at,
            last_accessed: self.last_accessed,
            access_count: self.access_count,
        }
    }
}

/// A size-bounded, expiring, server-invalidated cache of key to value.
///
/// The store is the authoritative remote's local shadow: the read path
/// populates it through the reserve/publish protocol and every remote
/// mutation invalidates the corresponding key. Concurrent misses on one key
/// may each take a reservation, but a publish is a compare-and-swap on the
/// slot's reservation id, so at most one of them commits.
pub struct NearCache<K, V> {
    config: NearCacheConfig,
    records: Mutex<HashMap<K, Record<V>>>,
    counters: Counters,
    reservation_counter: AtomicI64,
}

impl<K, V> std::fmt::Debug for NearCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NearCache")
            .field("name", &self.config.name())
            .field("size", &self.records.lock().map(|r| r.len()).unwrap_or(0))
            .finish()
    }
}

impl<K, V> NearCache<K, V>
where
    K: Eq + Hash + Ord + Clone + MemoryCost,
    V: Clone + MemoryCost,
{
    /// Creates an empty cache with the given configuration.
    pub fn new(config: NearCacheConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
            counters: Counters::default(),
            reservation_counter: AtomicI64::new(0),
        }
    }

    /// Returns the cache configuration.
    pub fn config(&self) -> &NearCacheConfig {
        &self.config
    }

    /// Looks up a committed, unexpired value.
    ///
    /// Updates access statistics; an expired record is removed lazily and
    /// counts as a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut records = self.records.lock().expect("near-cache lock poisoned");

        let expired = match records.get(key) {
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(record) => self.is_expired(record, now),
        };

        if expired {
            records.remove(key);
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let record = records.get_mut(key).expect("record vanished under lock");
        match &record.value {
            Some(value) => {
                record.last_accessed = now;
                record.access_count += 1;
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(value.clone())
            }
            // Reserved slot: the value is still being fetched.
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Reserves a slot for the key, returning the reservation id.
    ///
    /// Returns `None` when the slot holds a live committed value (nothing to
    /// fetch) or when the cache is full and the eviction policy rejects new
    /// entries. Reserving over an existing reservation replaces its id, so
    /// the earlier reserver's publish will be dropped.
    pub fn try_reserve(&self, key: K) -> Option<i64> {
        let now = Instant::now();
        let mut records = self.records.lock().expect("near-cache lock poisoned");

        let has_live_value = records
            .get(&key)
            .map(|record| record.value.is_some() && !self.is_expired(record, now))
            .unwrap_or(false);
        if has_live_value {
            return None;
        }

        let is_new_slot = !records.contains_key(&key);
        if is_new_slot
            && records.len() >= self.config.max_size() as usize
            && !self.evict_one(&mut records)
        {
            return None;
        }

        let reservation_id = self.reservation_counter.fetch_add(1, Ordering::Relaxed) + 1;
        records.insert(key, Record::reserved(reservation_id, now));
        Some(reservation_id)
    }

    /// Publishes a fetched value into a reserved slot.
    ///
    /// The publish succeeds only if the slot still carries the caller's
    /// reservation id; a stale publish is silently dropped. Either way the
    /// fetched value is handed back so the caller returns the authoritative
    /// result.
    pub fn try_publish(&self, key: &K, value: V, reservation_id: i64) -> V {
        let now = Instant::now();
        let mut records = self.records.lock().expect("near-cache lock poisoned");

        if let Some(record) = records.get_mut(key) {
            if record.value.is_none() && record.reservation_id == reservation_id {
                record.value = Some(value.clone());
                record.reservation_id = NOT_RESERVED;
                record.created_at = now;
                record.last_accessed = now;
            }
        }
        value
    }

    /// Removes the key's record, committed or reserved.
    pub fn invalidate(&self, key: &K) {
        let mut records = self.records.lock().expect("near-cache lock poisoned");
        if records.remove(key).is_some() {
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Removes every record, counting each removal as an invalidation.
    pub fn clear(&self) {
        let mut records = self.records.lock().expect("near-cache lock poisoned");
        let removed = records.len() as u64;
        records.clear();
        self.counters.invalidations.fetch_add(removed, Ordering::Relaxed);
    }

    /// Removes expired records; the periodic background pass calls this.
    ///
    /// Returns the number of records removed.
    pub fn expire_stale(&self) -> usize {
        let now = Instant::now();
        let mut records = self.records.lock().expect("near-cache lock poisoned");
        let expired: Vec<K> = records
            .iter()
            .filter(|(_, record)| record.value.is_some() && self.is_expired(record, now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            records.remove(key);
        }
        self.counters
            .expirations
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    /// Returns the number of records currently held, reservations included.
    pub fn size(&self) -> usize {
        self.records.lock().expect("near-cache lock poisoned").len()
    }

    /// Returns a snapshot of the cache statistics.
    pub fn stats(&self) -> NearCacheStats {
        let records = self.records.lock().expect("near-cache lock poisoned");
        let memory_cost: usize = records
            .iter()
            .map(|(key, record)| {
                std::mem::size_of::<Record<V>>()
                    + key.memory_cost()
                    + record.value.as_ref().map(|v| v.memory_cost()).unwrap_or(0)
            })
            .sum();

        NearCacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            owned_entry_count: records.len() as u64,
            owned_entry_memory_cost: memory_cost as u64,
        }
    }

    fn is_expired(&self, record: &Record<V>, now: Instant) -> bool {
        let ttl = self.config.time_to_live();
        if !ttl.is_zero() && now.duration_since(record.created_at) > ttl {
            return true;
        }
        let max_idle = self.config.max_idle();
        if !max_idle.is_zero() && now.duration_since(record.last_accessed) > max_idle {
            return true;
        }
        false
    }

    /// Removes one record according to the eviction order.
    ///
    /// Returns `false` when nothing may be evicted (NONE policy without a
    /// custom comparator, or an empty store).
    fn evict_one(&self, records: &mut HashMap<K, Record<V>>) -> bool {
        if records.is_empty() {
            return false;
        }
        if self.config.comparator().is_none()
            && self.config.eviction_policy() == EvictionPolicy::None
        {
            return false;
        }

        let victim = if let Some(comparator) = self.config.comparator() {
            records
                .iter()
                .min_by(|(ka, a), (kb, b)| {
                    comparator(&a.candidate(), &b.candidate())
                        .then_with(|| a.created_at.cmp(&b.created_at))
                        .then_with(|| ka.cmp(kb))
                })
                .map(|(key, _)| key.clone())
        } else {
            match self.config.eviction_policy() {
                EvictionPolicy::Lru => records
                    .iter()
                    .min_by(|(ka, a), (kb, b)| {
                        a.last_accessed
                            .cmp(&b.last_accessed)
                            .then_with(|| a.created_at.cmp(&b.created_at))
                            .then_with(|| ka.cmp(kb))
                    })
                    .map(|(key, _)| key.clone()),
                EvictionPolicy::Lfu => records
                    .iter()
                    .min_by(|(ka, a), (kb, b)| {
                        a.access_count
                            .cmp(&b.access_count)
                            .then_with(|| a.created_at.cmp(&b.created_at))
                            .then_with(|| ka.cmp(kb))
                    })
                    .map(|(key, _)| key.clone()),
                EvictionPolicy::Random => {
                    let index = rand::thread_rng().gen_range(0..records.len());
                    records.keys().nth(index).cloned()
                }
                EvictionPolicy::None => None,
            }
        };

        match victim {
            Some(key) => {
                records.remove(&key);
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }
}
