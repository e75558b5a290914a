//! Proxy record store
//!
//! Single owner of every [`ProxyRecord`]. Records are keyed by address and
//! additionally indexed by `last_used_at` so the least recently used
//! eligible record can be found without sorting the whole universe.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;
use tokio::time::Instant;

use crate::error::{Result, RotaError};
use crate::models::{ProxyEndpoint, ProxyRecord, ProxySnapshot};

/// LRU ordering key. `None` sorts first, so never-used records are picked
/// before used ones; ties are broken by address.
type LruKey = (Option<Instant>, Arc<str>);

#[derive(Default)]
struct StoreInner {
    records: HashMap<Arc<str>, ProxyRecord>,
    lru: BTreeSet<LruKey>,
    /// Insertion order, for O(1) random sampling
    addresses: Vec<Arc<str>>,
}

impl StoreInner {
    fn key_of(&self, address: &Arc<str>) -> Option<LruKey> {
        self.records
            .get(address)
            .map(|rec| (rec.last_used_at, address.clone()))
    }

    fn insert_new(&mut self, record: ProxyRecord) {
        let address: Arc<str> = Arc::from(record.address());
        self.lru.insert((record.last_used_at, address.clone()));
        self.addresses.push(address.clone());
        self.records.insert(address, record);
    }
}

/// Concurrent record store.
///
/// Every mutation happens under one write lock and touches only memory, so
/// selection-and-stamp and increment-and-blacklist are each atomic.
#[derive(Default)]
pub struct ProxyStore {
    inner: RwLock<StoreInner>,
}

impl ProxyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, address: &str) -> bool {
        self.inner.read().records.contains_key(address)
    }

    /// Snapshot of one record
    pub fn get(&self, address: &str) -> Result<ProxyRecord> {
        self.inner
            .read()
            .records
            .get(address)
            .cloned()
            .ok_or_else(|| RotaError::ProxyNotFound {
                address: address.to_string(),
            })
    }

    /// Insert a record or replace the stored one with the same address.
    ///
    /// Returns `true` when the address was new.
    pub fn upsert(&self, record: ProxyRecord) -> bool {
        let mut inner = self.inner.write();
        let address: Arc<str> = Arc::from(record.address());

        match inner.key_of(&address) {
            Some(old_key) => {
                inner.lru.remove(&old_key);
                inner.lru.insert((record.last_used_at, old_key.1.clone()));
                inner.records.insert(old_key.1, record);
                false
            }
            None => {
                inner.insert_new(record);
                true
            }
        }
    }

    /// Add endpoints not yet known; existing records keep their state.
    ///
    /// Returns the number of new records.
    pub fn insert_endpoints(&self, endpoints: impl IntoIterator<Item = ProxyEndpoint>) -> usize {
        let mut inner = self.inner.write();
        let mut inserted = 0;
        for endpoint in endpoints {
            if inner.records.contains_key(endpoint.address.as_str()) {
                continue;
            }
            inner.insert_new(ProxyRecord::new(endpoint));
            inserted += 1;
        }
        inserted
    }

    /// Lazy sequence of eligible records, oldest `last_used_at` first.
    ///
    /// Each step takes the read lock briefly; calling again restarts the scan.
    /// A record selected mid-scan moves further along the index but is
    /// still yielded at most once.
    pub fn all_eligible(&self) -> EligibleIter<'_> {
        EligibleIter {
            store: self,
            cursor: None,
            yielded: HashSet::new(),
        }
    }

    /// Number of records eligible at `now`, counted in one locked pass
    pub fn eligible_count(&self, now: Instant) -> usize {
        self.inner
            .read()
            .records
            .values()
            .filter(|rec| rec.is_eligible(now))
            .count()
    }

    /// Pick the least recently used eligible record not in `excluding` and
    /// stamp it as used at `now`, in one step.
    pub fn take_least_recently_used(
        &self,
        excluding: &HashSet<String>,
        now: Instant,
    ) -> Option<ProxyRecord> {
        let mut inner = self.inner.write();

        let key = inner
            .lru
            .iter()
            .find(|(_, address)| {
                !excluding.contains(&**address)
                    && inner
                        .records
                        .get(address)
                        .map(|rec| rec.is_eligible(now))
                        .unwrap_or(false)
            })
            .cloned()?;

        inner.lru.remove(&key);
        inner.lru.insert((Some(now), key.1.clone()));

        let record = inner.records.get_mut(&key.1)?;
        record.last_used_at = Some(now);
        Some(record.clone())
    }

    /// Apply `f` to one record under the write lock
    pub fn update<R>(&self, address: &str, f: impl FnOnce(&mut ProxyRecord) -> R) -> Result<R> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let not_found = || RotaError::ProxyNotFound {
            address: address.to_string(),
        };

        let key = inner
            .records
            .get_key_value(address)
            .map(|(k, _)| k.clone())
            .ok_or_else(not_found)?;
        let record = inner.records.get_mut(&key).ok_or_else(not_found)?;

        let before = record.last_used_at;
        let result = f(record);
        let after = record.last_used_at;

        if before != after {
            inner.lru.remove(&(before, key.clone()));
            inner.lru.insert((after, key));
        }

        Ok(result)
    }

    /// Clear blacklist stamps that have already expired.
    ///
    /// Returns the number of stamps cleared.
    pub fn clear_expired(&self, now: Instant) -> usize {
        let mut inner = self.inner.write();
        let mut cleared = 0;
        for record in inner.records.values_mut() {
            if matches!(record.blacklisted_until, Some(until) if until <= now) {
                record.blacklisted_until = None;
                cleared += 1;
            }
        }
        cleared
    }

    /// Up to `count` distinct addresses chosen uniformly at random,
    /// regardless of eligibility
    pub fn sample_addresses<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<String> {
        let inner = self.inner.read();
        let amount = count.min(inner.addresses.len());
        rand::seq::index::sample(rng, inner.addresses.len(), amount)
            .into_iter()
            .map(|idx| inner.addresses[idx].to_string())
            .collect()
    }

    /// Number of records blacklisted at `now`
    pub fn blacklisted_count(&self, now: Instant) -> usize {
        self.inner
            .read()
            .records
            .values()
            .filter(|rec| rec.is_blacklisted(now))
            .count()
    }

    /// Snapshots of every record, in load order
    pub fn snapshots(&self, now: Instant) -> Vec<ProxySnapshot> {
        let inner = self.inner.read();
        inner
            .addresses
            .iter()
            .filter_map(|address| inner.records.get(address))
            .map(|rec| rec.snapshot(now))
            .collect()
    }
}

/// Iterator returned by [`ProxyStore::all_eligible`]
#[derive(Clone)]
pub struct EligibleIter<'a> {
    store: &'a ProxyStore,
    cursor: Option<LruKey>,
    yielded: HashSet<Arc<str>>,
}

impl Iterator for EligibleIter<'_> {
    type Item = ProxyRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let inner = self.store.inner.read();
        let now = Instant::now();

        let cursor = self.cursor.clone();
        let lower = match &cursor {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };

        for key in inner.lru.range::<LruKey, _>((lower, Bound::Unbounded)) {
            let Some(record) = inner.records.get(&key.1) else {
                continue;
            };
            if record.is_eligible(now) && !self.yielded.contains(&key.1) {
                self.cursor = Some(key.clone());
                self.yielded.insert(key.1.clone());
                return Some(record.clone());
            }
        }

        self.cursor = inner.lru.iter().next_back().cloned();
        None
    }
}
