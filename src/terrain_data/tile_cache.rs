use crate::{math::QuadKey, result::TerrainResult};
use bevy::{log::debug, utils::HashMap};
use std::{
    collections::BTreeMap,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
};

/// The cache key of a tile of a layer or a factory.
pub fn cache_key(label: &str, key: &QuadKey) -> String {
    format!("{label}{key}")
}

/// The state of one key of the cache.
#[derive(Debug)]
pub enum CacheSlot<T> {
    /// Nothing is known about the key.
    Empty,
    /// The key is being loaded by someone else.
    Pending,
    Ready(Arc<T>),
}

impl<T> Clone for CacheSlot<T> {
    fn clone(&self) -> Self {
        match self {
            CacheSlot::Empty => CacheSlot::Empty,
            CacheSlot::Pending => CacheSlot::Pending,
            CacheSlot::Ready(value) => CacheSlot::Ready(value.clone()),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub resident_bytes: usize,
    pub entries: usize,
    pub pending: usize,
}

/// A load in progress, shared with everyone waiting for its result.
struct Flight<T> {
    result: Mutex<Option<Option<Arc<T>>>>,
    done: Condvar,
}

impl<T> Flight<T> {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn complete(&self, value: Option<Arc<T>>) {
        let mut result = self.result.lock().unwrap_or_else(PoisonError::into_inner);
        result.get_or_insert(value);
        drop(result);

        self.done.notify_all();
    }

    fn wait(&self) -> Option<Arc<T>> {
        let mut result = self.result.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            match &*result {
                Some(value) => return value.clone(),
                None => {
                    result = self
                        .done
                        .wait(result)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }
}

enum EntrySlot<T> {
    Pending(Arc<Flight<T>>),
    Ready(Arc<T>),
}

impl<T> EntrySlot<T> {
    fn slot(&self) -> CacheSlot<T> {
        match self {
            EntrySlot::Pending(_) => CacheSlot::Pending,
            EntrySlot::Ready(value) => CacheSlot::Ready(value.clone()),
        }
    }
}

struct Entry<T> {
    slot: EntrySlot<T>,
    cost: usize,
    tick: u64,
}

struct CacheState<T> {
    entries: HashMap<String, Entry<T>>,
    /// Ready entries ordered from least to most recently used.
    recency: BTreeMap<u64, String>,
    tick: u64,
    stats: CacheStats,
}

impl<T> CacheState<T> {
    fn touch(&mut self, key: &str) {
        self.tick += 1;
        let tick = self.tick;

        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            self.recency.insert(tick, key.to_string());
        }
    }

    fn remove(&mut self, key: &str) -> Option<Entry<T>> {
        let entry = self.entries.remove(key)?;

        match &entry.slot {
            EntrySlot::Ready(_) => {
                self.recency.remove(&entry.tick);
                self.stats.resident_bytes -= entry.cost;
                self.stats.entries -= 1;
            }
            EntrySlot::Pending(_) => self.stats.pending -= 1,
        }

        Some(entry)
    }

    fn evict(&mut self, budget: usize) {
        while self.stats.resident_bytes > budget {
            let Some((_, key)) = self.recency.pop_first() else {
                break;
            };

            if let Some(entry) = self.entries.remove(&key) {
                self.stats.resident_bytes -= entry.cost;
                self.stats.entries -= 1;
                self.stats.evictions += 1;

                debug!(
                    "Evicted {key} of {} bytes, {} bytes resident.",
                    entry.cost, self.stats.resident_bytes
                );
            }
        }
    }
}

/// A memory budgeted cache with single flight loading.
///
/// Before a key is loaded, it is reserved with a [`CacheSlot::Pending`] placeholder. Concurrent
/// requests for the same key observe the placeholder and wait for the value, instead of loading
/// it a second time. Waiters receive the loaded value directly, even if it is evicted before they
/// wake up. Ready values are evicted in least recently used order, whenever their
/// estimated cost exceeds the budget.
pub struct TileCache<T> {
    budget: usize,
    state: Mutex<CacheState<T>>,
}

impl<T: Send + Sync> TileCache<T> {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            state: Mutex::new(CacheState {
                entries: HashMap::default(),
                recency: BTreeMap::new(),
                tick: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Reserves the key for loading, returning its previous state.
    ///
    /// Only if [`CacheSlot::Empty`] is returned, the caller owns the load and must either
    /// [`finalize`](Self::finalize) or [`abandon`](Self::abandon) the key.
    pub fn reserve(&self, key: &str) -> CacheSlot<T> {
        let mut state = self.state();

        let slot = match state.entries.get(key) {
            Some(entry) => entry.slot.slot(),
            None => {
                state.entries.insert(
                    key.to_string(),
                    Entry {
                        slot: EntrySlot::Pending(Arc::new(Flight::new())),
                        cost: 0,
                        tick: 0,
                    },
                );
                state.stats.pending += 1;

                return CacheSlot::Empty;
            }
        };

        if let CacheSlot::Ready(_) = slot {
            state.touch(key);
        }

        slot
    }

    /// Stores the loaded value of a key and wakes all waiters.
    pub fn finalize(&self, key: &str, value: T, cost: usize) -> Arc<T> {
        let value = Arc::new(value);

        let mut state = self.state();
        let previous = state.remove(key);
        state.entries.insert(
            key.to_string(),
            Entry {
                slot: EntrySlot::Ready(value.clone()),
                cost,
                tick: 0,
            },
        );
        state.stats.resident_bytes += cost;
        state.stats.entries += 1;
        state.touch(key);
        state.evict(self.budget);
        drop(state);

        if let Some(Entry {
            slot: EntrySlot::Pending(flight),
            ..
        }) = previous
        {
            flight.complete(Some(value.clone()));
        }

        value
    }

    /// Releases the reservation of a key whose load failed, so that it can be retried.
    pub fn abandon(&self, key: &str) {
        let mut state = self.state();

        let pending = matches!(
            state.entries.get(key),
            Some(Entry {
                slot: EntrySlot::Pending(_),
                ..
            })
        );

        let entry = if pending { state.remove(key) } else { None };
        drop(state);

        if let Some(Entry {
            slot: EntrySlot::Pending(flight),
            ..
        }) = entry
        {
            flight.complete(None);
        }
    }

    /// Inserts or replaces the value of a key.
    pub fn put(&self, key: &str, value: T, cost: usize) -> Arc<T> {
        self.finalize(key, value, cost)
    }

    /// Returns the value of a key, if it is ready, and marks it as recently used.
    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        let mut state = self.state();

        let value = match state.entries.get(key) {
            Some(Entry {
                slot: EntrySlot::Ready(value),
                ..
            }) => Some(value.clone()),
            _ => None,
        };

        if value.is_some() {
            state.stats.hits += 1;
            state.touch(key);
        } else {
            state.stats.misses += 1;
        }

        value
    }

    /// The state of a key, without affecting recency or statistics.
    pub fn lookup(&self, key: &str) -> CacheSlot<T> {
        self.state()
            .entries
            .get(key)
            .map_or(CacheSlot::Empty, |entry| entry.slot.slot())
    }

    /// Blocks while the key is pending and returns its value, `None` if the load was abandoned.
    pub fn wait(&self, key: &str) -> Option<Arc<T>> {
        let mut state = self.state();

        let flight = match state.entries.get(key).map(|entry| &entry.slot) {
            Some(EntrySlot::Pending(flight)) => flight.clone(),
            Some(EntrySlot::Ready(value)) => {
                let value = value.clone();
                state.touch(key);
                return Some(value);
            }
            None => return None,
        };
        drop(state);

        flight.wait()
    }

    /// Returns the value of a key, loading it on the calling thread if nobody else does.
    ///
    /// The loader returns the value together with its cost, or `None` if there is no data.
    pub fn get_or_load<F>(&self, key: &str, load: F) -> TerrainResult<Option<Arc<T>>>
    where
        F: FnOnce() -> TerrainResult<Option<(T, usize)>>,
    {
        match self.reserve(key) {
            CacheSlot::Ready(value) => {
                self.state().stats.hits += 1;
                Ok(Some(value))
            }
            CacheSlot::Pending => Ok(self.wait(key)),
            CacheSlot::Empty => {
                self.state().stats.misses += 1;

                match load() {
                    Ok(Some((value, cost))) => Ok(Some(self.finalize(key, value, cost))),
                    Ok(None) => {
                        self.abandon(key);
                        Ok(None)
                    }
                    Err(error) => {
                        self.abandon(key);
                        Err(error)
                    }
                }
            }
        }
    }

    pub fn remove(&self, key: &str) -> Option<Arc<T>> {
        let entry = self.state().remove(key)?;

        match entry.slot {
            EntrySlot::Ready(value) => Some(value),
            EntrySlot::Pending(flight) => {
                flight.complete(None);
                None
            }
        }
    }

    /// Removes all ready values whose key starts with the prefix.
    ///
    /// Pending keys remain reserved, their loads complete as usual.
    pub fn clear(&self, prefix: &str) {
        let mut state = self.state();

        let keys = state
            .recency
            .values()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect::<Vec<_>>();

        for key in keys {
            state.remove(&key);
        }
    }

    pub fn clear_all(&self) {
        self.clear("");
    }

    /// Visits all ready values, from least to most recently used.
    pub fn for_each_ready(&self, mut f: impl FnMut(&str, &Arc<T>)) {
        let state = self.state();

        for key in state.recency.values() {
            if let Some(Entry {
                slot: EntrySlot::Ready(value),
                ..
            }) = state.entries.get(key)
            {
                f(key, value);
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.state().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::TerrainError;
    use std::{
        io,
        sync::atomic::{AtomicUsize, Ordering},
        thread,
        time::Duration,
    };

    #[test]
    fn single_flight() {
        let cache = TileCache::<u32>::new(1000);
        let loads = AtomicUsize::new(0);

        let results = thread::scope(|scope| {
            let handles = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        cache
                            .get_or_load("elevation/1", || {
                                loads.fetch_add(1, Ordering::SeqCst);
                                thread::sleep(Duration::from_millis(50));
                                Ok(Some((7, 10)))
                            })
                            .unwrap()
                    })
                })
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect::<Vec<_>>()
        });

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|value| value.as_deref() == Some(&7)));
        assert_eq!(cache.stats().entries, 1);
    }

    #[test]
    fn placeholder_is_visible_before_completion() {
        let cache = TileCache::<u32>::new(1000);

        assert!(matches!(cache.reserve("a"), CacheSlot::Empty));
        assert!(matches!(cache.reserve("a"), CacheSlot::Pending));
        assert!(cache.get("a").is_none());

        thread::scope(|scope| {
            let waiter = scope.spawn(|| cache.wait("a"));
            thread::sleep(Duration::from_millis(20));
            cache.finalize("a", 3, 1);

            assert_eq!(waiter.join().unwrap().as_deref(), Some(&3));
        });

        assert!(matches!(cache.reserve("a"), CacheSlot::Ready(_)));
    }

    #[test]
    fn waiters_receive_values_larger_than_the_budget() {
        let cache = TileCache::<u32>::new(10);
        assert!(matches!(cache.reserve("a"), CacheSlot::Empty));

        thread::scope(|scope| {
            let waiter = scope.spawn(|| cache.wait("a"));
            let loader = scope.spawn(|| cache.get_or_load("a", || Ok(Some((0, 0)))).unwrap());
            thread::sleep(Duration::from_millis(20));
            cache.finalize("a", 7, 20);

            assert_eq!(waiter.join().unwrap().as_deref(), Some(&7));
            assert_eq!(loader.join().unwrap().as_deref(), Some(&7));
        });

        // evicted right away
        assert!(matches!(cache.lookup("a"), CacheSlot::Empty));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn abandoned_loads_wake_waiters() {
        let cache = TileCache::<u32>::new(10);
        assert!(matches!(cache.reserve("a"), CacheSlot::Empty));

        thread::scope(|scope| {
            let waiter = scope.spawn(|| cache.wait("a"));
            thread::sleep(Duration::from_millis(20));
            cache.abandon("a");

            assert!(waiter.join().unwrap().is_none());
        });
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = TileCache::<&str>::new(100);

        cache.put("a", "a", 40);
        cache.put("b", "b", 40);
        assert!(cache.get("a").is_some());

        cache.put("c", "c", 40);

        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());

        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.resident_bytes, 80);
        assert!(stats.resident_bytes <= cache.budget());
    }

    #[test]
    fn failed_loads_can_be_retried() {
        let cache = TileCache::<u32>::new(100);

        let result = cache.get_or_load("a", || {
            Err(TerrainError::Io(io::Error::other("unreachable volume")))
        });
        assert!(result.is_err());
        assert!(matches!(cache.lookup("a"), CacheSlot::Empty));

        assert!(cache.get_or_load("a", || Ok(None)).unwrap().is_none());
        assert_eq!(cache.stats().pending, 0);

        let value = cache.get_or_load("a", || Ok(Some((5, 1)))).unwrap();
        assert_eq!(value.as_deref(), Some(&5));
    }

    #[test]
    fn clear_by_prefix() {
        let cache = TileCache::<u32>::new(100);

        cache.put(&cache_key("elevation", &QuadKey::root()), 0, 1);
        cache.put("elevation/1", 1, 1);
        cache.put("gray/1", 2, 1);
        assert!(matches!(cache.reserve("elevation/2"), CacheSlot::Empty));

        cache.clear("elevation");

        let mut remaining = Vec::new();
        cache.for_each_ready(|key, _| remaining.push(key.to_string()));
        assert_eq!(remaining, vec!["gray/1".to_string()]);
        assert!(matches!(cache.lookup("elevation/2"), CacheSlot::Pending));

        cache.clear_all();
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().resident_bytes, 0);
    }
}
