//! The bounded, multiply-indexed translation cache. §4.3.
//!
//! The primary structure is a doubly-linked list of entries (an intrusive LRU, here
//! implemented as a slab of nodes linked by index rather than pointers) plus a primary
//! hash map from key to slab index. Three secondary multimaps — by stream, by
//! (stream, context), and by security state — hold the same indices so a mass
//! invalidation touches exactly the matching entries in O(1) + k instead of scanning the
//! whole cache.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

fn duration_to_micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

use crate::types::{ContextId, PagePermissions, SecurityState, StreamId};

/// The primary lookup key: a page-aligned IOVA within a (stream, context, security) scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Key {
    stream: StreamId,
    context: ContextId,
    page_aligned_iova: u64,
    security: SecurityState,
}

/// A single cached translation. §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    pub stream: StreamId,
    pub context: ContextId,
    pub page_aligned_iova: u64,
    pub physical_page_base: u64,
    pub permissions: PagePermissions,
    pub security: SecurityState,
}

struct Node {
    key: Key,
    entry: TlbEntry,
    inserted_at: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

/// A consistent snapshot of the cache's hit/miss counters. §3, §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatistics {
    pub hit_count: u64,
    pub miss_count: u64,
    pub total_lookups: u64,
    pub hit_rate: f64,
    pub current_size: usize,
    pub max_size: usize,
}

struct Inner {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    primary: HashMap<Key, usize>,
    by_stream: HashMap<StreamId, HashSet<usize>>,
    by_stream_context: HashMap<(StreamId, ContextId), HashSet<usize>>,
    by_security: HashMap<SecurityState, HashSet<usize>>,
    max_size: usize,
}

impl Inner {
    fn new(max_size: usize) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            primary: HashMap::new(),
            by_stream: HashMap::new(),
            by_stream_context: HashMap::new(),
            by_security: HashMap::new(),
            max_size: max_size.max(1),
        }
    }

    fn len(&self) -> usize {
        self.primary.len()
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.nodes[idx].as_ref().unwrap();
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.nodes[p].as_mut().unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].as_mut().unwrap().prev = prev,
            None => self.tail = prev,
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = self.nodes[idx].as_mut().unwrap();
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            self.nodes[h].as_mut().unwrap().prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn promote(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.detach(idx);
        self.push_front(idx);
    }

    fn index_insert(&mut self, idx: usize, key: &Key) {
        self.by_stream.entry(key.stream).or_default().insert(idx);
        self.by_stream_context
            .entry((key.stream, key.context))
            .or_default()
            .insert(idx);
        self.by_security.entry(key.security).or_default().insert(idx);
    }

    fn index_remove(&mut self, idx: usize, key: &Key) {
        if let Some(set) = self.by_stream.get_mut(&key.stream) {
            set.remove(&idx);
            if set.is_empty() {
                self.by_stream.remove(&key.stream);
            }
        }
        if let Some(set) = self.by_stream_context.get_mut(&(key.stream, key.context)) {
            set.remove(&idx);
            if set.is_empty() {
                self.by_stream_context.remove(&(key.stream, key.context));
            }
        }
        if let Some(set) = self.by_security.get_mut(&key.security) {
            set.remove(&idx);
            if set.is_empty() {
                self.by_security.remove(&key.security);
            }
        }
    }

    /// Removes the entry at `idx` from the LRU list, the primary map, and every secondary
    /// index. Returns the freed slot to the free list.
    fn remove_index(&mut self, idx: usize) {
        self.detach(idx);
        let key = self.nodes[idx].as_ref().unwrap().key;
        self.primary.remove(&key);
        self.index_remove(idx, &key);
        self.nodes[idx] = None;
        self.free.push(idx);
    }

    fn evict_lru(&mut self) {
        if let Some(tail) = self.tail {
            let key = self.nodes[tail].as_ref().unwrap().key;
            debug!(
                "TLB evicting LRU entry stream={} context={} iova=0x{:x}",
                key.stream, key.context, key.page_aligned_iova
            );
            self.remove_index(tail);
        }
    }

    fn alloc_slot(&mut self, node: Node) -> usize {
        if let Some(idx) = self.free.pop() {
            self.nodes[idx] = Some(node);
            idx
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        }
    }

    fn insert(&mut self, entry: TlbEntry) {
        let key = Key {
            stream: entry.stream,
            context: entry.context,
            page_aligned_iova: entry.page_aligned_iova,
            security: entry.security,
        };
        if let Some(&idx) = self.primary.get(&key) {
            {
                let node = self.nodes[idx].as_mut().unwrap();
                node.entry = entry;
                node.inserted_at = Instant::now();
            }
            self.promote(idx);
            return;
        }
        if self.len() >= self.max_size {
            self.evict_lru();
        }
        let idx = self.alloc_slot(Node {
            key,
            entry,
            inserted_at: Instant::now(),
            prev: None,
            next: None,
        });
        self.push_front(idx);
        self.primary.insert(key, idx);
        self.index_insert(idx, &key);
    }

    fn lookup(&mut self, key: &Key) -> Option<(TlbEntry, Instant)> {
        let idx = *self.primary.get(key)?;
        self.promote(idx);
        let node = self.nodes[idx].as_ref().unwrap();
        Some((node.entry, node.inserted_at))
    }

    fn invalidate_key(&mut self, key: &Key) {
        if let Some(&idx) = self.primary.get(key) {
            self.remove_index(idx);
        }
    }

    fn invalidate_set(&mut self, indices: Vec<usize>) {
        for idx in indices {
            if self.nodes[idx].is_some() {
                self.remove_index(idx);
            }
        }
    }

    fn invalidate_all(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.primary.clear();
        self.by_stream.clear();
        self.by_stream_context.clear();
        self.by_security.clear();
    }

    fn set_max_size(&mut self, n: usize) {
        self.max_size = n.max(1);
        while self.len() > self.max_size {
            self.evict_lru();
        }
    }
}

/// Bounded LRU cache of [`TlbEntry`], guarded by a single mutex. Statistics are kept both
/// inside the mutex (for consistent snapshots) and as lock-free atomics (for cheap reads).
pub struct TlbCache {
    inner: Mutex<Inner>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    /// Entries older than this are treated as a miss and evicted on lookup. §4.3, §9(c).
    /// Stored as micros in an atomic so a live configuration update can retune it through
    /// a shared `&self`, matching the statistics counters next to it.
    max_age_micros: AtomicU64,
}

impl TlbCache {
    pub fn new(max_size: usize, max_age: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::new(max_size)),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            max_age_micros: AtomicU64::new(duration_to_micros(max_age)),
        }
    }

    pub fn set_max_age(&self, max_age: Duration) {
        self.max_age_micros
            .store(duration_to_micros(max_age), Ordering::Relaxed);
    }

    /// Looks up `(stream, context, page_aligned_iova, security)`. A hit older than
    /// `cacheMaxAge` is evicted and reported as a miss.
    pub fn lookup(
        &self,
        stream: StreamId,
        context: ContextId,
        page_aligned_iova: u64,
        security: SecurityState,
    ) -> Option<TlbEntry> {
        let key = Key {
            stream,
            context,
            page_aligned_iova,
            security,
        };
        let mut inner = self.inner.lock().unwrap();
        let max_age = Duration::from_micros(self.max_age_micros.load(Ordering::Relaxed));
        match inner.lookup(&key) {
            Some((entry, inserted_at)) => {
                if inserted_at.elapsed() > max_age {
                    inner.invalidate_key(&key);
                    self.miss_count.fetch_add(1, Ordering::Relaxed);
                    None
                } else {
                    self.hit_count.fetch_add(1, Ordering::Relaxed);
                    Some(entry)
                }
            }
            None => {
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, entry: TlbEntry) {
        self.inner.lock().unwrap().insert(entry);
    }

    pub fn invalidate_page(
        &self,
        stream: StreamId,
        context: ContextId,
        page_aligned_iova: u64,
        security: SecurityState,
    ) {
        let key = Key {
            stream,
            context,
            page_aligned_iova,
            security,
        };
        self.inner.lock().unwrap().invalidate_key(&key);
    }

    /// Invalidates `(stream, context, page)` across every [`SecurityState`]. Used where
    /// the caller (an ATC invalidation command, an unmapped page) has no single security
    /// state to target.
    pub fn invalidate_page_all_security(
        &self,
        stream: StreamId,
        context: ContextId,
        page_aligned_iova: u64,
    ) {
        let mut inner = self.inner.lock().unwrap();
        for security in [
            SecurityState::NonSecure,
            SecurityState::Secure,
            SecurityState::Realm,
        ] {
            let key = Key {
                stream,
                context,
                page_aligned_iova,
                security,
            };
            inner.invalidate_key(&key);
        }
    }

    pub fn invalidate_by_stream(&self, stream: StreamId) {
        let mut inner = self.inner.lock().unwrap();
        let indices: Vec<usize> = inner
            .by_stream
            .get(&stream)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        inner.invalidate_set(indices);
    }

    pub fn invalidate_by_context(&self, stream: StreamId, context: ContextId) {
        let mut inner = self.inner.lock().unwrap();
        let indices: Vec<usize> = inner
            .by_stream_context
            .get(&(stream, context))
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        inner.invalidate_set(indices);
    }

    pub fn invalidate_by_security_state(&self, security: SecurityState) {
        let mut inner = self.inner.lock().unwrap();
        let indices: Vec<usize> = inner
            .by_security
            .get(&security)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        inner.invalidate_set(indices);
    }

    pub fn invalidate_all(&self) {
        self.inner.lock().unwrap().invalidate_all();
    }

    /// Trims by LRU eviction until the cache size is at most `n`.
    pub fn set_max_size(&self, n: usize) {
        self.inner.lock().unwrap().set_max_size(n);
    }

    /// A consistent snapshot taken under the cache's lock.
    pub fn statistics(&self) -> CacheStatistics {
        let inner = self.inner.lock().unwrap();
        let hit_count = self.hit_count.load(Ordering::Relaxed);
        let miss_count = self.miss_count.load(Ordering::Relaxed);
        let total_lookups = hit_count + miss_count;
        CacheStatistics {
            hit_count,
            miss_count,
            total_lookups,
            hit_rate: if total_lookups == 0 {
                0.0
            } else {
                hit_count as f64 / total_lookups as f64
            },
            current_size: inner.len(),
            max_size: inner.max_size,
        }
    }

    pub fn reset_statistics(&self) {
        self.hit_count.store(0, Ordering::Relaxed);
        self.miss_count.store(0, Ordering::Relaxed);
    }
}
