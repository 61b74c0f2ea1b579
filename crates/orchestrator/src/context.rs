//! Per-tenant prompt-context cache, TTL plus true LRU.
//!
//! Keyed by tenant, never by session: concurrent sessions of one tenant
//! share the entry and differ only by the session id substituted at read
//! time. Recency is a stamped queue — each touch pushes a fresh stamp and
//! eviction skips stale queue positions, so both paths stay amortized O(1).

use chrono::{DateTime, Duration, Utc};
use maitred_core::TenantId;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

struct Entry {
    value: String,
    cached_at: DateTime<Utc>,
    stamp: u64,
}

pub struct ContextCache {
    ttl: Duration,
    capacity: usize,
    entries: HashMap<TenantId, Entry>,
    recency: VecDeque<(u64, TenantId)>,
    next_stamp: u64,
}

impl ContextCache {
    pub fn new(ttl_secs: u64, capacity: usize) -> Self {
        Self {
            ttl: Duration::seconds(ttl_secs as i64),
            capacity: capacity.max(1),
            entries: HashMap::new(),
            recency: VecDeque::new(),
            next_stamp: 0,
        }
    }

    fn touch(&mut self, tenant: &TenantId) -> u64 {
        // Live stamps number at most one per entry, so dropping the stale
        // ones keeps the queue bounded even when the cache never reaches
        // capacity and `evict_lru` never runs. Must happen before the push:
        // callers record the fresh stamp on the entry only afterwards.
        if self.recency.len() >= self.capacity.saturating_mul(4) {
            let entries = &self.entries;
            self.recency
                .retain(|(s, t)| entries.get(t).is_some_and(|e| e.stamp == *s));
        }
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        self.recency.push_back((stamp, tenant.clone()));
        stamp
    }

    /// Fetch the tenant's context. An expired entry is removed on read and
    /// reported as a miss; a hit becomes the most recently used entry.
    pub fn get(&mut self, tenant: &TenantId, now: DateTime<Utc>) -> Option<String> {
        let expired = match self.entries.get(tenant) {
            Some(entry) => now - entry.cached_at >= self.ttl,
            None => return None,
        };
        if expired {
            self.entries.remove(tenant);
            debug!(tenant_id = %tenant, "expired context entry dropped on read");
            return None;
        }
        let stamp = self.touch(tenant);
        let entry = self.entries.get_mut(tenant)?;
        entry.stamp = stamp;
        Some(entry.value.clone())
    }

    /// Insert or overwrite. Overwriting resets both TTL and recency; a new
    /// key at capacity evicts the least recently used entry first.
    pub fn set(&mut self, tenant: TenantId, value: String, now: DateTime<Utc>) {
        if !self.entries.contains_key(&tenant) && self.entries.len() >= self.capacity {
            self.evict_lru();
        }
        let stamp = self.touch(&tenant);
        self.entries.insert(
            tenant,
            Entry {
                value,
                cached_at: now,
                stamp,
            },
        );
    }

    /// Drop the tenant's entry; called after any successful write so the
    /// next turn rebuilds fresh context.
    pub fn invalidate(&mut self, tenant: &TenantId) {
        if self.entries.remove(tenant).is_some() {
            debug!(tenant_id = %tenant, "context entry invalidated");
        }
    }

    fn evict_lru(&mut self) {
        while let Some((stamp, tenant)) = self.recency.pop_front() {
            let live = self
                .entries
                .get(&tenant)
                .is_some_and(|entry| entry.stamp == stamp);
            if live {
                self.entries.remove(&tenant);
                debug!(tenant_id = %tenant, "evicted least recently used context entry");
                return;
            }
            // Stale queue position; the tenant was touched again later.
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
