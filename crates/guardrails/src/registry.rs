//! In-memory registry mapping sessions to their guard state.
//!
//! Guard state is transient: a breaker or rate limiter that vanishes on
//! restart simply starts over, which is acceptable because limits exist to
//! bound runaway conversations, not to enforce durable quotas. The map is
//! swept on a call cadence so idle sessions do not accumulate forever.

use crate::breaker::CircuitBreaker;
use crate::rate_limit::ToolRateLimiter;
use chrono::{DateTime, Utc};
use maitred_config::{BreakerConfig, RateLimitConfig, SessionConfig};
use maitred_core::SessionId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Breaker plus rate limiter for one session, with the metadata the
/// sweeper needs to decide when to drop it.
#[derive(Debug)]
pub struct GuardEntry {
    pub breaker: CircuitBreaker,
    pub rate_limiter: ToolRateLimiter,
    ttl_secs: u64,
    last_seen: DateTime<Utc>,
}

impl GuardEntry {
    fn expired(&self, now: DateTime<Utc>, buffer_secs: u64) -> bool {
        let age = (now - self.last_seen).num_seconds();
        age >= 0 && age as u64 >= self.ttl_secs + buffer_secs
    }
}

/// Thread-safe map of per-session guard state.
///
/// The outer lock guards the map shape only; each entry carries its own
/// lock so one session's turn never blocks another's. Critical sections on
/// both locks are brief and contain no awaits.
pub struct SessionGuards {
    config: SessionConfig,
    entries: Mutex<HashMap<SessionId, Arc<Mutex<GuardEntry>>>>,
    calls: Mutex<u64>,
}

impl SessionGuards {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
            calls: Mutex::new(0),
        }
    }

    /// Count one chat call; every `sweep_interval_calls` the registry drops
    /// entries idle past their TTL plus the sweep buffer, and returns the
    /// swept session ids so callers can finalize related state.
    pub fn note_call(&self, now: DateTime<Utc>) -> Vec<SessionId> {
        let due = {
            let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            *calls += 1;
            self.config.sweep_interval_calls > 0 && *calls % self.config.sweep_interval_calls == 0
        };
        if due { self.sweep(now) } else { Vec::new() }
    }

    /// Fetch the guard entry for a session, creating it on first sight.
    /// Refreshes the entry's `last_seen` either way.
    pub fn entry(
        &self,
        session_id: &SessionId,
        breaker: &BreakerConfig,
        rate_limits: &RateLimitConfig,
        ttl_secs: u64,
        now: DateTime<Utc>,
    ) -> Arc<Mutex<GuardEntry>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = entries.get(session_id) {
            let mut guard = existing.lock().unwrap_or_else(|e| e.into_inner());
            guard.last_seen = now;
            return Arc::clone(existing);
        }

        if entries.len() >= self.config.max_tracked_sessions {
            Self::evict_oldest(&mut entries);
        }

        let entry = Arc::new(Mutex::new(GuardEntry {
            breaker: CircuitBreaker::new(breaker.clone(), now),
            rate_limiter: ToolRateLimiter::new(rate_limits.clone()),
            ttl_secs,
            last_seen: now,
        }));
        entries.insert(session_id.clone(), Arc::clone(&entry));
        entry
    }

    /// Drop entries idle past their TTL plus the sweep buffer.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<SessionId> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let buffer = self.config.sweep_buffer_secs;

        let expired: Vec<SessionId> = entries
            .iter()
            .filter(|(_, entry)| {
                entry
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .expired(now, buffer)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            entries.remove(id);
        }
        if !expired.is_empty() {
            debug!(swept = expired.len(), tracked = entries.len(), "swept idle session guards");
        }
        expired
    }

    fn evict_oldest(entries: &mut HashMap<SessionId, Arc<Mutex<GuardEntry>>>) {
        let oldest = entries
            .iter()
            .min_by_key(|(_, entry)| entry.lock().unwrap_or_else(|e| e.into_inner()).last_seen)
            .map(|(id, _)| id.clone());
        if let Some(id) = oldest {
            debug!(session_id = %id, "evicted oldest session guard at capacity");
            entries.remove(&id);
        }
    }

    pub fn tracked(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
