//! Registry mapping live sessions to their tracers.

use crate::store::TraceStore;
use crate::tracer::ConversationTracer;
use chrono::{DateTime, Utc};
use maitred_config::TraceConfig;
use maitred_core::{SessionId, TenantId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// One tracer per live session. The outer map lock is held only to look
/// up or insert; each tracer carries a tokio mutex because flushing
/// awaits while mutating tracer state.
pub struct SessionTracers {
    config: TraceConfig,
    max_tracked: usize,
    tracers: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<ConversationTracer>>>>,
}

impl SessionTracers {
    pub fn new(config: TraceConfig, max_tracked: usize) -> Self {
        Self {
            config,
            max_tracked,
            tracers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_create(
        &self,
        session_id: &SessionId,
        tenant_id: &TenantId,
        now: DateTime<Utc>,
    ) -> Arc<tokio::sync::Mutex<ConversationTracer>> {
        let mut tracers = self.tracers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = tracers.get(session_id) {
            return Arc::clone(existing);
        }
        // Backstop only; the sweep keeps the map small in normal operation.
        if tracers.len() >= self.max_tracked {
            if let Some(key) = tracers.keys().next().cloned() {
                debug!(session_id = %key, "dropped tracer at capacity");
                tracers.remove(&key);
            }
        }
        let tracer = Arc::new(tokio::sync::Mutex::new(ConversationTracer::new(
            session_id.clone(),
            tenant_id.clone(),
            self.config.clone(),
            now,
        )));
        tracers.insert(session_id.clone(), Arc::clone(&tracer));
        tracer
    }

    /// Remove a session's tracer and finalize it, if present.
    pub async fn finalize_and_remove(
        &self,
        session_id: &SessionId,
        store: &Arc<dyn TraceStore>,
        now: DateTime<Utc>,
    ) {
        let removed = {
            let mut tracers = self.tracers.lock().unwrap_or_else(|e| e.into_inner());
            tracers.remove(session_id)
        };
        if let Some(tracer) = removed {
            tracer.lock().await.finalize(store, now).await;
        }
    }

    /// Finalize every tracked tracer; used at shutdown.
    pub async fn finalize_all(&self, store: &Arc<dyn TraceStore>, now: DateTime<Utc>) {
        let all: Vec<_> = {
            let mut tracers = self.tracers.lock().unwrap_or_else(|e| e.into_inner());
            tracers.drain().map(|(_, t)| t).collect()
        };
        for tracer in all {
            tracer.lock().await.finalize(store, now).await;
        }
    }

    pub fn tracked(&self) -> usize {
        self.tracers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
