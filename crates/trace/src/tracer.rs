//! Per-session trace accumulation with fire-and-forget persistence.

use crate::record::{TraceMetrics, TraceRecord, TracedError, TracedMessage, TracedToolCall};
use crate::store::TraceStore;
use crate::truncate::{trim_messages, truncate_text, truncate_value};
use chrono::{DateTime, Utc};
use maitred_config::TraceConfig;
use maitred_core::{SessionId, TenantId};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Accumulates one session's trace and flushes it to a [`TraceStore`]
/// without blocking the turn: each flush spawns the upsert and parks the
/// join handle in a bounded pending list. When the list fills, the next
/// flush drains it; [`ConversationTracer::finalize`] drains unconditionally.
pub struct ConversationTracer {
    config: TraceConfig,
    session_id: SessionId,
    tenant_id: TenantId,
    started_at: DateTime<Utc>,

    messages: Vec<TracedMessage>,
    tool_calls: Vec<TracedToolCall>,
    errors: Vec<TracedError>,
    flags: Vec<String>,
    metrics: TraceMetrics,

    dirty: bool,
    pending: Vec<JoinHandle<()>>,
}

impl ConversationTracer {
    pub fn new(
        session_id: SessionId,
        tenant_id: TenantId,
        config: TraceConfig,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            config,
            session_id,
            tenant_id,
            started_at: now,
            messages: Vec::new(),
            tool_calls: Vec::new(),
            errors: Vec::new(),
            flags: Vec::new(),
            metrics: TraceMetrics::default(),
            dirty: false,
            pending: Vec::new(),
        }
    }

    pub fn record_message(&mut self, role: &str, content: &str, now: DateTime<Utc>) {
        self.messages.push(TracedMessage {
            role: role.to_string(),
            content: truncate_text(content, self.config.max_message_chars),
            timestamp: now,
        });
        self.dirty = true;
    }

    pub fn record_tool_call(
        &mut self,
        tool: &str,
        input: &serde_json::Value,
        success: bool,
        duration_ms: u64,
        now: DateTime<Utc>,
    ) {
        self.tool_calls.push(TracedToolCall {
            tool: tool.to_string(),
            input: truncate_value(input, self.config.max_field_chars, self.config.max_array_items),
            success,
            duration_ms,
            timestamp: now,
        });
        // Ring of recent calls only.
        if self.tool_calls.len() > self.config.recent_tool_calls {
            let excess = self.tool_calls.len() - self.config.recent_tool_calls;
            self.tool_calls.drain(..excess);
        }
        self.dirty = true;
    }

    pub fn record_error(&mut self, message: &str, now: DateTime<Utc>) {
        self.errors.push(TracedError {
            message: truncate_text(message, self.config.max_field_chars),
            timestamp: now,
        });
        self.dirty = true;
    }

    /// Close out one turn's metrics, applying the automatic review flags.
    pub fn record_turn(&mut self, input_tokens: u64, output_tokens: u64, duration_ms: u64) {
        self.metrics.turns += 1;
        self.metrics.input_tokens += input_tokens;
        self.metrics.output_tokens += output_tokens;
        self.metrics.total_duration_ms += duration_ms;
        self.metrics.slowest_turn_ms = self.metrics.slowest_turn_ms.max(duration_ms);
        self.metrics.estimated_cost_usd = self.metrics.input_tokens as f64 / 1_000_000.0
            * self.config.input_usd_per_m
            + self.metrics.output_tokens as f64 / 1_000_000.0 * self.config.output_usd_per_m;

        if duration_ms >= self.config.slow_turn_ms {
            self.add_flag("slow_turn");
        }
        if self.metrics.turns >= self.config.flag_turn_count {
            self.add_flag("long_conversation");
        }
        self.dirty = true;
    }

    /// Add a review flag, deduplicated.
    pub fn add_flag(&mut self, flag: &str) {
        if !self.flags.iter().any(|f| f == flag) {
            self.flags.push(flag.to_string());
            self.dirty = true;
        }
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    pub fn metrics(&self) -> &TraceMetrics {
        &self.metrics
    }

    /// Build the size-bounded record that would be persisted right now.
    pub fn snapshot(&self, now: DateTime<Utc>) -> TraceRecord {
        let (messages, dropped_messages) = trim_messages(
            &self.messages,
            self.config.head_messages,
            self.config.recent_messages,
        );
        TraceRecord {
            session_id: self.session_id.clone(),
            tenant_id: self.tenant_id.clone(),
            started_at: self.started_at,
            updated_at: now,
            messages,
            dropped_messages,
            tool_calls: self.tool_calls.clone(),
            errors: self.errors.clone(),
            flags: if self.flags.is_empty() {
                None
            } else {
                Some(self.flags.join("; "))
            },
            metrics: self.metrics.clone(),
        }
    }

    /// Persist the current state without waiting for the write. A no-op
    /// when nothing changed since the last flush.
    pub async fn flush(&mut self, store: &Arc<dyn TraceStore>, now: DateTime<Utc>) {
        if !self.config.enabled || !self.dirty {
            return;
        }
        let record = self.snapshot(now);
        self.dirty = false;

        let store = Arc::clone(store);
        let session_id = record.session_id.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = store.upsert(record).await {
                warn!(session_id = %session_id, error = %e, "trace upsert failed");
            }
        });
        self.pending.push(handle);

        if self.pending.len() >= self.config.max_pending_writes {
            debug!(
                pending = self.pending.len(),
                "draining pending trace writes"
            );
            self.drain().await;
        }
    }

    /// Await every in-flight write.
    pub async fn drain(&mut self) {
        for handle in self.pending.drain(..) {
            let _ = handle.await;
        }
    }

    /// Final flush plus drain, for session teardown. Writes synchronously
    /// so the record is durable when this returns.
    pub async fn finalize(&mut self, store: &Arc<dyn TraceStore>, now: DateTime<Utc>) {
        self.drain().await;
        if self.config.enabled && self.dirty {
            let record = self.snapshot(now);
            self.dirty = false;
            if let Err(e) = store.upsert(record).await {
                warn!(session_id = %self.session_id, error = %e, "final trace upsert failed");
            }
        }
    }
}
