//! The persisted shape of a conversation trace.

use chrono::{DateTime, Utc};
use maitred_core::{SessionId, TenantId};
use serde::{Deserialize, Serialize};

/// One session's accumulated trace, upserted whole on every flush.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub session_id: SessionId,
    pub tenant_id: TenantId,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Trimmed message log (head plus recent tail).
    pub messages: Vec<TracedMessage>,

    /// How many messages the trim dropped from the middle.
    #[serde(default)]
    pub dropped_messages: u32,

    /// Most recent tool calls, oldest dropped first.
    pub tool_calls: Vec<TracedToolCall>,

    pub errors: Vec<TracedError>,

    /// Review flags, e.g. "slow_turn; long_conversation".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<String>,

    pub metrics: TraceMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracedMessage {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracedToolCall {
    pub tool: String,
    pub input: serde_json::Value,
    pub success: bool,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracedError {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate counters for the whole conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceMetrics {
    pub turns: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,

    /// Approximate cost from token counts and per-million pricing.
    /// Guardrail-grade, not billing-grade.
    pub estimated_cost_usd: f64,

    pub slowest_turn_ms: u64,
    pub total_duration_ms: u64,
}
