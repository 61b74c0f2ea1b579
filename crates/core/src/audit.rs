//! Audit records — the append-only trail of security-relevant events.

use crate::error::StoreError;
use crate::id::{SessionId, TenantId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub tenant_id: TenantId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,

    pub event: AuditEvent,
    pub outcome: AuditOutcome,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditRecord {
    pub fn new(
        tenant_id: TenantId,
        session_id: Option<SessionId>,
        event: AuditEvent,
        outcome: AuditOutcome,
        detail: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            tenant_id,
            session_id,
            event,
            outcome,
            detail,
        }
    }
}

/// Types of auditable events in the orchestration core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A session was created
    SessionCreated,
    /// A write proposal was recorded
    ProposalCreated { tool: String },
    /// A proposal execution finished (either way)
    ProposalResolved { tool: String },
    /// The session circuit breaker tripped
    BreakerTripped { reason: String },
    /// A message was rejected by the injection screen
    SafetyRejected,
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

/// Port for audit persistence. Implementations must never fail loudly
/// enough to abort a turn; callers log and continue on error.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, record: AuditRecord) -> Result<(), StoreError>;
}
