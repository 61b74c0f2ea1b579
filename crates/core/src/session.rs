//! Sessions — one conversation thread per visitor or staff member.
//!
//! A session is owned exclusively by the orchestrator while a turn is being
//! processed and is persisted through the [`crate::store::SessionStore`]
//! port. Lookups are always tenant-scoped: a lookup that omits the tenant
//! id is an isolation violation.

use crate::id::{ProposalId, SessionId, TenantId};
use crate::message::Message;
use crate::tool::TrustTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub tenant_id: TenantId,

    /// Ordered turns, oldest first.
    pub turns: Vec<Turn>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Snapshot of minimal tenant fields cached at creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_snapshot: Option<TenantSnapshot>,
}

impl Session {
    pub fn new(tenant_id: TenantId) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            tenant_id,
            turns: Vec::new(),
            created_at: now,
            updated_at: now,
            tenant_snapshot: None,
        }
    }

    /// Append a completed turn and refresh the update timestamp.
    pub fn push_turn(&mut self, turn: Turn) {
        self.updated_at = Utc::now();
        self.turns.push(turn);
    }

    /// Flatten the turn history into the user/assistant message sequence the
    /// completion provider sees as prior context.
    pub fn history(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.turns.len() * 2);
        for turn in &self.turns {
            messages.push(turn.user.clone());
            messages.push(turn.assistant.clone());
        }
        messages
    }

    /// Whether the session has been idle past `ttl_secs` as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl_secs: u64) -> bool {
        now.signed_duration_since(self.updated_at).num_seconds() >= ttl_secs as i64
    }
}

/// One user message and the assistant response it produced, with any tool
/// activity in between.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub user: Message,
    pub assistant: Message,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_uses: Vec<ToolUseRecord>,
}

/// A record of one tool invocation within a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseRecord {
    pub tool: String,
    pub tier: TrustTier,
    pub success: bool,
    pub duration_ms: u64,

    /// Set when this invocation created a write proposal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal_id: Option<ProposalId>,
}

/// The minimal tenant fields the prompt builder needs. Everything else the
/// tenant owns stays behind the persistence port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSnapshot {
    pub tenant_id: TenantId,
    pub business_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    /// Service/offering names, for grounding the assistant.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,
}
