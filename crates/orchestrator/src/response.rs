//! Request and response shapes for the chat entrypoint.

use crate::session::SessionChannel;
use maitred_core::proposal::{Proposal, ProposalStatus};
use maitred_core::{ProposalId, SessionId, TenantId, TrustTier};
use serde::{Deserialize, Serialize};

/// One inbound chat call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub tenant_id: TenantId,

    /// Resume this session if still live. `None` means resolve by channel
    /// policy (public channels always start fresh).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,

    pub message: String,

    #[serde(default)]
    pub channel: SessionChannel,
}

/// What `chat` returns to the caller. Guardrail refusals arrive here as a
/// normal `message`, never as an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The assistant's reply.
    pub message: String,

    pub session_id: SessionId,

    /// Proposals created or resolved during this turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub proposals: Vec<ProposalSummary>,

    /// Tool executions performed during this turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResultSummary>,
}

impl ChatResponse {
    /// A reply with no tool or proposal activity.
    pub fn message_only(message: impl Into<String>, session_id: SessionId) -> Self {
        Self {
            message: message.into(),
            session_id,
            proposals: Vec::new(),
            tool_results: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalSummary {
    pub id: ProposalId,
    pub tool: String,
    pub trust_tier: TrustTier,
    pub status: ProposalStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl From<&Proposal> for ProposalSummary {
    fn from(p: &Proposal) -> Self {
        Self {
            id: p.id.clone(),
            tool: p.tool.clone(),
            trust_tier: p.trust_tier,
            status: p.status.clone(),
            failure_reason: p.failure_reason.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultSummary {
    pub tool: String,
    pub success: bool,
    pub duration_ms: u64,
}
