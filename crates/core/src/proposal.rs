//! Write proposals and their confirmation state machine.
//!
//! A proposal is the only path by which tenant state changes. Status moves
//! `Pending → Executed | Failed | Expired` exactly once; the transition
//! methods below are the whole legal state machine.

use crate::id::{ProposalId, SessionId, TenantId};
use crate::tool::TrustTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Executed,
    Failed,
    Expired,
}

/// A durable record of an intended write action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub tenant_id: TenantId,
    pub session_id: SessionId,

    /// The write tool that proposed this action.
    pub tool: String,

    /// The tool input, re-validated against the tool's schema at
    /// confirmation time.
    pub payload: serde_json::Value,

    pub trust_tier: TrustTier,
    pub status: ProposalStatus,

    pub created_at: DateTime<Utc>,

    /// For soft-confirm tiers this doubles as the confirmation window end.
    pub expires_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl Proposal {
    pub fn new(
        tenant_id: TenantId,
        session_id: SessionId,
        tool: impl Into<String>,
        payload: serde_json::Value,
        trust_tier: TrustTier,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ProposalId::new(),
            tenant_id,
            session_id,
            tool: tool.into(),
            payload,
            trust_tier,
            status: ProposalStatus::Pending,
            created_at: Utc::now(),
            expires_at,
            result: None,
            failure_reason: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ProposalStatus::Pending
    }

    /// Whether the proposal's window has passed as of `now`. Only
    /// meaningful while pending.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn mark_executed(&mut self, result: serde_json::Value) {
        debug_assert!(self.is_pending(), "proposal transitioned twice");
        self.status = ProposalStatus::Executed;
        self.result = Some(result);
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        debug_assert!(self.is_pending(), "proposal transitioned twice");
        self.status = ProposalStatus::Failed;
        self.failure_reason = Some(reason.into());
    }

    pub fn mark_expired(&mut self) {
        debug_assert!(self.is_pending(), "proposal transitioned twice");
        self.status = ProposalStatus::Expired;
    }
}
