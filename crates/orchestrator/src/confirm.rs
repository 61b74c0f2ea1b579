//! Proposal confirmation — the only path by which tenant state changes.
//!
//! Write tools record a [`Proposal`] instead of mutating data. This module
//! decides, on the next user message, which pending proposals advance:
//! soft-confirm proposals execute unless the message vetoes them or their
//! window has passed; hard-confirm proposals need an explicit affirmative.
//! Execution fans out in parallel, each proposal under its own timeout, so
//! one slow executor never blocks its siblings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use maitred_core::error::ToolError;
use maitred_core::proposal::Proposal;
use maitred_core::{TenantId, TrustTier};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Executes a confirmed proposal's payload against tenant state.
#[async_trait]
pub trait ProposalExecutor: Send + Sync {
    /// JSON-schema subset used to re-validate the payload at confirmation
    /// time (the tenant's data may have changed since proposal creation).
    fn payload_schema(&self) -> serde_json::Value;

    async fn execute(
        &self,
        tenant: &TenantId,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, ToolError>;
}

/// Veto words for soft-confirm proposals. Single words match on word
/// boundaries; multi-word phrases match as substrings.
const NEGATIONS: &[&str] = &[
    "wait",
    "stop",
    "no",
    "don't",
    "cancel",
    "hold on",
    "nevermind",
    "never mind",
];

/// Explicit go-ahead words required by hard-confirm proposals.
const AFFIRMATIONS: &[&str] = &[
    "yes",
    "confirm",
    "do it",
    "go ahead",
    "proceed",
    "yep",
    "sure",
];

fn contains_pattern(normalized: &str, pattern: &str) -> bool {
    if pattern.contains(' ') {
        return normalized.contains(pattern);
    }
    let mut start = 0;
    while let Some(pos) = normalized[start..].find(pattern) {
        let at = start + pos;
        let end = at + pattern.len();
        let before_ok = at == 0
            || !normalized[..at]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
        let after_ok = end == normalized.len()
            || !normalized[end..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        start = end;
    }
    false
}

/// Best-effort heuristic, not an intent classifier: a fixed phrase list
/// that may mis-trigger on ordinary sentences containing "no".
pub fn contains_negation(message: &str) -> bool {
    let normalized = message.to_lowercase();
    NEGATIONS.iter().any(|p| contains_pattern(&normalized, p))
}

pub fn contains_affirmation(message: &str) -> bool {
    let normalized = message.to_lowercase();
    AFFIRMATIONS.iter().any(|p| contains_pattern(&normalized, p))
}

/// Validate a payload against a JSON-schema subset: `required` field
/// presence and top-level `properties` types.
pub fn validate_payload(schema: &serde_json::Value, payload: &serde_json::Value) -> Result<(), String> {
    let Some(obj) = payload.as_object() else {
        return Err("payload must be a JSON object".into());
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required {
            let Some(name) = field.as_str() else { continue };
            if !obj.contains_key(name) {
                return Err(format!("missing required field '{name}'"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
        for (name, prop) in properties {
            let Some(value) = obj.get(name) else { continue };
            let Some(expected) = prop.get("type").and_then(|t| t.as_str()) else {
                continue;
            };
            let matches = match expected {
                "string" => value.is_string(),
                "number" => value.is_number(),
                "integer" => value.is_i64() || value.is_u64(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !matches {
                return Err(format!("field '{name}' is not of type {expected}"));
            }
        }
    }

    Ok(())
}

/// Executor registry plus the advance policy.
pub struct ConfirmationEngine {
    executors: HashMap<String, Arc<dyn ProposalExecutor>>,
    timeout: Duration,
}

impl ConfirmationEngine {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            executors: HashMap::new(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn register(&mut self, tool: impl Into<String>, executor: Arc<dyn ProposalExecutor>) {
        self.executors.insert(tool.into(), executor);
    }

    /// Advance the session's pending proposals given the user's latest
    /// message. Returns only the proposals whose status changed; proposals
    /// still awaiting input are left untouched and not returned.
    pub async fn advance(
        &self,
        pending: Vec<Proposal>,
        user_message: &str,
        now: DateTime<Utc>,
    ) -> Vec<Proposal> {
        let negated = contains_negation(user_message);
        let affirmed = contains_affirmation(user_message);

        let mut resolved = Vec::new();
        let mut to_execute = Vec::new();

        for mut proposal in pending {
            if proposal.is_expired(now) {
                debug!(proposal_id = %proposal.id, tool = %proposal.tool, "proposal expired");
                proposal.mark_expired();
                resolved.push(proposal);
                continue;
            }
            match proposal.trust_tier {
                TrustTier::HardConfirm if affirmed => to_execute.push(proposal),
                TrustTier::HardConfirm => {
                    debug!(proposal_id = %proposal.id, "hard-confirm proposal awaiting explicit approval");
                }
                TrustTier::SoftConfirm if negated => {
                    debug!(proposal_id = %proposal.id, "soft-confirm proposal vetoed, left pending");
                }
                TrustTier::SoftConfirm => to_execute.push(proposal),
                // Auto proposals never reach the pending set.
                TrustTier::Auto => to_execute.push(proposal),
            }
        }

        let executed = join_all(
            to_execute
                .into_iter()
                .map(|proposal| self.execute_one(proposal)),
        )
        .await;
        resolved.extend(executed);
        resolved
    }

    /// Validate and run one confirmed proposal, marking it executed or
    /// failed. Missing executors and validation failures fail fast without
    /// touching tenant state.
    pub async fn execute_one(&self, mut proposal: Proposal) -> Proposal {
        let Some(executor) = self.executors.get(&proposal.tool) else {
            warn!(tool = %proposal.tool, "no executor registered for confirmed proposal");
            proposal.mark_failed(format!("no executor registered for '{}'", proposal.tool));
            return proposal;
        };

        if let Err(reason) = validate_payload(&executor.payload_schema(), &proposal.payload) {
            proposal.mark_failed(format!("payload validation failed: {reason}"));
            return proposal;
        }

        match tokio::time::timeout(
            self.timeout,
            executor.execute(&proposal.tenant_id, &proposal.payload),
        )
        .await
        {
            Ok(Ok(result)) => {
                debug!(proposal_id = %proposal.id, tool = %proposal.tool, "proposal executed");
                proposal.mark_executed(result);
            }
            Ok(Err(e)) => {
                warn!(proposal_id = %proposal.id, tool = %proposal.tool, error = %e, "proposal execution failed");
                proposal.mark_failed(e.to_string());
            }
            Err(_) => {
                warn!(proposal_id = %proposal.id, tool = %proposal.tool, "proposal executor timed out");
                proposal.mark_failed(format!(
                    "executor timed out after {}s",
                    self.timeout.as_secs()
                ));
            }
        }
        proposal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use maitred_core::proposal::ProposalStatus;
    use maitred_core::SessionId;

    struct OkExecutor;

    #[async_trait]
    impl ProposalExecutor for OkExecutor {
        fn payload_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "slot": { "type": "string" } },
                "required": ["slot"]
            })
        }

        async fn execute(
            &self,
            _tenant: &TenantId,
            payload: &serde_json::Value,
        ) -> Result<serde_json::Value, ToolError> {
            Ok(serde_json::json!({"booked": payload["slot"]}))
        }
    }

    struct HangingExecutor;

    #[async_trait]
    impl ProposalExecutor for HangingExecutor {
        fn payload_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }

        async fn execute(
            &self,
            _tenant: &TenantId,
            _payload: &serde_json::Value,
        ) -> Result<serde_json::Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!()
        }
    }

    fn proposal(tool: &str, tier: TrustTier, window_secs: i64) -> Proposal {
        Proposal::new(
            TenantId::new(),
            SessionId::new(),
            tool,
            serde_json::json!({"slot": "10:00"}),
            tier,
            Utc::now() + ChronoDuration::seconds(window_secs),
        )
    }

    fn engine_with_ok() -> ConfirmationEngine {
        let mut engine = ConfirmationEngine::new(30);
        engine.register("create_booking", Arc::new(OkExecutor));
        engine
    }

    #[test]
    fn negation_detection_uses_word_boundaries() {
        assert!(contains_negation("wait, not that slot"));
        assert!(contains_negation("No thanks"));
        assert!(contains_negation("actually, cancel that"));
        assert!(contains_negation("hold on a second"));
        // "no" inside other words must not trigger.
        assert!(!contains_negation("noon works for me"));
        assert!(!contains_negation("that's a nostalgic choice"));
        assert!(!contains_negation("book the 3pm slot"));
    }

    #[test]
    fn affirmation_detection() {
        assert!(contains_affirmation("Yes please"));
        assert!(contains_affirmation("go ahead and book it"));
        assert!(!contains_affirmation("what time is it?"));
        // "yes" inside another word must not trigger.
        assert!(!contains_affirmation("eyesight test"));
    }

    #[test]
    fn payload_validation() {
        let schema = serde_json::json!({
            "properties": {
                "slot": { "type": "string" },
                "party_size": { "type": "integer" }
            },
            "required": ["slot"]
        });
        assert!(validate_payload(&schema, &serde_json::json!({"slot": "10:00"})).is_ok());
        assert!(
            validate_payload(&schema, &serde_json::json!({"slot": "10:00", "party_size": 4}))
                .is_ok()
        );
        assert!(validate_payload(&schema, &serde_json::json!({})).is_err());
        assert!(validate_payload(&schema, &serde_json::json!({"slot": 5})).is_err());
        assert!(validate_payload(&schema, &serde_json::json!("not an object")).is_err());
    }

    #[tokio::test]
    async fn soft_confirm_executes_without_negation() {
        let engine = engine_with_ok();
        let p = proposal("create_booking", TrustTier::SoftConfirm, 300);

        let resolved = engine.advance(vec![p], "sounds good, thanks", Utc::now()).await;
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].status, ProposalStatus::Executed);
        assert_eq!(resolved[0].result.as_ref().unwrap()["booked"], "10:00");
    }

    #[tokio::test]
    async fn soft_confirm_veto_leaves_pending() {
        let engine = engine_with_ok();
        let p = proposal("create_booking", TrustTier::SoftConfirm, 300);

        let resolved = engine.advance(vec![p], "wait, not yet", Utc::now()).await;
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn hard_confirm_needs_explicit_affirmative() {
        let engine = engine_with_ok();

        let p = proposal("create_booking", TrustTier::HardConfirm, 900);
        let resolved = engine.advance(vec![p], "tell me more first", Utc::now()).await;
        assert!(resolved.is_empty());

        let p = proposal("create_booking", TrustTier::HardConfirm, 900);
        let resolved = engine.advance(vec![p], "yes, do it", Utc::now()).await;
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].status, ProposalStatus::Executed);
    }

    #[tokio::test]
    async fn expired_proposal_is_marked_not_executed() {
        let engine = engine_with_ok();
        let p = proposal("create_booking", TrustTier::SoftConfirm, 300);
        let later = Utc::now() + ChronoDuration::seconds(301);

        let resolved = engine.advance(vec![p], "looks good", later).await;
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].status, ProposalStatus::Expired);
    }

    #[tokio::test]
    async fn missing_executor_fails_without_blocking_siblings() {
        let engine = engine_with_ok();
        let good = proposal("create_booking", TrustTier::SoftConfirm, 300);
        let orphan = proposal("unregistered_tool", TrustTier::SoftConfirm, 300);

        let resolved = engine.advance(vec![good, orphan], "great", Utc::now()).await;
        assert_eq!(resolved.len(), 2);
        let by_tool: HashMap<_, _> = resolved
            .iter()
            .map(|p| (p.tool.as_str(), p.status.clone()))
            .collect();
        assert_eq!(by_tool["create_booking"], ProposalStatus::Executed);
        assert_eq!(by_tool["unregistered_tool"], ProposalStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fails_only_the_slow_proposal() {
        let mut engine = ConfirmationEngine::new(1);
        engine.register("create_booking", Arc::new(OkExecutor));
        engine.register("slow_tool", Arc::new(HangingExecutor));

        let fast = proposal("create_booking", TrustTier::SoftConfirm, 300);
        let slow = proposal("slow_tool", TrustTier::SoftConfirm, 300);

        let resolved = engine.advance(vec![fast, slow], "confirmed", Utc::now()).await;
        assert_eq!(resolved.len(), 2);
        let by_tool: HashMap<_, _> = resolved
            .iter()
            .map(|p| (p.tool.as_str(), p.clone()))
            .collect();
        assert_eq!(by_tool["create_booking"].status, ProposalStatus::Executed);
        assert_eq!(by_tool["slow_tool"].status, ProposalStatus::Failed);
        assert!(by_tool["slow_tool"]
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn validation_failure_marks_failed() {
        let engine = engine_with_ok();
        let mut p = proposal("create_booking", TrustTier::SoftConfirm, 300);
        p.payload = serde_json::json!({"wrong_field": true});

        let resolved = engine.advance(vec![p], "yes", Utc::now()).await;
        assert_eq!(resolved[0].status, ProposalStatus::Failed);
        assert!(resolved[0]
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("validation"));
    }
}
