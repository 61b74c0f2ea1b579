//! Tool trait — the abstraction over tenant-data capabilities.
//!
//! Tools are what let the assistant act on tenant data: look up bookings,
//! edit a storefront section, change a price. A tool never mutates data
//! synchronously; write-tier tools return a [`ToolOutcome::Proposal`] and
//! the actual mutation happens through the proposal confirmation protocol.

use crate::error::ToolError;
use crate::id::{ProposalId, SessionId, TenantId};
use crate::provider::ToolDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Risk classification of a tool, determining its confirmation protocol and
/// which budget pool its calls draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    /// Read-only or trivially reversible; executes immediately.
    Auto,
    /// Low-stakes write; auto-confirms on the next non-negating message.
    SoftConfirm,
    /// Destructive or monetary write; requires an explicit affirmative.
    HardConfirm,
}

impl std::fmt::Display for TrustTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::SoftConfirm => write!(f, "soft_confirm"),
            Self::HardConfirm => write!(f, "hard_confirm"),
        }
    }
}

/// Request-scoped context shared with every tool execution.
///
/// Mode flags (onboarding vs. normal) ride here rather than on the
/// orchestrator instance, so concurrent requests for different tenants can
/// never see each other's tool set.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
}

/// What a tool execution produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolOutcome {
    /// Plain data returned to the completion provider.
    Data { value: serde_json::Value },

    /// A write proposal was recorded; nothing has mutated yet (except for
    /// auto-tier tools, which the orchestrator executes in the same call).
    Proposal {
        proposal_id: ProposalId,
        operation: String,
        preview: String,
        trust_tier: TrustTier,
        requires_approval: bool,
    },
}

impl ToolOutcome {
    /// Render the outcome as the text block sent back to the provider.
    pub fn provider_text(&self) -> String {
        match self {
            Self::Data { value } => value.to_string(),
            Self::Proposal {
                proposal_id,
                operation,
                preview,
                trust_tier,
                requires_approval,
            } => serde_json::json!({
                "success": true,
                "proposal_id": proposal_id,
                "operation": operation,
                "preview": preview,
                "trust_tier": trust_tier,
                "requires_approval": requires_approval,
            })
            .to_string(),
        }
    }
}

/// The core Tool trait.
///
/// Concrete implementations (storefront editing, booking creation, pricing
/// lookups) live outside this crate; the orchestrator only sees this
/// contract.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "list_bookings").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's input.
    fn input_schema(&self) -> serde_json::Value;

    /// Risk tier, a property of the tool, not of the request.
    fn trust_tier(&self) -> TrustTier;

    /// Execute with the shared tenant/session context.
    async fn execute(
        &self,
        ctx: &ToolContext,
        input: serde_json::Value,
    ) -> Result<ToolOutcome, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// A registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// All tool definitions, for sending to the completion provider.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
