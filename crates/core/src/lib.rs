//! Core domain types and ports for Maitred.
//!
//! Maitred turns a tenant's chat message into a bounded, auditable sequence
//! of model-driven tool calls. This crate holds the vocabulary everything
//! else speaks: branded identifiers, sessions and messages, the tool and
//! completion-provider traits, the proposal state machine, and the
//! persistence ports the orchestrator consumes.

pub mod audit;
pub mod error;
pub mod id;
pub mod message;
pub mod proposal;
pub mod provider;
pub mod session;
pub mod store;
pub mod tool;

pub use audit::{AuditEvent, AuditLog, AuditOutcome, AuditRecord};
pub use error::{Error, ProviderError, Result, StoreError, ToolError};
pub use id::{ProposalId, SessionId, TenantId};
pub use message::{Message, Role, ToolCallRequest};
pub use proposal::{Proposal, ProposalStatus};
pub use provider::{
    CompletionProvider, CompletionRequest, CompletionResponse, ContentBlock, ToolDefinition, Usage,
};
pub use session::{Session, TenantSnapshot, ToolUseRecord, Turn};
pub use store::{ProposalStore, SessionStore, TenantStore};
pub use tool::{Tool, ToolContext, ToolOutcome, ToolRegistry, TrustTier};
