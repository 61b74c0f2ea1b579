//! The Maitred turn engine: sessions, guarded tool execution, proposal
//! confirmation, and the bounded loop against the completion provider.
//!
//! [`Orchestrator::chat`] is the single entrypoint. Everything risky a
//! model-driven turn can do is bounded here: the circuit breaker caps a
//! session's lifetime resources, per-tool rate limits and per-tier budgets
//! cap one turn's tool use, and writes only ever happen through the
//! proposal confirmation protocol.

pub mod confirm;
pub mod context;
pub mod engine;
pub mod prompt;
pub mod response;
pub mod session;

pub use confirm::{ConfirmationEngine, ProposalExecutor};
pub use context::ContextCache;
pub use engine::{Backends, Orchestrator};
pub use response::{ChatRequest, ChatResponse, ProposalSummary, ToolResultSummary};
pub use session::{SessionChannel, SessionResolver};
