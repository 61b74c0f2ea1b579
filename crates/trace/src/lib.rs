//! Conversation tracing — accumulates a size-bounded record of each
//! session's messages, tool calls, and metrics, and persists it
//! asynchronously so tracing latency never lands on the user's turn.

pub mod record;
pub mod registry;
pub mod store;
pub mod tracer;
pub mod truncate;

pub use record::{TraceMetrics, TraceRecord, TracedError, TracedMessage, TracedToolCall};
pub use registry::SessionTracers;
pub use store::TraceStore;
pub use tracer::ConversationTracer;
