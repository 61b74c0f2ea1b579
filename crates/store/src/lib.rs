//! In-memory backends for every persistence port.
//!
//! These are the default backing for development and the only backing the
//! test suites use. Real database engines plug in behind the same traits.

pub mod audit;
pub mod in_memory;

pub use audit::{MemoryAuditLog, TracingAuditLog};
pub use in_memory::{
    MemoryProposalStore, MemorySessionStore, MemoryTenantStore, MemoryTraceStore,
};
