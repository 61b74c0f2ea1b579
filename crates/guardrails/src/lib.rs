//! Resource guardrails for the orchestration core.
//!
//! Three independent limits gate every turn: the per-session circuit
//! breaker, the per-tool rate limiter, and the per-turn tier budgets. Each
//! produces a structured allow/deny value — a guardrail rejection is never
//! an error. The [`registry::SessionGuards`] map owns the per-session
//! instances and garbage-collects them on TTL.

pub mod breaker;
pub mod budget;
pub mod rate_limit;
pub mod registry;
pub mod safety;

pub use breaker::{BreakerCheck, CircuitBreaker, TripReason};
pub use budget::BudgetTracker;
pub use rate_limit::{RateDecision, ToolRateLimiter};
pub use registry::{GuardEntry, SessionGuards};
pub use safety::{SafetyScreen, ScreenResult};
