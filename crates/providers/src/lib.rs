//! Completion provider implementations.
//!
//! [`AnthropicProvider`] speaks the Messages API over HTTPS. [`RetryProvider`]
//! wraps any provider with bounded retries on transient failures. The
//! [`mock`] module ships a scripted provider for deterministic tests.

pub mod anthropic;
pub mod mock;
pub mod retry;

pub use anthropic::AnthropicProvider;
pub use mock::ScriptedProvider;
pub use retry::{RetryPolicy, RetryProvider};
