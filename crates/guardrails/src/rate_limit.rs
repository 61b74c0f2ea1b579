//! Per-tool rate limiter with turn and session ceilings.

use maitred_config::{RateLimit, RateLimitConfig};
use std::collections::HashMap;

/// Result of a rate check. `can_call` never mutates state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Blocked { reason: String },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Per-session tool call counters. Turn counters reset every chat turn;
/// session counters only when the session's in-memory state is discarded.
#[derive(Debug, Clone)]
pub struct ToolRateLimiter {
    config: RateLimitConfig,
    turn_counts: HashMap<String, u32>,
    session_counts: HashMap<String, u32>,
}

impl ToolRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            turn_counts: HashMap::new(),
            session_counts: HashMap::new(),
        }
    }

    fn limits_for(&self, tool: &str) -> RateLimit {
        self.config
            .tools
            .get(tool)
            .copied()
            .unwrap_or(self.config.default)
    }

    /// Compare both counters against their ceilings, without mutating.
    pub fn can_call(&self, tool: &str) -> RateDecision {
        let limits = self.limits_for(tool);
        let turn = self.turn_counts.get(tool).copied().unwrap_or(0);
        let session = self.session_counts.get(tool).copied().unwrap_or(0);

        if turn >= limits.per_turn {
            return RateDecision::Blocked {
                reason: format!(
                    "'{tool}' has reached its limit of {} calls this turn",
                    limits.per_turn
                ),
            };
        }
        if session >= limits.per_session {
            return RateDecision::Blocked {
                reason: format!(
                    "'{tool}' has reached its limit of {} calls this session",
                    limits.per_session
                ),
            };
        }
        RateDecision::Allowed
    }

    /// Increment both counters. Call only after successful execution.
    pub fn record_call(&mut self, tool: &str) {
        *self.turn_counts.entry(tool.to_string()).or_insert(0) += 1;
        *self.session_counts.entry(tool.to_string()).or_insert(0) += 1;
    }

    /// Clear turn counters only; invoked once at the start of every turn.
    pub fn reset_turn(&mut self) {
        self.turn_counts.clear();
    }

    /// Clear both counters; invoked only on session disposal.
    pub fn reset(&mut self) {
        self.turn_counts.clear();
        self.session_counts.clear();
    }

    pub fn session_count(&self, tool: &str) -> u32 {
        self.session_counts.get(tool).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter_with(tool: &str, per_turn: u32, per_session: u32) -> ToolRateLimiter {
        let mut config = RateLimitConfig::default();
        config.tools.insert(
            tool.to_string(),
            RateLimit {
                per_turn,
                per_session,
            },
        );
        ToolRateLimiter::new(config)
    }

    #[test]
    fn blocks_fourth_call_in_turn() {
        let mut limiter = limiter_with("list_bookings", 3, 20);

        for _ in 0..3 {
            assert!(limiter.can_call("list_bookings").is_allowed());
            limiter.record_call("list_bookings");
        }

        match limiter.can_call("list_bookings") {
            RateDecision::Blocked { reason } => assert!(reason.contains("this turn")),
            RateDecision::Allowed => panic!("expected block"),
        }
    }

    #[test]
    fn reset_turn_preserves_session_counter() {
        let mut limiter = limiter_with("list_bookings", 3, 20);
        for _ in 0..3 {
            limiter.record_call("list_bookings");
        }
        assert!(!limiter.can_call("list_bookings").is_allowed());

        limiter.reset_turn();
        assert!(limiter.can_call("list_bookings").is_allowed());
        assert_eq!(limiter.session_count("list_bookings"), 3);
    }

    #[test]
    fn session_ceiling_survives_turn_resets() {
        let mut limiter = limiter_with("create_booking", 2, 3);
        limiter.record_call("create_booking");
        limiter.record_call("create_booking");
        limiter.reset_turn();
        limiter.record_call("create_booking");

        match limiter.can_call("create_booking") {
            RateDecision::Blocked { reason } => assert!(reason.contains("this session")),
            RateDecision::Allowed => panic!("expected session block"),
        }
    }

    #[test]
    fn unknown_tool_uses_conservative_default() {
        let mut limiter = ToolRateLimiter::new(RateLimitConfig::default());
        for _ in 0..5 {
            assert!(limiter.can_call("mystery_tool").is_allowed());
            limiter.record_call("mystery_tool");
        }
        assert!(!limiter.can_call("mystery_tool").is_allowed());
    }

    #[test]
    fn can_call_does_not_mutate() {
        let limiter = limiter_with("x", 1, 1);
        for _ in 0..10 {
            assert!(limiter.can_call("x").is_allowed());
        }
    }

    #[test]
    fn full_reset_clears_everything() {
        let mut limiter = limiter_with("x", 1, 2);
        limiter.record_call("x");
        limiter.record_call("x");
        limiter.reset();
        assert!(limiter.can_call("x").is_allowed());
        assert_eq!(limiter.session_count("x"), 0);
    }
}
