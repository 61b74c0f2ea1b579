//! Per-session circuit breaker.
//!
//! One-way state machine: open (allowing) → tripped (blocking). Once
//! tripped it stays tripped for the lifetime of this in-memory instance;
//! the only way back is a new session, which gets a new breaker.

use chrono::{DateTime, Utc};
use maitred_config::BreakerConfig;

/// Why the breaker tripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TripReason {
    Turns,
    Tokens,
    Elapsed,
    Idle,
    ConsecutiveErrors,
}

impl TripReason {
    /// User-facing message. Idle is worded as a graceful session expiry
    /// rather than abuse.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Turns => "This conversation has reached its turn limit. Please start a new chat.",
            Self::Tokens => {
                "This conversation has grown too long to continue. Please start a new chat."
            }
            Self::Elapsed => {
                "This conversation has been open too long. Please start a new chat to continue."
            }
            Self::Idle => "This session has expired after inactivity. Please start a new chat.",
            Self::ConsecutiveErrors => {
                "I'm running into repeated problems. Please try again in a new chat."
            }
        }
    }
}

/// Immutable result of a breaker check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerCheck {
    Allowed,
    Blocked {
        reason: TripReason,
        message: &'static str,
    },
}

impl BreakerCheck {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Per-session resource/error aggregate. In-memory only, never persisted.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    turns: u32,
    tokens: u64,
    started_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    consecutive_errors: u32,
    tripped: Option<TripReason>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            turns: 0,
            tokens: 0,
            started_at: now,
            last_activity: now,
            consecutive_errors: 0,
            tripped: None,
        }
    }

    /// Evaluate all limits in order. Trips (permanently) on the first one
    /// exceeded.
    pub fn check(&mut self, now: DateTime<Utc>) -> BreakerCheck {
        if let Some(reason) = &self.tripped {
            return BreakerCheck::Blocked {
                reason: reason.clone(),
                message: reason.message(),
            };
        }

        let reason = if self.turns >= self.config.max_turns {
            Some(TripReason::Turns)
        } else if self.tokens >= self.config.max_tokens {
            Some(TripReason::Tokens)
        } else if now.signed_duration_since(self.started_at).num_seconds()
            >= self.config.max_session_secs as i64
        {
            Some(TripReason::Elapsed)
        } else if now.signed_duration_since(self.last_activity).num_seconds()
            >= self.config.max_idle_secs as i64
        {
            Some(TripReason::Idle)
        } else {
            None
        };

        match reason {
            Some(reason) => {
                tracing::warn!(reason = ?reason, turns = self.turns, tokens = self.tokens, "Circuit breaker tripped");
                self.tripped = Some(reason.clone());
                BreakerCheck::Blocked {
                    message: reason.message(),
                    reason,
                }
            }
            None => BreakerCheck::Allowed,
        }
    }

    /// Record a completed turn. Turns are the activity that resets idleness.
    pub fn record_turn(&mut self, tokens: u64, now: DateTime<Utc>) {
        self.turns += 1;
        self.tokens += tokens;
        self.last_activity = now;
    }

    /// Read-only heartbeat: refreshes activity without counting a turn.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }

    /// Record a failed turn. Trips at the configured consecutive-error
    /// threshold.
    pub fn record_error(&mut self) {
        self.consecutive_errors += 1;
        if self.tripped.is_none() && self.consecutive_errors >= self.config.max_consecutive_errors {
            tracing::warn!(
                errors = self.consecutive_errors,
                "Circuit breaker tripped on consecutive errors"
            );
            self.tripped = Some(TripReason::ConsecutiveErrors);
        }
    }

    /// Any success resets the consecutive-error counter.
    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.is_some()
    }

    pub fn turns(&self) -> u32 {
        self.turns
    }

    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn breaker(config: BreakerConfig) -> CircuitBreaker {
        CircuitBreaker::new(config, Utc::now())
    }

    #[test]
    fn fresh_breaker_allows() {
        let mut b = breaker(BreakerConfig::default());
        assert!(b.check(Utc::now()).is_allowed());
    }

    #[test]
    fn trips_on_turn_limit_and_stays_tripped() {
        let mut b = breaker(BreakerConfig {
            max_turns: 3,
            ..BreakerConfig::default()
        });

        let now = Utc::now();
        for _ in 0..3 {
            assert!(b.check(now).is_allowed());
            b.record_turn(10, now);
        }

        match b.check(now) {
            BreakerCheck::Blocked { reason, message } => {
                assert_eq!(reason, TripReason::Turns);
                assert!(message.contains("turn limit"));
            }
            BreakerCheck::Allowed => panic!("expected block"),
        }

        // Remains blocked on every subsequent check
        assert!(!b.check(now).is_allowed());
        assert!(b.is_tripped());
    }

    #[test]
    fn trips_on_token_limit() {
        let mut b = breaker(BreakerConfig {
            max_tokens: 1000,
            ..BreakerConfig::default()
        });
        let now = Utc::now();
        b.record_turn(1200, now);
        match b.check(now) {
            BreakerCheck::Blocked { reason, .. } => assert_eq!(reason, TripReason::Tokens),
            BreakerCheck::Allowed => panic!("expected block"),
        }
    }

    #[test]
    fn trips_on_wall_clock() {
        let mut b = breaker(BreakerConfig {
            max_session_secs: 60,
            ..BreakerConfig::default()
        });
        let later = Utc::now() + Duration::seconds(61);
        match b.check(later) {
            BreakerCheck::Blocked { reason, .. } => assert_eq!(reason, TripReason::Elapsed),
            BreakerCheck::Allowed => panic!("expected block"),
        }
    }

    #[test]
    fn idle_trip_is_graceful_wording() {
        let mut b = breaker(BreakerConfig {
            max_idle_secs: 60,
            max_session_secs: 1_000_000,
            ..BreakerConfig::default()
        });
        let later = Utc::now() + Duration::seconds(61);
        match b.check(later) {
            BreakerCheck::Blocked { reason, message } => {
                assert_eq!(reason, TripReason::Idle);
                assert!(message.contains("expired"));
            }
            BreakerCheck::Allowed => panic!("expected block"),
        }
    }

    #[test]
    fn turn_resets_idleness() {
        let mut b = breaker(BreakerConfig {
            max_idle_secs: 60,
            max_session_secs: 1_000_000,
            ..BreakerConfig::default()
        });
        let mid = Utc::now() + Duration::seconds(50);
        b.record_turn(10, mid);
        // 50s after the turn, 100s after start — still within idle window
        let later = mid + Duration::seconds(50);
        assert!(b.check(later).is_allowed());
    }

    #[test]
    fn touch_refreshes_without_counting_a_turn() {
        let mut b = breaker(BreakerConfig {
            max_idle_secs: 60,
            max_session_secs: 1_000_000,
            ..BreakerConfig::default()
        });
        let mid = Utc::now() + Duration::seconds(50);
        b.touch(mid);
        assert_eq!(b.turns(), 0);
        assert!(b.check(mid + Duration::seconds(50)).is_allowed());
    }

    #[test]
    fn consecutive_errors_trip_and_success_resets() {
        let mut b = breaker(BreakerConfig {
            max_consecutive_errors: 3,
            ..BreakerConfig::default()
        });

        b.record_error();
        b.record_error();
        b.record_success();
        b.record_error();
        b.record_error();
        assert!(!b.is_tripped());

        b.record_error();
        assert!(b.is_tripped());
        match b.check(Utc::now()) {
            BreakerCheck::Blocked { reason, .. } => {
                assert_eq!(reason, TripReason::ConsecutiveErrors)
            }
            BreakerCheck::Allowed => panic!("expected block"),
        }
    }
}
