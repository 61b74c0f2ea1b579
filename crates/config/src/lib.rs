//! Configuration loading, validation, and management for Maitred.
//!
//! Loads configuration from a TOML file with environment variable
//! overrides. Every guardrail threshold, cache bound, trace cap, and
//! confirmation window is configuration, not a hardcoded constant.
//! Validates all settings at startup; a missing provider credential is a
//! construction-time error, never a per-request one.

use maitred_core::tool::TrustTier;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
#[derive(Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Completion provider API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,

    /// Max tokens per completion.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Bounded retry for transient provider errors.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Circuit breaker thresholds.
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Per-tool rate limits.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Per-turn, per-trust-tier tool budgets.
    #[serde(default)]
    pub budgets: TierBudgets,

    /// Tool loop depth cap.
    #[serde(default = "default_max_loop_depth")]
    pub max_loop_depth: u32,

    /// Session lifecycle settings.
    #[serde(default)]
    pub sessions: SessionConfig,

    /// Per-tenant context cache.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Conversation trace size caps and flags.
    #[serde(default)]
    pub trace: TraceConfig,

    /// Proposal confirmation windows and executor timeout.
    #[serde(default)]
    pub confirm: ConfirmConfig,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_loop_depth() -> u32 {
    5
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for OrchestratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorConfig")
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("retry", &self.retry)
            .field("breaker", &self.breaker)
            .field("rate_limits", &self.rate_limits)
            .field("budgets", &self.budgets)
            .field("max_loop_depth", &self.max_loop_depth)
            .field("sessions", &self.sessions)
            .field("cache", &self.cache)
            .field("trace", &self.trace)
            .field("confirm", &self.confirm)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_base_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_retry_max_ms")]
    pub max_delay_ms: u64,
}

fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    500
}
fn default_retry_max_ms() -> u64 {
    8_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay_ms: default_retry_base_ms(),
            max_delay_ms: default_retry_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    #[serde(default = "default_breaker_tokens")]
    pub max_tokens: u64,

    #[serde(default = "default_session_secs")]
    pub max_session_secs: u64,

    #[serde(default = "default_idle_secs")]
    pub max_idle_secs: u64,

    #[serde(default = "default_max_errors")]
    pub max_consecutive_errors: u32,
}

fn default_max_turns() -> u32 {
    20
}
fn default_breaker_tokens() -> u64 {
    100_000
}
fn default_session_secs() -> u64 {
    30 * 60
}
fn default_idle_secs() -> u64 {
    30 * 60
}
fn default_max_errors() -> u32 {
    3
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_tokens: default_breaker_tokens(),
            max_session_secs: default_session_secs(),
            max_idle_secs: default_idle_secs(),
            max_consecutive_errors: default_max_errors(),
        }
    }
}

/// Per-tool ceilings, with a conservative fallback for unknown tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Tool name → limits.
    #[serde(default)]
    pub tools: std::collections::HashMap<String, RateLimit>,

    #[serde(default = "default_rate_limit")]
    pub default: RateLimit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimit {
    pub per_turn: u32,
    pub per_session: u32,
}

fn default_rate_limit() -> RateLimit {
    RateLimit {
        per_turn: 5,
        per_session: 50,
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            tools: std::collections::HashMap::new(),
            default: default_rate_limit(),
        }
    }
}

/// Per-turn tool budgets, one independent pool per trust tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierBudgets {
    /// Read-tier (auto) calls — generous.
    #[serde(default = "default_read_budget")]
    pub read: u32,

    /// Soft-confirm write calls — limited.
    #[serde(default = "default_soft_budget")]
    pub soft_write: u32,

    /// Hard-confirm write calls — minimal; destructive/monetary operations
    /// should almost never repeat within a turn.
    #[serde(default = "default_hard_budget")]
    pub hard_write: u32,
}

fn default_read_budget() -> u32 {
    10
}
fn default_soft_budget() -> u32 {
    3
}
fn default_hard_budget() -> u32 {
    1
}

impl Default for TierBudgets {
    fn default() -> Self {
        Self {
            read: default_read_budget(),
            soft_write: default_soft_budget(),
            hard_write: default_hard_budget(),
        }
    }
}

impl TierBudgets {
    pub fn for_tier(&self, tier: TrustTier) -> u32 {
        match tier {
            TrustTier::Auto => self.read,
            TrustTier::SoftConfirm => self.soft_write,
            TrustTier::HardConfirm => self.hard_write,
        }
    }

    /// Sum across pools — used to widen the loop depth for tool-heavy flows.
    pub fn total(&self) -> u32 {
        self.read + self.soft_write + self.hard_write
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Rolling reuse window for tenant-scoped business sessions.
    #[serde(default = "default_business_ttl")]
    pub business_ttl_secs: u64,

    /// Shorter window for public-facing variants.
    #[serde(default = "default_public_ttl")]
    pub public_ttl_secs: u64,

    /// Sweep in-memory guards/tracers every N chat calls.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_calls: u64,

    /// Extra grace past the session TTL before sweeping its guards.
    #[serde(default = "default_sweep_buffer")]
    pub sweep_buffer_secs: u64,

    /// Hard cap on in-memory per-session state, as a backstop if the
    /// sweep cadence is missed.
    #[serde(default = "default_max_tracked")]
    pub max_tracked_sessions: usize,
}

fn default_business_ttl() -> u64 {
    24 * 3600
}
fn default_public_ttl() -> u64 {
    3600
}
fn default_sweep_interval() -> u64 {
    100
}
fn default_sweep_buffer() -> u64 {
    5 * 60
}
fn default_max_tracked() -> usize {
    10_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            business_ttl_secs: default_business_ttl(),
            public_ttl_secs: default_public_ttl(),
            sweep_interval_calls: default_sweep_interval(),
            sweep_buffer_secs: default_sweep_buffer(),
            max_tracked_sessions: default_max_tracked(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

fn default_cache_ttl() -> u64 {
    5 * 60
}
fn default_cache_capacity() -> usize {
    1000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Keep the first N messages (initial context) when trimming.
    #[serde(default = "default_head_messages")]
    pub head_messages: usize,

    /// Most-recent messages kept beyond the head.
    #[serde(default = "default_recent_messages")]
    pub recent_messages: usize,

    /// Individual message body cap (chars), applied if still oversized.
    #[serde(default = "default_message_chars")]
    pub max_message_chars: usize,

    /// Most-recent tool calls kept.
    #[serde(default = "default_recent_tool_calls")]
    pub recent_tool_calls: usize,

    /// Per-field value cap (chars), applied recursively.
    #[serde(default = "default_field_chars")]
    pub max_field_chars: usize,

    /// Array payload length cap, applied recursively.
    #[serde(default = "default_array_items")]
    pub max_array_items: usize,

    /// Drain outstanding writes once this many are pending.
    #[serde(default = "default_pending_writes")]
    pub max_pending_writes: usize,

    /// Auto-flag a conversation when one assistant turn exceeds this.
    #[serde(default = "default_slow_turn_ms")]
    pub slow_turn_ms: u64,

    /// Auto-flag a conversation past this many turns.
    #[serde(default = "default_flag_turns")]
    pub flag_turn_count: u32,

    /// Approximate pricing for the cost estimate (USD per 1M tokens).
    #[serde(default = "default_input_per_m")]
    pub input_usd_per_m: f64,

    #[serde(default = "default_output_per_m")]
    pub output_usd_per_m: f64,
}

fn default_head_messages() -> usize {
    5
}
fn default_recent_messages() -> usize {
    40
}
fn default_message_chars() -> usize {
    4_000
}
fn default_recent_tool_calls() -> usize {
    30
}
fn default_field_chars() -> usize {
    1_000
}
fn default_array_items() -> usize {
    20
}
fn default_pending_writes() -> usize {
    8
}
fn default_slow_turn_ms() -> u64 {
    20_000
}
fn default_flag_turns() -> u32 {
    15
}
fn default_input_per_m() -> f64 {
    3.0
}
fn default_output_per_m() -> f64 {
    15.0
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            head_messages: default_head_messages(),
            recent_messages: default_recent_messages(),
            max_message_chars: default_message_chars(),
            recent_tool_calls: default_recent_tool_calls(),
            max_field_chars: default_field_chars(),
            max_array_items: default_array_items(),
            max_pending_writes: default_pending_writes(),
            slow_turn_ms: default_slow_turn_ms(),
            flag_turn_count: default_flag_turns(),
            input_usd_per_m: default_input_per_m(),
            output_usd_per_m: default_output_per_m(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmConfig {
    /// Soft-confirm window for public-facing chat — fast, low-stakes.
    #[serde(default = "default_public_window")]
    pub public_window_secs: u64,

    /// Soft-confirm window for the business assistant.
    #[serde(default = "default_business_window")]
    pub business_window_secs: u64,

    /// Soft-confirm window for guided onboarding — thoughtful decisions
    /// get longer.
    #[serde(default = "default_onboarding_window")]
    pub onboarding_window_secs: u64,

    /// Hard-confirm proposals expire after this long without an explicit
    /// affirmative.
    #[serde(default = "default_hard_expiry")]
    pub hard_expiry_secs: u64,

    /// Per-executor timeout during confirmation fan-out.
    #[serde(default = "default_executor_timeout")]
    pub executor_timeout_secs: u64,
}

fn default_public_window() -> u64 {
    2 * 60
}
fn default_business_window() -> u64 {
    5 * 60
}
fn default_onboarding_window() -> u64 {
    10 * 60
}
fn default_hard_expiry() -> u64 {
    15 * 60
}
fn default_executor_timeout() -> u64 {
    30
}

impl Default for ConfirmConfig {
    fn default() -> Self {
        Self {
            public_window_secs: default_public_window(),
            business_window_secs: default_business_window(),
            onboarding_window_secs: default_onboarding_window(),
            hard_expiry_secs: default_hard_expiry(),
            executor_timeout_secs: default_executor_timeout(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from a TOML file (if present) and apply environment overrides.
    ///
    /// Fails when no provider credential can be found — a request should
    /// never be the first thing to discover that.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();
        let mut config = Self::load_from(&path)?;
        config.apply_env();
        if config.api_key.is_none() {
            return Err(ConfigError::MissingCredential);
        }
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, without requiring a
    /// credential. Used by `load()` and directly by tests.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Environment overrides (highest priority).
    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("MAITRED_API_KEY") {
            self.api_key = Some(key);
        } else if self.api_key.is_none() {
            self.api_key = std::env::var("ANTHROPIC_API_KEY").ok();
        }

        if let Ok(model) = std::env::var("MAITRED_MODEL") {
            self.model = model;
        }

        if let Some(v) = env_u64("MAITRED_MAX_TURNS") {
            self.breaker.max_turns = v as u32;
        }
        if let Some(v) = env_u64("MAITRED_MAX_SESSION_TOKENS") {
            self.breaker.max_tokens = v;
        }
        if let Some(v) = env_u64("MAITRED_CACHE_TTL_SECS") {
            self.cache.ttl_secs = v;
        }
        if let Some(v) = env_u64("MAITRED_MAX_LOOP_DEPTH") {
            self.max_loop_depth = v as u32;
        }
    }

    pub fn config_path() -> PathBuf {
        std::env::var("MAITRED_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("maitred.toml"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.temperature < 0.0 || self.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.max_loop_depth == 0 {
            return Err(ConfigError::ValidationError(
                "max_loop_depth must be at least 1".into(),
            ));
        }
        if self.cache.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "cache capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
            rate_limits: RateLimitConfig::default(),
            budgets: TierBudgets::default(),
            max_loop_depth: default_max_loop_depth(),
            sessions: SessionConfig::default(),
            cache: CacheConfig::default(),
            trace: TraceConfig::default(),
            confirm: ConfirmConfig::default(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("No provider API key configured (set MAITRED_API_KEY)")]
    MissingCredential,
}
