//! Session lifecycle resolution.

use chrono::{DateTime, Utc};
use maitred_config::{ConfirmConfig, SessionConfig};
use maitred_core::audit::{AuditEvent, AuditLog, AuditOutcome, AuditRecord};
use maitred_core::session::Session;
use maitred_core::store::SessionStore;
use maitred_core::{Result, SessionId, TenantId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Which surface a chat call arrives through. Channels differ in session
/// TTL, reuse policy, and soft-confirm window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionChannel {
    /// Tenant staff using the business assistant.
    #[default]
    Business,
    /// Anonymous visitor on the public storefront.
    Public,
    /// Guided tenant onboarding.
    Onboarding,
}

impl SessionChannel {
    pub fn ttl_secs(self, config: &SessionConfig) -> u64 {
        match self {
            Self::Business | Self::Onboarding => config.business_ttl_secs,
            Self::Public => config.public_ttl_secs,
        }
    }

    /// Soft-confirm window for proposals created on this surface.
    pub fn confirm_window_secs(self, config: &ConfirmConfig) -> u64 {
        match self {
            Self::Business => config.business_window_secs,
            Self::Public => config.public_window_secs,
            Self::Onboarding => config.onboarding_window_secs,
        }
    }
}

/// Resolves the session a chat call belongs to, creating one when needed.
pub struct SessionResolver {
    config: SessionConfig,
    store: Arc<dyn SessionStore>,
    audit: Arc<dyn AuditLog>,
}

impl SessionResolver {
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn SessionStore>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            config,
            store,
            audit,
        }
    }

    /// Look up by id scoped to the tenant; absent or expired means a new
    /// session. Without an id, public channels always create — two
    /// visitors must never share a session — while business channels may
    /// reuse the tenant's most recent session within its TTL.
    ///
    /// Returns the session and whether it was created by this call.
    pub async fn resolve(
        &self,
        tenant: &TenantId,
        requested: Option<&SessionId>,
        channel: SessionChannel,
        now: DateTime<Utc>,
    ) -> Result<(Session, bool)> {
        let ttl_secs = channel.ttl_secs(&self.config);

        if let Some(id) = requested {
            if let Some(session) = self.store.find(tenant, id).await? {
                if !session.is_expired(now, ttl_secs) {
                    return Ok((session, false));
                }
                info!(session_id = %id, "requested session expired, starting fresh");
            }
            return self.create(tenant).await.map(|s| (s, true));
        }

        if channel != SessionChannel::Public {
            if let Some(latest) = self.store.find_latest(tenant).await? {
                if !latest.is_expired(now, ttl_secs) {
                    return Ok((latest, false));
                }
            }
        }

        self.create(tenant).await.map(|s| (s, true))
    }

    async fn create(&self, tenant: &TenantId) -> Result<Session> {
        let session = Session::new(tenant.clone());
        self.store.create(&session).await?;
        info!(tenant_id = %tenant, session_id = %session.id, "session created");

        let record = AuditRecord::new(
            tenant.clone(),
            Some(session.id.clone()),
            AuditEvent::SessionCreated,
            AuditOutcome::Success,
            None,
        );
        if let Err(e) = self.audit.append(record).await {
            warn!(error = %e, "failed to append session-created audit record");
        }

        Ok(session)
    }
}
