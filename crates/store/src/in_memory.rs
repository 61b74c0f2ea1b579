//! In-memory stores — useful for testing and single-process deployments.

use async_trait::async_trait;
use maitred_core::error::StoreError;
use maitred_core::proposal::{Proposal, ProposalStatus};
use maitred_core::session::{Session, TenantSnapshot};
use maitred_core::store::{ProposalStore, SessionStore, TenantStore};
use maitred_core::{ProposalId, SessionId, TenantId};
use maitred_trace::{TraceRecord, TraceStore};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Sessions keyed by (tenant, session id).
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<(TenantId, SessionId), Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        let key = (session.tenant_id.clone(), session.id.clone());
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&key) {
            return Err(StoreError::Conflict(format!(
                "session '{}' already exists",
                session.id
            )));
        }
        sessions.insert(key, session.clone());
        Ok(())
    }

    async fn find(
        &self,
        tenant: &TenantId,
        id: &SessionId,
    ) -> Result<Option<Session>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&(tenant.clone(), id.clone())).cloned())
    }

    async fn find_latest(&self, tenant: &TenantId) -> Result<Option<Session>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .iter()
            .filter(|((t, _), _)| t == tenant)
            .map(|(_, s)| s)
            .max_by_key(|s| s.updated_at)
            .cloned())
    }

    async fn update(&self, session: &Session) -> Result<(), StoreError> {
        let key = (session.tenant_id.clone(), session.id.clone());
        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(&key) {
            return Err(StoreError::NotFound(format!(
                "session '{}' not found",
                session.id
            )));
        }
        sessions.insert(key, session.clone());
        Ok(())
    }
}

/// Proposals keyed by id.
pub struct MemoryProposalStore {
    proposals: RwLock<HashMap<ProposalId, Proposal>>,
}

impl MemoryProposalStore {
    pub fn new() -> Self {
        Self {
            proposals: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryProposalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProposalStore for MemoryProposalStore {
    async fn create(&self, proposal: &Proposal) -> Result<(), StoreError> {
        let mut proposals = self.proposals.write().await;
        if proposals.contains_key(&proposal.id) {
            return Err(StoreError::Conflict(format!(
                "proposal '{}' already exists",
                proposal.id
            )));
        }
        proposals.insert(proposal.id.clone(), proposal.clone());
        Ok(())
    }

    async fn find(&self, id: &ProposalId) -> Result<Option<Proposal>, StoreError> {
        Ok(self.proposals.read().await.get(id).cloned())
    }

    async fn find_by_status(
        &self,
        tenant: &TenantId,
        session: &SessionId,
        status: ProposalStatus,
    ) -> Result<Vec<Proposal>, StoreError> {
        let proposals = self.proposals.read().await;
        let mut matching: Vec<Proposal> = proposals
            .values()
            .filter(|p| {
                p.tenant_id == *tenant && p.session_id == *session && p.status == status
            })
            .cloned()
            .collect();
        matching.sort_by_key(|p| p.created_at);
        Ok(matching)
    }

    async fn update(&self, proposal: &Proposal) -> Result<(), StoreError> {
        let mut proposals = self.proposals.write().await;
        if !proposals.contains_key(&proposal.id) {
            return Err(StoreError::NotFound(format!(
                "proposal '{}' not found",
                proposal.id
            )));
        }
        proposals.insert(proposal.id.clone(), proposal.clone());
        Ok(())
    }
}

/// Tenant snapshots, seeded up front.
pub struct MemoryTenantStore {
    tenants: RwLock<HashMap<TenantId, TenantSnapshot>>,
}

impl MemoryTenantStore {
    pub fn new() -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, snapshot: TenantSnapshot) {
        self.tenants
            .write()
            .await
            .insert(snapshot.tenant_id.clone(), snapshot);
    }
}

impl Default for MemoryTenantStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TenantStore for MemoryTenantStore {
    async fn snapshot(&self, tenant: &TenantId) -> Result<Option<TenantSnapshot>, StoreError> {
        Ok(self.tenants.read().await.get(tenant).cloned())
    }
}

/// Trace records keyed by session id, whole-record upserts.
pub struct MemoryTraceStore {
    traces: RwLock<HashMap<SessionId, TraceRecord>>,
}

impl MemoryTraceStore {
    pub fn new() -> Self {
        Self {
            traces: RwLock::new(HashMap::new()),
        }
    }

    pub async fn count(&self) -> usize {
        self.traces.read().await.len()
    }
}

impl Default for MemoryTraceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TraceStore for MemoryTraceStore {
    async fn upsert(&self, record: TraceRecord) -> Result<(), StoreError> {
        self.traces
            .write()
            .await
            .insert(record.session_id.clone(), record);
        Ok(())
    }

    async fn find(&self, session_id: &SessionId) -> Result<Option<TraceRecord>, StoreError> {
        Ok(self.traces.read().await.get(session_id).cloned())
    }
}
