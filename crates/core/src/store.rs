//! Persistence ports — the minimum storage operations the core requires.
//!
//! Every lookup is tenant-scoped. Concrete engines live behind these
//! traits; the orchestrator never sees a database.

use crate::error::StoreError;
use crate::id::{ProposalId, SessionId, TenantId};
use crate::proposal::{Proposal, ProposalStatus};
use crate::session::{Session, TenantSnapshot};
use async_trait::async_trait;

/// Session persistence, always keyed by (tenant, session).
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: &Session) -> Result<(), StoreError>;

    /// Find by id, scoped to the tenant. A lookup without the tenant id is
    /// not expressible through this port.
    async fn find(
        &self,
        tenant: &TenantId,
        id: &SessionId,
    ) -> Result<Option<Session>, StoreError>;

    /// The tenant's most recently updated session, for reuse-by-recency.
    async fn find_latest(&self, tenant: &TenantId) -> Result<Option<Session>, StoreError>;

    async fn update(&self, session: &Session) -> Result<(), StoreError>;
}

/// Proposal persistence. Status transitions must be atomic at the storage
/// level since multiple proposals may be confirmed concurrently.
#[async_trait]
pub trait ProposalStore: Send + Sync {
    async fn create(&self, proposal: &Proposal) -> Result<(), StoreError>;

    async fn find(&self, id: &ProposalId) -> Result<Option<Proposal>, StoreError>;

    /// All proposals for a tenant's session in the given status.
    async fn find_by_status(
        &self,
        tenant: &TenantId,
        session: &SessionId,
        status: ProposalStatus,
    ) -> Result<Vec<Proposal>, StoreError>;

    async fn update(&self, proposal: &Proposal) -> Result<(), StoreError>;
}

/// Minimal tenant reads for prompt construction.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn snapshot(&self, tenant: &TenantId) -> Result<Option<TenantSnapshot>, StoreError>;
}
