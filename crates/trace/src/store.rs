//! Persistence port for trace records.

use crate::record::TraceRecord;
use async_trait::async_trait;
use maitred_core::error::StoreError;
use maitred_core::SessionId;

/// Write-mostly store keyed by session id. Each flush replaces the whole
/// record, so upsert is the only write operation.
#[async_trait]
pub trait TraceStore: Send + Sync {
    async fn upsert(&self, record: TraceRecord) -> Result<(), StoreError>;

    async fn find(&self, session_id: &SessionId) -> Result<Option<TraceRecord>, StoreError>;
}
