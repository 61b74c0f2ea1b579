//! Audit log sinks.

use async_trait::async_trait;
use maitred_core::audit::{AuditLog, AuditRecord};
use maitred_core::error::StoreError;
use tokio::sync::RwLock;
use tracing::info;

/// Keeps every record in a vector. Useful for testing and small
/// deployments.
pub struct MemoryAuditLog {
    records: RwLock<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.read().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}

impl Default for MemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, record: AuditRecord) -> Result<(), StoreError> {
        self.records.write().await.push(record);
        Ok(())
    }
}

/// Emits each record as a structured log line. The default sink when no
/// durable audit storage is wired up.
pub struct TracingAuditLog;

#[async_trait]
impl AuditLog for TracingAuditLog {
    async fn append(&self, record: AuditRecord) -> Result<(), StoreError> {
        info!(
            tenant_id = %record.tenant_id,
            session_id = record.session_id.as_ref().map(|s| s.as_str()),
            event = ?record.event,
            outcome = ?record.outcome,
            detail = record.detail.as_deref(),
            "audit"
        );
        Ok(())
    }
}
