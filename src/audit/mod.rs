//! Audit logging
//!
//! Every orchestrated task leaves an `ExecutionRecord` whose task hash can be
//! re-checked later.

use crate::models::{ExecutionRecord, Task};
use crate::Result;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Audit trail storage
pub struct AuditLog {
    records: Arc<RwLock<HashMap<Uuid, ExecutionRecord>>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Store an execution record
    pub async fn record(&self, record: ExecutionRecord) -> Result<Uuid> {
        let audit_id = record.audit_id;
        let mut records = self.records.write().await;
        records.insert(audit_id, record);
        Ok(audit_id)
    }

    /// Retrieve a record by audit ID
    pub async fn get(&self, audit_id: Uuid) -> Result<Option<ExecutionRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&audit_id).cloned())
    }

    /// Audit IDs of every attempt at a run, oldest first.
    pub async fn list_for_run(&self, run_id: Uuid) -> Result<Vec<Uuid>> {
        let records = self.records.read().await;

        let mut items: Vec<_> = records
            .iter()
            .filter(|(_, record)| record.run_id == run_id)
            .map(|(id, record)| (*id, record.created_at))
            .collect();

        items.sort_by_key(|(_, created_at)| *created_at);

        Ok(items.into_iter().map(|(id, _)| id).collect())
    }

    /// Verify a record's integrity via hash
    pub async fn verify_integrity(&self, audit_id: Uuid) -> Result<bool> {
        let records = self.records.read().await;

        match records.get(&audit_id) {
            Some(record) => Ok(compute_task_hash(&record.task) == record.task_hash),
            None => Ok(false),
        }
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA-256 of the task's JSON form, hex encoded.
pub fn compute_task_hash(task: &Task) -> String {
    let mut hasher = Sha256::new();

    // Stream JSON directly into hasher (no intermediate String)
    if serde_json::to_writer(&mut HashWriter(&mut hasher), task).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgentKind, RiskLevel, VerificationResult};
    use chrono::{Duration, Utc};

    fn record(task: &Task, run_id: Uuid, offset: i64) -> ExecutionRecord {
        ExecutionRecord {
            audit_id: Uuid::new_v4(),
            run_id,
            agent: AgentKind::Invoice,
            task: Arc::new(task.clone()),
            task_hash: compute_task_hash(task),
            observations: Arc::new(vec![]),
            corrections: Arc::new(vec![]),
            verification_result: Arc::new(VerificationResult {
                verified: true,
                risk_level: RiskLevel::Low,
                compliance_checks: vec![],
                issues: vec![],
                verified_at: Utc::now(),
            }),
            final_output: serde_json::Value::Null,
            reasoning_trace: Arc::new(vec![]),
            created_at: Utc::now() + Duration::seconds(offset),
            execution_time_ms: 5,
        }
    }

    #[test]
    fn test_task_hash_is_stable_hex() {
        let task = Task::new("send invoices");
        let hash = compute_task_hash(&task);
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, compute_task_hash(&task.clone()));
        assert_ne!(hash, compute_task_hash(&Task::new("send invoices")));
    }

    #[tokio::test]
    async fn test_records_are_listed_per_run_and_verified() {
        let log = AuditLog::new();
        let task = Task::new("send invoices");
        let run_id = Uuid::new_v4();

        let second = log.record(record(&task, run_id, 10)).await.unwrap();
        let first = log.record(record(&task, run_id, 0)).await.unwrap();
        log.record(record(&task, Uuid::new_v4(), 0)).await.unwrap();

        assert_eq!(log.list_for_run(run_id).await.unwrap(), vec![first, second]);
        assert!(log.verify_integrity(first).await.unwrap());
        assert!(!log.verify_integrity(Uuid::new_v4()).await.unwrap());

        let mut tampered = record(&task, run_id, 20);
        tampered.task_hash = "00".repeat(32);
        let id = log.record(tampered).await.unwrap();
        assert!(!log.verify_integrity(id).await.unwrap());
    }
}
