//! Job status records.
//!
//! One record per job id: `PROCESSING` while an attempt runs, then a terminal `COMPLETED`
//! or `FAILED`. Terminal writes are idempotent. A `COMPLETED` record is final; an
//! identical terminal write is a no-op; a `FAILED` record may be superseded by a later
//! attempt. Metadata carries the prompt hash and redaction categories, never prompt text.

use crate::error::{ErrorKind, StorageError};
use crate::safety::RedactionCategory;
use crate::types::{now_millis, JobId, RenderArtifacts, TenantId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::collections::HashMap;
use std::sync::Arc;

const TREE_STATUS: &str = "render_status";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

/// Terminal outcome of a job. Never mutated once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "success")]
pub enum RenderResult {
    #[serde(rename = "true", rename_all = "camelCase")]
    Success {
        artifacts: RenderArtifacts,
        cost_tokens: u64,
        cost_cents: u64,
        provider: String,
        duration_ms: u64,
        cache_hit: bool,
        coalesced: bool,
    },
    #[serde(rename = "false", rename_all = "camelCase")]
    Failure {
        error_kind: ErrorKind,
        message: String,
        retryable: bool,
    },
}

impl RenderResult {
    pub fn is_success(&self) -> bool {
        matches!(self, RenderResult::Success { .. })
    }
}

/// Privacy-safe metadata blob
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_hash: Option<String>,
    #[serde(default)]
    pub redactions: Vec<RedactionCategory>,
    #[serde(default)]
    pub cache_hit: bool,
    #[serde(default)]
    pub coalesced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

/// Persisted status of one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub job_id: JobId,
    pub tenant_id: TenantId,
    pub status: JobStatus,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<RenderArtifacts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_cents: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at_ms: u64,
    #[serde(default)]
    pub metadata: StatusMetadata,
}

impl StatusRecord {
    pub fn processing(job_id: JobId, tenant_id: TenantId, attempt: u32) -> Self {
        Self {
            job_id,
            tenant_id,
            status: JobStatus::Processing,
            attempt,
            artifacts: None,
            cost_tokens: None,
            cost_cents: None,
            provider: None,
            completed_at: None,
            updated_at_ms: now_millis(),
            metadata: StatusMetadata::default(),
        }
    }

    /// Build the terminal record for `result`.
    pub fn terminal(
        job_id: JobId,
        tenant_id: TenantId,
        attempt: u32,
        result: &RenderResult,
        mut metadata: StatusMetadata,
    ) -> Self {
        let mut record = Self::processing(job_id, tenant_id, attempt);
        match result {
            RenderResult::Success {
                artifacts,
                cost_tokens,
                cost_cents,
                provider,
                duration_ms,
                cache_hit,
                coalesced,
            } => {
                record.status = JobStatus::Completed;
                record.artifacts = Some(artifacts.clone());
                record.cost_tokens = Some(*cost_tokens);
                record.cost_cents = Some(*cost_cents);
                record.provider = Some(provider.clone());
                record.completed_at = Some(Utc::now());
                metadata.duration_ms = Some(*duration_ms);
                metadata.cache_hit = *cache_hit;
                metadata.coalesced = *coalesced;
            }
            RenderResult::Failure {
                error_kind,
                message,
                retryable,
            } => {
                record.status = JobStatus::Failed;
                metadata.error_kind = Some(*error_kind);
                metadata.error_message = Some(message.clone());
                metadata.retryable = Some(*retryable);
            }
        }
        record.metadata = metadata;
        record
    }

    /// Equal apart from timestamps and attempt number.
    fn same_outcome(&self, other: &StatusRecord) -> bool {
        let mut metadata = other.metadata.clone();
        metadata.duration_ms = self.metadata.duration_ms;
        self.job_id == other.job_id
            && self.tenant_id == other.tenant_id
            && self.status == other.status
            && self.artifacts == other.artifacts
            && self.cost_tokens == other.cost_tokens
            && self.cost_cents == other.cost_cents
            && self.provider == other.provider
            && self.metadata == metadata
    }
}

/// What a terminal write did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalWrite {
    Written,
    /// An equivalent terminal record was already stored
    Unchanged,
    /// A completed record exists and was kept
    AlreadyCompleted,
}

fn decide_terminal(existing: Option<&StatusRecord>, incoming: &StatusRecord) -> TerminalWrite {
    match existing {
        Some(current) if current.status == JobStatus::Completed => {
            if current.same_outcome(incoming) {
                TerminalWrite::Unchanged
            } else {
                TerminalWrite::AlreadyCompleted
            }
        }
        Some(current) if current.status.is_terminal() && current.same_outcome(incoming) => {
            TerminalWrite::Unchanged
        }
        _ => TerminalWrite::Written,
    }
}

/// Backing store for job status
pub trait StatusStore: Send + Sync {
    /// Record that an attempt started. Never downgrades a completed job.
    fn mark_processing(&self, record: &StatusRecord) -> Result<bool, StorageError>;

    /// Write a terminal record, idempotently.
    fn write_terminal(&self, record: &StatusRecord) -> Result<TerminalWrite, StorageError>;

    fn get(&self, job_id: &JobId) -> Result<Option<StatusRecord>, StorageError>;
}

/// Process-local store, for tests and dry runs
#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    records: Mutex<HashMap<JobId, StatusRecord>>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<StatusRecord> {
        self.records.lock().values().cloned().collect()
    }
}

impl StatusStore for InMemoryStatusStore {
    fn mark_processing(&self, record: &StatusRecord) -> Result<bool, StorageError> {
        let mut records = self.records.lock();
        if let Some(existing) = records.get(&record.job_id) {
            if existing.status == JobStatus::Completed {
                return Ok(false);
            }
        }
        records.insert(record.job_id.clone(), record.clone());
        Ok(true)
    }

    fn write_terminal(&self, record: &StatusRecord) -> Result<TerminalWrite, StorageError> {
        let mut records = self.records.lock();
        let outcome = decide_terminal(records.get(&record.job_id), record);
        if outcome == TerminalWrite::Written {
            records.insert(record.job_id.clone(), record.clone());
        }
        Ok(outcome)
    }

    fn get(&self, job_id: &JobId) -> Result<Option<StatusRecord>, StorageError> {
        Ok(self.records.lock().get(job_id).cloned())
    }
}

/// Durable sled-backed store. Updates are compare-and-swap on the job key.
#[derive(Clone)]
pub struct SledStatusStore {
    db: Db,
    status: Tree,
}

impl SledStatusStore {
    pub fn new(db: Db) -> Result<Self, StorageError> {
        let status = db.open_tree(TREE_STATUS).map_err(to_storage_io)?;
        Ok(Self { db, status })
    }

    pub fn open(path: &std::path::Path) -> Result<Arc<Self>, StorageError> {
        let db = sled::open(path).map_err(to_storage_io)?;
        Ok(Arc::new(Self::new(db)?))
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(to_storage_io)?;
        Ok(())
    }

    /// Read-decide-CAS loop; `decide` returns the record to store, or `None` to keep.
    fn update<F, R>(&self, job_id: &JobId, mut decide: F) -> Result<R, StorageError>
    where
        F: FnMut(Option<&StatusRecord>) -> (Option<StatusRecord>, R),
    {
        let key = job_id.as_str().as_bytes();
        loop {
            let current_raw = self.status.get(key).map_err(to_storage_io)?;
            let current: Option<StatusRecord> = match &current_raw {
                Some(raw) => Some(serde_json::from_slice(raw).map_err(to_storage_data)?),
                None => None,
            };
            let (next, outcome) = decide(current.as_ref());
            let Some(next) = next else {
                return Ok(outcome);
            };
            let value = serde_json::to_vec(&next).map_err(to_storage_data)?;
            match self
                .status
                .compare_and_swap(key, current_raw, Some(value))
                .map_err(to_storage_io)?
            {
                Ok(()) => return Ok(outcome),
                // Lost a race with another writer; decide again on fresh state.
                Err(_) => continue,
            }
        }
    }
}

impl StatusStore for SledStatusStore {
    fn mark_processing(&self, record: &StatusRecord) -> Result<bool, StorageError> {
        self.update(&record.job_id, |existing| match existing {
            Some(current) if current.status == JobStatus::Completed => (None, false),
            _ => (Some(record.clone()), true),
        })
    }

    fn write_terminal(&self, record: &StatusRecord) -> Result<TerminalWrite, StorageError> {
        self.update(&record.job_id, |existing| {
            match decide_terminal(existing, record) {
                TerminalWrite::Written => (Some(record.clone()), TerminalWrite::Written),
                other => (None, other),
            }
        })
    }

    fn get(&self, job_id: &JobId) -> Result<Option<StatusRecord>, StorageError> {
        let Some(raw) = self
            .status
            .get(job_id.as_str().as_bytes())
            .map_err(to_storage_io)?
        else {
            return Ok(None);
        };
        let parsed = serde_json::from_slice(&raw).map_err(to_storage_data)?;
        Ok(Some(parsed))
    }
}

fn to_storage_io(err: sled::Error) -> StorageError {
    StorageError::IoError(std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
}

fn to_storage_data(err: serde_json::Error) -> StorageError {
    StorageError::Data(err.to_string())
}
