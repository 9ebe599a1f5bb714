//! Forensic Case State Machine (C8): case lifecycle, audit-grade update
//! log, and an evidence-linkage counter kept atomically in step with it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use storage::{RecordCollection, StorageBackend, StorageError};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CaseError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("case not found: {0}")]
    NotFound(Uuid),
    #[error("illegal transition {from:?} -> {to:?}")]
    IllegalTransition { from: CaseStatus, to: CaseStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseStatus {
    Open,
    InProgress,
    EvidenceCollection,
    Analysis,
    Review,
    Closed,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor: String,
    pub from: CaseStatus,
    pub to: CaseStatus,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteEntry {
    pub actor: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForensicCase {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub status: CaseStatus,
    pub assigned_investigator: Option<String>,
    pub jurisdiction: String,
    pub legal_standard: String,
    pub evidence_refs: Vec<Uuid>,
    pub evidence_count: u64,
    pub tags: Vec<String>,
    pub notes: Vec<NoteEntry>,
    pub audit_log: Vec<AuditEntry>,
    pub metadata: HashMap<String, String>,
    pub created_date: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub closed_date: Option<DateTime<Utc>>,
}

/// Allowed transitions, per §4.9. `(from, to, admin_only)`.
fn allowed(from: CaseStatus, to: CaseStatus, is_admin: bool) -> bool {
    use CaseStatus::*;
    match (from, to) {
        (Open, InProgress) => true,
        (InProgress, EvidenceCollection) => true,
        (EvidenceCollection, Analysis) => true,
        (Analysis, Review) => true,
        (EvidenceCollection, Review) => true,
        (Review, Closed) => true,
        (Closed, Archived) => true,
        (Open, Closed) => is_admin,
        (Closed, InProgress) => is_admin,
        _ => false,
    }
}

pub struct CaseStore<T: StorageBackend> {
    cases: RecordCollection<T>,
    write_lock: Mutex<()>,
}

impl<T: StorageBackend> CaseStore<T> {
    pub fn new(backend: T) -> Self {
        CaseStore { cases: RecordCollection::new(backend, "case:"), write_lock: Mutex::new(()) }
    }

    pub async fn open(
        &self,
        title: impl Into<String>,
        description: impl Into<String>,
        priority: Priority,
        jurisdiction: impl Into<String>,
        legal_standard: impl Into<String>,
    ) -> Result<ForensicCase, CaseError> {
        let now = Utc::now();
        let case = ForensicCase {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            priority,
            status: CaseStatus::Open,
            assigned_investigator: None,
            jurisdiction: jurisdiction.into(),
            legal_standard: legal_standard.into(),
            evidence_refs: Vec::new(),
            evidence_count: 0,
            tags: Vec::new(),
            notes: Vec::new(),
            audit_log: Vec::new(),
            metadata: HashMap::new(),
            created_date: now,
            last_updated: now,
            closed_date: None,
        };
        self.cases.put(&case.id, &case).await?;
        Ok(case)
    }

    pub async fn get(&self, id: &Uuid) -> Result<ForensicCase, CaseError> {
        self.cases.get(id).await?.ok_or(CaseError::NotFound(*id))
    }

    /// Apply a status transition, appending an audit entry and, per the
    /// invariant in §8.3, setting/clearing `closed_date` in lockstep with
    /// membership in `{Closed, Archived}`.
    pub async fn transition(
        &self,
        id: &Uuid,
        to: CaseStatus,
        actor: &str,
        reason: impl Into<String>,
        is_admin: bool,
    ) -> Result<ForensicCase, CaseError> {
        let _guard = self.write_lock.lock().await;
        let mut case = self.get(id).await?;
        if !allowed(case.status, to, is_admin) {
            return Err(CaseError::IllegalTransition { from: case.status, to });
        }

        let now = Utc::now();
        case.audit_log.push(AuditEntry { actor: actor.to_string(), from: case.status, to, timestamp: now, reason: reason.into() });
        case.status = to;
        case.closed_date = match to {
            CaseStatus::Closed | CaseStatus::Archived => Some(now),
            _ => None,
        };
        case.last_updated = now;

        self.cases.put(id, &case).await?;
        Ok(case)
    }

    /// Attach an evidence reference, bumping the materialised counter in
    /// the same write. Evidence may be added in any state except
    /// `Archived`, per §4.9.
    pub async fn link_evidence(&self, id: &Uuid, evidence_id: Uuid) -> Result<ForensicCase, CaseError> {
        let _guard = self.write_lock.lock().await;
        let mut case = self.get(id).await?;
        if case.status == CaseStatus::Archived {
            return Err(CaseError::IllegalTransition { from: case.status, to: case.status });
        }
        if !case.evidence_refs.contains(&evidence_id) {
            case.evidence_refs.push(evidence_id);
            case.evidence_count = case.evidence_refs.len() as u64;
        }
        case.last_updated = Utc::now();
        self.cases.put(id, &case).await?;
        Ok(case)
    }

    pub async fn add_note(&self, id: &Uuid, actor: &str, body: impl Into<String>) -> Result<ForensicCase, CaseError> {
        let _guard = self.write_lock.lock().await;
        let mut case = self.get(id).await?;
        case.notes.push(NoteEntry { actor: actor.to_string(), body: body.into(), timestamp: Utc::now() });
        case.last_updated = Utc::now();
        self.cases.put(id, &case).await?;
        Ok(case)
    }

    pub async fn assign(&self, id: &Uuid, investigator: impl Into<String>) -> Result<ForensicCase, CaseError> {
        let _guard = self.write_lock.lock().await;
        let mut case = self.get(id).await?;
        case.assigned_investigator = Some(investigator.into());
        case.last_updated = Utc::now();
        self.cases.put(id, &case).await?;
        Ok(case)
    }
}
