//! Evidence Vault (C7): content-addressed, tamper-evident storage for
//! forensic artifacts, with a Merkle-linked chain-of-custody ledger.

use chrono::{DateTime, Utc};
use crypto_primitives::{custody_entry_hash, evidence_digest};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use storage::{RecordCollection, StorageBackend, StorageError};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EvidenceError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("evidence not found: {0}")]
    NotFound(Uuid),
    #[error("custody chain append rejected: prev_hash mismatch")]
    CustodyMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrityStatus {
    Verified,
    Tampered,
    Corrupted,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustodyAction {
    Collected,
    Transferred,
    Analyzed,
    Stored,
    Presented,
    Returned,
    Destroyed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodyEntry {
    pub actor: String,
    pub action: CustodyAction,
    pub timestamp: DateTime<Utc>,
    pub location: String,
    pub notes: String,
    pub entry_hash: String,
    pub prev_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub actor: String,
    pub action: String,
    pub timestamp: DateTime<Utc>,
    pub caller_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub id: Uuid,
    pub case_id: Uuid,
    pub evidence_type: String,
    pub source_description: String,
    pub collector: String,
    pub digest: String,
    pub size: u64,
    pub integrity_status: IntegrityStatus,
    pub custody_chain: Vec<CustodyEntry>,
    pub access_log: Vec<AccessLogEntry>,
    pub metadata: HashMap<String, String>,
    pub storage_pointer: String,
    pub backups: Vec<String>,
    pub created_date: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl EvidenceItem {
    pub fn custody_head_hash(&self) -> &str {
        self.custody_chain.last().map(|e| e.entry_hash.as_str()).unwrap_or("")
    }
}

fn action_str(action: CustodyAction) -> &'static str {
    match action {
        CustodyAction::Collected => "collected",
        CustodyAction::Transferred => "transferred",
        CustodyAction::Analyzed => "analyzed",
        CustodyAction::Stored => "stored",
        CustodyAction::Presented => "presented",
        CustodyAction::Returned => "returned",
        CustodyAction::Destroyed => "destroyed",
    }
}

/// Durable, tamper-evident evidence storage. Only this type may
/// create/move/delete evidence files; every other component reaches
/// bytes through `get`, which records the access.
pub struct EvidenceVault<T: StorageBackend> {
    index: RecordCollection<T>,
    root: PathBuf,
    backup_root: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl<T: StorageBackend> EvidenceVault<T> {
    pub fn new(backend: T, root: impl Into<PathBuf>, backup_root: Option<PathBuf>) -> Self {
        EvidenceVault {
            index: RecordCollection::new(backend, "evidence:"),
            root: root.into(),
            backup_root,
            write_lock: Mutex::new(()),
        }
    }

    fn path_for(&self, id: &Uuid) -> PathBuf {
        let id_str = id.to_string();
        let prefix: String = id_str.chars().take(2).collect();
        self.root.join(prefix).join(format!("{}.evidence", id_str))
    }

    /// Store new evidence bytes under a content-addressed path, seed the
    /// custody chain with a `collected` entry, and write the index row —
    /// atomically: on any failure, no partial state (file without index,
    /// or vice versa) is left behind.
    pub async fn put(
        &self,
        case_id: Uuid,
        bytes: &[u8],
        evidence_type: impl Into<String>,
        source_description: impl Into<String>,
        collector: impl Into<String>,
        metadata: HashMap<String, String>,
    ) -> Result<(Uuid, String), EvidenceError> {
        let _guard = self.write_lock.lock().await;
        let id = Uuid::new_v4();
        let digest = evidence_digest(bytes);
        let path = self.path_for(&id);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let write_result = tokio::fs::write(&path, bytes).await;
        if let Err(e) = write_result {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(EvidenceError::Io(e));
        }

        let now = Utc::now();
        let genesis = CustodyEntry {
            actor: collector.into(),
            action: CustodyAction::Collected,
            timestamp: now,
            location: "vault".to_string(),
            notes: "initial collection".to_string(),
            entry_hash: String::new(),
            prev_hash: String::new(),
        };
        let genesis_hash = custody_entry_hash(
            &genesis.actor,
            action_str(genesis.action),
            &genesis.location,
            &genesis.notes,
            &genesis.timestamp.to_rfc3339(),
            "",
        );
        let genesis = CustodyEntry { entry_hash: genesis_hash, ..genesis };

        let item = EvidenceItem {
            id,
            case_id,
            evidence_type: evidence_type.into(),
            source_description: source_description.into(),
            collector: genesis.actor.clone(),
            digest: digest.clone(),
            size: bytes.len() as u64,
            integrity_status: IntegrityStatus::Verified,
            custody_chain: vec![genesis],
            access_log: Vec::new(),
            metadata,
            storage_pointer: path.to_string_lossy().to_string(),
            backups: Vec::new(),
            created_date: now,
            last_updated: now,
        };

        if let Err(e) = self.index.put(&id, &item).await {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e.into());
        }

        Ok((id, digest))
    }

    /// Fetch bytes for an evidence item, recording the access in its
    /// operational audit trail (distinct from the legal custody ledger).
    pub async fn get(&self, evidence_id: &Uuid, actor: &str, caller_ip: Option<String>) -> Result<Vec<u8>, EvidenceError> {
        let mut item = self.index.get::<EvidenceItem>(evidence_id).await?.ok_or(EvidenceError::NotFound(*evidence_id))?;
        let bytes = tokio::fs::read(&item.storage_pointer).await?;

        item.access_log.push(AccessLogEntry {
            actor: actor.to_string(),
            action: "get".to_string(),
            timestamp: Utc::now(),
            caller_ip,
        });
        self.index.put(evidence_id, &item).await?;
        Ok(bytes)
    }

    /// Re-hash stored bytes and compare against the recorded digest,
    /// updating and persisting the integrity status.
    pub async fn verify(&self, evidence_id: &Uuid) -> Result<IntegrityStatus, EvidenceError> {
        let mut item = self.index.get::<EvidenceItem>(evidence_id).await?.ok_or(EvidenceError::NotFound(*evidence_id))?;

        let status = match tokio::fs::read(&item.storage_pointer).await {
            Ok(bytes) => {
                let recomputed = evidence_digest(&bytes);
                if recomputed == item.digest {
                    IntegrityStatus::Verified
                } else {
                    IntegrityStatus::Tampered
                }
            }
            Err(_) => IntegrityStatus::Corrupted,
        };

        item.integrity_status = status;
        item.last_updated = Utc::now();
        self.index.put(evidence_id, &item).await?;
        Ok(status)
    }

    /// Copy the evidence file to a backup destination and append to the
    /// backup list. Backup failures do not invalidate the primary copy.
    pub async fn backup(&self, evidence_id: &Uuid, destination: Option<PathBuf>) -> Result<(), EvidenceError> {
        let mut item = self.index.get::<EvidenceItem>(evidence_id).await?.ok_or(EvidenceError::NotFound(*evidence_id))?;
        let dest_root = destination.or_else(|| self.backup_root.clone());
        let Some(dest_root) = dest_root else { return Ok(()) };

        let dest = dest_root.join(format!("{}.evidence", evidence_id));
        if let Some(parent) = dest.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        if tokio::fs::copy(&item.storage_pointer, &dest).await.is_ok() {
            item.backups.push(dest.to_string_lossy().to_string());
            self.index.put(evidence_id, &item).await?;
        }
        Ok(())
    }

    /// Append a chain-of-custody entry. Rejected if `prev_hash` does not
    /// match the current head, per §4.5.
    pub async fn append_custody(
        &self,
        evidence_id: &Uuid,
        actor: impl Into<String>,
        action: CustodyAction,
        location: impl Into<String>,
        notes: impl Into<String>,
        prev_hash: &str,
    ) -> Result<CustodyEntry, EvidenceError> {
        let mut item = self.index.get::<EvidenceItem>(evidence_id).await?.ok_or(EvidenceError::NotFound(*evidence_id))?;
        if item.custody_head_hash() != prev_hash {
            return Err(EvidenceError::CustodyMismatch);
        }

        let actor = actor.into();
        let location = location.into();
        let notes = notes.into();
        let timestamp = Utc::now();
        let entry_hash = custody_entry_hash(&actor, action_str(action), &location, &notes, &timestamp.to_rfc3339(), prev_hash);

        let entry = CustodyEntry {
            actor,
            action,
            timestamp,
            location,
            notes,
            entry_hash,
            prev_hash: prev_hash.to_string(),
        };
        item.custody_chain.push(entry.clone());
        item.last_updated = Utc::now();
        self.index.put(evidence_id, &item).await?;
        Ok(entry)
    }

    pub async fn get_custody(&self, evidence_id: &Uuid) -> Result<Vec<CustodyEntry>, EvidenceError> {
        let item = self.index.get::<EvidenceItem>(evidence_id).await?.ok_or(EvidenceError::NotFound(*evidence_id))?;
        Ok(item.custody_chain)
    }

    /// Recompute entry hashes from genesis and compare against the
    /// stored head hash — the tamper-evidence check from Testable
    /// Property 2.
    pub async fn verify_custody_chain(&self, evidence_id: &Uuid) -> Result<bool, EvidenceError> {
        let chain = self.get_custody(evidence_id).await?;
        let mut prev = String::new();
        for entry in &chain {
            let expected = custody_entry_hash(&entry.actor, action_str(entry.action), &entry.location, &entry.notes, &entry.timestamp.to_rfc3339(), &prev);
            if expected != entry.entry_hash || entry.prev_hash != prev {
                return Ok(false);
            }
            prev = entry.entry_hash.clone();
        }
        Ok(true)
    }

    pub async fn get_item(&self, evidence_id: &Uuid) -> Result<Option<EvidenceItem>, EvidenceError> {
        Ok(self.index.get(evidence_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::MemoryStorage;
    use tempfile::tempdir;

    fn vault(root: PathBuf) -> EvidenceVault<MemoryStorage> {
        EvidenceVault::new(MemoryStorage::new(), root, None)
    }

    #[tokio::test]
    async fn test_put_then_verify_clean_bytes() {
        let dir = tempdir().unwrap();
        let vault = vault(dir.path().to_path_buf());
        let case_id = Uuid::new_v4();

        let (id, digest) = vault
            .put(case_id, b"hello", "document", "initial upload", "investigator-a", HashMap::new())
            .await
            .unwrap();

        assert_eq!(digest, crypto_primitives::evidence_digest(b"hello"));
        let status = vault.verify(&id).await.unwrap();
        assert_eq!(status, IntegrityStatus::Verified);
    }

    #[tokio::test]
    async fn test_verify_detects_tampering() {
        let dir = tempdir().unwrap();
        let vault = vault(dir.path().to_path_buf());
        let case_id = Uuid::new_v4();

        let (id, _digest) = vault
            .put(case_id, b"hello", "document", "initial upload", "investigator-a", HashMap::new())
            .await
            .unwrap();

        let item = vault.get_item(&id).await.unwrap().unwrap();
        tokio::fs::write(&item.storage_pointer, b"goodbye").await.unwrap();

        let status = vault.verify(&id).await.unwrap();
        assert_eq!(status, IntegrityStatus::Tampered);
    }

    #[tokio::test]
    async fn test_custody_append_rejects_stale_prev_hash() {
        let dir = tempdir().unwrap();
        let vault = vault(dir.path().to_path_buf());
        let case_id = Uuid::new_v4();
        let (id, _) = vault
            .put(case_id, b"hello", "document", "upload", "investigator-a", HashMap::new())
            .await
            .unwrap();

        let genesis_hash = vault.get_custody(&id).await.unwrap()[0].entry_hash.clone();
        vault
            .append_custody(&id, "investigator-b", CustodyAction::Transferred, "lab", "chain of custody transfer", &genesis_hash)
            .await
            .unwrap();

        let stale = vault
            .append_custody(&id, "investigator-c", CustodyAction::Analyzed, "lab", "duplicate append attempt", &genesis_hash)
            .await;
        assert!(matches!(stale, Err(EvidenceError::CustodyMismatch)));
    }

    #[tokio::test]
    async fn test_custody_chain_verifies_from_genesis() {
        let dir = tempdir().unwrap();
        let vault = vault(dir.path().to_path_buf());
        let case_id = Uuid::new_v4();
        let (id, _) = vault
            .put(case_id, b"hello", "document", "upload", "investigator-a", HashMap::new())
            .await
            .unwrap();

        let genesis_hash = vault.get_custody(&id).await.unwrap()[0].entry_hash.clone();
        vault
            .append_custody(&id, "investigator-b", CustodyAction::Transferred, "lab", "transfer", &genesis_hash)
            .await
            .unwrap();

        assert!(vault.verify_custody_chain(&id).await.unwrap());
    }
}
