//! Durable embedding store: encrypted-at-rest JSONL persistence.
//!
//! Records are immutable once written; re-embedding writes a fresh record
//! under a new id and `model_version`. Plaintext vectors exist only inside
//! the scope of a similarity computation or an authorized disclosure.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use reunite_core::types::{CaseId, EmbeddingRecord};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::crypto::{self, KeyManager};
use crate::error::IndexError;

const STORE_FILE: &str = "embeddings.jsonl";

/// Record metadata without any vector material.
#[derive(Debug, Clone)]
pub struct RecordMeta {
    pub id: Uuid,
    pub subject_case_id: CaseId,
    pub model_version: String,
    pub created_at: DateTime<Utc>,
}

/// Persisted row: metadata plus base64 ciphertext, never plaintext.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedRecord {
    id: Uuid,
    subject_case_id: CaseId,
    model_version: String,
    created_at: DateTime<Utc>,
    encryption_key_ref: String,
    ciphertext_b64: String,
}

struct Stored {
    meta: RecordMeta,
    encryption_key_ref: String,
    ciphertext: Vec<u8>,
}

struct Inner {
    records: HashMap<Uuid, Stored>,
    /// Insertion order, oldest first; tail is the recent-activity subset.
    order: Vec<Uuid>,
}

/// Encrypted-at-rest repository of biometric vectors.
pub struct EmbeddingStore {
    key_manager: Arc<dyn KeyManager>,
    dimension: usize,
    inner: RwLock<Inner>,
    sink: Option<Mutex<BufWriter<File>>>,
}

impl EmbeddingStore {
    pub fn in_memory(dimension: usize, key_manager: Arc<dyn KeyManager>) -> Self {
        Self {
            key_manager,
            dimension,
            inner: RwLock::new(Inner {
                records: HashMap::new(),
                order: Vec::new(),
            }),
            sink: None,
        }
    }

    /// Open (or create) a file-backed store in `dir`, replaying existing rows.
    pub fn open(
        dir: &Path,
        dimension: usize,
        key_manager: Arc<dyn KeyManager>,
    ) -> Result<Self, IndexError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(STORE_FILE);

        let mut records = HashMap::new();
        let mut order = Vec::new();
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let row: PersistedRecord = serde_json::from_str(&line)?;
                let ciphertext = BASE64
                    .decode(&row.ciphertext_b64)
                    .map_err(|_| IndexError::DecryptFailed(row.id))?;
                order.push(row.id);
                records.insert(
                    row.id,
                    Stored {
                        meta: RecordMeta {
                            id: row.id,
                            subject_case_id: row.subject_case_id,
                            model_version: row.model_version,
                            created_at: row.created_at,
                        },
                        encryption_key_ref: row.encryption_key_ref,
                        ciphertext,
                    },
                );
            }
        }

        let writer = BufWriter::new(OpenOptions::new().create(true).append(true).open(&path)?);

        info!(
            dir = %dir.display(),
            records = records.len(),
            dimension,
            "opened embedding store"
        );

        Ok(Self {
            key_manager,
            dimension,
            inner: RwLock::new(Inner { records, order }),
            sink: Some(Mutex::new(writer)),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("store lock poisoned").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist a new record. The row is durable before this returns; the
    /// similarity index links the record only after a successful insert here.
    pub fn insert(&self, record: &EmbeddingRecord) -> Result<(), IndexError> {
        if record.vector.len() != self.dimension {
            return Err(IndexError::InvalidVectorDimension {
                expected: self.dimension,
                got: record.vector.len(),
            });
        }
        {
            let inner = self.inner.read().expect("store lock poisoned");
            if inner.records.contains_key(&record.id) {
                return Err(IndexError::DuplicateRecord(record.id));
            }
        }

        let key = self.key_manager.resolve(&record.encryption_key_ref)?;
        let aad = crypto::record_aad(&record.id, &record.subject_case_id, &record.model_version);
        let ciphertext = crypto::encrypt_vector(&key, &aad, &record.vector)?;

        if let Some(sink) = &self.sink {
            let row = PersistedRecord {
                id: record.id,
                subject_case_id: record.subject_case_id.clone(),
                model_version: record.model_version.clone(),
                created_at: record.created_at,
                encryption_key_ref: record.encryption_key_ref.clone(),
                ciphertext_b64: BASE64.encode(&ciphertext),
            };
            let mut writer = sink.lock().expect("store sink poisoned");
            let line = serde_json::to_string(&row)?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }

        let mut inner = self.inner.write().expect("store lock poisoned");
        inner.order.push(record.id);
        inner.records.insert(
            record.id,
            Stored {
                meta: RecordMeta {
                    id: record.id,
                    subject_case_id: record.subject_case_id.clone(),
                    model_version: record.model_version.clone(),
                    created_at: record.created_at,
                },
                encryption_key_ref: record.encryption_key_ref.clone(),
                ciphertext,
            },
        );
        Ok(())
    }

    /// Transiently decrypt one vector for a similarity computation or an
    /// authorized disclosure. Callers must not retain the plaintext.
    pub fn decrypt_vector(&self, id: &Uuid) -> Result<Vec<f32>, IndexError> {
        let inner = self.inner.read().expect("store lock poisoned");
        let stored = inner.records.get(id).ok_or(IndexError::UnknownRecord(*id))?;
        let key = self.key_manager.resolve(&stored.encryption_key_ref)?;
        let aad = crypto::record_aad(
            &stored.meta.id,
            &stored.meta.subject_case_id,
            &stored.meta.model_version,
        );
        crypto::decrypt_vector(&key, &aad, id, &stored.ciphertext)
    }

    pub fn meta(&self, id: &Uuid) -> Option<RecordMeta> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .records
            .get(id)
            .map(|s| s.meta.clone())
    }

    /// The `window` most recently inserted record ids, oldest first.
    pub fn recent_ids(&self, window: usize) -> Vec<Uuid> {
        let inner = self.inner.read().expect("store lock poisoned");
        let start = inner.order.len().saturating_sub(window);
        inner.order[start..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{generate_key, StaticKeyManager};
    use tempfile::TempDir;

    fn record(case: &str, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            id: Uuid::new_v4(),
            subject_case_id: CaseId::new(case),
            vector,
            model_version: "facenet-v3".into(),
            created_at: Utc::now(),
            encryption_key_ref: "kms:primary".into(),
        }
    }

    fn store(dimension: usize) -> EmbeddingStore {
        let manager = Arc::new(StaticKeyManager::with_key("kms:primary", generate_key()));
        EmbeddingStore::in_memory(dimension, manager)
    }

    #[test]
    fn insert_and_decrypt_roundtrip() {
        let store = store(4);
        let rec = record("C1", vec![0.1, 0.2, 0.3, 0.4]);
        store.insert(&rec).unwrap();

        let vector = store.decrypt_vector(&rec.id).unwrap();
        assert_eq!(vector, rec.vector);

        let meta = store.meta(&rec.id).unwrap();
        assert_eq!(meta.subject_case_id, CaseId::new("C1"));
    }

    #[test]
    fn wrong_dimension_rejected() {
        let store = store(4);
        let rec = record("C1", vec![0.1, 0.2]);
        assert!(matches!(
            store.insert(&rec),
            Err(IndexError::InvalidVectorDimension { expected: 4, got: 2 })
        ));
    }

    #[test]
    fn duplicate_id_rejected() {
        let store = store(2);
        let rec = record("C1", vec![0.1, 0.2]);
        store.insert(&rec).unwrap();
        assert!(matches!(
            store.insert(&rec),
            Err(IndexError::DuplicateRecord(_))
        ));
    }

    #[test]
    fn unknown_key_ref_rejected() {
        let store = store(2);
        let mut rec = record("C1", vec![0.1, 0.2]);
        rec.encryption_key_ref = "kms:absent".into();
        assert!(matches!(
            store.insert(&rec),
            Err(IndexError::UnknownKeyRef(_))
        ));
    }

    #[test]
    fn recent_ids_window() {
        let store = store(1);
        let mut ids = Vec::new();
        for i in 0..5 {
            let rec = record(&format!("C{i}"), vec![i as f32]);
            ids.push(rec.id);
            store.insert(&rec).unwrap();
        }
        assert_eq!(store.recent_ids(2), ids[3..].to_vec());
        assert_eq!(store.recent_ids(100).len(), 5);
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let key = generate_key();
        let rec = record("C1", vec![1.0, 2.0, 3.0]);
        {
            let manager = Arc::new(StaticKeyManager::with_key("kms:primary", key));
            let store = EmbeddingStore::open(tmp.path(), 3, manager).unwrap();
            store.insert(&rec).unwrap();
        }
        let manager = Arc::new(StaticKeyManager::with_key("kms:primary", key));
        let store = EmbeddingStore::open(tmp.path(), 3, manager).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.decrypt_vector(&rec.id).unwrap(), rec.vector);
    }

    #[test]
    fn persisted_rows_contain_no_plaintext_vector() {
        let tmp = TempDir::new().unwrap();
        let manager = Arc::new(StaticKeyManager::with_key("kms:primary", generate_key()));
        let store = EmbeddingStore::open(tmp.path(), 2, manager).unwrap();
        store.insert(&record("C1", vec![7.75, -3.5])).unwrap();
        drop(store);

        let raw = std::fs::read_to_string(tmp.path().join(STORE_FILE)).unwrap();
        assert!(raw.contains("ciphertext_b64"));
        assert!(!raw.contains("7.75"));
    }
}
