//! The ledger proper: serialized appends, durable JSONL sink, checkpoints.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use reunite_core::config::LedgerParams;
use reunite_core::types::{AuditEvent, Hash256};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::chain::{event_hash, verify_slice, ChainStatus, GENESIS_HASH};

const LEDGER_FILE: &str = "ledger.jsonl";
const CHECKPOINT_FILE: &str = "checkpoint.json";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ledger row parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("audit chain broken at event {0}")]
    BrokenChain(u64),
    #[error("export range {from}..{to} is invalid")]
    InvalidRange { from: u64, to: u64 },
}

/// Checkpoint snapshot bounding replay verification after restart.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Checkpoint {
    next_event_id: u64,
    last_hash: Hash256,
}

struct Sink {
    writer: BufWriter<File>,
    dir: PathBuf,
}

struct Inner {
    events: Vec<AuditEvent>,
    last_hash: Hash256,
    next_event_id: u64,
    sink: Option<Sink>,
    appends_since_checkpoint: u64,
}

/// Append-only audit ledger. Append is the only mutation; there is no update
/// or delete path. A single writer is serialized through the interior mutex.
pub struct AuditLedger {
    inner: Mutex<Inner>,
    params: LedgerParams,
}

impl AuditLedger {
    /// In-memory ledger, for tests and ephemeral deployments.
    pub fn in_memory(params: LedgerParams) -> Self {
        Self {
            inner: Mutex::new(Inner {
                events: Vec::new(),
                last_hash: GENESIS_HASH,
                next_event_id: 0,
                sink: None,
                appends_since_checkpoint: 0,
            }),
            params,
        }
    }

    /// Open (or create) a file-backed ledger in `dir`.
    ///
    /// Existing rows are replayed; chain verification restarts from the last
    /// checkpoint so replay cost is bounded by the checkpoint interval, not
    /// the ledger length.
    pub fn open(dir: &Path, params: LedgerParams) -> Result<Self, LedgerError> {
        std::fs::create_dir_all(dir)?;
        let ledger_path = dir.join(LEDGER_FILE);

        let mut events = Vec::new();
        if ledger_path.exists() {
            let reader = BufReader::new(File::open(&ledger_path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                events.push(serde_json::from_str::<AuditEvent>(&line)?);
            }
        }

        let checkpoint = read_checkpoint(dir)?;
        if let Some(cp) = &checkpoint {
            // The checkpoint anchors both the minimum ledger length and the
            // hash at that point; a file replaying short of it has lost rows.
            let replayed_next = events.last().map(|e| e.event_id + 1).unwrap_or(0);
            if replayed_next < cp.next_event_id {
                return Err(LedgerError::BrokenChain(replayed_next));
            }
            if cp.next_event_id > 0 {
                let anchored = events
                    .iter()
                    .find(|e| e.event_id + 1 == cp.next_event_id)
                    .map(|e| e.event_hash);
                if anchored != Some(cp.last_hash) {
                    return Err(LedgerError::BrokenChain(cp.next_event_id - 1));
                }
            }
        }
        let (verify_from, trusted_prior) = match checkpoint {
            Some(cp) => {
                let idx = events
                    .iter()
                    .position(|e| e.event_id >= cp.next_event_id)
                    .unwrap_or(events.len());
                (idx, cp.last_hash)
            }
            None => (0, GENESIS_HASH),
        };

        if let ChainStatus::BrokenAt(id) = verify_slice(&events[verify_from..], trusted_prior) {
            return Err(LedgerError::BrokenChain(id));
        }

        let (last_hash, next_event_id) = match events.last() {
            Some(e) => (e.event_hash, e.event_id + 1),
            None => (GENESIS_HASH, 0),
        };

        let writer = BufWriter::new(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&ledger_path)?,
        );

        info!(
            dir = %dir.display(),
            replayed = events.len(),
            next_event_id,
            "opened audit ledger"
        );

        Ok(Self {
            inner: Mutex::new(Inner {
                events,
                last_hash,
                next_event_id,
                sink: Some(Sink {
                    writer,
                    dir: dir.to_path_buf(),
                }),
                appends_since_checkpoint: 0,
            }),
            params,
        })
    }

    /// Append one event and return its id.
    ///
    /// The row is written and synced to the sink before the in-memory state
    /// advances and the id is returned; an acknowledged append is durable.
    pub fn append(
        &self,
        actor: &str,
        action: &str,
        resource_ref: &str,
    ) -> Result<u64, LedgerError> {
        let mut inner = self.inner.lock().expect("ledger mutex poisoned");

        let mut event = AuditEvent {
            event_id: inner.next_event_id,
            actor: actor.to_string(),
            action: action.to_string(),
            resource_ref: resource_ref.to_string(),
            timestamp: Utc::now(),
            prior_event_hash: inner.last_hash,
            event_hash: GENESIS_HASH,
        };
        event.event_hash = event_hash(&event);

        if let Some(sink) = inner.sink.as_mut() {
            let row = serde_json::to_string(&event)?;
            sink.writer.write_all(row.as_bytes())?;
            sink.writer.write_all(b"\n")?;
            sink.writer.flush()?;
            sink.writer.get_ref().sync_data()?;
        }

        let id = event.event_id;
        inner.last_hash = event.event_hash;
        inner.next_event_id += 1;
        inner.appends_since_checkpoint += 1;
        inner.events.push(event);

        if inner.appends_since_checkpoint >= self.params.checkpoint_interval {
            if let Some(sink) = inner.sink.as_ref() {
                let cp = Checkpoint {
                    next_event_id: inner.next_event_id,
                    last_hash: inner.last_hash,
                };
                if let Err(e) = write_checkpoint(&sink.dir, &cp) {
                    // Checkpoints only bound restart replay; a failed write is
                    // retried on the next interval.
                    warn!(error = %e, "audit checkpoint write failed");
                }
            }
            inner.appends_since_checkpoint = 0;
        }

        Ok(id)
    }

    /// Recompute and verify the hash chain over `[from, to)`.
    pub fn verify_chain(&self, from: u64, to: u64) -> ChainStatus {
        let inner = self.inner.lock().expect("ledger mutex poisoned");
        let events: Vec<AuditEvent> = inner
            .events
            .iter()
            .filter(|e| e.event_id >= from && e.event_id < to)
            .cloned()
            .collect();

        let trusted_prior = match events.first() {
            Some(first) => first.prior_event_hash,
            None => return ChainStatus::Valid,
        };
        // The opening link is trusted to the caller's range start; everything
        // inside the range is recomputed.
        verify_slice(&events, trusted_prior)
    }

    /// Verify the whole ledger from genesis.
    pub fn verify_full(&self) -> ChainStatus {
        let inner = self.inner.lock().expect("ledger mutex poisoned");
        verify_slice(&inner.events, GENESIS_HASH)
    }

    /// Read-only export of `[from, to)` for the compliance collaborator.
    pub fn export_range(&self, from: u64, to: u64) -> Result<Vec<AuditEvent>, LedgerError> {
        if from > to {
            return Err(LedgerError::InvalidRange { from, to });
        }
        let inner = self.inner.lock().expect("ledger mutex poisoned");
        Ok(inner
            .events
            .iter()
            .filter(|e| e.event_id >= from && e.event_id < to)
            .cloned()
            .collect())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("ledger mutex poisoned").events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn next_event_id(&self) -> u64 {
        self.inner
            .lock()
            .expect("ledger mutex poisoned")
            .next_event_id
    }
}

fn read_checkpoint(dir: &Path) -> Result<Option<Checkpoint>, LedgerError> {
    let path = dir.join(CHECKPOINT_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path)?;
    Ok(Some(serde_json::from_str(&raw)?))
}

fn write_checkpoint(dir: &Path, cp: &Checkpoint) -> Result<(), LedgerError> {
    let tmp = dir.join(format!("{CHECKPOINT_FILE}.tmp"));
    let path = dir.join(CHECKPOINT_FILE);
    std::fs::write(&tmp, serde_json::to_string(cp)?)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_assigns_monotonic_ids() {
        let ledger = AuditLedger::in_memory(LedgerParams::default());
        for expected in 0..5 {
            let id = ledger.append("gate", "access_decision", "case:C1").unwrap();
            assert_eq!(id, expected);
        }
        assert_eq!(ledger.len(), 5);
    }

    #[test]
    fn full_chain_valid_after_appends() {
        let ledger = AuditLedger::in_memory(LedgerParams::default());
        for i in 0..20 {
            ledger
                .append("resolver", "match_query", &format!("query:{i}"))
                .unwrap();
        }
        assert_eq!(ledger.verify_full(), ChainStatus::Valid);
        assert_eq!(ledger.verify_chain(5, 15), ChainStatus::Valid);
    }

    #[test]
    fn export_range_is_half_open() {
        let ledger = AuditLedger::in_memory(LedgerParams::default());
        for i in 0..10 {
            ledger.append("a", "b", &format!("r{i}")).unwrap();
        }
        let events = ledger.export_range(2, 5).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_id, 2);
        assert_eq!(events[2].event_id, 4);
    }

    #[test]
    fn invalid_export_range_rejected() {
        let ledger = AuditLedger::in_memory(LedgerParams::default());
        assert!(matches!(
            ledger.export_range(5, 2),
            Err(LedgerError::InvalidRange { .. })
        ));
    }

    #[test]
    fn file_backed_ledger_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let ledger = AuditLedger::open(tmp.path(), LedgerParams::default()).unwrap();
            for i in 0..8 {
                ledger.append("gate", "access_decision", &format!("r{i}")).unwrap();
            }
        }
        let reopened = AuditLedger::open(tmp.path(), LedgerParams::default()).unwrap();
        assert_eq!(reopened.len(), 8);
        assert_eq!(reopened.verify_full(), ChainStatus::Valid);
        let id = reopened.append("gate", "access_decision", "r8").unwrap();
        assert_eq!(id, 8);
    }

    #[test]
    fn tampered_row_detected_on_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let ledger = AuditLedger::open(tmp.path(), LedgerParams::default()).unwrap();
            for i in 0..4 {
                ledger.append("gate", "access_decision", &format!("r{i}")).unwrap();
            }
        }
        let path = tmp.path().join(LEDGER_FILE);
        let tampered = std::fs::read_to_string(&path)
            .unwrap()
            .replace("r2", "r2-tampered");
        std::fs::write(&path, tampered).unwrap();

        match AuditLedger::open(tmp.path(), LedgerParams::default()) {
            Err(LedgerError::BrokenChain(2)) => {}
            Err(other) => panic!("expected BrokenChain(2), got {other}"),
            Ok(_) => panic!("tampered ledger reopened"),
        }
    }

    #[test]
    fn truncated_ledger_rejected_on_reopen() {
        let tmp = TempDir::new().unwrap();
        let params = LedgerParams {
            checkpoint_interval: 4,
        };
        {
            let ledger = AuditLedger::open(tmp.path(), params).unwrap();
            for i in 0..8 {
                ledger.append("gate", "access_decision", &format!("r{i}")).unwrap();
            }
        }
        // Delete the trailing rows; the checkpoint still expects 8 events.
        let path = tmp.path().join(LEDGER_FILE);
        let kept: String = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .take(3)
            .map(|l| format!("{l}\n"))
            .collect();
        std::fs::write(&path, kept).unwrap();

        match AuditLedger::open(tmp.path(), params) {
            Err(LedgerError::BrokenChain(3)) => {}
            Err(other) => panic!("expected BrokenChain(3), got {other}"),
            Ok(_) => panic!("truncated ledger reopened"),
        }
    }

    #[test]
    fn checkpoint_written_at_interval() {
        let tmp = TempDir::new().unwrap();
        let params = LedgerParams {
            checkpoint_interval: 4,
        };
        let ledger = AuditLedger::open(tmp.path(), params).unwrap();
        for i in 0..9 {
            ledger.append("d", "dispatch", &format!("r{i}")).unwrap();
        }
        assert!(tmp.path().join(CHECKPOINT_FILE).exists());

        drop(ledger);
        let reopened = AuditLedger::open(tmp.path(), params).unwrap();
        assert_eq!(reopened.next_event_id(), 9);
    }
}
