//! Domain-separated hash chain over audit events.
//!
//! Preimage layout (big-endian integers, length-prefixed strings):
//!
//! ```text
//! event_hash = SHA256(
//!     b"REUNITE_AUDIT_EVENT_V1" ||
//!     U64_BE(event_id) ||
//!     ENC_STR(actor) || ENC_STR(action) || ENC_STR(resource_ref) ||
//!     ENC_STR(timestamp_rfc3339) ||
//!     prior_event_hash(32)
//! )
//! ```

use reunite_core::types::{AuditEvent, Hash256};
use sha2::{Digest, Sha256};

/// Domain prefix for audit event hashing.
const DOMAIN_AUDIT_EVENT: &[u8] = b"REUNITE_AUDIT_EVENT_V1";

/// Prior hash of the first event in a ledger.
pub const GENESIS_HASH: Hash256 = [0u8; 32];

/// Outcome of verifying a chain range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    Valid,
    /// First event at which the chain fails to verify: wrong hash, wrong
    /// prior link, or an event-id gap.
    BrokenAt(u64),
}

/// Encode a string as `U32_BE(len) || UTF8 bytes`.
fn encode_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u32).to_be_bytes());
    hasher.update(s.as_bytes());
}

/// Compute the chained hash for one event (over all fields except `event_hash`).
pub fn event_hash(event: &AuditEvent) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_AUDIT_EVENT);
    hasher.update(event.event_id.to_be_bytes());
    encode_str(&mut hasher, &event.actor);
    encode_str(&mut hasher, &event.action);
    encode_str(&mut hasher, &event.resource_ref);
    encode_str(&mut hasher, &event.timestamp.to_rfc3339());
    hasher.update(event.prior_event_hash);
    hasher.finalize().into()
}

/// Verify a contiguous slice of events against a trusted prior hash.
///
/// `trusted_prior` is [`GENESIS_HASH`] when the slice starts at the ledger
/// head, or a checkpointed hash otherwise.
pub fn verify_slice(events: &[AuditEvent], trusted_prior: Hash256) -> ChainStatus {
    let mut prior = trusted_prior;
    let mut expected_id: Option<u64> = None;

    for event in events {
        if let Some(id) = expected_id {
            if event.event_id != id {
                // A gap signals tampering.
                return ChainStatus::BrokenAt(event.event_id);
            }
        }
        if event.prior_event_hash != prior {
            return ChainStatus::BrokenAt(event.event_id);
        }
        if event_hash(event) != event.event_hash {
            return ChainStatus::BrokenAt(event.event_id);
        }
        prior = event.event_hash;
        expected_id = Some(event.event_id + 1);
    }
    ChainStatus::Valid
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_chain(n: u64) -> Vec<AuditEvent> {
        let mut events = Vec::new();
        let mut prior = GENESIS_HASH;
        for i in 0..n {
            let mut event = AuditEvent {
                event_id: i,
                actor: format!("actor-{i}"),
                action: "test".into(),
                resource_ref: format!("res-{i}"),
                timestamp: Utc::now(),
                prior_event_hash: prior,
                event_hash: GENESIS_HASH,
            };
            event.event_hash = event_hash(&event);
            prior = event.event_hash;
            events.push(event);
        }
        events
    }

    #[test]
    fn empty_slice_is_valid() {
        assert_eq!(verify_slice(&[], GENESIS_HASH), ChainStatus::Valid);
    }

    #[test]
    fn intact_chain_verifies() {
        let events = make_chain(10);
        assert_eq!(verify_slice(&events, GENESIS_HASH), ChainStatus::Valid);
    }

    #[test]
    fn corrupted_payload_breaks_at_corrupted_event() {
        let mut events = make_chain(10);
        events[4].action = "tampered".into();
        assert_eq!(verify_slice(&events, GENESIS_HASH), ChainStatus::BrokenAt(4));
    }

    #[test]
    fn rewritten_hash_breaks_at_successor_link() {
        let mut events = make_chain(10);
        // Recomputing the hash after tampering makes event 4 self-consistent,
        // but event 5's prior link no longer matches.
        events[4].action = "tampered".into();
        events[4].event_hash = event_hash(&events[4]);
        assert_eq!(verify_slice(&events, GENESIS_HASH), ChainStatus::BrokenAt(5));
    }

    #[test]
    fn id_gap_breaks_chain() {
        let mut events = make_chain(10);
        events.remove(3);
        assert_eq!(verify_slice(&events, GENESIS_HASH), ChainStatus::BrokenAt(4));
    }

    #[test]
    fn suffix_verifies_from_checkpointed_hash() {
        let events = make_chain(10);
        let checkpoint = events[4].event_hash;
        assert_eq!(verify_slice(&events[5..], checkpoint), ChainStatus::Valid);
    }
}
