//! Replay protection for inbound cross-chain packets (spec §4.8).
//!
//! Nonces are scoped per `(channel, sender)`. Inbound nonces must strictly
//! increase and fall within `[now - nonce_ttl_seconds, now + FUTURE_TOLERANCE_SECONDS]`;
//! anything else is rejected before it reaches packet handling.

use crate::error::{OracleError, OracleResult};
use crate::store::{keys, Store};
use crate::types::NonceRecord;

/// Clock-skew allowance for packets claiming a timestamp slightly ahead of
/// this replica's view of `now` (spec §4.8 edge case).
pub const FUTURE_TOLERANCE_SECONDS: i64 = 300;

/// Bound on how many stale nonce records `prune_expired` clears in one call,
/// so `EndBlock` never does unbounded work off a backlog.
pub const MAX_PRUNE_PER_CALL: usize = 100;

fn get_record(store: &impl Store, key: &[u8]) -> NonceRecord {
    store.get(key).map(|b| serde_json::from_slice(&b).expect("nonce decode")).unwrap_or_default()
}

fn put_record(store: &mut impl Store, key: &[u8], record: &NonceRecord) {
    store.put(key.to_vec(), serde_json::to_vec(record).expect("nonce encode"));
}

/// Validates and, on success, advances the inbound nonce record for
/// `(channel, sender)`.
pub fn validate_inbound(
    store: &mut impl Store,
    channel: &str,
    sender: &str,
    nonce: u64,
    timestamp: i64,
    now: i64,
    ttl_seconds: i64,
) -> OracleResult<()> {
    if nonce == 0 {
        return Err(OracleError::BadNonce("nonce 0 is reserved".to_string()));
    }
    if timestamp < now - ttl_seconds {
        return Err(OracleError::TooOld { timestamp, floor: now - ttl_seconds });
    }
    if timestamp > now + FUTURE_TOLERANCE_SECONDS {
        return Err(OracleError::TooFarInFuture { timestamp, ceiling: now + FUTURE_TOLERANCE_SECONDS });
    }

    let key = keys::nonce_in(channel, sender);
    let mut record = get_record(store, &key);
    if nonce <= record.last_nonce {
        return Err(OracleError::ReplayAttack {
            channel: crate::types::ChannelId(channel.to_string()),
            sender: sender.to_string(),
            nonce,
            last_seen: record.last_nonce,
        });
    }

    record.last_nonce = nonce;
    record.last_timestamp = timestamp;
    put_record(store, &key, &record);
    Ok(())
}

/// Returns the next outbound nonce for `(channel, sender)`, advancing the
/// stored counter.
pub fn next_outbound(store: &mut impl Store, channel: &str, sender: &str) -> u64 {
    let key = keys::nonce_out(channel, sender);
    let mut record = get_record(store, &key);
    record.last_nonce += 1;
    put_record(store, &key, &record);
    record.last_nonce
}

/// Clears inbound nonce records that haven't been touched in over
/// `ttl_seconds`, capped at [`MAX_PRUNE_PER_CALL`] deletions.
pub fn prune_expired(store: &mut impl Store, now: i64, ttl_seconds: i64) -> usize {
    let stale: Vec<Vec<u8>> = store
        .iter_prefix(keys::NONCE_IN)
        .filter(|(_, v)| {
            let record: NonceRecord = serde_json::from_slice(v).expect("nonce decode");
            record.last_timestamp < now - ttl_seconds
        })
        .map(|(k, _)| k)
        .take(MAX_PRUNE_PER_CALL)
        .collect();
    let count = stale.len();
    for key in stale {
        store.delete(&key);
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    #[test]
    fn sequential_nonces_are_accepted() {
        let mut store = MemStore::new();
        validate_inbound(&mut store, "channel-1", "chain-a", 1, 1000, 1000, 86_400).unwrap();
        validate_inbound(&mut store, "channel-1", "chain-a", 2, 1001, 1001, 86_400).unwrap();
    }

    #[test]
    fn replayed_nonce_is_rejected() {
        let mut store = MemStore::new();
        validate_inbound(&mut store, "channel-1", "chain-a", 5, 1000, 1000, 86_400).unwrap();
        let res = validate_inbound(&mut store, "channel-1", "chain-a", 5, 1001, 1001, 86_400);
        assert!(matches!(res, Err(OracleError::ReplayAttack { .. })));
        let res2 = validate_inbound(&mut store, "channel-1", "chain-a", 3, 1001, 1001, 86_400);
        assert!(matches!(res2, Err(OracleError::ReplayAttack { .. })));
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let mut store = MemStore::new();
        let res = validate_inbound(&mut store, "channel-1", "chain-a", 1, 0, 100_000, 86_400);
        assert!(matches!(res, Err(OracleError::TooOld { .. })));
    }

    #[test]
    fn future_timestamp_beyond_tolerance_is_rejected() {
        let mut store = MemStore::new();
        let res = validate_inbound(&mut store, "channel-1", "chain-a", 1, 10_000, 1000, 86_400);
        assert!(matches!(res, Err(OracleError::TooFarInFuture { .. })));
    }

    #[test]
    fn channels_have_independent_nonce_spaces() {
        let mut store = MemStore::new();
        validate_inbound(&mut store, "channel-1", "chain-a", 1, 1000, 1000, 86_400).unwrap();
        validate_inbound(&mut store, "channel-2", "chain-a", 1, 1000, 1000, 86_400).unwrap();
    }

    #[test]
    fn outbound_nonces_are_monotone_per_channel() {
        let mut store = MemStore::new();
        assert_eq!(next_outbound(&mut store, "channel-1", "oracle"), 1);
        assert_eq!(next_outbound(&mut store, "channel-1", "oracle"), 2);
        assert_eq!(next_outbound(&mut store, "channel-2", "oracle"), 1);
    }

    #[test]
    fn prune_clears_only_stale_records() {
        let mut store = MemStore::new();
        validate_inbound(&mut store, "channel-1", "old", 1, 0, 0, 86_400).unwrap();
        validate_inbound(&mut store, "channel-1", "fresh", 1, 100_000, 100_000, 86_400).unwrap();
        let pruned = prune_expired(&mut store, 200_000, 86_400);
        assert_eq!(pruned, 1);
        assert!(store.get(&keys::nonce_in("channel-1", "old")).is_none());
        assert!(store.get(&keys::nonce_in("channel-1", "fresh")).is_some());
    }
}
