//! Byte-keyed ordered KV-store abstraction (spec §2 component 1).
//!
//! Every other component reads and writes through a [`Store`]. Keys are raw
//! bytes; iteration is always lexicographic, which is what gives the engine
//! cross-replica determinism (spec §5). [`MemStore`] is the reference,
//! in-memory implementation used by every test in this crate; a host
//! embedding this core against a real chain backs the same trait with its own
//! transactional store.

use std::collections::BTreeMap;
use std::ops::Bound;

/// Ordered byte-keyed store with prefix iteration and scoped checkpoints.
pub trait Store {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>);
    fn delete(&mut self, key: &[u8]);

    /// Ascending iteration over every key starting with `prefix`.
    fn iter_prefix(&self, prefix: &[u8]) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_>;
}

/// Reference KV-store: an ordered map with scoped checkpoints for
/// all-or-nothing message handling (spec §5).
#[derive(Debug, Default, Clone)]
pub struct MemStore {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemStore {
    pub fn new() -> Self {
        MemStore::default()
    }

    /// Opens a checkpoint: writes made through it are buffered until
    /// [`Checkpoint::commit`] is called, and thrown away on drop otherwise.
    pub fn checkpoint(&mut self) -> Checkpoint<'_> {
        Checkpoint { base: self, writes: BTreeMap::new(), deletes: Default::default() }
    }
}

impl Store for MemStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.get(key).cloned()
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.data.insert(key, value);
    }

    fn delete(&mut self, key: &[u8]) {
        self.data.remove(key);
    }

    fn iter_prefix(&self, prefix: &[u8]) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_> {
        let start = Bound::Included(prefix.to_vec());
        let end = upper_bound(prefix);
        Box::new(
            self.data
                .range((start, end))
                .map(|(k, v)| (k.clone(), v.clone())),
        )
    }
}

fn upper_bound(prefix: &[u8]) -> Bound<Vec<u8>> {
    let mut end = prefix.to_vec();
    for i in (0..end.len()).rev() {
        if end[i] != 0xff {
            end[i] += 1;
            end.truncate(i + 1);
            return Bound::Excluded(end);
        }
    }
    Bound::Unbounded
}

/// A scoped, rollback-capable view over a [`MemStore`]. Reads fall through to
/// the base store for keys not yet touched in this checkpoint; writes and
/// deletes are buffered until [`commit`](Checkpoint::commit).
pub struct Checkpoint<'a> {
    base: &'a mut MemStore,
    writes: BTreeMap<Vec<u8>, Vec<u8>>,
    deletes: std::collections::BTreeSet<Vec<u8>>,
}

impl<'a> Checkpoint<'a> {
    pub fn commit(self) {
        let Checkpoint { base, writes, deletes } = self;
        for key in deletes {
            base.data.remove(&key);
        }
        for (key, value) in writes {
            base.data.insert(key, value);
        }
    }

    /// Explicit discard, equivalent to dropping the checkpoint.
    pub fn discard(self) {}
}

impl<'a> Store for Checkpoint<'a> {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        if self.deletes.contains(key) {
            return None;
        }
        self.writes.get(key).cloned().or_else(|| self.base.get(key))
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.deletes.remove(&key);
        self.writes.insert(key, value);
    }

    fn delete(&mut self, key: &[u8]) {
        self.writes.remove(key);
        self.deletes.insert(key.to_vec());
    }

    fn iter_prefix(&self, prefix: &[u8]) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .base
            .iter_prefix(prefix)
            .filter(|(k, _)| !self.deletes.contains(k))
            .collect();
        for (k, v) in self.writes.range(prefix.to_vec()..) {
            if !k.starts_with(prefix) {
                break;
            }
            merged.insert(k.clone(), v.clone());
        }
        Box::new(merged.into_iter())
    }
}

/// Key-prefix constants matching the persisted state layout in spec §6.
pub mod keys {
    pub const PARAMS: &[u8] = b"params";
    pub const PRICE: &[u8] = b"price/";
    pub const VALIDATOR_PRICE: &[u8] = b"vprice/";
    pub const VALIDATOR_ORACLE: &[u8] = b"voracle/";
    pub const SNAPSHOT: &[u8] = b"snap/";
    pub const CROSS_CHAIN_SOURCE: &[u8] = b"oracle_source_";
    pub const CACHED_PRICE: &[u8] = b"cached_price_";
    pub const PENDING_OP: &[u8] = b"oracle_pending_op/";
    pub const NONCE_IN: &[u8] = b"nonce_in/";
    pub const NONCE_OUT: &[u8] = b"nonce_out/";
    pub const BREAKER: &[u8] = b"circuit_breaker_";
    pub const OVERRIDE: &[u8] = b"price_override/";
    pub const PAUSE: &[u8] = b"emergency_pause";
    pub const SLASHING_DISABLED: &[u8] = b"slashing_disabled";
    /// Registry of every asset that has ever received a submission. Kept
    /// explicitly rather than derived from `VALIDATOR_PRICE` key-splitting,
    /// since asset identifiers (e.g. `"ATOM/USD"`) contain the same `/`
    /// separator the key encoding uses.
    pub const ASSET_REGISTRY: &[u8] = b"known_assets";

    pub fn price(asset: &str) -> Vec<u8> {
        [PRICE, asset.as_bytes()].concat()
    }

    pub fn validator_price(asset: &str, validator: &str) -> Vec<u8> {
        [VALIDATOR_PRICE, asset.as_bytes(), b"/", validator.as_bytes()].concat()
    }

    pub fn validator_price_asset_prefix(asset: &str) -> Vec<u8> {
        [VALIDATOR_PRICE, asset.as_bytes(), b"/"].concat()
    }

    pub fn validator_oracle(validator: &str) -> Vec<u8> {
        [VALIDATOR_ORACLE, validator.as_bytes()].concat()
    }

    pub fn snapshot(asset: &str, height: u64) -> Vec<u8> {
        [SNAPSHOT, asset.as_bytes(), b"/", &height.to_be_bytes()].concat()
    }

    pub fn snapshot_asset_prefix(asset: &str) -> Vec<u8> {
        [SNAPSHOT, asset.as_bytes(), b"/"].concat()
    }

    pub fn cross_chain_source(chain_id: &str) -> Vec<u8> {
        [CROSS_CHAIN_SOURCE, chain_id.as_bytes()].concat()
    }

    pub fn cached_price(source: &str, symbol: &str) -> Vec<u8> {
        [CACHED_PRICE, source.as_bytes(), b"_", symbol.as_bytes()].concat()
    }

    pub fn cached_price_symbol_prefix() -> Vec<u8> {
        CACHED_PRICE.to_vec()
    }

    pub fn pending_op(channel_id: &str, sequence: u64) -> Vec<u8> {
        [PENDING_OP, channel_id.as_bytes(), b"/", &sequence.to_be_bytes()].concat()
    }

    pub fn pending_op_channel_prefix(channel_id: &str) -> Vec<u8> {
        [PENDING_OP, channel_id.as_bytes(), b"/"].concat()
    }

    pub fn nonce_in(channel: &str, sender: &str) -> Vec<u8> {
        [NONCE_IN, channel.as_bytes(), b"/", sender.as_bytes()].concat()
    }

    pub fn nonce_out(channel: &str, sender: &str) -> Vec<u8> {
        [NONCE_OUT, channel.as_bytes(), b"/", sender.as_bytes()].concat()
    }

    pub fn breaker_global() -> Vec<u8> {
        [BREAKER, b"global"].concat()
    }

    pub fn breaker_feed(feed_type: &str) -> Vec<u8> {
        [BREAKER, feed_type.as_bytes()].concat()
    }

    pub fn price_override(pair: &str) -> Vec<u8> {
        [OVERRIDE, pair.as_bytes()].concat()
    }
}
