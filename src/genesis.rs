//! Whole-state export and import (spec §4.12, ambient addition).
//!
//! `export_genesis` dumps every key in the store; `import_genesis` replaces
//! the store's contents with a previously exported dump. Round-tripping
//! through these two functions must be the identity on observable state
//! (spec §8 round-trip law).

use serde::{Deserialize, Serialize};

use crate::error::{OracleError, OracleResult};
use crate::params::Params;
use crate::store::{keys, Store};

/// One raw key/value pair, hex-encoded so the whole genesis file is plain
/// JSON regardless of what binary bytes a key or value contains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GenesisState {
    pub entries: Vec<GenesisEntry>,
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn from_hex(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).expect("valid hex in genesis entry"))
        .collect()
}

/// Dumps the entire store. Key ordering in the output matches the store's
/// own iteration order (lexicographic), so two exports of the same state
/// produce byte-identical genesis files.
pub fn export_genesis(store: &impl Store) -> GenesisState {
    let entries = store
        .iter_prefix(b"")
        .map(|(k, v)| GenesisEntry { key: to_hex(&k), value: to_hex(&v) })
        .collect();
    GenesisState { entries }
}

/// Replaces every key the genesis dump mentions. Pre-existing keys not
/// present in `genesis` are left untouched — callers importing into a fresh
/// store get exact replacement; callers importing into a live store should
/// wipe known prefixes first if they want a clean slate (genesis import is
/// normally only ever run against an empty store).
///
/// Once every record is written, the imported `Params` is decoded and
/// validated so a corrupt or hand-edited genesis file fails closed here
/// rather than surfacing as a confusing error the first time some unrelated
/// message reads params.
pub fn import_genesis(store: &mut impl Store, genesis: &GenesisState) -> OracleResult<()> {
    for entry in &genesis.entries {
        store.put(from_hex(&entry.key), from_hex(&entry.value));
    }
    if let Some(bytes) = store.get(keys::PARAMS) {
        let params: Params = serde_json::from_slice(&bytes)
            .map_err(|e| OracleError::InvalidParams { field: "params".to_string(), reason: e.to_string() })?;
        params.validate()?;
    }
    Ok(())
}

/// Clears every known state prefix, for callers that want a guaranteed
/// clean slate before `import_genesis`.
pub fn wipe_known_state(store: &mut impl Store) {
    const PREFIXES: &[&[u8]] = &[
        keys::PARAMS,
        keys::PRICE,
        keys::VALIDATOR_PRICE,
        keys::VALIDATOR_ORACLE,
        keys::SNAPSHOT,
        keys::CROSS_CHAIN_SOURCE,
        keys::CACHED_PRICE,
        keys::PENDING_OP,
        keys::NONCE_IN,
        keys::NONCE_OUT,
        keys::BREAKER,
        keys::OVERRIDE,
        keys::PAUSE,
        keys::SLASHING_DISABLED,
        keys::ASSET_REGISTRY,
    ];
    for prefix in PREFIXES {
        let keys_to_delete: Vec<Vec<u8>> = store.iter_prefix(prefix).map(|(k, _)| k).collect();
        for key in keys_to_delete {
            store.delete(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;
    use crate::store::MemStore;

    #[test]
    fn export_then_import_round_trips() {
        let mut store = MemStore::new();
        params::set_params(&mut store, params::default_params_for_tests()).unwrap();
        params::emergency_pause(&mut store, "admin", "incident", 7).unwrap();

        let genesis = export_genesis(&store);

        let mut restored = MemStore::new();
        import_genesis(&mut restored, &genesis).unwrap();

        assert_eq!(params::get_params(&restored), params::get_params(&store));
        assert_eq!(params::is_paused(&restored), true);
        assert_eq!(export_genesis(&restored), genesis);
    }

    #[test]
    fn import_rejects_a_genesis_with_invalid_params() {
        let mut bad_params = params::default_params_for_tests();
        bad_params.vote_period = 0;
        let genesis = GenesisState {
            entries: vec![GenesisEntry {
                key: to_hex(keys::PARAMS),
                value: to_hex(&serde_json::to_vec(&bad_params).unwrap()),
            }],
        };
        let mut restored = MemStore::new();
        let res = import_genesis(&mut restored, &genesis);
        assert!(matches!(res, Err(crate::error::OracleError::InvalidParams { .. })));
    }

    #[test]
    fn hex_round_trips_arbitrary_bytes() {
        let bytes: Vec<u8> = (0..=255u8).collect();
        assert_eq!(from_hex(&to_hex(&bytes)), bytes);
    }
}
