//! Per-validator price submission (spec §4.2): the only entry point that
//! writes a `ValidatorPrice` record, gated by pause/breaker/bonding checks
//! and bookkeeping the submitting validator's `ValidatorOracle` record.

use std::collections::BTreeSet;

use tracing::debug;

use crate::breaker;
use crate::collaborators::{Resolver, StakingReader};
use crate::decimal::Decimal;
use crate::error::{OracleError, OracleResult};
use crate::params;
use crate::store::{keys, Store};
use crate::types::{Asset, ValidatorAddr, ValidatorOracle, ValidatorPrice};

/// Handles `SubmitPrice(validator, asset, price)`.
///
/// On first submission from a validator, registers its `ValidatorOracle`
/// record using `ip`/`asn` resolved through `resolver` (spec §4.2 "validator
/// identity capture"). All validation runs before any write, so a rejected
/// submission never touches the store.
pub fn submit_price(
    store: &mut impl Store,
    staking: &impl StakingReader,
    resolver: &impl Resolver,
    validator: &ValidatorAddr,
    asset: &Asset,
    price: Decimal,
    ip: &str,
    block_height: u64,
) -> OracleResult<()> {
    params::check_pause(store)?;
    breaker::check_circuit_breaker_with_recovery(store, Some(asset), block_height)?;

    if !staking.is_bonded(validator) {
        return Err(OracleError::NotBonded(validator.0.clone()));
    }
    if !price.is_positive() {
        return Err(OracleError::InvalidPrice(price.to_string()));
    }

    let voting_power = staking.voting_power(validator);

    let record = ValidatorPrice {
        validator: validator.clone(),
        asset: asset.clone(),
        price,
        block_height,
        voting_power,
    };
    store.put(
        keys::validator_price(asset, &validator.0),
        serde_json::to_vec(&record).expect("validator price encode"),
    );
    register_asset(store, asset);

    let mut oracle = get_validator_oracle(store, validator).unwrap_or_else(|| {
        let region = resolver.resolve_region(ip).unwrap_or_else(|| "unknown".to_string());
        ValidatorOracle::new(validator.clone(), region, ip.to_string(), 0)
    });
    oracle.total_submissions += 1;
    put_validator_oracle(store, &oracle);

    debug!(validator = %validator.0, asset, %price, "price submission recorded");
    Ok(())
}

fn register_asset(store: &mut impl Store, asset: &Asset) {
    let mut assets = known_assets(store);
    if assets.insert(asset.clone()) {
        store.put(
            keys::ASSET_REGISTRY.to_vec(),
            serde_json::to_vec(&assets).expect("asset registry encode"),
        );
    }
}

/// Every asset that has ever received a submission, in deterministic order.
pub fn known_assets(store: &impl Store) -> BTreeSet<Asset> {
    store
        .get(keys::ASSET_REGISTRY)
        .map(|b| serde_json::from_slice(&b).expect("asset registry decode"))
        .unwrap_or_default()
}

pub fn get_validator_oracle(store: &impl Store, validator: &ValidatorAddr) -> Option<ValidatorOracle> {
    store
        .get(&keys::validator_oracle(&validator.0))
        .map(|b| serde_json::from_slice(&b).expect("validator oracle decode"))
}

pub fn put_validator_oracle(store: &mut impl Store, oracle: &ValidatorOracle) {
    store.put(
        keys::validator_oracle(&oracle.validator.0),
        serde_json::to_vec(oracle).expect("validator oracle encode"),
    );
}

pub fn get_validator_price(store: &impl Store, asset: &Asset, validator: &ValidatorAddr) -> Option<ValidatorPrice> {
    store
        .get(&keys::validator_price(asset, &validator.0))
        .map(|b| serde_json::from_slice(&b).expect("validator price decode"))
}

/// All submissions currently recorded for `asset`, in validator-address
/// order (the KV-store's natural iteration order).
pub fn iter_validator_prices(store: &impl Store, asset: &Asset) -> Vec<ValidatorPrice> {
    store
        .iter_prefix(&keys::validator_price_asset_prefix(asset))
        .map(|(_, v)| serde_json::from_slice(&v).expect("validator price decode"))
        .collect()
}

/// Deletes every `ValidatorPrice` recorded for `asset` (spec §4.3 step 6:
/// a successful aggregation clears the submissions it consumed). Callers
/// must not invoke this on a failed aggregation — submissions are preserved
/// across failed vote periods so the last-good price stands.
pub fn clear_validator_prices(store: &mut impl Store, asset: &Asset) {
    let keys_to_delete: Vec<Vec<u8>> =
        store.iter_prefix(&keys::validator_price_asset_prefix(asset)).map(|(k, _)| k).collect();
    for key in keys_to_delete {
        store.delete(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{FakeResolver, FakeStakingReader};
    use crate::store::MemStore;

    fn setup() -> (MemStore, FakeStakingReader, FakeResolver) {
        let mut store = MemStore::new();
        params::set_params(&mut store, params::default_params_for_tests()).unwrap();
        let mut staking = FakeStakingReader::new();
        staking.bond(ValidatorAddr("val-a".to_string()), 100);
        (store, staking, FakeResolver::new())
    }

    #[test]
    fn submission_from_unbonded_validator_fails() {
        let (mut store, staking, resolver) = setup();
        let v = ValidatorAddr("ghost".to_string());
        let res = submit_price(&mut store, &staking, &resolver, &v, &"ATOM/USD".to_string(), Decimal::from_i128(10), "1.2.3.4", 1);
        assert!(matches!(res, Err(OracleError::NotBonded(_))));
    }

    #[test]
    fn non_positive_price_is_rejected() {
        let (mut store, staking, resolver) = setup();
        let v = ValidatorAddr("val-a".to_string());
        let res = submit_price(&mut store, &staking, &resolver, &v, &"ATOM/USD".to_string(), Decimal::ZERO, "1.2.3.4", 1);
        assert!(matches!(res, Err(OracleError::InvalidPrice(_))));
    }

    #[test]
    fn first_submission_registers_validator_oracle() {
        let (mut store, staking, resolver) = setup();
        let v = ValidatorAddr("val-a".to_string());
        submit_price(&mut store, &staking, &resolver, &v, &"ATOM/USD".to_string(), Decimal::from_i128(10), "1.2.3.4", 1).unwrap();
        let oracle = get_validator_oracle(&store, &v).unwrap();
        assert_eq!(oracle.total_submissions, 1);
        let price = get_validator_price(&store, &"ATOM/USD".to_string(), &v).unwrap();
        assert_eq!(price.voting_power, 100);
    }

    #[test]
    fn submissions_register_their_asset() {
        let (mut store, staking, resolver) = setup();
        let v = ValidatorAddr("val-a".to_string());
        submit_price(&mut store, &staking, &resolver, &v, &"ATOM/USD".to_string(), Decimal::from_i128(10), "1.2.3.4", 1).unwrap();
        assert!(known_assets(&store).contains(&"ATOM/USD".to_string()));
    }

    #[test]
    fn submission_while_paused_fails() {
        let (mut store, staking, resolver) = setup();
        params::emergency_pause(&mut store, "admin", "incident", 1).unwrap();
        let v = ValidatorAddr("val-a".to_string());
        let res = submit_price(&mut store, &staking, &resolver, &v, &"ATOM/USD".to_string(), Decimal::from_i128(10), "1.2.3.4", 1);
        assert!(matches!(res, Err(OracleError::Paused { .. })));
    }
}
