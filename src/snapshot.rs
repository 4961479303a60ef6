//! Snapshot log and time-weighted average price (spec §4.4).
//!
//! Every committed aggregation result is appended here keyed by
//! `(asset, block_height)`, giving an ordered log that `CalculateTWAP`
//! walks to produce a Δt-weighted average over a lookback window.

use crate::error::{OracleError, OracleResult};
use crate::store::{keys, Store};
use crate::types::{Asset, Price, PriceSnapshot};

/// Writes the canonical `Price` record (spec §3: "written only by the
/// aggregation engine upon success"). Distinct from `PriceSnapshot`, which
/// keeps the full per-height history this single record doesn't.
pub fn set_price(store: &mut impl Store, price: &Price) {
    store.put(keys::price(&price.asset), serde_json::to_vec(price).expect("price encode"));
}

pub fn get_price(store: &impl Store, asset: &Asset) -> Option<Price> {
    store.get(&keys::price(asset)).map(|b| serde_json::from_slice(&b).expect("price decode"))
}

pub fn set_price_snapshot(store: &mut impl Store, asset: &Asset, snapshot: PriceSnapshot) {
    store.put(
        keys::snapshot(asset, snapshot.block_height),
        serde_json::to_vec(&snapshot).expect("snapshot encode"),
    );
}

pub fn get_price_snapshot(store: &impl Store, asset: &Asset, height: u64) -> Option<PriceSnapshot> {
    store
        .get(&keys::snapshot(asset, height))
        .map(|b| serde_json::from_slice(&b).expect("snapshot decode"))
}

/// All snapshots for `asset` in ascending block-height order.
pub fn iter_price_snapshots(store: &impl Store, asset: &Asset) -> Vec<PriceSnapshot> {
    store
        .iter_prefix(&keys::snapshot_asset_prefix(asset))
        .map(|(_, v)| serde_json::from_slice(&v).expect("snapshot decode"))
        .collect()
}

/// Deletes every snapshot for `asset` older than `floor_time` (spec §4.4
/// pruning, driven by `EndBlock` using `twap_lookback_window`).
pub fn delete_old_snapshots(store: &mut impl Store, asset: &Asset, floor_time: i64) {
    let stale: Vec<u64> = iter_price_snapshots(store, asset)
        .into_iter()
        .filter(|s| s.block_time < floor_time)
        .map(|s| s.block_height)
        .collect();
    for height in stale {
        store.delete(&keys::snapshot(asset, height));
    }
}

/// Time-weighted average price over the snapshots covering
/// `[now - lookback_window, now]`. Snapshots strictly outside the window
/// contribute nothing; the segment from the last in-window snapshot to `now`
/// is weighted by its own duration (spec §4.4 formula).
pub fn calculate_twap(
    store: &impl Store,
    asset: &Asset,
    lookback_window: i64,
    now: i64,
) -> OracleResult<crate::decimal::Decimal> {
    let floor = now - lookback_window;
    let mut snapshots = iter_price_snapshots(store, asset);
    snapshots.retain(|s| s.block_time <= now);
    if snapshots.is_empty() {
        return Err(OracleError::NoSnapshots(asset.clone()));
    }
    snapshots.sort_by_key(|s| s.block_time);

    let windowed: Vec<&PriceSnapshot> = snapshots.iter().filter(|s| s.block_time >= floor).collect();
    if windowed.is_empty() {
        // Every snapshot predates the window: carry the latest known price
        // forward for the whole window.
        return Ok(snapshots.last().expect("non-empty").price);
    }

    let mut weighted_sum = crate::decimal::Decimal::ZERO;
    let mut total_weight: i64 = 0;
    for i in 0..windowed.len() {
        let start = windowed[i].block_time.max(floor);
        let end = if i + 1 < windowed.len() { windowed[i + 1].block_time } else { now };
        let weight = (end - start).max(0);
        if weight == 0 {
            continue;
        }
        weighted_sum = weighted_sum
            .checked_add(windowed[i].price.checked_mul_ratio(weight as u128, 1)?)?;
        total_weight += weight;
    }
    if total_weight == 0 {
        return Ok(windowed.last().expect("non-empty").price);
    }
    Ok(weighted_sum.checked_mul_ratio(1, total_weight as u128)?)
}
