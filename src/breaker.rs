//! Circuit breakers and price overrides (spec §4.9).
//!
//! Two independent breaker scopes: `global` (trips every feed) and per-feed
//! (keyed by asset). A breaker auto-closes once `CIRCUIT_BREAKER_COOLDOWN`
//! blocks have passed since it opened (Open Question resolution in
//! `SPEC_FULL.md`: fixed 100-block cooldown, no governance knob).

use tracing::{info, warn};

use crate::decimal::Decimal;
use crate::error::{OracleError, OracleResult};
use crate::snapshot;
use crate::store::{keys, Store};
use crate::types::{Asset, BreakerState, PriceOverride};

/// Blocks a breaker stays open before auto-recovery is attempted.
pub const CIRCUIT_BREAKER_COOLDOWN: u64 = 100;

fn get_breaker(store: &impl Store, key: &[u8]) -> BreakerState {
    store
        .get(key)
        .map(|b| serde_json::from_slice(&b).expect("breaker decode"))
        .unwrap_or_default()
}

fn put_breaker(store: &mut impl Store, key: &[u8], state: &BreakerState) {
    store.put(key.to_vec(), serde_json::to_vec(state).expect("breaker encode"));
}

fn require_emergency_admin(store: &impl Store, actor: &str) -> OracleResult<()> {
    let params = crate::params::get_params(store).expect("params must be initialized before use");
    if actor != params.emergency_admin {
        return Err(OracleError::Unauthorized { actor: actor.to_string() });
    }
    Ok(())
}

pub fn open_circuit_breaker(
    store: &mut impl Store,
    scope: Option<&Asset>,
    actor: &str,
    reason: &str,
    height: u64,
) -> OracleResult<()> {
    require_emergency_admin(store, actor)?;
    let key = scope.map(|a| keys::breaker_feed(a)).unwrap_or_else(keys::breaker_global);
    let mut state = get_breaker(store, &key);
    state.enabled = true;
    state.actor = actor.to_string();
    state.reason = reason.to_string();
    state.opened_at_height = height;
    put_breaker(store, &key, &state);
    warn!(scope = ?scope, actor, reason, "circuit breaker opened");
    Ok(())
}

pub fn close_circuit_breaker(store: &mut impl Store, scope: Option<&Asset>, actor: &str) -> OracleResult<()> {
    require_emergency_admin(store, actor)?;
    let key = scope.map(|a| keys::breaker_feed(a)).unwrap_or_else(keys::breaker_global);
    let mut state = get_breaker(store, &key);
    state.enabled = false;
    state.reason.clear();
    state.opened_at_height = 0;
    put_breaker(store, &key, &state);
    info!(scope = ?scope, actor, "circuit breaker closed");
    Ok(())
}

/// Checks the global breaker and, if `asset` is given, the per-feed breaker
/// too. A breaker past its cooldown is cleared in place before the check, so
/// callers never observe a stale "open" error once recovery is due.
pub fn check_circuit_breaker_with_recovery(
    store: &mut impl Store,
    asset: Option<&Asset>,
    height: u64,
) -> OracleResult<()> {
    check_one(store, None, height)?;
    if let Some(asset) = asset {
        check_one(store, Some(asset), height)?;
    }
    Ok(())
}

fn check_one(store: &mut impl Store, scope: Option<&Asset>, height: u64) -> OracleResult<()> {
    let key = scope.map(|a| keys::breaker_feed(a)).unwrap_or_else(keys::breaker_global);
    let mut state = get_breaker(store, &key);
    if state.enabled && height.saturating_sub(state.opened_at_height) >= CIRCUIT_BREAKER_COOLDOWN {
        state.enabled = false;
        state.reason.clear();
        state.opened_at_height = 0;
        put_breaker(store, &key, &state);
        info!(scope = ?scope, "circuit breaker auto-closed after cooldown");
        return Ok(());
    }
    if state.enabled {
        return Err(OracleError::BreakerOpen {
            scope: scope.cloned().unwrap_or_else(|| "global".to_string()),
            reason: state.reason,
        });
    }
    Ok(())
}

pub fn set_price_override(
    store: &mut impl Store,
    pair: &Asset,
    price: Decimal,
    expires_at_unix: i64,
    source: &str,
) -> OracleResult<()> {
    require_emergency_admin(store, source)?;
    let record = PriceOverride { pair: pair.clone(), price, expires_at_unix, source: source.to_string() };
    store.put(keys::price_override(pair), serde_json::to_vec(&record).expect("override encode"));
    Ok(())
}

pub fn clear_price_override(store: &mut impl Store, pair: &Asset) {
    store.delete(&keys::price_override(pair));
}

/// Returns the override for `pair` only if it hasn't expired as of `now_unix`
/// (spec §4.9 "`GetPriceOverride` lazily deletes expired entries"): an
/// expired record is deleted from the store before this returns `None`, so
/// the next read never pays to re-check an entry this call already found
/// stale.
pub fn get_price_override(store: &mut impl Store, pair: &Asset, now_unix: i64) -> Option<PriceOverride> {
    let record: PriceOverride = store
        .get(&keys::price_override(pair))
        .map(|b| serde_json::from_slice(&b).expect("override decode"))?;
    if record.expires_at_unix <= now_unix {
        store.delete(&keys::price_override(pair));
        return None;
    }
    Some(record)
}

/// `GetPriceWithOverride` (spec §4.9): an active override takes precedence
/// over the committed `Price` record; absent an override, falls back to the
/// last price the aggregation engine wrote for `pair`.
pub fn get_price_with_override(store: &mut impl Store, pair: &Asset, now_unix: i64) -> OracleResult<Decimal> {
    if let Some(over) = get_price_override(store, pair, now_unix) {
        return Ok(over.price);
    }
    snapshot::get_price(store, pair)
        .map(|p| p.price)
        .ok_or_else(|| OracleError::NoSnapshots(pair.clone()))
}
