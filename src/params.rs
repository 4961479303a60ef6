//! Governance parameters and the emergency pause record (spec §4.1).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::decimal::Decimal;
use crate::error::{OracleError, OracleResult};
use crate::store::{keys, Store};
use crate::types::{AuthorizedChannel, EmergencyPauseState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Params {
    pub vote_period: u64,
    pub vote_threshold: Decimal,
    pub slash_fraction: Decimal,
    pub slash_window: u64,
    pub min_valid_per_window: u64,
    pub twap_lookback_window: i64,
    pub authorized_channels: BTreeSet<AuthorizedChannelKey>,
    pub allowed_regions: BTreeSet<String>,
    pub min_geographic_regions: u32,
    pub require_geographic_diversity: bool,
    pub min_voting_power_for_consensus: Decimal,
    pub max_validators_per_ip: u32,
    pub max_validators_per_asn: u32,
    pub emergency_admin: String,
    pub nonce_ttl_seconds: i64,
    pub geoip_cache_ttl_seconds: i64,
    pub geoip_cache_max_entries: u32,
}

/// `BTreeSet`-friendly key for an [`AuthorizedChannel`] (the original type
/// doesn't implement `Copy`/`Ord`-free-of-heap-alloc, but set membership only
/// needs the two string fields).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuthorizedChannelKey {
    pub port: String,
    pub channel: String,
}

impl From<AuthorizedChannel> for AuthorizedChannelKey {
    fn from(c: AuthorizedChannel) -> Self {
        AuthorizedChannelKey { port: c.port.0, channel: c.channel.0 }
    }
}

impl Params {
    pub fn validate(&self) -> OracleResult<()> {
        let field_err = |field: &str, reason: &str| OracleError::InvalidParams {
            field: field.to_string(),
            reason: reason.to_string(),
        };

        if self.vote_period == 0 {
            return Err(field_err("vote_period", "must be > 0"));
        }
        if self.vote_threshold.is_zero() || self.vote_threshold > Decimal::ONE {
            return Err(field_err("vote_threshold", "must be in (0, 1]"));
        }
        if self.slash_fraction.is_negative() || self.slash_fraction > Decimal::ONE {
            return Err(field_err("slash_fraction", "must be in [0, 1]"));
        }
        if self.slash_window == 0 {
            return Err(field_err("slash_window", "must be > 0"));
        }
        if self.min_valid_per_window > self.slash_window {
            return Err(field_err("min_valid_per_window", "must be <= slash_window"));
        }
        if self.twap_lookback_window <= 0 {
            return Err(field_err("twap_lookback_window", "must be > 0"));
        }
        if self.min_geographic_regions as usize > self.allowed_regions.len() {
            return Err(field_err(
                "min_geographic_regions",
                "must be <= |allowed_regions|",
            ));
        }
        if self.min_voting_power_for_consensus.is_negative()
            || self.min_voting_power_for_consensus > Decimal::ONE
        {
            return Err(field_err(
                "min_voting_power_for_consensus",
                "must be in [0, 1]",
            ));
        }
        if self.emergency_admin.is_empty() {
            return Err(field_err("emergency_admin", "must not be empty"));
        }
        if self.nonce_ttl_seconds <= 0 {
            return Err(field_err("nonce_ttl_seconds", "must be > 0"));
        }
        Ok(())
    }
}

const PARAMS_KEY: &[u8] = keys::PARAMS;

pub fn get_params(store: &impl Store) -> Option<Params> {
    store.get(PARAMS_KEY).map(|b| serde_json::from_slice(&b).expect("params decode"))
}

/// Authority-gated parameter write; validates every field before persisting.
pub fn set_params(store: &mut impl Store, params: Params) -> OracleResult<()> {
    params.validate()?;
    store.put(PARAMS_KEY.to_vec(), serde_json::to_vec(&params).expect("params encode"));
    Ok(())
}

pub fn get_pause_state(store: &impl Store) -> EmergencyPauseState {
    store
        .get(keys::PAUSE)
        .map(|b| serde_json::from_slice(&b).expect("pause decode"))
        .unwrap_or_default()
}

fn put_pause_state(store: &mut impl Store, state: &EmergencyPauseState) {
    store.put(keys::PAUSE.to_vec(), serde_json::to_vec(state).expect("pause encode"));
}

pub fn is_paused(store: &impl Store) -> bool {
    get_pause_state(store).paused
}

/// Every mutating API of every other component must call this before making
/// any change (spec §4.1, invariant 5).
pub fn check_pause(store: &impl Store) -> OracleResult<()> {
    let state = get_pause_state(store);
    if state.paused {
        return Err(OracleError::Paused {
            reason: state.pause_reason,
            paused_at_height: state.paused_at_height,
        });
    }
    Ok(())
}

fn require_emergency_admin(store: &impl Store, actor: &str) -> OracleResult<()> {
    let params = get_params(store).expect("params must be initialized before use");
    if actor != params.emergency_admin {
        return Err(OracleError::Unauthorized { actor: actor.to_string() });
    }
    Ok(())
}

pub fn emergency_pause(
    store: &mut impl Store,
    actor: &str,
    reason: &str,
    height: u64,
) -> OracleResult<()> {
    require_emergency_admin(store, actor)?;
    let mut state = get_pause_state(store);
    if state.paused {
        return Err(OracleError::AlreadyPaused);
    }
    state.paused = true;
    state.paused_by = actor.to_string();
    state.pause_reason = reason.to_string();
    state.paused_at_height = height;
    put_pause_state(store, &state);
    info!(actor, reason, height, "oracle emergency paused");
    Ok(())
}

pub fn resume(store: &mut impl Store, actor: &str, reason: &str) -> OracleResult<()> {
    require_emergency_admin(store, actor)?;
    let mut state = get_pause_state(store);
    if !state.paused {
        return Err(OracleError::OracleNotPaused);
    }
    state.paused = false;
    state.paused_by.clear();
    state.pause_reason.clear();
    state.paused_at_height = 0;
    put_pause_state(store, &state);
    info!(actor, reason, "oracle resumed");
    Ok(())
}

#[cfg(test)]
pub fn default_params_for_tests() -> Params {
    Params {
        vote_period: 10,
        vote_threshold: Decimal::from_scaled(67, 2).unwrap(),
        slash_fraction: Decimal::from_scaled(1, 2).unwrap(),
        slash_window: 100,
        min_valid_per_window: 50,
        twap_lookback_window: 3600,
        authorized_channels: BTreeSet::new(),
        allowed_regions: ["us", "eu", "apac"].iter().map(|s| s.to_string()).collect(),
        min_geographic_regions: 2,
        require_geographic_diversity: false,
        min_voting_power_for_consensus: Decimal::from_scaled(50, 2).unwrap(),
        max_validators_per_ip: 3,
        max_validators_per_asn: 5,
        emergency_admin: "admin".to_string(),
        nonce_ttl_seconds: 86_400,
        geoip_cache_ttl_seconds: 3600,
        geoip_cache_max_entries: 10_000,
    }
}
