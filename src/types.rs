//! Entity definitions persisted in the KV-store (spec §3).
//!
//! Every record here is an owned, flat value with no cyclic references —
//! reads produce a copy, writes serialize-and-put, per the "deep nesting"
//! design note. Key encoding lives in `store::keys`.

use serde::{Deserialize, Serialize};

use crate::decimal::Decimal;

/// Canonical asset identifier, e.g. `"ATOM/USD"`.
pub type Asset = String;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ValidatorAddr(pub String);

impl ValidatorAddr {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortId(pub String);

pub type Sequence = u64;
pub type ChainId = String;

/// Voting power measured in bonded-stake consensus units.
pub type VotingPower = u128;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuthorizedChannel {
    pub port: PortId,
    pub channel: ChannelId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub asset: Asset,
    pub price: Decimal,
    pub block_height: u64,
    pub block_time: i64,
    pub num_validators: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorPrice {
    pub validator: ValidatorAddr,
    pub asset: Asset,
    pub price: Decimal,
    pub block_height: u64,
    pub voting_power: VotingPower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidatorState {
    Healthy,
    Probation,
    Slashed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorOracle {
    pub validator: ValidatorAddr,
    pub miss_counter: u64,
    pub total_submissions: u64,
    pub is_active: bool,
    pub geographic_region: String,
    pub ip_address: String,
    pub asn: u32,
    pub reputation: Decimal,
    pub state: ValidatorState,
}

impl ValidatorOracle {
    pub fn new(validator: ValidatorAddr, region: String, ip: String, asn: u32) -> Self {
        ValidatorOracle {
            validator,
            miss_counter: 0,
            total_submissions: 0,
            is_active: true,
            geographic_region: region,
            ip_address: ip,
            asn,
            reputation: Decimal::ONE,
            state: ValidatorState::Healthy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub price: Decimal,
    pub block_height: u64,
    pub block_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainOracleSource {
    pub chain_id: ChainId,
    pub oracle_type: String,
    pub connection_id: String,
    pub channel_id: ChannelId,
    pub reputation: Decimal,
    pub last_heartbeat: i64,
    pub total_queries: u64,
    pub successful_queries: u64,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedCrossChainPrice {
    pub source: ChainId,
    pub symbol: String,
    pub price: Decimal,
    pub volume_24h: Decimal,
    pub timestamp: i64,
    pub confidence: Decimal,
    pub oracle_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketType {
    SubscribePrices,
    QueryPrice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub channel_id: ChannelId,
    pub chain_id: ChainId,
    pub sequence: Sequence,
    pub packet_type: PacketType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NonceRecord {
    pub last_nonce: u64,
    pub last_timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerState {
    pub enabled: bool,
    pub reason: String,
    pub actor: String,
    pub opened_at_height: u64,
}

impl Default for BreakerState {
    fn default() -> Self {
        BreakerState { enabled: false, reason: String::new(), actor: String::new(), opened_at_height: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceOverride {
    pub pair: Asset,
    pub price: Decimal,
    pub expires_at_unix: i64,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EmergencyPauseState {
    pub paused: bool,
    pub paused_by: String,
    pub pause_reason: String,
    pub paused_at_height: u64,
}
