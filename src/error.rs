//! Typed error catalog for the oracle core.
//!
//! Plays the same role as the teacher's `#[error_code]` enums (`StateError`,
//! `RaydiumObserverError`) — one flat, matchable enum per failure domain isn't
//! used here; instead every kind from spec §7 lives in a single `OracleError`
//! so callers across components can match on a stable set of variants. Each
//! variant carries the structured context spec §7 asks for rather than a bare
//! string.

use thiserror::Error;

use crate::types::{Asset, ChannelId, Sequence};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OracleError {
    #[error("oracle is paused since height {paused_at_height} ({reason})")]
    Paused { reason: String, paused_at_height: u64 },

    #[error("circuit breaker open: {scope}, reason: {reason}")]
    BreakerOpen { scope: String, reason: String },

    #[error("invalid price: must be > 0, got {0}")]
    InvalidPrice(String),

    #[error("validator {0} is not bonded")]
    NotBonded(String),

    #[error("no submissions for asset {0:?}")]
    NoSubmissions(Asset),

    #[error("insufficient voting power for asset {asset:?}: {power} < required {required}")]
    InsufficientVotingPower { asset: Asset, power: String, required: String },

    #[error("insufficient post-filter consensus for asset {asset:?}: {power} < required {required}")]
    InsufficientConsensus { asset: Asset, power: String, required: String },

    #[error("no snapshots within window for asset {0:?}")]
    NoSnapshots(Asset),

    #[error("replay attack detected on channel {channel:?} sender {sender}: nonce {nonce} <= last seen {last_seen}")]
    ReplayAttack { channel: ChannelId, sender: String, nonce: u64, last_seen: u64 },

    #[error("packet timestamp too old: {timestamp} < {floor}")]
    TooOld { timestamp: i64, floor: i64 },

    #[error("packet timestamp too far in the future: {timestamp} > {ceiling}")]
    TooFarInFuture { timestamp: i64, ceiling: i64 },

    #[error("bad nonce: {0}")]
    BadNonce(String),

    #[error("channel {0:?} is not authorized")]
    UnauthorizedChannel(ChannelId),

    #[error("malformed or oversized packet: {0}")]
    InvalidPacket(String),

    #[error("actor {actor} is not authorized for this operation")]
    Unauthorized { actor: String },

    #[error("oracle is not paused")]
    OracleNotPaused,

    #[error("oracle is already paused")]
    AlreadyPaused,

    #[error("no cross-chain data available for {0}")]
    DataUnavailable(String),

    #[error("insufficient geographic diversity: {found} regions, need {required}")]
    InsufficientDiversity { found: u32, required: u32 },

    #[error("insufficient cross-chain sources for {symbol:?}: {found} < required {required}")]
    InsufficientCrossChainSources { symbol: String, found: u32, required: u32 },

    #[error("invalid parameter {field}: {reason}")]
    InvalidParams { field: String, reason: String },

    #[error("no pending operation for channel {channel:?} sequence {sequence}")]
    NoPendingOperation { channel: ChannelId, sequence: Sequence },

    #[error("arithmetic error: {0}")]
    Arithmetic(#[from] crate::decimal::DecimalError),
}

pub type OracleResult<T> = Result<T, OracleError>;
