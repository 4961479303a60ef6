//! Cross-chain price fusion (spec §4.6-4.7): registering external oracle
//! sources, subscribing over IBC-style channels, ingesting price-update
//! packets, and fusing the resulting cache into one price per symbol.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregation::lower_median;
use crate::collaborators::Transport;
use crate::decimal::Decimal;
use crate::error::{OracleError, OracleResult};
use crate::events::{Event, EventSink};
use crate::nonce;
use crate::params::{AuthorizedChannelKey, Params};
use crate::store::{keys, Store};
use crate::types::{
    CachedCrossChainPrice, ChainId, ChannelId, CrossChainOracleSource, PacketType, PendingOperation,
    PortId, Sequence,
};

fn require_authorized(params: &Params, port: &PortId, channel: &ChannelId) -> OracleResult<()> {
    let key = AuthorizedChannelKey { port: port.0.clone(), channel: channel.0.clone() };
    if params.authorized_channels.contains(&key) {
        Ok(())
    } else {
        Err(OracleError::UnauthorizedChannel(channel.clone()))
    }
}

/// Reputation decay multiplier applied on a penalty event (timeout, channel
/// close, anomaly): reputation *= 0.9 (spec §4.6).
const REPUTATION_DECAY_BP: i128 = 90_00; // 0.90 at 4 decimals
/// A source drops out of the active set once its reputation falls below
/// this floor (spec §4.6 "Active flips to false below 0.5").
const REPUTATION_ACTIVE_FLOOR_BP: i128 = 50_00; // 0.50 at 4 decimals

/// Maximum relative deviation from the cross-source median a price may have
/// before it's treated as an anomaly and dropped from fusion (spec §4.6:
/// `|p-median|/median > 0.25`).
const ANOMALY_THRESHOLD_PERCENT: i128 = 25;
/// Relative deviation used for the (separate, stricter) `ByzantineSafe`
/// check: at least `ceil(2n/3)` of the fresh entries within this band of the
/// median, with `n >= 3` (spec §4.6).
const BYZANTINE_SAFE_THRESHOLD_PERCENT: i128 = 10;

/// The wire packet sum type exchanged over a channel (spec §9 design note:
/// one tagged envelope, one decode step, instead of parallel packet kinds).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Packet {
    SubscribePrices { symbols: Vec<String> },
    QueryPrice { symbol: String },
    PriceUpdate {
        symbol: String,
        price_scaled: i128,
        price_decimals: u32,
        volume_24h_scaled: i128,
        volume_24h_decimals: u32,
        confidence_scaled: i128,
        confidence_decimals: u32,
        nonce: u64,
        timestamp: i64,
    },
}

impl Packet {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("packet encode")
    }

    pub fn decode(bytes: &[u8]) -> OracleResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| OracleError::InvalidPacket(e.to_string()))
    }
}

fn get_source(store: &impl Store, chain_id: &ChainId) -> Option<CrossChainOracleSource> {
    store.get(&keys::cross_chain_source(chain_id)).map(|b| serde_json::from_slice(&b).expect("source decode"))
}

fn put_source(store: &mut impl Store, source: &CrossChainOracleSource) {
    store.put(keys::cross_chain_source(&source.chain_id), serde_json::to_vec(source).expect("source encode"));
}

pub fn register_source(
    store: &mut impl Store,
    chain_id: ChainId,
    oracle_type: String,
    connection_id: String,
    channel_id: ChannelId,
    now: i64,
) -> CrossChainOracleSource {
    let source = CrossChainOracleSource {
        chain_id,
        oracle_type,
        connection_id,
        channel_id,
        reputation: Decimal::ONE,
        last_heartbeat: now,
        total_queries: 0,
        successful_queries: 0,
        active: true,
    };
    put_source(store, &source);
    source
}

/// Subscribes to a registered source's price feed, tracking the resulting
/// packet as a [`PendingOperation`] until an ack or timeout clears it.
#[allow(clippy::too_many_arguments)]
pub fn subscribe_to_prices(
    store: &mut impl Store,
    transport: &mut impl Transport,
    events: &mut EventSink,
    params: &Params,
    source_chain_id: &ChainId,
    port: &PortId,
    symbols: Vec<String>,
    timeout_ns: u64,
) -> OracleResult<Sequence> {
    let mut source = get_source(store, source_chain_id).ok_or_else(|| {
        OracleError::DataUnavailable(format!("no registered source for chain {source_chain_id}"))
    })?;
    require_authorized(params, port, &source.channel_id)?;
    let packet = Packet::SubscribePrices { symbols };
    let sequence = transport.send_packet(port, &source.channel_id, packet.encode(), timeout_ns);
    put_pending_op(
        store,
        &source.channel_id,
        sequence,
        &PendingOperation {
            channel_id: source.channel_id.clone(),
            chain_id: source.chain_id.clone(),
            sequence,
            packet_type: PacketType::SubscribePrices,
        },
    );
    source.total_queries += 1;
    put_source(store, &source);
    events.emit(Event::OracleIbcPacketSent { channel: source.channel_id.clone(), sequence });
    Ok(sequence)
}

#[allow(clippy::too_many_arguments)]
pub fn query_price(
    store: &mut impl Store,
    transport: &mut impl Transport,
    events: &mut EventSink,
    params: &Params,
    source_chain_id: &ChainId,
    port: &PortId,
    symbol: String,
    timeout_ns: u64,
) -> OracleResult<Sequence> {
    let mut source = get_source(store, source_chain_id).ok_or_else(|| {
        OracleError::DataUnavailable(format!("no registered source for chain {source_chain_id}"))
    })?;
    require_authorized(params, port, &source.channel_id)?;
    let packet = Packet::QueryPrice { symbol };
    let sequence = transport.send_packet(port, &source.channel_id, packet.encode(), timeout_ns);
    put_pending_op(
        store,
        &source.channel_id,
        sequence,
        &PendingOperation {
            channel_id: source.channel_id.clone(),
            chain_id: source.chain_id.clone(),
            sequence,
            packet_type: PacketType::QueryPrice,
        },
    );
    source.total_queries += 1;
    put_source(store, &source);
    events.emit(Event::OracleIbcPacketSent { channel: source.channel_id.clone(), sequence });
    Ok(sequence)
}

fn put_pending_op(store: &mut impl Store, channel: &ChannelId, sequence: Sequence, op: &PendingOperation) {
    store.put(keys::pending_op(&channel.0, sequence), serde_json::to_vec(op).expect("pending op encode"));
}

/// Clears a pending operation once its ack or timeout arrives. Errors if no
/// such operation was ever recorded (spec §4.7: an ack for an unknown
/// `(channel, sequence)` is a protocol violation, not a no-op). A successful
/// ack recomputes the source's reputation as `SuccessfulQueries /
/// TotalQueries` (spec §4.6); an [`PacketAck::Error`] still clears the
/// pending operation — the send completed, just unsuccessfully — but runs
/// the same 0.9 decay as any other penalty event.
pub fn handle_ack(
    store: &mut impl Store,
    events: &mut EventSink,
    channel: &ChannelId,
    sequence: Sequence,
    ack: crate::collaborators::PacketAck,
) -> OracleResult<PendingOperation> {
    let key = keys::pending_op(&channel.0, sequence);
    let op: PendingOperation = store
        .get(&key)
        .map(|b| serde_json::from_slice(&b).expect("pending op decode"))
        .ok_or_else(|| OracleError::NoPendingOperation { channel: channel.clone(), sequence })?;
    store.delete(&key);
    match ack {
        crate::collaborators::PacketAck::Success => {
            if let Some(mut source) = get_source(store, &op.chain_id) {
                source.successful_queries += 1;
                if source.total_queries > 0 {
                    source.reputation =
                        Decimal::from_scaled(source.successful_queries as i128, 0)?
                            .checked_div(Decimal::from_scaled(source.total_queries as i128, 0)?)
                            .unwrap_or(Decimal::ONE);
                }
                apply_active_floor(&mut source);
                put_source(store, &source);
            }
        }
        crate::collaborators::PacketAck::Error(reason) => {
            tracing::warn!(channel = %channel.0, sequence, reason, "packet acked with an error");
            let _ = penalize_source(store, events, &op.chain_id, "ack_error");
        }
    }
    Ok(op)
}

/// Clamps a source's `active` flag to the reputation floor (spec §4.6:
/// "Active flips to false below 0.5"). A source can only be reactivated by
/// re-registration, not by reputation recovering above the floor.
fn apply_active_floor(source: &mut CrossChainOracleSource) {
    let floor = Decimal::from_scaled(REPUTATION_ACTIVE_FLOOR_BP, 4).expect("static floor decodes");
    if source.reputation < floor {
        source.active = false;
    }
}

/// Handles an inbound `PriceUpdate` packet: validates its nonce and updates
/// the cache for `(chain_id, symbol)`. Query/ack bookkeeping belongs to the
/// outbound subscribe/query cycle (`subscribe_to_prices`, `query_price`,
/// `handle_ack`), not to inbound updates, so this only refreshes the
/// source's heartbeat.
#[allow(clippy::too_many_arguments)]
pub fn handle_price_update(
    store: &mut impl Store,
    params: &Params,
    port: &PortId,
    channel: &ChannelId,
    chain_id: &ChainId,
    symbol: String,
    price_scaled: i128,
    price_decimals: u32,
    volume_scaled: i128,
    volume_decimals: u32,
    confidence_scaled: i128,
    confidence_decimals: u32,
    nonce_value: u64,
    packet_timestamp: i64,
    now: i64,
    nonce_ttl_seconds: i64,
) -> OracleResult<()> {
    require_authorized(params, port, channel)?;
    nonce::validate_inbound(store, &channel.0, &chain_id.to_string(), nonce_value, packet_timestamp, now, nonce_ttl_seconds)?;

    let mut source = get_source(store, chain_id)
        .ok_or_else(|| OracleError::DataUnavailable(format!("unregistered source {chain_id}")))?;
    source.last_heartbeat = now;
    put_source(store, &source);

    let price = Decimal::from_scaled(price_scaled, price_decimals)?;
    let volume = Decimal::from_scaled(volume_scaled, volume_decimals)?;
    let confidence = Decimal::from_scaled(confidence_scaled, confidence_decimals)?;
    let cached = CachedCrossChainPrice {
        source: chain_id.clone(),
        symbol: symbol.clone(),
        price,
        volume_24h: volume,
        timestamp: now,
        confidence,
        oracle_count: 1,
    };
    store.put(keys::cached_price(chain_id, &symbol), serde_json::to_vec(&cached).expect("cached price encode"));
    debug!(%chain_id, symbol, %price, "cross-chain price cached");
    Ok(())
}

/// Penalizes a source's reputation (timeout, channel close, anomaly flagged
/// during fusion) by the spec's 0.9 decay multiplier, flipping `active` to
/// false once reputation drops below 0.5 (spec §4.6).
pub fn penalize_source(
    store: &mut impl Store,
    events: &mut EventSink,
    chain_id: &ChainId,
    reason: &str,
) -> OracleResult<Decimal> {
    let mut source = get_source(store, chain_id)
        .ok_or_else(|| OracleError::DataUnavailable(format!("unregistered source {chain_id}")))?;
    let decay = Decimal::from_scaled(REPUTATION_DECAY_BP, 4)?;
    source.reputation = source.reputation.checked_mul(decay)?;
    apply_active_floor(&mut source);
    put_source(store, &source);
    debug!(%chain_id, reason, new_reputation = %source.reputation, active = source.active, "cross-chain source penalized");
    events.emit(Event::OracleSourcePenalized {
        chain_id: chain_id.clone(),
        reason: reason.to_string(),
        new_reputation: source.reputation.to_string(),
    });
    Ok(source.reputation)
}

/// Cleans up every pending operation on `channel` (channel close, spec
/// §4.7 "RefundOnChannelClose"): penalizes each affected source with
/// `reason=ibc_channel_closed`, then returns what was cleaned for the
/// caller to emit `OracleChannelCleanup` events from.
pub fn refund_on_channel_close(store: &mut impl Store, events: &mut EventSink, channel: &ChannelId) -> Vec<PendingOperation> {
    let prefix = keys::pending_op_channel_prefix(&channel.0);
    let ops: Vec<(Vec<u8>, PendingOperation)> = store
        .iter_prefix(&prefix)
        .map(|(k, v)| (k, serde_json::from_slice(&v).expect("pending op decode")))
        .collect();
    for (key, _) in &ops {
        store.delete(key);
    }
    let ops: Vec<PendingOperation> = ops.into_iter().map(|(_, op)| op).collect();
    for op in &ops {
        let _ = penalize_source(store, events, &op.chain_id, "ibc_channel_closed");
    }
    ops
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossChainAggregate {
    pub symbol: String,
    pub price: Decimal,
    pub confidence: Decimal,
    pub oracle_count: u32,
    pub byzantine_safe: bool,
}

/// `ceil(2n/3)`, the quorum `ByzantineSafe` requires stay within the tight
/// band of the median.
fn byzantine_quorum(n: usize) -> usize {
    (2 * n + 2) / 3
}

/// Fuses every fresh, non-anomalous, actively-sourced cached price for
/// `symbol` into one value (spec §4.6): median for anomaly detection,
/// `source.Reputation * price.Confidence`-weighted average for the
/// published price, mean confidence across survivors, and a `ByzantineSafe`
/// flag over the full fresh set.
pub fn aggregate_cross_chain_prices(
    store: &impl Store,
    symbol: &str,
    now: i64,
    staleness_seconds: i64,
    min_sources: u32,
) -> OracleResult<CrossChainAggregate> {
    let mut fresh: Vec<CachedCrossChainPrice> = store
        .iter_prefix(&keys::cached_price_symbol_prefix())
        .map(|(_, v)| serde_json::from_slice::<CachedCrossChainPrice>(&v).expect("cached price decode"))
        .filter(|c| {
            c.symbol == symbol
                && now - c.timestamp <= staleness_seconds
                && get_source(store, &c.source).map(|s| s.active).unwrap_or(false)
        })
        .collect();
    fresh.sort_by(|a, b| a.source.cmp(&b.source));

    if fresh.is_empty() {
        return Err(OracleError::DataUnavailable(format!("no cross-chain data for {symbol}")));
    }
    // Enrichment beyond the spec's literal "fail NoData if empty": a caller
    // can also require a minimum number of independent sources. Distinct
    // from `InsufficientDiversity`, which names the geographic-region check
    // over bonded validators, not cross-chain source count.
    if (fresh.len() as u32) < min_sources {
        return Err(OracleError::InsufficientCrossChainSources {
            symbol: symbol.to_string(),
            found: fresh.len() as u32,
            required: min_sources,
        });
    }

    let mut prices: Vec<Decimal> = fresh.iter().map(|c| c.price).collect();
    prices.sort();
    let median = lower_median(&prices);
    let anomaly_threshold = Decimal::from_scaled(ANOMALY_THRESHOLD_PERCENT, 2)?;
    let byzantine_threshold = Decimal::from_scaled(BYZANTINE_SAFE_THRESHOLD_PERCENT, 2)?;

    let relative_deviation = |price: Decimal| -> OracleResult<Decimal> {
        if median.is_zero() {
            return Ok(Decimal::ZERO);
        }
        Ok(price.checked_sub(median)?.abs().checked_div(median).unwrap_or(Decimal::ZERO))
    };

    let close_to_median = fresh.iter().filter(|c| relative_deviation(c.price).unwrap_or(Decimal::ZERO) <= byzantine_threshold).count();
    let byzantine_safe = fresh.len() >= 3 && close_to_median >= byzantine_quorum(fresh.len());

    let survivors: Vec<&CachedCrossChainPrice> =
        fresh.iter().filter(|c| relative_deviation(c.price).unwrap_or(Decimal::ZERO) <= anomaly_threshold).collect();

    if (survivors.len() as u32) < min_sources {
        return Err(OracleError::InsufficientCrossChainSources {
            symbol: symbol.to_string(),
            found: survivors.len() as u32,
            required: min_sources,
        });
    }

    let weights: Vec<Decimal> = survivors
        .iter()
        .map(|c| {
            let reputation = get_source(store, &c.source).map(|s| s.reputation).unwrap_or(Decimal::ZERO);
            reputation.checked_mul(c.confidence)
        })
        .collect::<Result<_, _>>()?;

    let total_weight: Decimal = weights.iter().try_fold(Decimal::ZERO, |acc, w| acc.checked_add(*w))?;
    let weighted_sum: Decimal = survivors
        .iter()
        .zip(&weights)
        .try_fold(Decimal::ZERO, |acc, (c, w)| acc.checked_add(c.price.checked_mul(*w)?))?;
    let price = if total_weight.is_zero() {
        median
    } else {
        weighted_sum.checked_div(total_weight)?
    };

    let confidence_sum: Decimal =
        survivors.iter().try_fold(Decimal::ZERO, |acc, c| acc.checked_add(c.confidence))?;
    let confidence = confidence_sum.checked_mul_ratio(1, survivors.len() as u128)?;

    Ok(CrossChainAggregate {
        symbol: symbol.to_string(),
        price,
        confidence,
        oracle_count: survivors.len() as u32,
        byzantine_safe,
    })
}
