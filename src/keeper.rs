//! Top-level engine (spec §2): owns the collaborators, exposes one method
//! per message type, and runs the `BeginBlock`/`EndBlock` hooks in the
//! order the system overview specifies — aggregate, snapshot, account for
//! misses, slash, prune.

use std::collections::BTreeSet;

use tracing::info;

use crate::aggregation::{self, Submission};
use crate::breaker;
use crate::collaborators::{PacketAck, Resolver, Slasher, StakingReader, Transport};
use crate::crosschain::{self, CrossChainAggregate};
use crate::decimal::Decimal;
use crate::error::{OracleError, OracleResult};
use crate::events::{Event, EventSink};
use crate::nonce;
use crate::params::{self, Params};
use crate::slashing::{self, SlashOutcome};
use crate::snapshot;
use crate::store::Store;
use crate::types::{Asset, ChainId, ChannelId, PendingOperation, PortId, Price, PriceSnapshot, Sequence, ValidatorAddr};
use crate::validator;

/// Wires every collaborator together. Generic over the store and every
/// external trait so a host can plug in its real chain state and keep
/// everything else exactly as tested here.
pub struct Keeper<St, Sk, Sl, Tr, Rs>
where
    St: Store,
    Sk: StakingReader,
    Sl: Slasher,
    Tr: Transport,
    Rs: Resolver,
{
    pub store: St,
    pub staking: Sk,
    pub slasher: Sl,
    pub transport: Tr,
    pub resolver: Rs,
    pub events: EventSink,
}

impl<St, Sk, Sl, Tr, Rs> Keeper<St, Sk, Sl, Tr, Rs>
where
    St: Store,
    Sk: StakingReader,
    Sl: Slasher,
    Tr: Transport,
    Rs: Resolver,
{
    pub fn new(store: St, staking: Sk, slasher: Sl, transport: Tr, resolver: Rs) -> Self {
        Keeper { store, staking, slasher, transport, resolver, events: EventSink::new() }
    }

    fn params(&self) -> Params {
        params::get_params(&self.store).expect("params must be initialized before use")
    }

    // ---- messages --------------------------------------------------

    pub fn submit_price(
        &mut self,
        validator: &ValidatorAddr,
        asset: &Asset,
        price: Decimal,
        ip: &str,
        block_height: u64,
    ) -> OracleResult<()> {
        validator::submit_price(&mut self.store, &self.staking, &self.resolver, validator, asset, price, ip, block_height)
    }

    pub fn emergency_pause(&mut self, actor: &str, reason: &str, height: u64) -> OracleResult<()> {
        params::emergency_pause(&mut self.store, actor, reason, height)?;
        self.events.emit(Event::EmergencyPause {
            paused_by: actor.to_string(),
            pause_reason: reason.to_string(),
            block_height: height,
        });
        Ok(())
    }

    pub fn resume(&mut self, actor: &str, reason: &str, height: u64) -> OracleResult<()> {
        params::resume(&mut self.store, actor, reason)?;
        self.events.emit(Event::EmergencyResume { resumed_by: actor.to_string(), reason: reason.to_string(), block_height: height });
        Ok(())
    }

    pub fn set_price_override(&mut self, pair: &Asset, price: Decimal, expires_at_unix: i64, source: &str) -> OracleResult<()> {
        breaker::set_price_override(&mut self.store, pair, price, expires_at_unix, source)?;
        self.events.emit(Event::PriceOverrideSet { pair: pair.clone(), price: price.to_string(), expires_at_unix });
        Ok(())
    }

    pub fn clear_price_override(&mut self, pair: &Asset) {
        breaker::clear_price_override(&mut self.store, pair);
        self.events.emit(Event::PriceOverrideCleared { pair: pair.clone() });
    }

    /// `GetPriceWithOverride` (spec §4.9/§8-S6): an active override wins over
    /// the last committed `Price`.
    pub fn get_price_with_override(&mut self, pair: &Asset, now: i64) -> OracleResult<Decimal> {
        breaker::get_price_with_override(&mut self.store, pair, now)
    }

    /// Toggles the `slashing_disabled` switch checked by `end_block`'s miss
    /// accounting (spec §4.5). Distinct from pause/resume: slashing can be
    /// turned off independently of the oracle accepting submissions.
    pub fn set_slashing_disabled(&mut self, disabled: bool) {
        if disabled {
            self.store.put(crate::store::keys::SLASHING_DISABLED.to_vec(), vec![1]);
            self.events.emit(Event::SlashingDisabled);
        } else {
            self.store.delete(crate::store::keys::SLASHING_DISABLED);
            self.events.emit(Event::SlashingEnabled);
        }
    }

    pub fn open_circuit_breaker(&mut self, scope: Option<&Asset>, actor: &str, reason: &str, height: u64) -> OracleResult<()> {
        breaker::open_circuit_breaker(&mut self.store, scope, actor, reason, height)?;
        self.events.emit(Event::CircuitBreakerOpen {
            scope: scope.cloned().unwrap_or_else(|| "global".to_string()),
            reason: reason.to_string(),
            actor: actor.to_string(),
        });
        Ok(())
    }

    pub fn close_circuit_breaker(&mut self, scope: Option<&Asset>, actor: &str) -> OracleResult<()> {
        breaker::close_circuit_breaker(&mut self.store, scope, actor)?;
        self.events.emit(Event::CircuitBreakerClose {
            scope: scope.cloned().unwrap_or_else(|| "global".to_string()),
            actor: actor.to_string(),
        });
        Ok(())
    }

    pub fn register_cross_chain_source(
        &mut self,
        chain_id: String,
        oracle_type: String,
        connection_id: String,
        channel_id: ChannelId,
        now: i64,
    ) {
        crosschain::register_source(&mut self.store, chain_id.clone(), oracle_type, connection_id, channel_id, now);
        self.events.emit(Event::OracleSourceRegistered { chain_id });
    }

    pub fn close_channel(&mut self, channel: &ChannelId) {
        let cleaned = crosschain::refund_on_channel_close(&mut self.store, &mut self.events, channel);
        for op in cleaned {
            self.events.emit(Event::OracleChannelCleanup {
                channel_id: op.channel_id,
                sequence: op.sequence,
                packet_type: op.packet_type,
            });
        }
    }

    pub fn subscribe_to_cross_chain_prices(
        &mut self,
        source_chain_id: &ChainId,
        port: &PortId,
        symbols: Vec<String>,
        timeout_ns: u64,
    ) -> OracleResult<Sequence> {
        let params = self.params();
        crosschain::subscribe_to_prices(&mut self.store, &mut self.transport, &mut self.events, &params, source_chain_id, port, symbols, timeout_ns)
    }

    pub fn query_cross_chain_price(
        &mut self,
        source_chain_id: &ChainId,
        port: &PortId,
        symbol: String,
        timeout_ns: u64,
    ) -> OracleResult<Sequence> {
        let params = self.params();
        crosschain::query_price(&mut self.store, &mut self.transport, &mut self.events, &params, source_chain_id, port, symbol, timeout_ns)
    }

    /// Handles an inbound cross-chain `price_update` packet (spec §4.6).
    #[allow(clippy::too_many_arguments)]
    pub fn handle_cross_chain_price_update(
        &mut self,
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
    ) -> OracleResult<()> {
        let params = self.params();
        crosschain::handle_price_update(
            &mut self.store,
            &params,
            port,
            channel,
            chain_id,
            symbol,
            price_scaled,
            price_decimals,
            volume_scaled,
            volume_decimals,
            confidence_scaled,
            confidence_decimals,
            nonce_value,
            packet_timestamp,
            now,
            params.nonce_ttl_seconds,
        )
    }

    /// `OnAcknowledgementPacket` and `OnTimeoutPacket` (spec §4.7) both clear
    /// the matching pending operation; a timeout is just an ack that never
    /// arrives, so callers report it through the same `PacketAck::Error`
    /// path with a fixed reason.
    pub fn on_packet_ack(&mut self, channel: &ChannelId, sequence: Sequence, ack: PacketAck) -> OracleResult<PendingOperation> {
        crosschain::handle_ack(&mut self.store, &mut self.events, channel, sequence, ack)
    }

    pub fn on_packet_timeout(&mut self, channel: &ChannelId, sequence: Sequence) -> OracleResult<PendingOperation> {
        crosschain::handle_ack(&mut self.store, &mut self.events, channel, sequence, PacketAck::Error("timeout"))
    }

    pub fn aggregate_cross_chain_prices(
        &self,
        symbol: &str,
        now: i64,
        staleness_seconds: i64,
        min_sources: u32,
    ) -> OracleResult<CrossChainAggregate> {
        crosschain::aggregate_cross_chain_prices(&self.store, symbol, now, staleness_seconds, min_sources)
    }

    pub fn update_params(&mut self, params: Params) -> OracleResult<()> {
        params::set_params(&mut self.store, params)
    }

    // ---- block hooks -------------------------------------------------

    pub fn begin_block(&mut self, _height: u64) {}

    /// Runs the full per-block pipeline: for every asset with a vote-period
    /// boundary, aggregate submissions, append the snapshot, and account for
    /// liveness across the bonded set; then prune expired snapshots and
    /// nonce records. Circuit-breaker auto-recovery is checked on demand by
    /// every gated call, not swept here.
    pub fn end_block(&mut self, height: u64, now: i64) {
        let params = self.params();
        if height % params.vote_period != 0 {
            self.prune(height, now, &params);
            return;
        }

        for bonded in self.staking.bonded_validators() {
            if validator::get_validator_oracle(&self.store, &bonded).is_none() {
                validator::put_validator_oracle(
                    &mut self.store,
                    &crate::types::ValidatorOracle::new(bonded, "unknown".to_string(), String::new(), 0),
                );
            }
        }

        let assets = validator::known_assets(&self.store);
        let mut voted_by_asset: BTreeSet<ValidatorAddr> = BTreeSet::new();

        for asset in &assets {
            let submissions: Vec<Submission> = validator::iter_validator_prices(&self.store, asset)
                .into_iter()
                .map(|vp| {
                    let region = validator::get_validator_oracle(&self.store, &vp.validator)
                        .map(|o| o.geographic_region)
                        .unwrap_or_else(|| "unknown".to_string());
                    Submission { validator: vp.validator, price: vp.price, voting_power: vp.voting_power, region }
                })
                .collect();

            // Comment 2: a validator counts as having voted this period if it
            // submitted at all, regardless of whether its asset's period then
            // succeeded, failed a consensus gate, or had its price filtered
            // out as an outlier (spec §4.5).
            for submission in &submissions {
                voted_by_asset.insert(submission.validator.clone());
            }

            match aggregation::aggregate(
                asset,
                submissions,
                self.staking.total_bonded_power(),
                params.min_voting_power_for_consensus,
                params.vote_threshold,
                params.require_geographic_diversity,
                params.min_geographic_regions,
            ) {
                Ok(outcome) => {
                    snapshot::set_price_snapshot(
                        &mut self.store,
                        asset,
                        PriceSnapshot { price: outcome.price, block_height: height, block_time: now },
                    );
                    snapshot::set_price(
                        &mut self.store,
                        &Price { asset: asset.clone(), price: outcome.price, block_height: height, block_time: now, num_validators: outcome.num_validators },
                    );
                    self.events.emit(Event::PriceAggregated {
                        asset: asset.clone(),
                        price: outcome.price.to_string(),
                        num_validators: outcome.num_validators,
                        block_height: height,
                    });
                    for validator in &outcome.surviving_validators {
                        slashing::record_valid_vote(&mut self.store, validator);
                    }
                    // Step 6: clear consumed submissions only on a committed
                    // aggregation; a failed period preserves them so the
                    // last-good price stands (Open Question resolution 2).
                    validator::clear_validator_prices(&mut self.store, asset);
                }
                Err(e) => {
                    info!(asset, error = %e, "aggregation failed for this vote period");
                }
            }
        }

        let slashing_disabled = self.store.get(crate::store::keys::SLASHING_DISABLED).is_some();
        for validator in self.staking.bonded_validators() {
            if !voted_by_asset.contains(&validator) {
                let outcome = slashing::record_miss(&mut self.store, &mut self.slasher, &validator, &params, slashing_disabled);
                if outcome == SlashOutcome::Slashed {
                    self.events.emit(Event::ValidatorSlashed { validator: validator.0.clone(), fraction: params.slash_fraction.to_string() });
                }
            }
        }

        self.prune(height, now, &params);
    }

    fn prune(&mut self, _height: u64, now: i64, params: &Params) {
        for asset in validator::known_assets(&self.store) {
            snapshot::delete_old_snapshots(&mut self.store, &asset, now - params.twap_lookback_window);
        }
        nonce::prune_expired(&mut self.store, now, params.nonce_ttl_seconds);
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        self.events.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{FakeResolver, FakeSlasher, FakeStakingReader, FakeTransport};
    use crate::store::MemStore;

    fn new_keeper() -> Keeper<MemStore, FakeStakingReader, FakeSlasher, FakeTransport, FakeResolver> {
        let mut store = MemStore::new();
        params::set_params(&mut store, params::default_params_for_tests()).unwrap();
        let mut staking = FakeStakingReader::new();
        staking.bond(ValidatorAddr("val-a".to_string()), 100);
        staking.bond(ValidatorAddr("val-b".to_string()), 100);
        staking.bond(ValidatorAddr("val-c".to_string()), 100);
        Keeper::new(store, staking, FakeSlasher::default(), FakeTransport::default(), FakeResolver::new())
    }

    #[test]
    fn end_to_end_submission_and_aggregation() {
        let mut keeper = new_keeper();
        let asset = "ATOM/USD".to_string();
        for name in ["val-a", "val-b", "val-c"] {
            keeper
                .submit_price(&ValidatorAddr(name.to_string()), &asset, Decimal::from_i128(10), "1.2.3.4", 1)
                .unwrap();
        }
        keeper.end_block(10, 1000);
        let events = keeper.drain_events();
        assert!(events.iter().any(|e| matches!(e, Event::PriceAggregated { .. })));
        let snaps = snapshot::iter_price_snapshots(&keeper.store, &asset);
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].price, Decimal::from_i128(10));
    }

    #[test]
    fn cross_chain_subscribe_ack_and_update_round_trip() {
        use crate::params::AuthorizedChannelKey;
        use crate::types::{ChainId, PortId};

        let mut keeper = new_keeper();
        let mut params = keeper.params();
        params.authorized_channels.insert(AuthorizedChannelKey { port: "oracle".to_string(), channel: "channel-7".to_string() });
        keeper.update_params(params).unwrap();

        let chain: ChainId = "osmosis-1".to_string();
        let channel = ChannelId("channel-7".to_string());
        let port = PortId("oracle".to_string());
        keeper.register_cross_chain_source(chain.clone(), "native".to_string(), "connection-0".to_string(), channel.clone(), 1000);

        let seq = keeper.subscribe_to_cross_chain_prices(&chain, &port, vec!["ATOM/USD".to_string()], 30).unwrap();
        keeper.on_packet_ack(&channel, seq, crate::collaborators::PacketAck::Success).unwrap();

        keeper
            .handle_cross_chain_price_update(&port, &channel, &chain, "ATOM/USD".to_string(), 1000, 2, 0, 0, 95, 2, 1, 1000, 1000)
            .unwrap();

        let aggregate = keeper.aggregate_cross_chain_prices("ATOM/USD", 1000, 3600, 1).unwrap();
        assert_eq!(aggregate.price, Decimal::from_i128(10));
        assert_eq!(aggregate.oracle_count, 1);
    }

    #[test]
    fn pause_blocks_submission() {
        let mut keeper = new_keeper();
        keeper.emergency_pause("admin", "incident", 1).unwrap();
        let res = keeper.submit_price(&ValidatorAddr("val-a".to_string()), &"ATOM/USD".to_string(), Decimal::from_i128(10), "1.2.3.4", 1);
        assert!(matches!(res, Err(OracleError::Paused { .. })));
    }

    #[test]
    fn non_voting_period_heights_skip_aggregation() {
        let mut keeper = new_keeper();
        let asset = "ATOM/USD".to_string();
        keeper.submit_price(&ValidatorAddr("val-a".to_string()), &asset, Decimal::from_i128(10), "1.2.3.4", 1).unwrap();
        keeper.end_block(3, 1000);
        assert!(snapshot::iter_price_snapshots(&keeper.store, &asset).is_empty());
    }

    #[test]
    fn price_with_override_falls_back_to_committed_price_once_aggregated() {
        let mut keeper = new_keeper();
        let asset = "ATOM/USD".to_string();
        for name in ["val-a", "val-b", "val-c"] {
            keeper
                .submit_price(&ValidatorAddr(name.to_string()), &asset, Decimal::from_i128(10), "1.2.3.4", 1)
                .unwrap();
        }
        keeper.end_block(10, 1000);
        assert_eq!(keeper.get_price_with_override(&asset, 1000).unwrap(), Decimal::from_i128(10));
    }

    #[test]
    fn price_with_override_prefers_an_active_override_over_the_committed_price() {
        let mut keeper = new_keeper();
        let asset = "ATOM/USD".to_string();
        for name in ["val-a", "val-b", "val-c"] {
            keeper
                .submit_price(&ValidatorAddr(name.to_string()), &asset, Decimal::from_i128(10), "1.2.3.4", 1)
                .unwrap();
        }
        keeper.end_block(10, 1000);
        keeper.set_price_override(&asset, Decimal::from_i128(11), 2000, "admin").unwrap();
        assert_eq!(keeper.get_price_with_override(&asset, 1500).unwrap(), Decimal::from_i128(11));
        // Past expiry the override lazily clears and the committed price resurfaces.
        assert_eq!(keeper.get_price_with_override(&asset, 2500).unwrap(), Decimal::from_i128(10));
    }

    #[test]
    fn a_validator_that_submitted_is_not_miss_counted_even_if_its_asset_fails_to_aggregate() {
        let mut keeper = new_keeper();
        let asset = "ATOM/USD".to_string();
        // Only one of three bonded validators submits; with a 67% threshold
        // this asset fails `InsufficientConsensus`, but the submitter must
        // still count as having voted (comment 2 / spec §4.5) and keep a
        // zero miss counter, while the two silent validators do accrue one.
        keeper.submit_price(&ValidatorAddr("val-a".to_string()), &asset, Decimal::from_i128(10), "1.2.3.4", 1).unwrap();
        keeper.end_block(10, 1000);
        let events = keeper.drain_events();
        assert!(!events.iter().any(|e| matches!(e, Event::PriceAggregated { .. })));
        let voter = validator::get_validator_oracle(&keeper.store, &ValidatorAddr("val-a".to_string())).unwrap();
        assert_eq!(voter.miss_counter, 0);
        let silent = validator::get_validator_oracle(&keeper.store, &ValidatorAddr("val-b".to_string())).unwrap();
        assert_eq!(silent.miss_counter, 1);
    }

    #[test]
    fn disabling_slashing_suppresses_miss_penalties() {
        let mut keeper = new_keeper();
        keeper.set_slashing_disabled(true);
        let events = keeper.drain_events();
        assert!(events.iter().any(|e| matches!(e, Event::SlashingDisabled)));
        keeper.end_block(10, 1000);
        let events = keeper.drain_events();
        assert!(!events.iter().any(|e| matches!(e, Event::ValidatorSlashed { .. })));
    }
}
