//! Events emitted by the engine (spec §6). Plays the role of the teacher's
//! `#[event]` structs (`OracleInitialized`, `PriceUpdated`, …), collected here
//! as a single enum so the keeper can hand callers one typed event stream
//! instead of many ad-hoc emit sites.

use crate::types::{Asset, ChannelId, PacketType};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    OracleChannelCleanup { channel_id: ChannelId, sequence: u64, packet_type: PacketType },
    OracleSourcePenalized { chain_id: String, reason: String, new_reputation: String },
    OracleSourceRegistered { chain_id: String },
    CircuitBreakerOpen { scope: String, reason: String, actor: String },
    CircuitBreakerClose { scope: String, actor: String },
    PriceOverrideSet { pair: Asset, price: String, expires_at_unix: i64 },
    PriceOverrideCleared { pair: Asset },
    SlashingDisabled,
    SlashingEnabled,
    EmergencyPause { paused_by: String, pause_reason: String, block_height: u64 },
    EmergencyResume { resumed_by: String, reason: String, block_height: u64 },
    GeographicConcentrationWarning { region: String, region_share: String },
    OracleIbcPacketSent { channel: ChannelId, sequence: u64 },
    PriceAggregated { asset: Asset, price: String, num_validators: u32, block_height: u64 },
    ValidatorSlashed { validator: String, fraction: String },
}

/// Collects events emitted during a single message or `EndBlock` call.
#[derive(Debug, Default, Clone)]
pub struct EventSink {
    events: Vec<Event>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn drain(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn as_slice(&self) -> &[Event] {
        &self.events
    }
}
