//! External collaborator interfaces (spec §1, §9 "channel-capability model").
//!
//! These are the only seams into the rest of a chain: the bonded-validator
//! set, the slashing primitive, IBC-style packet transport, and GeoIP
//! resolution are all consumed through a trait, never implemented here. Each
//! trait ships a deterministic in-memory fake so the engine can be exercised
//! end-to-end without a real chain.

use std::collections::BTreeMap;

use crate::types::{ChannelId, PortId, Sequence, ValidatorAddr, VotingPower};

pub trait StakingReader {
    fn is_bonded(&self, validator: &ValidatorAddr) -> bool;
    fn voting_power(&self, validator: &ValidatorAddr) -> VotingPower;
    fn total_bonded_power(&self) -> VotingPower;
    /// All currently bonded validators, used by EndBlock miss accounting.
    fn bonded_validators(&self) -> Vec<ValidatorAddr>;
}

pub trait Slasher {
    fn slash(&mut self, validator: &ValidatorAddr, fraction_raw: [u8; 32]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketAck {
    Success,
    Error(&'static str),
}

pub trait Transport {
    fn bind_port(&mut self, port: &PortId);
    fn claim_capability(&mut self, port: &PortId, channel: &ChannelId);
    /// Sends a packet; returns the sequence number assigned by the channel.
    fn send_packet(
        &mut self,
        port: &PortId,
        channel: &ChannelId,
        data: Vec<u8>,
        timeout_ns: u64,
    ) -> Sequence;
}

pub trait Resolver {
    /// Resolves an IP address to a coarse geographic region string, or
    /// `None` if the lookup fails or the cache has nothing cached.
    fn resolve_region(&self, ip: &str) -> Option<String>;
}

/// Deterministic in-memory [`StakingReader`] fake for tests.
#[derive(Debug, Default, Clone)]
pub struct FakeStakingReader {
    power: BTreeMap<ValidatorAddr, VotingPower>,
    bonded: std::collections::BTreeSet<ValidatorAddr>,
}

impl FakeStakingReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bond(&mut self, validator: ValidatorAddr, power: VotingPower) {
        self.bonded.insert(validator.clone());
        self.power.insert(validator, power);
    }

    pub fn unbond(&mut self, validator: &ValidatorAddr) {
        self.bonded.remove(validator);
        self.power.remove(validator);
    }
}

impl StakingReader for FakeStakingReader {
    fn is_bonded(&self, validator: &ValidatorAddr) -> bool {
        self.bonded.contains(validator)
    }

    fn voting_power(&self, validator: &ValidatorAddr) -> VotingPower {
        self.power.get(validator).copied().unwrap_or(0)
    }

    fn total_bonded_power(&self) -> VotingPower {
        self.bonded.iter().map(|v| self.voting_power(v)).sum()
    }

    fn bonded_validators(&self) -> Vec<ValidatorAddr> {
        self.bonded.iter().cloned().collect()
    }
}

/// Records every slash call for assertions; never touches real stake.
#[derive(Debug, Default, Clone)]
pub struct FakeSlasher {
    pub slashes: Vec<(ValidatorAddr, [u8; 32])>,
}

impl Slasher for FakeSlasher {
    fn slash(&mut self, validator: &ValidatorAddr, fraction_raw: [u8; 32]) {
        self.slashes.push((validator.clone(), fraction_raw));
    }
}

/// In-memory [`Transport`] fake: assigns monotone per-channel sequence
/// numbers and records every send for assertions.
#[derive(Debug, Default, Clone)]
pub struct FakeTransport {
    next_sequence: BTreeMap<String, Sequence>,
    pub sent: Vec<(PortId, ChannelId, Vec<u8>, u64)>,
}

impl Transport for FakeTransport {
    fn bind_port(&mut self, _port: &PortId) {}
    fn claim_capability(&mut self, _port: &PortId, _channel: &ChannelId) {}

    fn send_packet(
        &mut self,
        port: &PortId,
        channel: &ChannelId,
        data: Vec<u8>,
        timeout_ns: u64,
    ) -> Sequence {
        let seq = self.next_sequence.entry(channel.0.clone()).or_insert(0);
        *seq += 1;
        let sequence = *seq;
        self.sent.push((port.clone(), channel.clone(), data, timeout_ns));
        sequence
    }
}

/// Static IP→region table fake for [`Resolver`].
#[derive(Debug, Default, Clone)]
pub struct FakeResolver {
    table: BTreeMap<String, String>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, ip: &str, region: &str) {
        self.table.insert(ip.to_string(), region.to_string());
    }
}

impl Resolver for FakeResolver {
    fn resolve_region(&self, ip: &str) -> Option<String> {
        self.table.get(ip).cloned()
    }
}
