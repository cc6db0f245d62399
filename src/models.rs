use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::AddAssign;
use std::sync::Arc;

use chrono::{Local, TimeZone};
use ethers_core::abi::Abi;
use ethers_core::types::H160;
use serde::{Deserialize, Serialize};

/// Balance scaled to the contract's display unit (e.g. whole tokens).
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisplayBalance(pub f64);

/// Amount in the contract's smallest unit, as emitted in the event payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawAmount(pub f64);

impl AddAssign for RawAmount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl From<DisplayBalance> for f64 {
    fn from(balance: DisplayBalance) -> Self {
        balance.0
    }
}

impl From<RawAmount> for f64 {
    fn from(amount: RawAmount) -> Self {
        amount.0
    }
}

impl fmt::Display for DisplayBalance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RawAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Aggregated, persisted picture of one event stream.
///
/// Field names on disk follow the checkpoint record format
/// `{ maxBlock, addressMap, transfersVolume }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexState {
    #[serde(rename = "maxBlock")]
    pub last_scanned_block: u64,
    /// First-sight balance of every participant seen so far.
    #[serde(rename = "addressMap", default)]
    pub address_balances: BTreeMap<String, DisplayBalance>,
    /// Calendar date (`YYYY-MM-DD`, local time) to raw transferred amount.
    #[serde(rename = "transfersVolume", default)]
    pub daily_volume: BTreeMap<String, RawAmount>,
}

impl IndexState {
    pub fn has_seen(&self, address: &str) -> bool {
        self.address_balances.contains_key(address)
    }

    pub fn total_volume(&self) -> RawAmount {
        RawAmount(self.daily_volume.values().map(|v| v.0).sum())
    }
}

/// A historical event as returned by the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEvent {
    pub name: String,
    pub removed: bool,
    pub block_number: u64,
    /// Decoded event fields, rendered as strings.
    pub payload: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub timestamp: i64,
}

/// Upper bound of an event query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTarget {
    Latest,
    #[cfg(test)]
    Number(u64),
}

/// A deployed contract together with its interface description.
#[derive(Debug, Clone)]
pub struct ContractHandle {
    pub name: String,
    pub address: H160,
    pub abi: Arc<Abi>,
    /// Decimal places between the base unit and the display unit.
    pub decimals: u32,
}

/// Which method to call, on which contract, to learn a participant's balance.
#[derive(Debug, Clone)]
pub struct BalanceQuery {
    pub contract: ContractHandle,
    pub method: String,
}

/// Designates the value-transfer event whose amounts feed `daily_volume`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    pub event: String,
    pub amount_field: String,
}

/// One independently indexed (contract, event) pair.
#[derive(Debug, Clone)]
pub struct EventStreamSpec {
    /// Checkpoint identity.
    pub id: String,
    pub contract: ContractHandle,
    pub event: String,
    /// Payload fields holding participant addresses, e.g. `from`/`to`.
    pub roles: Vec<String>,
    pub balance: BalanceQuery,
    pub volume: Option<VolumeSpec>,
}

/// Calendar date of a block timestamp in the local timezone.
pub fn volume_date(timestamp: i64) -> Option<String> {
    Local
        .timestamp_opt(timestamp, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d").to_string())
}
