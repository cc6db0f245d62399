use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::IndexerError;
use crate::models::{BalanceQuery, ContractHandle, EventStreamSpec, VolumeSpec};

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_token_unit")]
    pub token_unit: String,
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default = "default_blocks_per_request")]
    pub blocks_per_request: u64,
    pub etherscan_api_key: Option<String>,
    #[serde(default)]
    pub checkpoint: CheckpointSettings,
    #[serde(default)]
    pub report: ReportSettings,
    pub contracts: BTreeMap<String, ContractSettings>,
    #[serde(default)]
    pub streams: Vec<StreamSettings>,
    pub supply: Option<SupplySettings>,
    #[serde(default)]
    pub holders: Vec<HolderGroupSettings>,
    #[serde(default)]
    pub derived: Vec<DerivedSettings>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContractSettings {
    pub address: String,
    #[serde(default = "default_decimals")]
    pub decimals: u32,
    pub abi_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    #[default]
    Json,
    Sqlite,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CheckpointSettings {
    #[serde(default)]
    pub backend: CheckpointBackend,
    /// Directory for the JSON backend, database URL for SQLite.
    #[serde(default = "default_checkpoint_location")]
    pub location: String,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            backend: CheckpointBackend::Json,
            location: default_checkpoint_location(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportSettings {
    #[serde(default = "default_report_path")]
    pub path: PathBuf,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            path: default_report_path(),
            top_n: default_top_n(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamSettings {
    pub id: String,
    pub contract: String,
    pub event: String,
    pub roles: Vec<String>,
    #[serde(default = "default_balance_method")]
    pub balance_method: String,
    /// Contract answering `balance_method`; defaults to `contract`.
    pub balance_contract: Option<String>,
    /// Payload field with the transferred amount; enables daily volume.
    pub volume_field: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SupplySettings {
    pub contract: String,
    #[serde(default = "default_supply_method")]
    pub method: String,
}

/// One address or a list of them.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum Addresses {
    One(String),
    Many(Vec<String>),
}

impl Addresses {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(address) => vec![address.clone()],
            Self::Many(addresses) => addresses.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HolderGroupSettings {
    pub name: String,
    pub contract: String,
    #[serde(default = "default_balance_method")]
    pub method: String,
    pub address: Addresses,
    /// Keep and rank per-address balances, not just the total.
    #[serde(default)]
    pub ranked: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DerivedSettings {
    pub name: String,
    /// Stream whose known addresses are queried.
    pub stream: String,
    pub contract: String,
    pub method: String,
}

fn default_title() -> String {
    "Token Dashboard".to_string()
}

fn default_token_unit() -> String {
    "MANA".to_string()
}

fn default_rpc_url() -> String {
    "http://localhost:8545".to_string()
}

fn default_blocks_per_request() -> u64 {
    100_000
}

fn default_decimals() -> u32 {
    18
}

fn default_checkpoint_location() -> String {
    "./data".to_string()
}

fn default_report_path() -> PathBuf {
    PathBuf::from("dashboard.json")
}

fn default_top_n() -> usize {
    5
}

fn default_balance_method() -> String {
    "balanceOf".to_string()
}

fn default_supply_method() -> String {
    "totalSupply".to_string()
}

impl Settings {
    /// Load `path` (YAML), then apply `DASHBOARD__*` environment overrides.
    pub fn load(path: &Path) -> Result<Self, IndexerError> {
        let _ = dotenvy::dotenv();
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("DASHBOARD").separator("__"))
            .build()
            .and_then(|c| c.try_deserialize::<Settings>())
            .map_err(|e| IndexerError::Configuration(format!("{}: {e}", path.display())))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.blocks_per_request == 0 {
            return Err(IndexerError::Configuration(
                "blocks_per_request must be positive".into(),
            ));
        }

        let mut ids = HashSet::new();
        for stream in &self.streams {
            if !is_safe_id(&stream.id) {
                return Err(IndexerError::Configuration(format!(
                    "stream id '{}' may only contain ASCII letters, digits, '-' and '_'",
                    stream.id
                )));
            }
            if !ids.insert(stream.id.as_str()) {
                return Err(IndexerError::Configuration(format!(
                    "duplicate stream id '{}'",
                    stream.id
                )));
            }
            if stream.roles.is_empty() {
                return Err(IndexerError::Configuration(format!(
                    "stream '{}' has no participant roles",
                    stream.id
                )));
            }
            self.require_contract(&stream.contract)?;
            if let Some(name) = &stream.balance_contract {
                self.require_contract(name)?;
            }
        }

        if let Some(supply) = &self.supply {
            self.require_contract(&supply.contract)?;
        }
        for group in &self.holders {
            self.require_contract(&group.contract)?;
        }
        for derived in &self.derived {
            self.require_contract(&derived.contract)?;
            if !ids.contains(derived.stream.as_str()) {
                return Err(IndexerError::Configuration(format!(
                    "ranking '{}' refers to unknown stream '{}'",
                    derived.name, derived.stream
                )));
            }
        }
        Ok(())
    }

    fn require_contract(&self, name: &str) -> Result<&ContractSettings, IndexerError> {
        self.contracts
            .get(name)
            .ok_or_else(|| IndexerError::Configuration(format!("unknown contract '{name}'")))
    }

    /// Bind each configured stream to its loaded contract handles.
    pub fn event_streams(
        &self,
        contracts: &BTreeMap<String, ContractHandle>,
    ) -> Result<Vec<EventStreamSpec>, IndexerError> {
        self.streams
            .iter()
            .map(|stream| {
                let contract = handle(contracts, &stream.contract)?;
                let balance_contract = match &stream.balance_contract {
                    Some(name) => handle(contracts, name)?,
                    None => contract.clone(),
                };
                Ok(EventStreamSpec {
                    id: stream.id.clone(),
                    contract,
                    event: stream.event.clone(),
                    roles: stream.roles.clone(),
                    balance: BalanceQuery {
                        contract: balance_contract,
                        method: stream.balance_method.clone(),
                    },
                    volume: stream.volume_field.as_ref().map(|field| VolumeSpec {
                        event: stream.event.clone(),
                        amount_field: field.clone(),
                    }),
                })
            })
            .collect()
    }
}

/// Stream ids name checkpoint files, so they must stay inside one directory.
fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub fn handle(
    contracts: &BTreeMap<String, ContractHandle>,
    name: &str,
) -> Result<ContractHandle, IndexerError> {
    contracts
        .get(name)
        .cloned()
        .ok_or_else(|| IndexerError::Configuration(format!("contract '{name}' was not loaded")))
}
