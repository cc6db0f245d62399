//! Interface descriptions for the configured contracts.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use ethers::etherscan::Client as EtherscanClient;
use ethers::types::Chain;
use ethers_core::abi::Abi;
use ethers_core::types::H160;
use log::info;
use tokio::task::JoinSet;

use crate::config::{ContractSettings, Settings};
use crate::error::IndexerError;
use crate::models::ContractHandle;

/// Resolve every configured contract into a handle, fetching ABIs concurrently.
pub async fn load_contracts(
    settings: &Settings,
) -> Result<BTreeMap<String, ContractHandle>, IndexerError> {
    let etherscan = match settings.etherscan_api_key.as_deref() {
        Some(key) => Some(Arc::new(
            EtherscanClient::new(Chain::Mainnet, key)
                .map_err(|e| IndexerError::Configuration(format!("etherscan client: {e}")))?,
        )),
        None => None,
    };

    let mut tasks = JoinSet::new();
    for (name, contract) in &settings.contracts {
        let name = name.clone();
        let contract = contract.clone();
        let etherscan = etherscan.clone();
        tasks.spawn(async move {
            let handle = load_contract(&name, &contract, etherscan.as_deref()).await;
            (name, handle)
        });
    }

    let mut handles = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        let (name, handle) = joined.map_err(|e| IndexerError::ChainQuery(e.to_string()))?;
        handles.insert(name, handle?);
    }
    Ok(handles)
}

async fn load_contract(
    name: &str,
    settings: &ContractSettings,
    etherscan: Option<&EtherscanClient>,
) -> Result<ContractHandle, IndexerError> {
    let address: H160 = settings.address.parse().map_err(|e| {
        IndexerError::Configuration(format!("contract '{name}' address '{}': {e}", settings.address))
    })?;

    let abi = match (&settings.abi_path, etherscan) {
        (Some(path), _) => read_abi_file(path).await?,
        (None, Some(client)) => {
            info!("Fetching ABI for '{}' ({:?}) from Etherscan", name, address);
            client
                .contract_abi(address)
                .await
                .map_err(|e| IndexerError::ChainQuery(format!("ABI for '{name}': {e}")))?
        }
        (None, None) => {
            return Err(IndexerError::Configuration(format!(
                "contract '{name}' has no abi_path and no etherscan_api_key is set"
            )))
        }
    };

    Ok(ContractHandle {
        name: name.to_string(),
        address,
        abi: Arc::new(abi),
        decimals: settings.decimals,
    })
}

/// Read an ABI JSON file. Accepts either a bare ABI array or the
/// explorer response shape `{"result": "<abi json>"}`.
pub async fn read_abi_file(path: &Path) -> Result<Abi, IndexerError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| IndexerError::Configuration(format!("read {}: {e}", path.display())))?;
    parse_abi(&text)
        .map_err(|e| IndexerError::Configuration(format!("parse {}: {e}", path.display())))
}

fn parse_abi(text: &str) -> Result<Abi, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    match value.get("result").and_then(|r| r.as_str()) {
        Some(inner) => serde_json::from_str(inner),
        None => serde_json::from_value(value),
    }
}
