use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ethers_core::abi::token::{LenientTokenizer, Tokenizer};
use ethers_core::abi::{RawLog, Token};
use ethers_core::types::transaction::eip2718::TypedTransaction;
use ethers_core::types::{BlockId, BlockNumber, Filter, Log, TransactionRequest, U256, U64};
use ethers_core::utils::to_checksum;
use ethers_providers::{Http, Middleware, Provider};
use log::debug;

use crate::error::IndexerError;
use crate::ledger::LedgerClient;
use crate::models::{BlockHeader, BlockTarget, ContractHandle, LedgerEvent};

/// JSON-RPC node client. The provider is owned here and shared by reference;
/// there is no process-wide connection.
pub struct EthereumClient {
    provider: Arc<Provider<Http>>,
    blocks_per_request: u64,
}

impl EthereumClient {
    pub fn new(rpc_url: &str, blocks_per_request: u64) -> Result<Self, IndexerError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| IndexerError::Configuration(format!("rpc url '{rpc_url}': {e}")))?;
        if blocks_per_request == 0 {
            return Err(IndexerError::Configuration(
                "blocks_per_request must be positive".into(),
            ));
        }

        Ok(Self {
            provider: Arc::new(provider),
            blocks_per_request,
        })
    }

    pub async fn get_latest_block_number(&self) -> Result<u64, IndexerError> {
        let block_number = self
            .provider
            .get_block_number()
            .await
            .map_err(IndexerError::chain)?;
        Ok(block_number.as_u64())
    }

    async fn get_logs(
        &self,
        contract: &ContractHandle,
        topic0: ethers_core::types::H256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, IndexerError> {
        let filter = Filter::new()
            .address(contract.address)
            .topic0(topic0)
            .from_block(BlockNumber::Number(U64::from(from_block)))
            .to_block(BlockNumber::Number(U64::from(to_block)));

        self.provider
            .get_logs(&filter)
            .await
            .map_err(IndexerError::chain)
    }
}

#[async_trait]
impl LedgerClient for EthereumClient {
    async fn get_events(
        &self,
        contract: &ContractHandle,
        event: &str,
        from_block: u64,
        to_block: BlockTarget,
    ) -> Result<Vec<LedgerEvent>, IndexerError> {
        let abi_event = contract.abi.event(event).map_err(|e| {
            IndexerError::Configuration(format!("{}: event '{event}': {e}", contract.name))
        })?;
        let to_block = match to_block {
            BlockTarget::Latest => self.get_latest_block_number().await?,
            #[cfg(test)]
            BlockTarget::Number(n) => n,
        };

        let mut events = Vec::new();
        for (start, end) in chunk_ranges(from_block, to_block, self.blocks_per_request) {
            debug!(
                "Fetching {}.{} logs for blocks {} to {}",
                contract.name, event, start, end
            );

            for log in self.get_logs(contract, abi_event.signature(), start, end).await? {
                events.push(decode_log(abi_event, log)?);
            }
        }

        Ok(events)
    }

    async fn call_method(
        &self,
        contract: &ContractHandle,
        method: &str,
        args: &[String],
    ) -> Result<String, IndexerError> {
        let function = contract.abi.function(method).map_err(|e| {
            IndexerError::Configuration(format!("{}: method '{method}': {e}", contract.name))
        })?;
        if function.inputs.len() != args.len() {
            return Err(IndexerError::Configuration(format!(
                "{}: method '{method}' takes {} arguments, got {}",
                contract.name,
                function.inputs.len(),
                args.len()
            )));
        }

        let tokens = function
            .inputs
            .iter()
            .zip(args)
            .map(|(param, arg)| LenientTokenizer::tokenize(&param.kind, arg))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| IndexerError::Configuration(format!("{method} arguments: {e}")))?;
        let calldata = function.encode_input(&tokens).map_err(IndexerError::chain)?;

        let tx: TypedTransaction = TransactionRequest::new()
            .to(contract.address)
            .data(calldata)
            .into();
        let output = self
            .provider
            .call(&tx, None)
            .await
            .map_err(IndexerError::chain)?;

        function
            .decode_output(&output)
            .map_err(IndexerError::chain)?
            .into_iter()
            .next()
            .map(token_to_string)
            .ok_or_else(|| IndexerError::ChainQuery(format!("{method} returned no value")))
    }

    async fn get_block(&self, number: u64) -> Result<BlockHeader, IndexerError> {
        let block = self
            .provider
            .get_block(BlockId::Number(BlockNumber::Number(U64::from(number))))
            .await
            .map_err(IndexerError::chain)?
            .ok_or_else(|| IndexerError::ChainQuery(format!("block {number} not found")))?;

        Ok(BlockHeader {
            number,
            timestamp: block_timestamp(number, block.timestamp)?,
        })
    }
}

/// Inclusive `[start, end]` ranges of at most `step` blocks covering
/// `[from, to]`. Empty when `from > to`.
fn chunk_ranges(from: u64, to: u64, step: u64) -> Vec<(u64, u64)> {
    let mut ranges = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(step.max(1) - 1).min(to);
        ranges.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    ranges
}

fn block_timestamp(number: u64, timestamp: U256) -> Result<i64, IndexerError> {
    if timestamp > U256::from(i64::MAX as u64) {
        return Err(IndexerError::ChainQuery(format!(
            "block {number} has an out-of-range timestamp {timestamp}"
        )));
    }
    Ok(timestamp.as_u64() as i64)
}

fn decode_log(event: &ethers_core::abi::Event, log: Log) -> Result<LedgerEvent, IndexerError> {
    let block_number = log
        .block_number
        .ok_or_else(|| IndexerError::ChainQuery("log is missing its block number".into()))?
        .as_u64();
    let removed = log.removed.unwrap_or(false);

    let parsed = event
        .parse_log(RawLog {
            topics: log.topics,
            data: log.data.to_vec(),
        })
        .map_err(|e| {
            IndexerError::ChainQuery(format!("undecodable {} log in block {block_number}: {e}", event.name))
        })?;

    let payload: HashMap<String, String> = parsed
        .params
        .into_iter()
        .map(|param| (param.name, token_to_string(param.value)))
        .collect();

    Ok(LedgerEvent {
        name: event.name.clone(),
        removed,
        block_number,
        payload,
    })
}

/// Render an ABI value the way the dashboard keys and sums it.
fn token_to_string(token: Token) -> String {
    match token {
        Token::Address(address) => to_checksum(&address, None),
        Token::Uint(value) | Token::Int(value) => value.to_string(),
        other => other.to_string(),
    }
}
