//! The chain node boundary.

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::models::{BlockHeader, BlockTarget, ContractHandle, LedgerEvent};

/// Read access to a blockchain node.
///
/// Implemented by [`crate::ethereum::EthereumClient`] against a JSON-RPC node,
/// and by a scripted double in tests.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Events named `event` emitted by `contract` in `[from_block, to_block]`,
    /// in chain order.
    async fn get_events(
        &self,
        contract: &ContractHandle,
        event: &str,
        from_block: u64,
        to_block: BlockTarget,
    ) -> Result<Vec<LedgerEvent>, IndexerError>;

    /// Result of a read-only method call at the latest state, as a decimal string.
    async fn call_method(
        &self,
        contract: &ContractHandle,
        method: &str,
        args: &[String],
    ) -> Result<String, IndexerError>;

    async fn get_block(&self, number: u64) -> Result<BlockHeader, IndexerError>;
}

#[cfg(test)]
pub mod mock {
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    use ethers_core::abi::Abi;
    use ethers_core::types::H160;

    use super::*;

    /// Contract handle with an empty ABI, for tests.
    pub fn contract(name: &str, decimals: u32) -> ContractHandle {
        ContractHandle {
            name: name.to_string(),
            address: H160::zero(),
            abi: Arc::new(serde_json::from_str::<Abi>("[]").unwrap()),
            decimals,
        }
    }

    pub fn transfer(block: u64, from: &str, to: &str, value: &str) -> LedgerEvent {
        LedgerEvent {
            name: "Transfer".into(),
            removed: false,
            block_number: block,
            payload: HashMap::from([
                ("from".to_string(), from.to_string()),
                ("to".to_string(), to.to_string()),
                ("value".to_string(), value.to_string()),
            ]),
        }
    }

    #[derive(Default)]
    struct Script {
        events: Vec<LedgerEvent>,
        /// (method, first arg) -> successive answers; the last one repeats.
        answers: HashMap<(String, String), VecDeque<String>>,
        timestamps: HashMap<u64, i64>,
        fail_events: bool,
        failing_event_names: Vec<String>,
        panicking_event_names: Vec<String>,
        fail_calls: bool,
        event_queries: Vec<(String, u64, BlockTarget)>,
        calls: Vec<(String, Vec<String>)>,
    }

    /// Scripted ledger that records what it was asked.
    #[derive(Default)]
    pub struct MockLedger {
        script: Mutex<Script>,
    }

    impl MockLedger {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_events(self, events: Vec<LedgerEvent>) -> Self {
            self.script.lock().unwrap().events = events;
            self
        }

        pub fn set_events(&self, events: Vec<LedgerEvent>) {
            self.script.lock().unwrap().events = events;
        }

        /// Queue `raw` as the next answer of `method(arg)`.
        pub fn answer(self, method: &str, arg: &str, raw: &str) -> Self {
            self.script
                .lock()
                .unwrap()
                .answers
                .entry((method.to_string(), arg.to_string()))
                .or_default()
                .push_back(raw.to_string());
            self
        }

        pub fn timestamp(self, block: u64, ts: i64) -> Self {
            self.script.lock().unwrap().timestamps.insert(block, ts);
            self
        }

        pub fn failing_events(self) -> Self {
            self.script.lock().unwrap().fail_events = true;
            self
        }

        /// Fail event queries for `event` only.
        pub fn failing_event(self, event: &str) -> Self {
            self.script
                .lock()
                .unwrap()
                .failing_event_names
                .push(event.to_string());
            self
        }

        /// Panic inside event queries for `event`.
        pub fn panicking_event(self, event: &str) -> Self {
            self.script
                .lock()
                .unwrap()
                .panicking_event_names
                .push(event.to_string());
            self
        }

        pub fn failing_calls(self) -> Self {
            self.script.lock().unwrap().fail_calls = true;
            self
        }

        pub fn event_queries(&self) -> Vec<(String, u64, BlockTarget)> {
            self.script.lock().unwrap().event_queries.clone()
        }

        pub fn calls_for(&self, method: &str, arg: &str) -> usize {
            self.script
                .lock()
                .unwrap()
                .calls
                .iter()
                .filter(|(m, args)| m == method && args.first().map(String::as_str) == Some(arg))
                .count()
        }

        pub fn call_count(&self) -> usize {
            self.script.lock().unwrap().calls.len()
        }
    }

    #[async_trait]
    impl LedgerClient for MockLedger {
        async fn get_events(
            &self,
            _contract: &ContractHandle,
            event: &str,
            from_block: u64,
            to_block: BlockTarget,
        ) -> Result<Vec<LedgerEvent>, IndexerError> {
            let mut script = self.script.lock().unwrap();
            if script.panicking_event_names.iter().any(|e| e == event) {
                drop(script);
                panic!("scripted panic while fetching {event}");
            }
            script
                .event_queries
                .push((event.to_string(), from_block, to_block));
            if script.fail_events || script.failing_event_names.iter().any(|e| e == event) {
                return Err(IndexerError::ChainQuery("connection refused".into()));
            }
            Ok(script
                .events
                .iter()
                .filter(|e| e.name == event && e.block_number >= from_block)
                .filter(|e| match to_block {
                    BlockTarget::Latest => true,
                    BlockTarget::Number(to) => e.block_number <= to,
                })
                .cloned()
                .collect())
        }

        async fn call_method(
            &self,
            _contract: &ContractHandle,
            method: &str,
            args: &[String],
        ) -> Result<String, IndexerError> {
            let mut script = self.script.lock().unwrap();
            script.calls.push((method.to_string(), args.to_vec()));
            if script.fail_calls {
                return Err(IndexerError::ChainQuery("node unavailable".into()));
            }
            let key = (
                method.to_string(),
                args.first().cloned().unwrap_or_default(),
            );
            let queue = script.answers.get_mut(&key).ok_or_else(|| {
                IndexerError::ChainQuery(format!("no scripted answer for {}({})", key.0, key.1))
            })?;
            let answer = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            answer.ok_or_else(|| IndexerError::ChainQuery("empty answer".into()))
        }

        async fn get_block(&self, number: u64) -> Result<BlockHeader, IndexerError> {
            let script = self.script.lock().unwrap();
            Ok(BlockHeader {
                number,
                timestamp: script.timestamps.get(&number).copied().unwrap_or(0),
            })
        }
    }
}
