//! On-chain balance lookups converted to display units.

use std::sync::Arc;

use ethers_core::types::U256;
use ethers_core::utils::format_units;

use crate::error::IndexerError;
use crate::ledger::LedgerClient;
use crate::models::{BalanceQuery, ContractHandle, DisplayBalance, RawAmount};

pub struct BalanceResolver {
    ledger: Arc<dyn LedgerClient>,
}

impl BalanceResolver {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self { ledger }
    }

    /// Current balance of `address` under the query's method. Not retried.
    pub async fn resolve(
        &self,
        query: &BalanceQuery,
        address: &str,
    ) -> Result<DisplayBalance, IndexerError> {
        let raw = self
            .ledger
            .call_method(&query.contract, &query.method, &[address.to_string()])
            .await?;
        to_display(&raw, query.contract.decimals)
    }

    /// Scalar method result with no arguments, such as `totalSupply`.
    pub async fn resolve_scalar(
        &self,
        contract: &ContractHandle,
        method: &str,
    ) -> Result<DisplayBalance, IndexerError> {
        let raw = self.ledger.call_method(contract, method, &[]).await?;
        to_display(&raw, contract.decimals)
    }
}

/// Scale a base-unit integer string down by `decimals` places.
pub fn to_display(raw: &str, decimals: u32) -> Result<DisplayBalance, IndexerError> {
    let amount = U256::from_dec_str(raw.trim())
        .map_err(|e| IndexerError::ChainQuery(format!("malformed amount '{raw}': {e}")))?;
    let formatted = format_units(amount, decimals).map_err(IndexerError::chain)?;
    formatted
        .parse::<f64>()
        .map(DisplayBalance)
        .map_err(|e| IndexerError::ChainQuery(format!("unrepresentable amount '{raw}': {e}")))
}

/// Parse a base-unit integer string without scaling.
pub fn to_raw(raw: &str) -> Result<RawAmount, IndexerError> {
    let amount = U256::from_dec_str(raw.trim())
        .map_err(|e| IndexerError::ChainQuery(format!("malformed amount '{raw}': {e}")))?;
    amount
        .to_string()
        .parse::<f64>()
        .map(RawAmount)
        .map_err(IndexerError::chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::mock::{contract, MockLedger};

    #[test]
    fn converts_wei_to_ether() {
        assert_eq!(
            to_display("1500000000000000000", 18).unwrap(),
            DisplayBalance(1.5)
        );
        assert_eq!(to_display("0", 18).unwrap(), DisplayBalance(0.0));
    }

    #[test]
    fn zero_decimals_is_a_plain_count() {
        assert_eq!(to_display("42", 0).unwrap(), DisplayBalance(42.0));
    }

    #[test]
    fn malformed_amount_is_a_chain_error() {
        let err = to_display("0xzz", 18).unwrap_err();
        assert!(matches!(err, IndexerError::ChainQuery(_)));
    }

    #[test]
    fn raw_amounts_are_not_scaled() {
        assert_eq!(to_raw("250").unwrap(), RawAmount(250.0));
    }

    #[tokio::test]
    async fn resolves_through_the_configured_method() {
        let ledger = Arc::new(MockLedger::new().answer(
            "lockedBalance",
            "0xA",
            "2000000000000000000",
        ));
        let resolver = BalanceResolver::new(ledger.clone());
        let query = BalanceQuery {
            contract: contract("terraform", 18),
            method: "lockedBalance".into(),
        };

        let balance = resolver.resolve(&query, "0xA").await.unwrap();

        assert_eq!(balance, DisplayBalance(2.0));
        assert_eq!(ledger.calls_for("lockedBalance", "0xA"), 1);
    }

    #[tokio::test]
    async fn node_failure_propagates() {
        let ledger = Arc::new(MockLedger::new().failing_calls());
        let resolver = BalanceResolver::new(ledger);
        let query = BalanceQuery {
            contract: contract("token", 18),
            method: "balanceOf".into(),
        };

        let err = resolver.resolve(&query, "0xA").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
