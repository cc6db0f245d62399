//! Point-in-time balances shown beside the event index: total supply,
//! balances held by known groups of addresses, and rankings derived from a
//! stream's address set under another contract's method.

use std::collections::BTreeMap;

use log::info;
use serde::Serialize;

use crate::balance::BalanceResolver;
use crate::config::{handle, Settings};
use crate::error::IndexerError;
use crate::models::{BalanceQuery, ContractHandle, DisplayBalance, IndexState};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupHolding {
    pub name: String,
    pub total: DisplayBalance,
    /// Per-address balances, kept only for ranked groups.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub balances: BTreeMap<String, DisplayBalance>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Holdings {
    pub total_supply: Option<DisplayBalance>,
    pub groups: Vec<GroupHolding>,
    /// Ranking name to per-address balances.
    pub derived: BTreeMap<String, BTreeMap<String, DisplayBalance>>,
}

pub struct HoldingsSnapshot<'a> {
    resolver: &'a BalanceResolver,
    contracts: &'a BTreeMap<String, ContractHandle>,
}

impl<'a> HoldingsSnapshot<'a> {
    pub fn new(
        resolver: &'a BalanceResolver,
        contracts: &'a BTreeMap<String, ContractHandle>,
    ) -> Self {
        Self {
            resolver,
            contracts,
        }
    }

    /// Query every configured figure. `states` maps stream id to its
    /// latest index state and feeds the derived rankings.
    pub async fn take(
        &self,
        settings: &Settings,
        states: &BTreeMap<String, IndexState>,
    ) -> Result<Holdings, IndexerError> {
        let mut holdings = Holdings::default();

        if let Some(supply) = &settings.supply {
            let contract = handle(self.contracts, &supply.contract)?;
            let total = self.resolver.resolve_scalar(&contract, &supply.method).await?;
            info!("Total supply of '{}': {}", contract.name, total);
            holdings.total_supply = Some(total);
        }

        for group in &settings.holders {
            let query = BalanceQuery {
                contract: handle(self.contracts, &group.contract)?,
                method: group.method.clone(),
            };
            let balances = self.balances_of(&query, group.address.to_vec()).await?;
            let total = DisplayBalance(balances.values().map(|b| b.0).sum());
            info!("Group '{}' holds {}", group.name, total);
            holdings.groups.push(GroupHolding {
                name: group.name.clone(),
                total,
                balances: if group.ranked {
                    balances
                } else {
                    BTreeMap::new()
                },
            });
        }

        for derived in &settings.derived {
            let query = BalanceQuery {
                contract: handle(self.contracts, &derived.contract)?,
                method: derived.method.clone(),
            };
            let addresses = states
                .get(&derived.stream)
                .map(|state| state.address_balances.keys().cloned().collect())
                .unwrap_or_default();
            let balances = self.balances_of(&query, addresses).await?;
            info!(
                "Ranking '{}' covers {} addresses",
                derived.name,
                balances.len()
            );
            holdings.derived.insert(derived.name.clone(), balances);
        }

        Ok(holdings)
    }

    async fn balances_of(
        &self,
        query: &BalanceQuery,
        addresses: Vec<String>,
    ) -> Result<BTreeMap<String, DisplayBalance>, IndexerError> {
        let mut balances = BTreeMap::new();
        for address in addresses {
            let balance = self.resolver.resolve(query, &address).await?;
            balances.insert(address, balance);
        }
        Ok(balances)
    }
}
