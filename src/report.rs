//! Ranked summaries over crawl results, serialised for the dashboard.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::checkpoint::write_atomic;
use crate::error::IndexerError;
use crate::holdings::{GroupHolding, Holdings};
use crate::models::{DisplayBalance, IndexState, RawAmount};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntry {
    pub key: String,
    pub value: f64,
}

/// Entries sorted by value, largest first, truncated to `n`.
/// Equal values keep key order.
pub fn top_n<'a, V, I>(entries: I, n: usize) -> Vec<RankedEntry>
where
    I: IntoIterator<Item = (&'a String, &'a V)>,
    V: Copy + Into<f64> + 'a,
{
    let mut ranked: Vec<RankedEntry> = entries
        .into_iter()
        .map(|(key, value)| RankedEntry {
            key: key.clone(),
            value: (*value).into(),
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.value
            .partial_cmp(&a.value)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.key.cmp(&b.key))
    });
    ranked.truncate(n);
    ranked
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamSummary {
    pub id: String,
    pub last_scanned_block: u64,
    pub tracked_addresses: usize,
    pub top_holders: Vec<RankedEntry>,
    /// Sum of `daily_volume`, in base units.
    pub total_volume_raw: RawAmount,
    pub busiest_days: Vec<RankedEntry>,
    /// `false` if this stream's latest pass failed and older data is shown.
    pub fresh: bool,
}

impl StreamSummary {
    pub fn new(id: &str, state: &IndexState, top: usize, fresh: bool) -> Self {
        Self {
            id: id.to_string(),
            last_scanned_block: state.last_scanned_block,
            tracked_addresses: state.address_balances.len(),
            top_holders: top_n(&state.address_balances, top),
            total_volume_raw: state.total_volume(),
            busiest_days: top_n(&state.daily_volume, top),
            fresh,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Ranking {
    pub name: String,
    pub entries: Vec<RankedEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub title: String,
    pub token_unit: String,
    pub generated_at: DateTime<Utc>,
    pub total_supply: Option<DisplayBalance>,
    pub groups: Vec<GroupHolding>,
    pub streams: Vec<StreamSummary>,
    pub rankings: Vec<Ranking>,
}

pub struct ReportBuilder {
    title: String,
    token_unit: String,
    top: usize,
}

impl ReportBuilder {
    pub fn new(title: impl Into<String>, token_unit: impl Into<String>, top: usize) -> Self {
        Self {
            title: title.into(),
            token_unit: token_unit.into(),
            top,
        }
    }

    /// `streams` maps stream id to `(state, fresh)`.
    pub fn build(
        &self,
        streams: &BTreeMap<String, (IndexState, bool)>,
        holdings: &Holdings,
    ) -> Dashboard {
        let mut rankings: Vec<Ranking> = holdings
            .groups
            .iter()
            .filter(|group| !group.balances.is_empty())
            .map(|group| Ranking {
                name: group.name.clone(),
                entries: top_n(&group.balances, self.top),
            })
            .collect();
        rankings.extend(holdings.derived.iter().map(|(name, balances)| Ranking {
            name: name.clone(),
            entries: top_n(balances, self.top),
        }));

        Dashboard {
            title: self.title.clone(),
            token_unit: self.token_unit.clone(),
            generated_at: Utc::now(),
            total_supply: holdings.total_supply,
            groups: holdings.groups.clone(),
            streams: streams
                .iter()
                .map(|(id, (state, fresh))| StreamSummary::new(id, state, self.top, *fresh))
                .collect(),
            rankings,
        }
    }
}

pub async fn write_report(path: &Path, dashboard: &Dashboard) -> Result<(), IndexerError> {
    let json = serde_json::to_vec_pretty(dashboard).map_err(IndexerError::persistence)?;
    write_atomic(path, &json).await
}
