//! One full job: crawl every stream, snapshot holdings, write the report.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use log::{error, info, warn};
use tokio::task::JoinSet;

use crate::abi;
use crate::balance::BalanceResolver;
use crate::checkpoint::{CheckpointStore, JsonFileStore};
use crate::config::{CheckpointBackend, CheckpointSettings, Settings};
use crate::database::Database;
use crate::error::{CrawlError, IndexerError};
use crate::ethereum::EthereumClient;
use crate::holdings::{Holdings, HoldingsSnapshot};
use crate::indexer::Indexer;
use crate::ledger::LedgerClient;
use crate::models::{EventStreamSpec, IndexState};
use crate::report::{write_report, ReportBuilder};

pub async fn open_store(
    settings: &CheckpointSettings,
) -> Result<Arc<dyn CheckpointStore>, IndexerError> {
    Ok(match settings.backend {
        CheckpointBackend::Json => Arc::new(JsonFileStore::new(&settings.location)),
        CheckpointBackend::Sqlite => Arc::new(Database::new(&settings.location).await?),
    })
}

/// Streams whose pass failed, by id.
pub struct RunSummary {
    pub failed: Vec<String>,
}

pub async fn run_once(settings: &Settings) -> Result<RunSummary> {
    let ledger: Arc<dyn LedgerClient> = Arc::new(EthereumClient::new(
        &settings.rpc_url,
        settings.blocks_per_request,
    )?);
    let store = open_store(&settings.checkpoint).await?;
    let contracts = abi::load_contracts(settings).await?;
    let streams = settings.event_streams(&contracts)?;
    info!(
        "Loaded {} contracts, crawling {} streams",
        contracts.len(),
        streams.len()
    );

    let indexer = Arc::new(Indexer::new(ledger.clone(), store));
    let outcomes = crawl_all(indexer.clone(), streams).await;
    let failed: Vec<String> = outcomes
        .iter()
        .filter(|(_, outcome)| outcome.is_err())
        .map(|(id, _)| id.clone())
        .collect();
    let states = settle(indexer.store(), outcomes).await;

    let resolver = BalanceResolver::new(ledger);
    let latest: BTreeMap<String, IndexState> = states
        .iter()
        .map(|(id, (state, _))| (id.clone(), state.clone()))
        .collect();
    let holdings = match HoldingsSnapshot::new(&resolver, &contracts)
        .take(settings, &latest)
        .await
    {
        Ok(holdings) => holdings,
        Err(e) => {
            error!("Holdings snapshot failed: {}", e);
            Holdings::default()
        }
    };

    let dashboard = ReportBuilder::new(&settings.title, &settings.token_unit, settings.report.top_n)
        .build(&states, &holdings);
    write_report(&settings.report.path, &dashboard).await?;
    info!("Report written to {}", settings.report.path.display());

    Ok(RunSummary { failed })
}

/// Crawl all streams concurrently. One stream failing never stops the others.
pub async fn crawl_all(
    indexer: Arc<Indexer>,
    streams: Vec<EventStreamSpec>,
) -> BTreeMap<String, Result<IndexState, CrawlError>> {
    let ids: Vec<String> = streams.iter().map(|s| s.id.clone()).collect();
    let mut tasks = JoinSet::new();
    for stream in streams {
        let indexer = indexer.clone();
        tasks.spawn(async move {
            let outcome = indexer.run_stream(&stream).await;
            (stream.id, outcome)
        });
    }

    let mut outcomes = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((id, outcome)) => {
                match &outcome {
                    Err(e) if e.is_retryable() => {
                        warn!("{}; next run resumes from the last checkpoint", e)
                    }
                    Err(e) => error!("{}", e),
                    Ok(_) => {}
                }
                outcomes.insert(id, outcome);
            }
            Err(e) => error!("Crawl task panicked: {}", e),
        }
    }

    // A panicked task never reports its id; it counts as an aborted pass.
    for id in ids {
        if !outcomes.contains_key(&id) {
            error!("Stream '{}' did not finish its pass", id);
            outcomes.insert(
                id.clone(),
                Err(CrawlError::Aborted {
                    stream: id,
                    source: IndexerError::ChainQuery("crawl task panicked".into()),
                }),
            );
        }
    }
    outcomes
}

/// Pick the state to report for each stream, with a freshness flag.
///
/// An unsaved pass still reports its computed state; an aborted pass falls
/// back to the last saved checkpoint.
pub async fn settle(
    store: &dyn CheckpointStore,
    outcomes: BTreeMap<String, Result<IndexState, CrawlError>>,
) -> BTreeMap<String, (IndexState, bool)> {
    let mut states = BTreeMap::new();
    for (id, outcome) in outcomes {
        match outcome {
            Ok(state) => {
                states.insert(id, (state, true));
            }
            Err(e) => match e.into_state() {
                Some(state) => {
                    states.insert(id, (state, true));
                }
                None => match store.load(&id).await {
                    Ok(state) => {
                        warn!("Reporting '{}' from its last checkpoint", id);
                        states.insert(id, (state, false));
                    }
                    Err(e) => error!("'{}' left out of the report: {}", id, e),
                },
            },
        }
    }
    states
}
