use std::sync::Arc;

use log::{debug, info, warn};

use crate::balance::{to_raw, BalanceResolver};
use crate::checkpoint::CheckpointStore;
use crate::error::{CrawlError, IndexerError};
use crate::ledger::LedgerClient;
use crate::models::{volume_date, BlockTarget, EventStreamSpec, IndexState, LedgerEvent};

/// Side channel for crawl progress. Has no effect on the result.
pub trait ProgressObserver: Send + Sync {
    fn on_event(&self, stream: &str, current: usize, total: usize);
}

/// Reports progress through the `log` facade.
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_event(&self, stream: &str, current: usize, total: usize) {
        if current % 1000 == 0 && current > 0 {
            info!("[{}] processed {}/{} events", stream, current, total);
        } else {
            debug!("[{}] processing event {}/{}", stream, current, total);
        }
    }
}

pub struct Indexer {
    ledger: Arc<dyn LedgerClient>,
    resolver: BalanceResolver,
    store: Arc<dyn CheckpointStore>,
    progress: Arc<dyn ProgressObserver>,
}

impl Indexer {
    pub fn new(ledger: Arc<dyn LedgerClient>, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            resolver: BalanceResolver::new(ledger.clone()),
            ledger,
            store,
            progress: Arc::new(LogProgress),
        }
    }

    #[cfg(test)]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressObserver>) -> Self {
        self.progress = progress;
        self
    }

    pub fn store(&self) -> &dyn CheckpointStore {
        self.store.as_ref()
    }

    /// Load the stream's checkpoint and crawl from it.
    pub async fn run_stream(&self, stream: &EventStreamSpec) -> Result<IndexState, CrawlError> {
        let prior = self
            .store
            .load(&stream.id)
            .await
            .map_err(|source| CrawlError::Aborted {
                stream: stream.id.clone(),
                source,
            })?;
        self.crawl(stream, prior).await
    }

    /// One incremental pass over `stream`, starting at the prior checkpoint's
    /// block (inclusive). The checkpoint is written once, at the end.
    pub async fn crawl(
        &self,
        stream: &EventStreamSpec,
        prior: IndexState,
    ) -> Result<IndexState, CrawlError> {
        info!(
            "Crawling '{}' ({}.{}) from block {}",
            stream.id, stream.contract.name, stream.event, prior.last_scanned_block
        );

        let state = self
            .scan(stream, prior)
            .await
            .map_err(|source| CrawlError::Aborted {
                stream: stream.id.clone(),
                source,
            })?;

        if let Err(source) = self.store.save(&stream.id, &state).await {
            return Err(CrawlError::Unsaved {
                stream: stream.id.clone(),
                state: Box::new(state),
                source,
            });
        }

        info!(
            "Stream '{}' saved at block {} ({} addresses tracked)",
            stream.id,
            state.last_scanned_block,
            state.address_balances.len()
        );
        Ok(state)
    }

    async fn scan(
        &self,
        stream: &EventStreamSpec,
        mut state: IndexState,
    ) -> Result<IndexState, IndexerError> {
        let events = self
            .ledger
            .get_events(
                &stream.contract,
                &stream.event,
                state.last_scanned_block,
                BlockTarget::Latest,
            )
            .await?;

        let total = events.len();
        info!("Found {} {} events for '{}'", total, stream.event, stream.id);

        let mut clock = BlockClock::default();
        let mut removed = 0;
        for (index, event) in events.iter().enumerate() {
            self.progress.on_event(&stream.id, index, total);

            if event.removed {
                removed += 1;
                continue;
            }
            self.apply(stream, &mut state, event, &mut clock).await?;
        }

        if removed > 0 {
            warn!(
                "Skipped {} removed events in '{}'; balances already recorded were not revisited",
                removed, stream.id
            );
        }
        Ok(state)
    }

    async fn apply(
        &self,
        stream: &EventStreamSpec,
        state: &mut IndexState,
        event: &LedgerEvent,
        clock: &mut BlockClock,
    ) -> Result<(), IndexerError> {
        if let Some(volume) = stream.volume.as_ref().filter(|v| v.event == event.name) {
            let raw = event.payload.get(&volume.amount_field).ok_or_else(|| {
                IndexerError::ChainQuery(format!(
                    "{} at block {} has no '{}' field",
                    event.name, event.block_number, volume.amount_field
                ))
            })?;
            let amount = to_raw(raw)?;
            let timestamp = clock.timestamp(self.ledger.as_ref(), event.block_number).await?;
            let date = volume_date(timestamp).ok_or_else(|| {
                IndexerError::ChainQuery(format!(
                    "block {} has an invalid timestamp {}",
                    event.block_number, timestamp
                ))
            })?;
            *state.daily_volume.entry(date).or_default() += amount;
        }

        for role in &stream.roles {
            let Some(address) = event.payload.get(role) else {
                continue;
            };
            if state.has_seen(address) {
                continue;
            }
            let balance = self.resolver.resolve(&stream.balance, address).await?;
            debug!("[{}] first sight of {}: {}", stream.id, address, balance);
            state.address_balances.insert(address.clone(), balance);
        }

        if event.block_number > state.last_scanned_block {
            state.last_scanned_block = event.block_number;
        }
        Ok(())
    }
}

/// Remembers the last block timestamp fetched, since events arrive grouped by block.
#[derive(Default)]
struct BlockClock {
    last: Option<(u64, i64)>,
}

impl BlockClock {
    async fn timestamp(
        &mut self,
        ledger: &dyn LedgerClient,
        block_number: u64,
    ) -> Result<i64, IndexerError> {
        if let Some((number, ts)) = self.last {
            if number == block_number {
                return Ok(ts);
            }
        }
        let header = ledger.get_block(block_number).await?;
        self.last = Some((header.number, header.timestamp));
        Ok(header.timestamp)
    }
}
