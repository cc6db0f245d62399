//! Error types for the indexing job.

use thiserror::Error;

use crate::models::IndexState;

/// Errors raised by the ledger, the checkpoint store and configuration.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("chain query failed: {0}")]
    ChainQuery(String),

    #[error("checkpoint persistence failed: {0}")]
    Persistence(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl IndexerError {
    pub fn chain(err: impl std::fmt::Display) -> Self {
        Self::ChainQuery(err.to_string())
    }

    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    /// Returns `true` if re-running the pass may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ChainQuery(_))
    }
}

/// Failure of a single crawl pass.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// The pass was aborted; the prior checkpoint is untouched.
    #[error("stream '{stream}' aborted: {source}")]
    Aborted {
        stream: String,
        #[source]
        source: IndexerError,
    },

    /// The pass completed but its checkpoint could not be written.
    #[error("stream '{stream}' crawled but checkpoint not saved: {source}")]
    Unsaved {
        stream: String,
        state: Box<IndexState>,
        #[source]
        source: IndexerError,
    },
}

impl CrawlError {
    /// Returns `true` if the next run may get further.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Aborted { source, .. } | Self::Unsaved { source, .. } => source.is_retryable(),
        }
    }

    /// The computed state, if the pass got as far as computing one.
    pub fn into_state(self) -> Option<IndexState> {
        match self {
            Self::Aborted { .. } => None,
            Self::Unsaved { state, .. } => Some(*state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_chain_errors_are_retryable() {
        assert!(IndexerError::ChainQuery("timeout".into()).is_retryable());
        assert!(!IndexerError::Persistence("disk full".into()).is_retryable());
        assert!(!IndexerError::Configuration("no roles".into()).is_retryable());
    }

    #[test]
    fn unsaved_crawl_keeps_state() {
        let state = IndexState {
            last_scanned_block: 42,
            ..Default::default()
        };
        let err = CrawlError::Unsaved {
            stream: "transfers".into(),
            state: Box::new(state),
            source: IndexerError::Persistence("read-only".into()),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.into_state().unwrap().last_scanned_block, 42);
    }
}
