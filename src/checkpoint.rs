//! Checkpoint persistence: one `IndexState` record per stream.
//!
//! A missing checkpoint loads as the zero state, so a fresh stream and a
//! resumed one share the same code path. Saves replace the whole record and
//! are never observable half-written.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::debug;
use tokio::io::AsyncWriteExt;

use crate::error::IndexerError;
use crate::models::IndexState;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Saved state of `stream_id`, or the default state if none was saved.
    async fn load(&self, stream_id: &str) -> Result<IndexState, IndexerError>;

    /// Atomically replace the saved state of `stream_id`.
    async fn save(&self, stream_id: &str, state: &IndexState) -> Result<(), IndexerError>;
}

/// Stores each stream as `<dir>/<stream_id>.json`.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, stream_id: &str) -> PathBuf {
        self.dir.join(format!("{stream_id}.json"))
    }
}

#[async_trait]
impl CheckpointStore for JsonFileStore {
    async fn load(&self, stream_id: &str) -> Result<IndexState, IndexerError> {
        let path = self.path_for(stream_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No checkpoint at {}, starting from block 0", path.display());
                return Ok(IndexState::default());
            }
            Err(e) => {
                return Err(IndexerError::Persistence(format!(
                    "read {}: {e}",
                    path.display()
                )))
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(IndexState::default());
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| IndexerError::Persistence(format!("parse {}: {e}", path.display())))
    }

    async fn save(&self, stream_id: &str, state: &IndexState) -> Result<(), IndexerError> {
        let json = serde_json::to_vec(state).map_err(IndexerError::persistence)?;
        write_atomic(&self.path_for(stream_id), &json).await
    }
}

/// Write `contents` to a sibling temp file, fsync it, then rename over `path`.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), IndexerError> {
    let io_err = |what: &str, e: std::io::Error| {
        IndexerError::Persistence(format!("{what} {}: {e}", path.display()))
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_err("create dir for", e))?;
    }

    let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
    let mut file = tokio::fs::File::create(&tmp)
        .await
        .map_err(|e| io_err("create temp for", e))?;
    file.write_all(contents)
        .await
        .map_err(|e| io_err("write temp for", e))?;
    file.sync_all()
        .await
        .map_err(|e| io_err("sync temp for", e))?;
    drop(file);

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err("rename temp onto", e));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DisplayBalance, RawAmount};
    use tempfile::tempdir;

    fn sample_state() -> IndexState {
        let mut state = IndexState {
            last_scanned_block: 4_500_000,
            ..Default::default()
        };
        state
            .address_balances
            .insert("0xA".into(), DisplayBalance(10.0));
        state
            .daily_volume
            .insert("2017-12-01".into(), RawAmount(350.0));
        state
    }

    #[tokio::test]
    async fn missing_checkpoint_loads_default() {
        let dir = tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path());

        let state = store.load("transfers").await.unwrap();
        assert_eq!(state, IndexState::default());
    }

    #[tokio::test]
    async fn empty_file_loads_default() {
        let dir = tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path());
        std::fs::write(store.path_for("transfers"), "\n").unwrap();

        assert_eq!(store.load("transfers").await.unwrap(), IndexState::default());
    }

    #[tokio::test]
    async fn save_then_load_roundtrip() {
        let dir = tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path().join("data"));

        store.save("transfers", &sample_state()).await.unwrap();
        let loaded = store.load("transfers").await.unwrap();

        assert_eq!(loaded, sample_state());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("data"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(leftovers, vec!["transfers.json".to_string()]);
    }

    #[tokio::test]
    async fn reads_record_written_by_previous_job() {
        let dir = tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path());
        std::fs::write(
            store.path_for("transfers"),
            r#"{"maxBlock":4700000,"addressMap":{"0xA":10.5}}"#,
        )
        .unwrap();

        let state = store.load("transfers").await.unwrap();
        assert_eq!(state.last_scanned_block, 4_700_000);
        assert_eq!(state.address_balances["0xA"], DisplayBalance(10.5));
    }

    #[tokio::test]
    async fn corrupt_checkpoint_is_an_error_not_a_reset() {
        let dir = tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path());
        std::fs::write(store.path_for("transfers"), r#"{"maxBlock": 12"#).unwrap();

        let err = store.load("transfers").await.unwrap_err();
        assert!(matches!(err, IndexerError::Persistence(_)));
    }

    #[tokio::test]
    async fn streams_are_stored_separately() {
        let dir = tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path());

        store.save("transfers", &sample_state()).await.unwrap();

        assert_eq!(store.load("locked").await.unwrap(), IndexState::default());
    }
}
