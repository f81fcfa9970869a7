// File Cursor Store
// Persists one JSON document per parent execution under a state directory

use crate::config::CoordinatorConfig;
use crate::error::{FanOutError, FanOutResult};
use crate::execution::cursor::{ConcurrencyCursor, CursorAdvance};
use crate::stores::CursorStore;

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

/// Cursor store writing `<state_dir>/<hex(parent)>.json`.
///
/// Writes go to a temporary file and are renamed into place. Updates are
/// serialized through a process-wide lock.
pub struct FileCursorStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileCursorStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    /// Store under the configured `state_dir`
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self::new(&config.state_dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn cursor_path(&self, parent_execution_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", hex::encode(parent_execution_id.as_bytes())))
    }

    async fn read(&self, parent_execution_id: &str) -> FanOutResult<Option<ConcurrencyCursor>> {
        let path = self.cursor_path(parent_execution_id);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, parent_execution_id: &str, cursor: &ConcurrencyCursor) -> FanOutResult<()> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.cursor_path(parent_execution_id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(cursor)?;
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn persist(&self, parent_execution_id: &str, cursor: &ConcurrencyCursor) -> FanOutResult<()> {
        self.write(parent_execution_id, cursor)
            .await
            .map_err(|e| FanOutError::cursor(parent_execution_id, e.to_string()))
    }
}

#[async_trait::async_trait]
impl CursorStore for FileCursorStore {
    async fn save(
        &self,
        parent_execution_id: &str,
        cursor: &ConcurrencyCursor,
    ) -> FanOutResult<()> {
        let _guard = self.lock.lock().await;
        self.persist(parent_execution_id, cursor).await
    }

    async fn load(&self, parent_execution_id: &str) -> FanOutResult<Option<ConcurrencyCursor>> {
        let _guard = self.lock.lock().await;
        self.read(parent_execution_id).await
    }

    async fn advance(
        &self,
        parent_execution_id: &str,
        finished_child: &str,
        failed: bool,
        proceed_if_failed: bool,
    ) -> FanOutResult<CursorAdvance> {
        let _guard = self.lock.lock().await;
        let Some(mut cursor) = self.read(parent_execution_id).await? else {
            return Ok(CursorAdvance::Inactive);
        };

        let advance = cursor.advance(finished_child, failed, proceed_if_failed);
        if !matches!(advance, CursorAdvance::Duplicate | CursorAdvance::Inactive) {
            self.persist(parent_execution_id, &cursor).await?;
        }
        Ok(advance)
    }

    async fn halt(&self, parent_execution_id: &str) -> FanOutResult<Vec<String>> {
        let _guard = self.lock.lock().await;
        let Some(mut cursor) = self.read(parent_execution_id).await? else {
            return Ok(Vec::new());
        };
        if cursor.halted {
            return Ok(Vec::new());
        }

        let skipped = cursor.halt();
        self.persist(parent_execution_id, &cursor).await?;
        Ok(skipped)
    }

    async fn narrow(&self, parent_execution_id: &str, keep: &[String]) -> FanOutResult<()> {
        let _guard = self.lock.lock().await;
        if let Some(mut cursor) = self.read(parent_execution_id).await? {
            cursor.narrow(keep);
            self.persist(parent_execution_id, &cursor).await?;
        }
        Ok(())
    }

    async fn settle(&self, parent_execution_id: &str, finished_child: &str) -> FanOutResult<()> {
        let _guard = self.lock.lock().await;
        if let Some(mut cursor) = self.read(parent_execution_id).await? {
            if cursor.settle(finished_child) {
                self.persist(parent_execution_id, &cursor).await?;
            }
        }
        Ok(())
    }
}
