//! Per-user assistant thread ids.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

/// Maps user ids to their assistant thread id.
///
/// With a path, the map is written to disk as JSON after every change so
/// conversations survive restarts.
#[derive(Debug, Clone, Default)]
pub struct ThreadStore {
    inner: Arc<ThreadStoreInner>,
}

#[derive(Debug, Default)]
struct ThreadStoreInner {
    path: Option<PathBuf>,
    threads: RwLock<HashMap<String, String>>,
}

impl ThreadStore {
    /// An in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a store backed by `path`, loading existing entries if the file exists.
    pub async fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let threads = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e),
        };

        tracing::debug!(path = %path.display(), threads = threads.len(), "Thread store opened");
        Ok(Self {
            inner: Arc::new(ThreadStoreInner {
                path: Some(path),
                threads: RwLock::new(threads),
            }),
        })
    }

    #[must_use]
    pub fn get(&self, user_id: &str) -> Option<String> {
        self.inner
            .threads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .cloned()
    }

    /// Remember `thread_id` for `user_id` and persist the store.
    pub async fn insert(
        &self,
        user_id: impl Into<String>,
        thread_id: impl Into<String>,
    ) -> std::io::Result<()> {
        let snapshot = {
            let mut guard = self
                .inner
                .threads
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            guard.insert(user_id.into(), thread_id.into());
            guard.clone()
        };

        if let Some(path) = &self.inner.path {
            let bytes = serde_json::to_vec_pretty(&snapshot)?;
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(dir).await?;
            }
            tokio::fs::write(path, bytes).await?;
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .threads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
