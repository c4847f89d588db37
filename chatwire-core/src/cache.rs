use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, instrument};

use crate::error::Result;
use crate::file::{FileReader, FileRef};
use crate::token::estimate_file_tokens;

/// Token counts keyed by file id
///
/// Updates touch a single entry and the first stored value wins, so files
/// finishing concurrently never overwrite each other and a cached count is
/// never replaced.
#[derive(Debug, Clone, Default)]
pub struct FileTokenCache {
    entries: Arc<DashMap<String, u64>>,
}

impl FileTokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, file_id: &str) -> Option<u64> {
        self.entries.get(file_id).map(|v| *v)
    }

    /// Stores a count unless one is already cached; returns the cached value.
    pub fn merge(&self, file_id: &str, tokens: u64) -> u64 {
        *self.entries.entry(file_id.to_string()).or_insert(tokens)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the cached count, computing and storing it on first use
    pub async fn get_or_compute(&self, file: &FileRef, reader: &dyn FileReader) -> Result<u64> {
        if let Some(tokens) = file.tokens.or_else(|| self.get(&file.id)) {
            return Ok(tokens);
        }
        let tokens = estimate_file_tokens(file, reader).await?;
        Ok(self.merge(&file.id, tokens))
    }
}

/// Keeps token counts for a changing list of attached files
pub struct FileTokenManager {
    cache: FileTokenCache,
    reader: Arc<dyn FileReader>,
}

impl FileTokenManager {
    pub fn new(reader: Arc<dyn FileReader>) -> Self {
        Self {
            cache: FileTokenCache::new(),
            reader,
        }
    }

    pub fn with_cache(reader: Arc<dyn FileReader>, cache: FileTokenCache) -> Self {
        Self { cache, reader }
    }

    pub fn cache(&self) -> &FileTokenCache {
        &self.cache
    }

    /// Computes every missing count in parallel
    ///
    /// Each result is merged under its own file id as soon as it finishes.
    /// Failures are logged and leave the file without a count.
    #[instrument(skip(self, files), fields(files = files.len()))]
    pub async fn refresh(&self, files: &[FileRef]) {
        let pending = files
            .iter()
            .filter(|f| f.tokens.is_none() && self.cache.get(&f.id).is_none());

        join_all(pending.map(|file| async move {
            match self.cache.get_or_compute(file, self.reader.as_ref()).await {
                Ok(tokens) => debug!("Cached {} tokens for {}", tokens, file.id),
                Err(e) => error!("Failed to calculate tokens for {}: {}", file.name, e),
            }
        }))
        .await;
    }

    /// The given files with cached counts filled in
    pub fn apply(&self, files: &[FileRef]) -> Vec<FileRef> {
        files
            .iter()
            .map(|f| match (f.tokens, self.cache.get(&f.id)) {
                (None, Some(tokens)) => f.clone().with_tokens(tokens),
                _ => f.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::file::FileKind;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct SlowReader {
        reads: AtomicUsize,
    }

    #[async_trait]
    impl FileReader for SlowReader {
        async fn read(&self, file: &FileRef) -> Result<String> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if file.id == "broken" {
                return Err(Error::Other("unreadable".into()));
            }
            // finish in reverse order of submission
            let delay = 50 - file.size.min(50);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok("word ".repeat(file.size as usize))
        }

        async fn read_path(&self, _path: &Path) -> Result<String> {
            unreachable!("not used")
        }
    }

    #[tokio::test]
    async fn test_compute_once() {
        let reader = SlowReader::default();
        let cache = FileTokenCache::new();
        let file = FileRef::new("a", ".txt", 3, FileKind::Text);

        let first = cache.get_or_compute(&file, &reader).await.unwrap();
        let second = cache.get_or_compute(&file, &reader).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(reader.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_merge_keeps_first_value() {
        let cache = FileTokenCache::new();
        assert_eq!(cache.merge("a", 10), 10);
        assert_eq!(cache.merge("a", 99), 10);
        assert_eq!(cache.get("a"), Some(10));
    }

    #[tokio::test]
    async fn test_concurrent_refresh_loses_nothing() {
        let reader = Arc::new(SlowReader::default());
        let manager = FileTokenManager::new(reader.clone());
        let files: Vec<FileRef> = (1..=5)
            .map(|i| FileRef::new(format!("f{i}"), ".txt", i * 10, FileKind::Text))
            .chain(std::iter::once(FileRef::new("img", ".png", 1000, FileKind::Image)))
            .collect();

        manager.refresh(&files).await;

        let updated = manager.apply(&files);
        assert!(updated.iter().all(|f| f.tokens.is_some()));
        assert_eq!(manager.cache().len(), 6);
        assert_eq!(updated[5].tokens, Some(10));
        assert_eq!(reader.reads.load(Ordering::SeqCst), 5);

        // nothing is recomputed on the next change notification
        manager.refresh(&updated).await;
        manager.refresh(&files).await;
        assert_eq!(reader.reads.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_file_stays_uncached() {
        let manager = FileTokenManager::new(Arc::new(SlowReader::default()));
        let files = vec![
            FileRef::new("broken", ".txt", 1, FileKind::Text),
            FileRef::new("ok", ".txt", 2, FileKind::Text),
        ];

        manager.refresh(&files).await;
        let updated = manager.apply(&files);
        assert_eq!(updated[0].tokens, None);
        assert_eq!(updated[1].tokens, Some(2));
        assert!(logs_contain("Failed to calculate tokens"));
    }
}
