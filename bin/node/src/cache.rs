use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::adapter::{BoxError, ProviderCacheStore, ProviderData};

/// File-backed provider payload cache: one JSON document per cache tag
/// under the configured directory.
pub struct FileCacheStore {
    directory: PathBuf,
}

impl FileCacheStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn path_for(&self, cache_tag: &str) -> PathBuf {
        // Cache tags come from user configuration; anything that does not
        // belong in a file name is replaced.
        let sanitized: String = cache_tag
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.directory.join(format!("{sanitized}.json"))
    }
}

#[async_trait]
impl ProviderCacheStore for FileCacheStore {
    async fn load(&self, cache_tag: &str) -> Result<Option<ProviderData>, BoxError> {
        let path = self.path_for(cache_tag);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_slice(&content)?))
    }

    async fn store(&self, cache_tag: &str, data: &ProviderData) -> Result<(), BoxError> {
        tokio::fs::create_dir_all(&self.directory).await?;
        let content = serde_json::to_vec(data)?;
        tokio::fs::write(self.path_for(cache_tag), content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use strand_config::outbound::{DirectOutboundOptions, OutboundKind, OutboundOptions};

    use super::*;
    use crate::adapter::SubscribeData;

    fn sample_data() -> ProviderData {
        ProviderData {
            outbounds: Some(vec![OutboundOptions {
                tag: "a".to_string(),
                kind: OutboundKind::Direct(DirectOutboundOptions::default()),
            }]),
            subscribe: SubscribeData {
                upload: 10,
                download: 20,
                total: 100,
                expire: Some(UNIX_EPOCH + Duration::from_secs(1_700_000_000)),
                update: Some(UNIX_EPOCH + Duration::from_secs(1_690_000_000)),
            },
        }
    }

    #[tokio::test]
    async fn round_trips_provider_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path());

        assert!(store.load("airport").await.unwrap().is_none());

        let data = sample_data();
        store.store("airport", &data).await.unwrap();
        let loaded = store.load("airport").await.unwrap().unwrap();
        assert_eq!(loaded, data);
    }

    #[tokio::test]
    async fn cache_tags_are_sanitized_into_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path());

        store.store("my provider/№1", &sample_data()).await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].ends_with(".json"));
        assert!(!entries[0].contains('/'));
        assert!(!entries[0].contains(' '));
    }

    #[tokio::test]
    async fn corrupt_payloads_surface_as_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path());
        tokio::fs::write(dir.path().join("airport.json"), b"not json")
            .await
            .unwrap();

        assert!(store.load("airport").await.is_err());
    }
}
