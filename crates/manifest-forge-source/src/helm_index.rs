//! Chart-index cache tier, keyed by the canonicalized repository URL. The
//! raw index bytes are cached; parsing happens after retrieval.

use std::sync::Arc;
use std::time::Duration;

use manifest_forge_cache::ByteCache;
use manifest_forge_helm::index::{parse_index, IndexFile};
use manifest_forge_registry::RegistryError;
use tracing::{info, warn};
use url::Url;

use crate::{ChartRemote, SourceError, SourceResult};

const INDEX_TTL: Duration = Duration::from_secs(10 * 60);

pub struct HelmIndexCache {
    remote: Arc<dyn ChartRemote>,
    cache: Arc<dyn ByteCache>,
}

impl HelmIndexCache {
    #[must_use]
    pub fn new(remote: Arc<dyn ChartRemote>, cache: Arc<dyn ByteCache>) -> Self {
        Self { remote, cache }
    }

    pub async fn retrieve_index(&self, repository_url: &str) -> SourceResult<IndexFile> {
        let parsed = parse_repository_url(repository_url)?;
        let key = canonical_key(&parsed);

        if let Some(cached) = self.cache.get(&key).await? {
            info!("cache hit for helm repository index with key '{key}'");
            return Ok(parse_index(&cached)?);
        }
        info!("cache miss for helm repository index with key '{key}', retrieving from remote");
        self.refresh_index(repository_url).await
    }

    /// Fetch the index unconditionally and overwrite the cache entry.
    pub async fn refresh_index(&self, repository_url: &str) -> SourceResult<IndexFile> {
        let parsed = parse_repository_url(repository_url)?;
        let key = canonical_key(&parsed);

        let index_bytes = self.remote.get_index(&parsed).await?;
        match self.cache.set(&key, &index_bytes, INDEX_TTL).await {
            Ok(()) => info!("successfully cached helm repository index with key '{key}'"),
            Err(e) => warn!("failed to cache helm repository index with key '{key}': {e}"),
        }
        Ok(parse_index(&index_bytes)?)
    }

    /// Re-fetch every currently cached repository index, attempting all of
    /// them before reporting failures.
    pub async fn refresh_cached_indexes(&self) -> SourceResult<()> {
        let keys = self.cache.keys().await?;
        let total = keys.len();

        let mut reasons = Vec::new();
        for repository_url in keys {
            if let Err(e) = self.refresh_index(&repository_url).await {
                reasons.push(format!("{repository_url}: {e}"));
            }
        }
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(SourceError::IndexRefresh {
                failed: reasons.len(),
                total,
                reasons: reasons.join("; "),
            })
        }
    }
}

fn parse_repository_url(repository_url: &str) -> SourceResult<Url> {
    Url::parse(repository_url).map_err(|_| {
        SourceError::Registry(RegistryError::InvalidRepositoryUrl {
            url: repository_url.to_string(),
        })
    })
}

/// The parsed and re-serialized URL: scheme and host lowercase, trailing
/// slashes trimmed.
fn canonical_key(url: &Url) -> String {
    url.as_str().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_canonicalize_case_and_trailing_slashes() {
        let a = parse_repository_url("https://Charts.Example/stable/").unwrap();
        let b = parse_repository_url("https://charts.example/stable").unwrap();
        assert_eq!(canonical_key(&a), canonical_key(&b));
        assert_eq!(canonical_key(&a), "https://charts.example/stable");
    }

    #[test]
    fn invalid_urls_reject() {
        let err = parse_repository_url("not a url").unwrap_err();
        assert!(matches!(
            err,
            SourceError::Registry(RegistryError::InvalidRepositoryUrl { .. })
        ));
    }
}
