//! Chart-archive cache tier.
//!
//! HTTP(S) archives resolve `(name, version?)` through the index cache into
//! a concrete `(absolute-url, digest)` pair and key by
//! `<resolved-url>|<digest>`. OCI archives key by
//! `<repository-url>/<name>:<version>`; no digest is available before the
//! fetch.

use std::sync::Arc;
use std::time::Duration;

use manifest_forge_api::ChartRepositoryChartReference;
use manifest_forge_cache::ByteCache;
use manifest_forge_fs::{targz, Filesystem, ROOT};
use manifest_forge_registry::RegistryError;
use tracing::{info, warn};
use url::Url;

use crate::helm_index::HelmIndexCache;
use crate::{ChartRemote, SourceError, SourceResult};

const CHART_HTTP_TTL: Duration = Duration::from_secs(12 * 60 * 60);
const CHART_OCI_TTL: Duration = Duration::from_secs(30 * 60);

pub struct HelmChartCache {
    remote: Arc<dyn ChartRemote>,
    index_cache: Arc<HelmIndexCache>,
    cache: Arc<dyn ByteCache>,
}

impl HelmChartCache {
    #[must_use]
    pub fn new(
        remote: Arc<dyn ChartRemote>,
        index_cache: Arc<HelmIndexCache>,
        cache: Arc<dyn ByteCache>,
    ) -> Self {
        Self {
            remote,
            index_cache,
            cache,
        }
    }

    pub async fn retrieve_chart(
        &self,
        reference: &ChartRepositoryChartReference,
    ) -> SourceResult<Vec<u8>> {
        let repository_url = Url::parse(&reference.repository_url).map_err(|_| {
            SourceError::Registry(RegistryError::InvalidRepositoryUrl {
                url: reference.repository_url.clone(),
            })
        })?;

        match repository_url.scheme() {
            "http" | "https" => self.retrieve_http_chart(reference).await,
            "oci" => self.retrieve_oci_chart(reference).await,
            _ => Err(SourceError::Registry(RegistryError::InvalidRepositoryUrl {
                url: reference.repository_url.clone(),
            })),
        }
    }

    pub async fn retrieve_chart_to_filesystem(
        &self,
        reference: &ChartRepositoryChartReference,
        fs: &Filesystem,
    ) -> SourceResult<()> {
        let tarball = self.retrieve_chart(reference).await?;
        targz::extract(fs, tarball.as_slice(), ROOT)?;
        Ok(())
    }

    async fn retrieve_http_chart(
        &self,
        reference: &ChartRepositoryChartReference,
    ) -> SourceResult<Vec<u8>> {
        let index = self
            .index_cache
            .retrieve_index(&reference.repository_url)
            .await?;
        let wanted_version = reference.chart_version.as_deref().unwrap_or_default();
        let chart_version = index.get(&reference.chart_name, wanted_version)?;

        let Some(first_url) = chart_version.urls.first() else {
            return Err(SourceError::Registry(RegistryError::ChartNotFound {
                url: format!(
                    "{}/{}-{}",
                    reference.repository_url, chart_version.name, chart_version.version
                ),
            }));
        };
        // no protocol means the index entry is repository-relative
        let chart_url = if first_url.contains("://") {
            first_url.clone()
        } else {
            format!(
                "{}/{first_url}",
                reference.repository_url.trim_end_matches('/')
            )
        };

        let key = format!("{chart_url}|{}", chart_version.digest);
        if let Some(cached) = self.cache.get(&key).await? {
            info!("cache hit for helm chart with key '{key}'");
            return Ok(cached);
        }
        info!("cache miss for helm chart with key '{key}', retrieving from remote");

        let chart_bytes = self.remote.get_chart(&chart_url).await?;
        match self.cache.set(&key, &chart_bytes, CHART_HTTP_TTL).await {
            Ok(()) => info!("successfully cached helm chart with key '{key}'"),
            Err(e) => warn!("failed to cache helm chart with key '{key}': {e}"),
        }
        Ok(chart_bytes)
    }

    async fn retrieve_oci_chart(
        &self,
        reference: &ChartRepositoryChartReference,
    ) -> SourceResult<Vec<u8>> {
        // there is no index to resolve "latest" from
        let Some(version) = reference
            .chart_version
            .as_deref()
            .filter(|version| !version.is_empty())
        else {
            return Err(SourceError::Registry(RegistryError::ChartNotFound {
                url: format!(
                    "{}/{}",
                    reference.repository_url.trim_end_matches('/'),
                    reference.chart_name
                ),
            }));
        };

        let chart_url = format!(
            "{}/{}:{version}",
            reference.repository_url.trim_end_matches('/'),
            reference.chart_name
        );

        let key = chart_url.clone();
        if let Some(cached) = self.cache.get(&key).await? {
            info!("cache hit for helm chart with key '{key}'");
            return Ok(cached);
        }
        info!("cache miss for helm chart with key '{key}', retrieving from remote");

        let chart_bytes = self.remote.get_chart(&chart_url).await?;
        match self.cache.set(&key, &chart_bytes, CHART_OCI_TTL).await {
            Ok(()) => info!("successfully cached helm chart with key '{key}'"),
            Err(e) => warn!("failed to cache helm chart with key '{key}': {e}"),
        }
        Ok(chart_bytes)
    }
}
