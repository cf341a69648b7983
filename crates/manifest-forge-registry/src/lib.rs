//! Chart-registry adapter.
//!
//! Fetches repository index files and chart archives through per-host
//! providers. A provider is selected by `(host, scheme)`; hosts without a
//! matching provider fail with [`RegistryError::MissingProvider`] instead of
//! attempting an unauthenticated request.

mod getter;
mod oci;

use std::collections::HashMap;

use url::Url;

pub use getter::HttpGetter;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("helm repository '{url}' does not exist")]
    RepositoryNotFound { url: String },

    #[error("chart at '{url}' does not exist")]
    ChartNotFound { url: String },

    #[error("no provider configured for host '{host}' and scheme '{scheme}'")]
    MissingProvider { host: String, scheme: String },

    #[error("helm repository URL '{url}' is invalid")]
    InvalidRepositoryUrl { url: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} fetching '{url}'")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("oci error: {0}")]
    Oci(String),
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetterKind {
    Http,
    Oci,
}

#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// One configured fetcher for a host: the schemes it serves, the protocol it
/// speaks and optional credentials.
#[derive(Debug, Clone)]
pub struct Provider {
    pub schemes: Vec<String>,
    pub kind: GetterKind,
    pub basic_auth: Option<BasicAuth>,
}

/// Host → ordered providers. Scheme lookup picks the first provider whose
/// scheme set contains the target scheme.
pub type HostProviders = HashMap<String, Vec<Provider>>;

pub struct HelmRemote {
    providers: HostProviders,
    client: reqwest::Client,
}

impl HelmRemote {
    #[must_use]
    pub fn new(providers: HostProviders) -> Self {
        Self {
            providers,
            client: reqwest::Client::new(),
        }
    }

    fn select(&self, host: &str, scheme: &str) -> RegistryResult<&Provider> {
        self.providers
            .get(host)
            .and_then(|providers| {
                providers
                    .iter()
                    .find(|p| p.schemes.iter().any(|s| s == scheme))
            })
            .ok_or_else(|| RegistryError::MissingProvider {
                host: host.to_string(),
                scheme: scheme.to_string(),
            })
    }

    /// Fetch the raw repository index. Only `http(s)` repositories carry an
    /// index; `/index.yaml` is appended to the repository path.
    pub async fn get_index(&self, repository_url: &Url) -> RegistryResult<Vec<u8>> {
        let scheme = repository_url.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(RegistryError::InvalidRepositoryUrl {
                url: repository_url.to_string(),
            });
        }

        let host = repository_url.host_str().unwrap_or_default();
        let provider = self.select(host, scheme)?;

        let mut index_url = repository_url.clone();
        let joined = format!("{}/index.yaml", index_url.path().trim_end_matches('/'));
        index_url.set_path(&joined);

        let getter = HttpGetter::new(self.client.clone(), provider.basic_auth.clone());
        match getter.get(index_url.as_str()).await {
            Err(RegistryError::UnexpectedStatus { status: 404, .. }) => {
                Err(RegistryError::RepositoryNotFound {
                    url: repository_url.to_string(),
                })
            }
            other => other,
        }
    }

    /// Fetch a chart archive by its resolved URL (HTTP(S)) or OCI
    /// coordinate (`oci://host/repo/name:version`).
    pub async fn get_chart(&self, chart_url: &str) -> RegistryResult<Vec<u8>> {
        let parsed = Url::parse(chart_url).map_err(|_| RegistryError::InvalidRepositoryUrl {
            url: chart_url.to_string(),
        })?;
        let host = parsed.host_str().unwrap_or_default();
        let provider = self.select(host, parsed.scheme())?;

        match provider.kind {
            GetterKind::Http => {
                let getter = HttpGetter::new(self.client.clone(), provider.basic_auth.clone());
                match getter.get(chart_url).await {
                    Err(RegistryError::UnexpectedStatus { status: 404, .. }) => {
                        Err(RegistryError::ChartNotFound {
                            url: chart_url.to_string(),
                        })
                    }
                    other => other,
                }
            }
            GetterKind::Oci => {
                oci::pull_chart(&self.client, &parsed, provider.basic_auth.as_ref()).await
            }
        }
    }
}
