//! Source-acquisition pipeline.
//!
//! Three cache tiers memoize git clones, repository indexes and chart
//! archives under content-addressed keys. Each tier calls the tier below on
//! miss; no tier calls one above it. The providers dispatch on the request
//! reference and materialize scratch trees; the render service drives the
//! whole pipeline for one request.

pub mod chart_provider;
pub mod git_repository;
pub mod helm_chart;
pub mod helm_index;
pub mod kustomization_provider;
pub mod render_service;

use async_trait::async_trait;
use manifest_forge_cache::CacheError;
use manifest_forge_fs::{Filesystem, FsError};
use manifest_forge_git::{GitError, GitResult};
use manifest_forge_helm::index::IndexError;
use manifest_forge_helm::loader::ChartError;
use manifest_forge_helm::renderer::RenderError;
use manifest_forge_helm::values::ValuesError;
use manifest_forge_kustomize::OverlayError;
use manifest_forge_registry::{RegistryError, RegistryResult};
use url::Url;

pub use chart_provider::{ChartProvider, ChartSource};
pub use git_repository::GitRepositoryCache;
pub use helm_chart::HelmChartCache;
pub use helm_index::HelmIndexCache;
pub use kustomization_provider::{Kustomization, KustomizationProvider};
pub use render_service::ManifestService;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Values(#[from] ValuesError),

    #[error("failed to build helm chart: {0}")]
    ChartBuild(#[from] ChartError),

    #[error("failed to build helm chart: dependency '{name}' is invalid: {reason}")]
    InvalidDependency { name: String, reason: String },

    #[error("failed to render helm chart: {0}")]
    ChartRender(#[from] RenderError),

    #[error("failed to render kustomization: {0}")]
    OverlayRender(#[from] OverlayError),

    #[error("git source path cannot be absolute: '{path}'")]
    AbsoluteSourcePath { path: String },

    #[error("kustomization reference is not a git repository path reference")]
    KustomizationReferenceInvalid,

    #[error("failed to refresh {failed} of {total} repository indexes: {reasons}")]
    IndexRefresh {
        failed: usize,
        total: usize,
        reasons: String,
    },
}

pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// The slice of the git adapter the caches consume; mockable in tests.
#[async_trait]
pub trait GitSource: Send + Sync {
    async fn to_hash(&self, url: &str, reference: &str) -> GitResult<String>;

    async fn clone_commit(&self, url: &str, reference: &str) -> GitResult<Filesystem>;
}

#[async_trait]
impl GitSource for manifest_forge_git::Git {
    async fn to_hash(&self, url: &str, reference: &str) -> GitResult<String> {
        manifest_forge_git::Git::to_hash(self, url, reference).await
    }

    async fn clone_commit(&self, url: &str, reference: &str) -> GitResult<Filesystem> {
        manifest_forge_git::Git::clone_commit(self, url, reference).await
    }
}

/// The slice of the registry adapter the caches consume; mockable in tests.
#[async_trait]
pub trait ChartRemote: Send + Sync {
    async fn get_index(&self, repository_url: &Url) -> RegistryResult<Vec<u8>>;

    async fn get_chart(&self, chart_url: &str) -> RegistryResult<Vec<u8>>;
}

#[async_trait]
impl ChartRemote for manifest_forge_registry::HelmRemote {
    async fn get_index(&self, repository_url: &Url) -> RegistryResult<Vec<u8>> {
        manifest_forge_registry::HelmRemote::get_index(self, repository_url).await
    }

    async fn get_chart(&self, chart_url: &str) -> RegistryResult<Vec<u8>> {
        manifest_forge_registry::HelmRemote::get_chart(self, chart_url).await
    }
}
