//! The request-facing facade: one entry point per API action, each driving
//! the full pipeline (acquire, assemble, merge, render).

use std::sync::Arc;

use manifest_forge_api::{
    HelmRenderMetadata, HelmRenderParameters, KustomizeRenderParameters, Manifest, Reference,
    ValueMap,
};
use manifest_forge_fs::Filesystem;
use manifest_forge_helm::values::merge_values;
use manifest_forge_helm::ChartRenderer;
use manifest_forge_kustomize::OverlayRenderer;

use crate::chart_provider::ChartProvider;
use crate::git_repository::GitRepositoryCache;
use crate::kustomization_provider::KustomizationProvider;
use crate::{SourceError, SourceResult};

pub struct ManifestService {
    chart_provider: ChartProvider,
    chart_renderer: ChartRenderer,
    kustomization_provider: KustomizationProvider,
    overlay_renderer: OverlayRenderer,
    git_cache: Arc<GitRepositoryCache>,
}

impl ManifestService {
    #[must_use]
    pub fn new(
        chart_provider: ChartProvider,
        chart_renderer: ChartRenderer,
        kustomization_provider: KustomizationProvider,
        overlay_renderer: OverlayRenderer,
        git_cache: Arc<GitRepositoryCache>,
    ) -> Self {
        Self {
            chart_provider,
            chart_renderer,
            kustomization_provider,
            overlay_renderer,
            git_cache,
        }
    }

    /// The chart's default values, for either reference variant.
    pub async fn get_chart_metadata(&self, reference: &Reference) -> SourceResult<ValueMap> {
        let source = self
            .chart_provider
            .get_helm_chart(reference, &HelmRenderParameters::default())
            .await?;
        Ok(source.chart.default_values)
    }

    pub async fn render_chart(
        &self,
        reference: &Reference,
        parameters: Option<&HelmRenderParameters>,
    ) -> SourceResult<(Vec<Manifest>, HelmRenderMetadata)> {
        let default_parameters = HelmRenderParameters::default();
        let parameters = parameters.unwrap_or(&default_parameters);

        let source = self.chart_provider.get_helm_chart(reference, parameters).await?;

        let remote_files = self.fetch_remote_value_files(parameters).await?;
        let merged = merge_values(&source.fs, &source.target_path, parameters, &remote_files)?;

        self.chart_renderer
            .render(&source.chart, merged, parameters)
            .map_err(SourceError::ChartRender)
    }

    pub async fn render_kustomization(
        &self,
        reference: &Reference,
        parameters: Option<&KustomizeRenderParameters>,
    ) -> SourceResult<Vec<Manifest>> {
        let default_parameters = KustomizeRenderParameters::default();
        let parameters = parameters.unwrap_or(&default_parameters);

        let kustomization = self.kustomization_provider.get_kustomization(reference).await?;
        self.overlay_renderer
            .render(&kustomization.fs, &kustomization.target_path, parameters)
            .map_err(SourceError::OverlayRender)
    }

    /// Resolve every remote git value file through the git-repo cache, in
    /// declaration order.
    async fn fetch_remote_value_files(
        &self,
        parameters: &HelmRenderParameters,
    ) -> SourceResult<Vec<Vec<u8>>> {
        let mut contents = Vec::with_capacity(parameters.remote_git_value_files.len());
        for remote in &parameters.remote_git_value_files {
            if Filesystem::is_abs(&remote.path) {
                return Err(SourceError::AbsoluteSourcePath {
                    path: remote.path.clone(),
                });
            }
            let fs = Filesystem::new();
            self.git_cache
                .retrieve_repository_to_filesystem(&remote.url, &remote.reference, &fs)
                .await?;
            let path = Filesystem::join(manifest_forge_fs::ROOT, &remote.path);
            contents.push(fs.read_file(&path)?);
        }
        Ok(contents)
    }
}
