//! Chart provider: reference dispatch and dependency assembly.
//!
//! Declared dependencies resolve locally first — `file://<relpath>`, then
//! `charts/<name>-<version>.tgz`, then `charts/<name>` — accepting only a
//! match whose loaded version equals the declared version, and fall back to
//! the chart-archive cache. Attachment order is declaration order, and a
//! dependency already on the current resolution path (same name, version
//! and repository) is never revisited.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use manifest_forge_api::{
    ChartRepositoryChartReference, DependencyPatch, GitPathReference, HelmRenderParameters,
    Reference, ValueMap,
};
use manifest_forge_fs::{targz, EntryKind, Filesystem, WalkControl, ROOT};
use manifest_forge_helm::loader::ChartError;
use manifest_forge_helm::{load_chart, Chart, DependencySpec};
use tracing::{info, warn};

use crate::git_repository::GitRepositoryCache;
use crate::helm_chart::HelmChartCache;
use crate::{SourceError, SourceResult};

const CHARTS_DIR: &str = "charts";

/// A chart together with the scratch tree it was materialized in; the tree
/// is needed later for chart-local value files.
pub struct ChartSource {
    pub chart: Chart,
    pub fs: Filesystem,
    pub target_path: String,
}

impl ChartSource {
    #[must_use]
    pub fn default_values(&self) -> &ValueMap {
        &self.chart.default_values
    }
}

pub struct ChartProvider {
    chart_cache: Arc<HelmChartCache>,
    git_cache: Arc<GitRepositoryCache>,
}

type Visited = HashSet<(String, String, String)>;

impl ChartProvider {
    #[must_use]
    pub fn new(chart_cache: Arc<HelmChartCache>, git_cache: Arc<GitRepositoryCache>) -> Self {
        Self {
            chart_cache,
            git_cache,
        }
    }

    pub async fn get_helm_chart(
        &self,
        reference: &Reference,
        parameters: &HelmRenderParameters,
    ) -> SourceResult<ChartSource> {
        match reference {
            Reference::GitPath(reference) => self.from_git_path(reference, parameters).await,
            Reference::ChartRepositoryChart(reference) => {
                self.from_chart_repository(reference, parameters).await
            }
        }
    }

    async fn from_git_path(
        &self,
        reference: &GitPathReference,
        parameters: &HelmRenderParameters,
    ) -> SourceResult<ChartSource> {
        let fs = Filesystem::new();

        let target_path = match reference.path.as_deref().filter(|p| !p.is_empty()) {
            Some(path) if Filesystem::is_abs(path) => {
                return Err(SourceError::AbsoluteSourcePath {
                    path: path.to_string(),
                })
            }
            Some(path) => Filesystem::join(ROOT, path),
            None => ROOT.to_string(),
        };

        self.git_cache
            .retrieve_repository_to_filesystem(&reference.url, &reference.reference, &fs)
            .await?;

        self.build_chart(fs, target_path, parameters).await
    }

    async fn from_chart_repository(
        &self,
        reference: &ChartRepositoryChartReference,
        parameters: &HelmRenderParameters,
    ) -> SourceResult<ChartSource> {
        let fs = Filesystem::new();
        self.chart_cache
            .retrieve_chart_to_filesystem(reference, &fs)
            .await?;

        let target_path = Filesystem::join(ROOT, &reference.chart_name);
        self.build_chart(fs, target_path, parameters).await
    }

    async fn build_chart(
        &self,
        fs: Filesystem,
        target_path: String,
        parameters: &HelmRenderParameters,
    ) -> SourceResult<ChartSource> {
        info!("building chart at {target_path}");

        let mut chart = load_chart(&fs, &target_path)?;
        fs.create_dir_all(&Filesystem::join(&target_path, CHARTS_DIR))?;

        apply_dependency_patches(
            &mut chart.metadata.dependencies,
            &parameters.dependency_patches,
        );

        let mut visited = Visited::new();
        self.resolve_dependencies(&mut chart, &fs, &target_path, &mut visited)
            .await?;

        Ok(ChartSource {
            chart,
            fs,
            target_path,
        })
    }

    /// Resolve and attach every declared dependency of `chart`, recursing
    /// into the attached charts. `visited` carries the current resolution
    /// path for cycle detection.
    fn resolve_dependencies<'a>(
        &'a self,
        chart: &'a mut Chart,
        fs: &'a Filesystem,
        chart_path: &'a str,
        visited: &'a mut Visited,
    ) -> Pin<Box<dyn Future<Output = SourceResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let specs = std::mem::take(&mut chart.metadata.dependencies);
            let charts_path = Filesystem::join(chart_path, CHARTS_DIR);

            let mut kept_specs = Vec::with_capacity(specs.len());
            let mut attached = Vec::with_capacity(specs.len());

            for spec in specs {
                validate_dependency(&spec)?;

                let triple = (
                    spec.name.clone(),
                    spec.version.clone(),
                    spec.repository.clone(),
                );
                if visited.contains(&triple) {
                    warn!(
                        dependency = %spec.name,
                        version = %spec.version,
                        "dependency already on the resolution path, skipping"
                    );
                    continue;
                }
                visited.insert(triple.clone());

                let resolved = self
                    .resolve_one(&spec, fs, chart_path, &charts_path, visited)
                    .await;
                visited.remove(&triple);

                attached.push(resolved?);
                kept_specs.push(spec);
            }

            chart.metadata.dependencies = kept_specs;
            chart.dependencies = attached;
            Ok(())
        })
    }

    async fn resolve_one(
        &self,
        spec: &DependencySpec,
        fs: &Filesystem,
        chart_path: &str,
        charts_path: &str,
        visited: &mut Visited,
    ) -> SourceResult<Chart> {
        // file://<relpath> under the chart itself
        if let Some(relative) = spec.repository.strip_prefix("file://") {
            let path = Filesystem::join(chart_path, relative);
            if fs.exists(&path)? && fs.is_dir(&path)? {
                let mut dependency = load_chart(fs, &path)?;
                if dependency.metadata.version == spec.version {
                    self.resolve_dependencies(&mut dependency, fs, &path, visited)
                        .await?;
                    return Ok(dependency);
                }
            }
        }

        // charts/<name>-<version>.tgz
        let tgz_path = Filesystem::join(charts_path, &format!("{}-{}.tgz", spec.name, spec.version));
        if fs.exists(&tgz_path)? && fs.is_file(&tgz_path)? {
            let (dep_fs, dep_path) = materialize_archive(&fs.read_file(&tgz_path)?)?;
            let mut dependency = load_chart(&dep_fs, &dep_path)?;
            if dependency.metadata.version == spec.version {
                self.resolve_dependencies(&mut dependency, &dep_fs, &dep_path, visited)
                    .await?;
                return Ok(dependency);
            }
        }

        // charts/<name> directory
        let dir_path = Filesystem::join(charts_path, &spec.name);
        if fs.exists(&dir_path)? && fs.is_dir(&dir_path)? {
            let mut dependency = load_chart(fs, &dir_path)?;
            if dependency.metadata.version == spec.version {
                self.resolve_dependencies(&mut dependency, fs, &dir_path, visited)
                    .await?;
                return Ok(dependency);
            }
        }

        // no local resolution succeeded; fetch through the archive cache
        let chart_bytes = self
            .chart_cache
            .retrieve_chart(&ChartRepositoryChartReference {
                repository_url: spec.repository.clone(),
                chart_name: spec.name.clone(),
                chart_version: Some(spec.version.clone()),
            })
            .await?;
        let (dep_fs, dep_path) = materialize_archive(&chart_bytes)?;
        let mut dependency = load_chart(&dep_fs, &dep_path)?;
        self.resolve_dependencies(&mut dependency, &dep_fs, &dep_path, visited)
            .await?;
        Ok(dependency)
    }
}

fn validate_dependency(spec: &DependencySpec) -> SourceResult<()> {
    if spec.name.is_empty() {
        return Err(SourceError::InvalidDependency {
            name: "<unnamed>".to_string(),
            reason: "name is empty".to_string(),
        });
    }
    if semver::VersionReq::parse(&spec.version).is_err() {
        return Err(SourceError::InvalidDependency {
            name: spec.name.clone(),
            reason: format!("unparseable version '{}'", spec.version),
        });
    }
    Ok(())
}

fn apply_dependency_patches(dependencies: &mut [DependencySpec], patches: &[DependencyPatch]) {
    for dependency in dependencies {
        for patch in patches {
            if !patch_targets(patch, dependency) {
                continue;
            }
            if let Some(version) = patch.values.version.as_deref().filter(|v| !v.is_empty()) {
                dependency.version = version.to_string();
            }
            if let Some(repository) = patch
                .values
                .repository_url
                .as_deref()
                .filter(|r| !r.is_empty())
            {
                dependency.repository = repository.to_string();
            }
        }
    }
}

fn patch_targets(patch: &DependencyPatch, dependency: &DependencySpec) -> bool {
    let Some(target) = &patch.target else {
        return true;
    };
    target
        .repository_url
        .as_deref()
        .is_none_or(|t| t == dependency.repository)
        && target.name.as_deref().is_none_or(|t| t == dependency.name)
        && target
            .version
            .as_deref()
            .is_none_or(|t| t == dependency.version)
        && target
            .alias
            .as_deref()
            .is_none_or(|t| Some(t) == dependency.alias.as_deref())
}

/// Unpack chart archive bytes into a fresh scratch tree and locate the
/// chart root (the single top-level directory carrying `Chart.yaml`, or the
/// tree root itself).
fn materialize_archive(data: &[u8]) -> SourceResult<(Filesystem, String)> {
    let fs = Filesystem::new();
    targz::extract(&fs, data, ROOT)?;

    if fs.exists(&Filesystem::join(ROOT, "Chart.yaml"))? {
        return Ok((fs, ROOT.to_string()));
    }

    let mut root = None;
    fs.walk(ROOT, |path, kind| {
        if kind == EntryKind::Directory {
            if root.is_none() && fs.exists(&Filesystem::join(path, "Chart.yaml"))? {
                root = Some(path.to_string());
            }
            return Ok(WalkControl::SkipDir);
        }
        Ok(WalkControl::Continue)
    })?;

    let root = root.ok_or(ChartError::MissingChartManifest {
        path: "<archive>".to_string(),
    })?;
    Ok((fs, root))
}

#[cfg(test)]
mod tests {
    use manifest_forge_api::{DependencyPatchTarget, DependencyPatchValues};

    use super::*;

    fn spec(name: &str, version: &str, repository: &str) -> DependencySpec {
        DependencySpec {
            name: name.to_string(),
            version: version.to_string(),
            repository: repository.to_string(),
            alias: None,
            condition: None,
        }
    }

    #[test]
    fn dependency_validation() {
        assert!(validate_dependency(&spec("bar", "0.2.0", "")).is_ok());
        assert!(validate_dependency(&spec("bar", "^1.2", "")).is_ok());
        assert!(validate_dependency(&spec("", "0.2.0", "")).is_err());
        assert!(validate_dependency(&spec("bar", "not a version", "")).is_err());
    }

    #[test]
    fn untargeted_patches_apply_to_every_dependency() {
        let mut dependencies = vec![spec("a", "1.0.0", "r1"), spec("b", "2.0.0", "r2")];
        let patches = vec![DependencyPatch {
            target: None,
            values: DependencyPatchValues {
                version: Some("9.9.9".to_string()),
                repository_url: None,
            },
        }];
        apply_dependency_patches(&mut dependencies, &patches);
        assert_eq!(dependencies[0].version, "9.9.9");
        assert_eq!(dependencies[1].version, "9.9.9");
        assert_eq!(dependencies[0].repository, "r1");
    }

    #[test]
    fn targeted_patches_match_name() {
        let mut dependencies = vec![spec("a", "1.0.0", "r1"), spec("b", "2.0.0", "r2")];
        let patches = vec![DependencyPatch {
            target: Some(DependencyPatchTarget {
                name: Some("b".to_string()),
                repository_url: None,
                version: None,
                alias: None,
            }),
            values: DependencyPatchValues {
                version: None,
                repository_url: Some("https://mirror.example".to_string()),
            },
        }];
        apply_dependency_patches(&mut dependencies, &patches);
        assert_eq!(dependencies[0].repository, "r1");
        assert_eq!(dependencies[1].repository, "https://mirror.example");
    }
}
