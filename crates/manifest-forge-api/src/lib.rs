//! Wire model shared by the HTTP surface and the rendering pipeline.
//!
//! References are a tagged union with an explicit `type` discriminator;
//! unknown shapes and unknown fields reject at deserialization time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Arbitrary YAML/JSON mapping, the shape of values trees and manifest
/// contents.
pub type ValueMap = serde_json::Map<String, serde_json::Value>;

/// A declarative pointer at a Kubernetes manifest source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Reference {
    GitPath(GitPathReference),
    ChartRepositoryChart(ChartRepositoryChartReference),
}

/// A directory inside a Git repository at a symbolic reference or commit
/// hash. `path` is repository-relative and never absolute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GitPathReference {
    pub url: String,
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// A chart coordinate in an HTTP(S) or OCI chart repository. An empty
/// `chartVersion` means "latest resolvable".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChartRepositoryChartReference {
    #[serde(rename = "repositoryURL")]
    pub repository_url: String,
    pub chart_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_version: Option<String>,
}

/// One parsed Kubernetes resource document plus the template it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub content: ValueMap,
}

/// A value file inside another Git repository, merged during value
/// computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RemoteGitValueFile {
    pub url: String,
    pub reference: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DependencyPatchTarget {
    #[serde(default, rename = "repositoryURL", skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DependencyPatchValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, rename = "repositoryURL", skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,
}

/// Rewrites applied to declared chart dependencies before resolution. A
/// missing target matches every dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DependencyPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<DependencyPatchTarget>,
    pub values: DependencyPatchValues,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct HelmRenderParameters {
    pub release_name: Option<String>,
    pub namespace: Option<String>,
    pub api_versions: Vec<String>,
    pub include_crds: Option<bool>,
    pub include_hooks: Option<bool>,
    pub complex_values: Option<ValueMap>,
    pub value_files: Vec<String>,
    pub remote_git_value_files: Vec<RemoteGitValueFile>,
    pub values: Option<BTreeMap<String, String>>,
    pub values_flat: Vec<String>,
    pub string_values: Option<BTreeMap<String, String>>,
    pub string_values_flat: Vec<String>,
    pub ignore_missing_value_files: Option<bool>,
    pub dependency_patches: Vec<DependencyPatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmRenderMetadata {
    pub release_name: String,
    pub namespace: String,
    pub api_versions: Vec<String>,
    pub helm_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_version: Option<String>,
    pub merged_values: ValueMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_metadata: Option<serde_json::Value>,
}

/// Extra manifests written into the overlay tree before the engine runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ManifestInjection {
    pub file_name: String,
    pub manifests: Vec<Manifest>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct KustomizeRenderParameters {
    pub manifest_injections: Vec<ManifestInjection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GetChartMetadataAction {
    pub reference: Reference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetChartMetadataResponse {
    pub default_values: ValueMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RenderChartAction {
    pub reference: Reference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<HelmRenderParameters>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderChartResponse {
    pub manifests: Vec<Manifest>,
    pub metadata: HelmRenderMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RenderKustomizationAction {
    pub reference: Reference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<KustomizeRenderParameters>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderKustomizationResponse {
    pub manifests: Vec<Manifest>,
}

/// Error body returned for every non-2xx response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
