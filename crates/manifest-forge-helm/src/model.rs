use manifest_forge_api::ValueMap;
use serde::{Deserialize, Serialize};

/// `Chart.yaml` as the loader reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub chart_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DependencySpec>,
}

fn default_api_version() -> String {
    "v1".to_string()
}

/// A declared chart dependency. `repository` may be a `file://<relpath>`
/// under the parent chart, an HTTP(S) chart-repository URL, or an OCI URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencySpec {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl DependencySpec {
    /// The key this dependency's values live under in the parent tree.
    #[must_use]
    pub fn effective_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// One file of a chart, with a slash-normalized path relative to the chart
/// root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedFile {
    pub name: String,
    pub data: Vec<u8>,
}

/// A fully loaded chart. Dependencies are attached bottom-up after their
/// own assembly completes; the graph is a tree (every attach produces a
/// fresh node).
#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    pub metadata: ChartMetadata,
    pub default_values: ValueMap,
    /// Raw `values.schema.json` when the chart carries one.
    pub schema: Option<Vec<u8>>,
    /// Files under `templates/`.
    pub templates: Vec<BufferedFile>,
    /// Files under `crds/`, emitted verbatim when CRDs are included.
    pub crds: Vec<BufferedFile>,
    /// Everything else, including the raw `charts/` subtree used for local
    /// dependency resolution.
    pub files: Vec<BufferedFile>,
    pub dependencies: Vec<Chart>,
}

impl Chart {
    pub fn add_dependency(&mut self, chart: Chart) {
        self.dependencies.push(chart);
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}
