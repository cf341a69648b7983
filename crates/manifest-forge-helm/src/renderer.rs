//! Chart rendering: dependency processing, capability assembly, template
//! execution and stable install-order sorting of the produced manifests.

use std::collections::HashMap;

use manifest_forge_api::{HelmRenderMetadata, HelmRenderParameters, Manifest, ValueMap};
use serde_json::Value;
use tracing::warn;

use crate::engine;
use crate::model::{Chart, ChartMetadata, DependencySpec};
use crate::values::deep_merge;

const DEFAULT_RELEASE_NAME: &str = "RELEASE-NAME";
const DEFAULT_NAMESPACE: &str = "default";
const HELM_VERSION: &str = "v3.16.3";
const KUBE_VERSION: &str = "v1.31.0";
const BASE_API_VERSIONS: &[&str] = &["v1"];
const HOOK_ANNOTATION: &str = "helm.sh/hook";

/// Kind ordering used when sorting manifests for installation. Unknown
/// kinds sort after every known kind, keeping their relative order.
const INSTALL_ORDER: &[&str] = &[
    "Namespace",
    "NetworkPolicy",
    "ResourceQuota",
    "LimitRange",
    "PodSecurityPolicy",
    "PodDisruptionBudget",
    "ServiceAccount",
    "Secret",
    "SecretList",
    "ConfigMap",
    "StorageClass",
    "PersistentVolume",
    "PersistentVolumeClaim",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleList",
    "ClusterRoleBinding",
    "ClusterRoleBindingList",
    "Role",
    "RoleList",
    "RoleBinding",
    "RoleBindingList",
    "Service",
    "DaemonSet",
    "Pod",
    "ReplicationController",
    "ReplicaSet",
    "Deployment",
    "HorizontalPodAutoscaler",
    "StatefulSet",
    "Job",
    "CronJob",
    "IngressClass",
    "Ingress",
    "APIService",
];

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Engine(#[from] engine::EngineError),

    #[error("rendered manifest '{name}' is not valid YAML: {reason}")]
    ManifestParse { name: String, reason: String },

    #[error("values don't meet the specifications of the schema: {0}")]
    Schema(String),
}

pub type RenderResult<T> = std::result::Result<T, RenderError>;

/// Service-wide render defaults, sourced from configuration.
#[derive(Debug, Clone)]
pub struct RenderDefaults {
    pub release_name: String,
    pub namespace: String,
    pub api_versions: Vec<String>,
}

impl Default for RenderDefaults {
    fn default() -> Self {
        Self {
            release_name: DEFAULT_RELEASE_NAME.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            api_versions: Vec::new(),
        }
    }
}

pub struct ChartRenderer {
    defaults: RenderDefaults,
}

/// One chart in the render plan: the root chart or an enabled dependency,
/// with its scoped values and output path prefix.
struct PlannedChart<'c> {
    chart: &'c Chart,
    metadata: ChartMetadata,
    name_path: String,
    values: ValueMap,
}

impl ChartRenderer {
    #[must_use]
    pub fn new(defaults: RenderDefaults) -> Self {
        Self { defaults }
    }

    /// Render `chart` with the already-merged user values.
    pub fn render(
        &self,
        chart: &Chart,
        user_values: ValueMap,
        parameters: &HelmRenderParameters,
    ) -> RenderResult<(Vec<Manifest>, HelmRenderMetadata)> {
        let merged_values = coalesce_tree(chart, user_values);
        if let Some(schema) = &chart.schema {
            validate_schema(schema, &merged_values)?;
        }

        let release_name = non_empty(parameters.release_name.as_deref())
            .unwrap_or(&self.defaults.release_name)
            .to_string();
        let namespace = non_empty(parameters.namespace.as_deref())
            .unwrap_or(&self.defaults.namespace)
            .to_string();

        let mut api_versions: Vec<String> =
            BASE_API_VERSIONS.iter().map(ToString::to_string).collect();
        for version in self.defaults.api_versions.iter().chain(&parameters.api_versions) {
            if !api_versions.iter().any(|v| v == version) {
                api_versions.push(version.clone());
            }
        }

        let mut plan = Vec::new();
        plan_chart(chart, &merged_values, chart.metadata.clone(), chart.name().to_string(), &mut plan);

        let partials = collect_partials(&plan);
        let context = ContextSeed {
            release_name: &release_name,
            namespace: &namespace,
            api_versions: &api_versions,
        };

        let mut rendered: Vec<(String, String)> = Vec::new();
        for planned in &plan {
            for file in &planned.chart.templates {
                if !is_manifest_template(&file.name) {
                    continue;
                }
                let full_name = format!("{}/{}", planned.name_path, file.name);
                let source = String::from_utf8_lossy(&file.data);
                let dot = context.build(planned, &full_name);
                let output = engine::render(&full_name, &source, &partials, dot)?;
                rendered.push((full_name, output));
            }
        }

        if parameters.include_crds.unwrap_or(true) {
            for planned in &plan {
                for crd in &planned.chart.crds {
                    rendered.push((
                        format!("{}/{}", planned.name_path, crd.name),
                        String::from_utf8_lossy(&crd.data).to_string(),
                    ));
                }
            }
        }

        rendered.retain(|(name, content)| {
            (name.ends_with(".yaml") || name.ends_with(".yml")) && !content.trim().is_empty()
        });

        let (manifests, hooks) = sort_manifests(&rendered)?;
        let mut out = manifests;
        if parameters.include_hooks.unwrap_or(true) {
            out.extend(hooks);
        }

        let metadata = HelmRenderMetadata {
            release_name,
            namespace,
            api_versions,
            helm_version: HELM_VERSION.to_string(),
            kube_version: Some(KUBE_VERSION.to_string()),
            merged_values,
            chart_metadata: serde_json::to_value(&chart.metadata).ok(),
        };
        Ok((out, metadata))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn is_manifest_template(name: &str) -> bool {
    let base = name.rsplit('/').next().unwrap_or(name);
    name.starts_with("templates/")
        && !base.starts_with('_')
        && (name.ends_with(".yaml") || name.ends_with(".yml"))
}

fn is_partial(name: &str) -> bool {
    let base = name.rsplit('/').next().unwrap_or(name);
    name.starts_with("templates/") && (base.starts_with('_') || name.ends_with(".tpl"))
}

fn collect_partials(plan: &[PlannedChart<'_>]) -> String {
    let mut out = String::new();
    for planned in plan {
        for file in &planned.chart.templates {
            if is_partial(&file.name) {
                out.push_str(&String::from_utf8_lossy(&file.data));
                out.push('\n');
            }
        }
    }
    out
}

/// Fold chart default values under user values, recursing into attached
/// dependencies via their alias-or-name subtree and propagating `global`
/// downward.
fn coalesce_tree(chart: &Chart, user_values: ValueMap) -> ValueMap {
    let mut out = chart.default_values.clone();
    deep_merge(&mut out, user_values);

    for (spec, dependency) in chart.metadata.dependencies.iter().zip(&chart.dependencies) {
        let key = spec.effective_name();
        let sub_user = out
            .get(key)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let mut sub = coalesce_tree(dependency, sub_user);

        if let Some(Value::Object(global)) = out.get("global") {
            let mut merged_global = global.clone();
            if let Some(Value::Object(child_global)) = sub.get("global") {
                deep_merge(&mut merged_global, child_global.clone());
            }
            sub.insert("global".to_string(), Value::Object(merged_global));
        }
        out.insert(key.to_string(), Value::Object(sub));
    }
    out
}

fn plan_chart<'c>(
    chart: &'c Chart,
    scoped_values: &ValueMap,
    metadata: ChartMetadata,
    name_path: String,
    plan: &mut Vec<PlannedChart<'c>>,
) {
    plan.push(PlannedChart {
        chart,
        metadata,
        name_path: name_path.clone(),
        values: scoped_values.clone(),
    });

    for (spec, dependency) in chart.metadata.dependencies.iter().zip(&chart.dependencies) {
        if !condition_enabled(spec, scoped_values) {
            continue;
        }
        let key = spec.effective_name();
        let sub_values = scoped_values
            .get(key)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut sub_metadata = dependency.metadata.clone();
        if let Some(alias) = &spec.alias {
            sub_metadata.name = alias.clone();
        }
        plan_chart(
            dependency,
            &sub_values,
            sub_metadata,
            format!("{name_path}/charts/{key}"),
            plan,
        );
    }
}

/// The first condition path that resolves in the parent values decides; a
/// non-boolean hit is skipped. No resolvable path leaves the dependency
/// enabled.
fn condition_enabled(spec: &DependencySpec, parent_values: &ValueMap) -> bool {
    let Some(condition) = &spec.condition else {
        return true;
    };
    for path in condition.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match lookup_path(parent_values, path) {
            Some(Value::Bool(enabled)) => return *enabled,
            Some(_) => {
                warn!(dependency = %spec.name, %path, "condition path is not a boolean, skipping");
            }
            None => {}
        }
    }
    true
}

fn lookup_path<'v>(values: &'v ValueMap, path: &str) -> Option<&'v Value> {
    let mut segments = path.split('.');
    let mut current = values.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

struct ContextSeed<'a> {
    release_name: &'a str,
    namespace: &'a str,
    api_versions: &'a [String],
}

impl ContextSeed<'_> {
    fn build(&self, planned: &PlannedChart<'_>, template_name: &str) -> gtmpl_value::Value {
        use gtmpl_value::Value as V;

        let release: HashMap<String, V> = HashMap::from([
            ("Name".to_string(), V::String(self.release_name.to_string())),
            ("Namespace".to_string(), V::String(self.namespace.to_string())),
            ("Service".to_string(), V::String("Helm".to_string())),
            ("IsInstall".to_string(), V::Bool(true)),
            ("IsUpgrade".to_string(), V::Bool(false)),
            ("Revision".to_string(), V::from(1i64)),
        ]);

        let (kube_major, kube_minor) = split_kube_version(KUBE_VERSION);
        let kube_version: HashMap<String, V> = HashMap::from([
            ("Version".to_string(), V::String(KUBE_VERSION.to_string())),
            ("GitVersion".to_string(), V::String(KUBE_VERSION.to_string())),
            ("Major".to_string(), V::String(kube_major)),
            ("Minor".to_string(), V::String(kube_minor)),
        ]);
        let capabilities: HashMap<String, V> = HashMap::from([
            ("KubeVersion".to_string(), V::Map(kube_version)),
            (
                "HelmVersion".to_string(),
                V::Map(HashMap::from([(
                    "Version".to_string(),
                    V::String(HELM_VERSION.to_string()),
                )])),
            ),
            (
                "APIVersions".to_string(),
                V::Array(
                    self.api_versions
                        .iter()
                        .map(|v| V::String(v.clone()))
                        .collect(),
                ),
            ),
        ]);

        let metadata = &planned.metadata;
        let chart: HashMap<String, V> = HashMap::from([
            ("Name".to_string(), V::String(metadata.name.clone())),
            ("Version".to_string(), V::String(metadata.version.clone())),
            ("ApiVersion".to_string(), V::String(metadata.api_version.clone())),
            (
                "AppVersion".to_string(),
                V::String(metadata.app_version.clone().unwrap_or_default()),
            ),
            (
                "Description".to_string(),
                V::String(metadata.description.clone().unwrap_or_default()),
            ),
        ]);

        let template: HashMap<String, V> = HashMap::from([
            ("Name".to_string(), V::String(template_name.to_string())),
            (
                "BasePath".to_string(),
                V::String(format!("{}/templates", planned.name_path)),
            ),
        ]);

        V::Map(HashMap::from([
            (
                "Values".to_string(),
                engine::to_engine(&Value::Object(planned.values.clone())),
            ),
            ("Release".to_string(), V::Map(release)),
            ("Chart".to_string(), V::Map(chart)),
            ("Capabilities".to_string(), V::Map(capabilities)),
            ("Template".to_string(), V::Map(template)),
        ]))
    }
}

fn split_kube_version(version: &str) -> (String, String) {
    let trimmed = version.trim_start_matches('v');
    let mut parts = trimmed.split('.');
    (
        parts.next().unwrap_or("1").to_string(),
        parts.next().unwrap_or("0").to_string(),
    )
}

/// Split rendered files into YAML documents, parse them, separate hooks
/// from plain manifests and sort the manifests into install order.
fn sort_manifests(rendered: &[(String, String)]) -> RenderResult<(Vec<Manifest>, Vec<Manifest>)> {
    struct Doc {
        source: String,
        kind: String,
        content: ValueMap,
        hook: bool,
    }

    let mut docs = Vec::new();
    for (name, content) in rendered {
        for document in split_documents(content) {
            if document.trim().is_empty() {
                continue;
            }
            let parsed: serde_yaml::Value =
                serde_yaml::from_str(&document).map_err(|e| RenderError::ManifestParse {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            let parsed =
                serde_json::to_value(parsed).map_err(|e| RenderError::ManifestParse {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            let Value::Object(content) = parsed else {
                // non-mapping or empty documents are dropped
                continue;
            };
            if content.is_empty() {
                continue;
            }

            let kind = content
                .get("kind")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let hook = content
                .get("metadata")
                .and_then(|m| m.get("annotations"))
                .and_then(|a| a.get(HOOK_ANNOTATION))
                .is_some();
            docs.push(Doc {
                source: name.clone(),
                kind,
                content,
                hook,
            });
        }
    }

    let (hooks, mut manifests): (Vec<Doc>, Vec<Doc>) = docs.into_iter().partition(|d| d.hook);
    manifests.sort_by_key(|doc| {
        INSTALL_ORDER
            .iter()
            .position(|kind| *kind == doc.kind)
            .unwrap_or(usize::MAX)
    });

    let to_manifest = |doc: Doc| Manifest {
        source: Some(doc.source),
        content: doc.content,
    };
    Ok((
        manifests.into_iter().map(to_manifest).collect(),
        hooks.into_iter().map(to_manifest).collect(),
    ))
}

fn split_documents(content: &str) -> Vec<String> {
    let mut documents = vec![String::new()];
    for line in content.lines() {
        if line == "---" || line.starts_with("--- ") {
            documents.push(String::new());
            continue;
        }
        let current = documents.last_mut().expect("documents is never empty");
        current.push_str(line);
        current.push('\n');
    }
    documents
}

/// Minimal structural validation against `values.schema.json`: `type` and
/// `required` are enforced, everything else is ignored.
fn validate_schema(schema: &[u8], values: &ValueMap) -> RenderResult<()> {
    let schema: Value =
        serde_json::from_slice(schema).map_err(|e| RenderError::Schema(e.to_string()))?;
    check_schema(&schema, &Value::Object(values.clone()), "$")
}

fn check_schema(schema: &Value, value: &Value, path: &str) -> RenderResult<()> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };

    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        let matches = match expected {
            "object" => value.is_object(),
            "array" => value.is_array(),
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "null" => value.is_null(),
            _ => true,
        };
        if !matches {
            return Err(RenderError::Schema(format!(
                "{path}: expected {expected}"
            )));
        }
    }

    if let Some(object) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(key) {
                    return Err(RenderError::Schema(format!(
                        "{path}: missing required key '{key}'"
                    )));
                }
            }
        }
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (key, sub_schema) in properties {
                if let Some(sub_value) = object.get(key) {
                    check_schema(sub_schema, sub_value, &format!("{path}.{key}"))?;
                }
            }
        }
    }
    Ok(())
}
