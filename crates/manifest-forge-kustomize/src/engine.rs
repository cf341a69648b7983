use std::collections::BTreeMap;

use manifest_forge_api::ValueMap;
use manifest_forge_fs::Filesystem;
use serde::Deserialize;
use serde_json::Value;

use crate::{OverlayError, OverlayResult};

const KUSTOMIZATION_FILES: &[&str] = &["kustomization.yaml", "kustomization.yml", "Kustomization"];

/// Kinds that never carry a namespace.
const CLUSTER_SCOPED: &[&str] = &[
    "Namespace",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "PersistentVolume",
    "StorageClass",
    "IngressClass",
    "PriorityClass",
    "ValidatingWebhookConfiguration",
    "MutatingWebhookConfiguration",
];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kustomization {
    #[serde(default)]
    pub resources: Vec<String>,
    /// Legacy spelling; processed before `resources`.
    #[serde(default)]
    pub bases: Vec<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub name_prefix: Option<String>,
    #[serde(default)]
    pub name_suffix: Option<String>,
    #[serde(default)]
    pub common_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub common_annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub patches_strategic_merge: Vec<String>,
    #[serde(default)]
    pub patches: Vec<PatchEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchEntry {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub patch: Option<String>,
    #[serde(default)]
    pub target: Option<PatchTarget>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchTarget {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Run the overlay rooted at `target_path` and return the produced
/// resources in order.
pub fn run(fs: &Filesystem, target_path: &str) -> OverlayResult<Vec<ValueMap>> {
    let kustomization = load_kustomization(fs, target_path)?;

    let mut resources = Vec::new();
    for entry in kustomization.bases.iter().chain(&kustomization.resources) {
        let path = Filesystem::join(target_path, entry);
        if fs.exists(&path)? && fs.is_dir(&path)? {
            resources.extend(run(fs, &path)?);
        } else if fs.exists(&path)? {
            for document in split_documents(&String::from_utf8_lossy(&fs.read_file(&path)?)) {
                if let Some(resource) = parse_resource(&document, &path)? {
                    resources.push(resource);
                }
            }
        } else {
            return Err(OverlayError::ResourceNotFound { path });
        }
    }

    apply_patches(fs, target_path, &kustomization, &mut resources)?;
    apply_transformations(&kustomization, &mut resources);
    Ok(resources)
}

fn load_kustomization(fs: &Filesystem, target_path: &str) -> OverlayResult<Kustomization> {
    for file in KUSTOMIZATION_FILES {
        let path = Filesystem::join(target_path, file);
        if fs.exists(&path)? {
            let data = fs.read_file(&path)?;
            return serde_yaml::from_slice(&data).map_err(|e| OverlayError::Parse {
                path,
                reason: e.to_string(),
            });
        }
    }
    Err(OverlayError::MissingKustomization {
        path: target_path.to_string(),
    })
}

fn parse_resource(document: &str, path: &str) -> OverlayResult<Option<ValueMap>> {
    if document.trim().is_empty() {
        return Ok(None);
    }
    let parsed: serde_yaml::Value =
        serde_yaml::from_str(document).map_err(|e| OverlayError::Parse {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
    let parsed = serde_json::to_value(parsed).map_err(|e| OverlayError::Parse {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    match parsed {
        Value::Object(map) if !map.is_empty() => Ok(Some(map)),
        _ => Ok(None),
    }
}

fn apply_patches(
    fs: &Filesystem,
    target_path: &str,
    kustomization: &Kustomization,
    resources: &mut [ValueMap],
) -> OverlayResult<()> {
    // legacy strategic-merge patch files match by apiVersion/kind/name
    for entry in &kustomization.patches_strategic_merge {
        let path = Filesystem::join(target_path, entry);
        if !fs.exists(&path)? {
            return Err(OverlayError::ResourceNotFound { path });
        }
        for document in split_documents(&String::from_utf8_lossy(&fs.read_file(&path)?)) {
            if let Some(patch) = parse_resource(&document, &path)? {
                for resource in resources.iter_mut() {
                    if matches_identity(resource, &patch) {
                        strategic_merge(resource, patch.clone());
                    }
                }
            }
        }
    }

    for entry in &kustomization.patches {
        let patch = match (&entry.path, &entry.patch) {
            (Some(path), _) => {
                let path = Filesystem::join(target_path, path);
                if !fs.exists(&path)? {
                    return Err(OverlayError::ResourceNotFound { path });
                }
                let data = String::from_utf8_lossy(&fs.read_file(&path)?).to_string();
                parse_resource(&data, &path)?
            }
            (None, Some(inline)) => parse_resource(inline, "<inline patch>")?,
            (None, None) => None,
        };
        let Some(patch) = patch else { continue };

        for resource in resources.iter_mut() {
            let matched = match &entry.target {
                Some(target) => matches_target(resource, target),
                None => matches_identity(resource, &patch),
            };
            if matched {
                strategic_merge(resource, patch.clone());
            }
        }
    }
    Ok(())
}

fn apply_transformations(kustomization: &Kustomization, resources: &mut [ValueMap]) {
    for resource in resources.iter_mut() {
        let kind = resource
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if kustomization.name_prefix.is_some() || kustomization.name_suffix.is_some() {
            let prefix = kustomization.name_prefix.as_deref().unwrap_or_default();
            let suffix = kustomization.name_suffix.as_deref().unwrap_or_default();
            if let Some(name) = metadata_mut(resource)
                .get("name")
                .and_then(Value::as_str)
                .map(ToString::to_string)
            {
                metadata_mut(resource)
                    .insert("name".to_string(), Value::String(format!("{prefix}{name}{suffix}")));
            }
        }

        if let Some(namespace) = &kustomization.namespace {
            if !CLUSTER_SCOPED.contains(&kind.as_str()) {
                metadata_mut(resource)
                    .insert("namespace".to_string(), Value::String(namespace.clone()));
            }
        }

        if !kustomization.common_labels.is_empty() {
            merge_string_map(metadata_mut(resource), "labels", &kustomization.common_labels);
        }
        if !kustomization.common_annotations.is_empty() {
            merge_string_map(
                metadata_mut(resource),
                "annotations",
                &kustomization.common_annotations,
            );
        }
    }
}

fn metadata_mut(resource: &mut ValueMap) -> &mut ValueMap {
    if !resource.get("metadata").is_some_and(Value::is_object) {
        resource.insert("metadata".to_string(), Value::Object(ValueMap::new()));
    }
    resource
        .get_mut("metadata")
        .and_then(Value::as_object_mut)
        .expect("metadata was just ensured")
}

fn merge_string_map(target: &mut ValueMap, key: &str, entries: &BTreeMap<String, String>) {
    if !target.get(key).is_some_and(Value::is_object) {
        target.insert(key.to_string(), Value::Object(ValueMap::new()));
    }
    let map = target
        .get_mut(key)
        .and_then(Value::as_object_mut)
        .expect("map was just ensured");
    for (name, value) in entries {
        map.insert(name.clone(), Value::String(value.clone()));
    }
}

fn identity(resource: &ValueMap) -> (String, String, String) {
    let get = |key: &str| {
        resource
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let name = resource
        .get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    (get("apiVersion"), get("kind"), name)
}

fn matches_identity(resource: &ValueMap, patch: &ValueMap) -> bool {
    identity(resource) == identity(patch)
}

fn matches_target(resource: &ValueMap, target: &PatchTarget) -> bool {
    let (_, kind, name) = identity(resource);
    let namespace = resource
        .get("metadata")
        .and_then(|m| m.get("namespace"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    target.kind.as_deref().is_none_or(|t| t == kind)
        && target.name.as_deref().is_none_or(|t| t == name)
        && target.namespace.as_deref().is_none_or(|t| t == namespace)
}

/// Strategic merge: maps recurse, a null patch value deletes the key,
/// everything else (arrays included) is replaced.
fn strategic_merge(base: &mut ValueMap, patch: ValueMap) {
    for (key, value) in patch {
        match (base.get_mut(&key), value) {
            (_, Value::Null) => {
                base.remove(&key);
            }
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                strategic_merge(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
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
