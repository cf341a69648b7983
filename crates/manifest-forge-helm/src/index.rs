//! Repository index parsing.
//!
//! Index bytes may be JSON or YAML; JSON is attempted first when the bytes
//! are JSON-valid and its result stands (a later YAML failure never
//! overwrites it). Entries failing validation are dropped, missing
//! `apiVersion` fields on chart versions default to `v1`, and versions are
//! ordered newest first.

use std::collections::BTreeMap;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("empty repository index")]
    Empty,

    #[error("repository index has no apiVersion")]
    NoApiVersion,

    #[error("failed to parse repository index: {0}")]
    Parse(String),

    #[error("chart '{name}' version '{version}' not found in repository index")]
    ChartNotFound { name: String, version: String },
}

pub type IndexResult<T> = std::result::Result<T, IndexError>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartVersion {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIndex {
    #[serde(default)]
    api_version: String,
    #[serde(default)]
    entries: BTreeMap<String, Vec<Option<ChartVersion>>>,
}

#[derive(Debug, Clone)]
pub struct IndexFile {
    pub api_version: String,
    pub entries: BTreeMap<String, Vec<ChartVersion>>,
}

impl IndexFile {
    /// Look up `name` at `version`; an empty version selects the newest.
    pub fn get(&self, name: &str, version: &str) -> IndexResult<&ChartVersion> {
        let versions = self
            .entries
            .get(name)
            .filter(|versions| !versions.is_empty())
            .ok_or_else(|| IndexError::ChartNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })?;

        if version.is_empty() {
            return Ok(&versions[0]);
        }
        versions
            .iter()
            .find(|candidate| candidate.version == version)
            .ok_or_else(|| IndexError::ChartNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })
    }
}

pub fn parse_index(data: &[u8]) -> IndexResult<IndexFile> {
    if data.is_empty() {
        return Err(IndexError::Empty);
    }

    let raw: RawIndex = if serde_json::from_slice::<serde::de::IgnoredAny>(data).is_ok() {
        serde_json::from_slice(data).map_err(|e| IndexError::Parse(e.to_string()))?
    } else {
        serde_yaml::from_slice(data).map_err(|e| IndexError::Parse(e.to_string()))?
    };

    if raw.api_version.is_empty() {
        return Err(IndexError::NoApiVersion);
    }

    let mut entries = BTreeMap::new();
    for (name, versions) in raw.entries {
        let mut kept: Vec<ChartVersion> = versions
            .into_iter()
            .flatten()
            .filter_map(|mut candidate| {
                if candidate.api_version.is_empty() {
                    candidate.api_version = "v1".to_string();
                }
                validate(&candidate).then_some(candidate)
            })
            .collect();
        kept.sort_by(|a, b| {
            let a = parse_version(&a.version);
            let b = parse_version(&b.version);
            b.cmp(&a)
        });
        entries.insert(name, kept);
    }

    Ok(IndexFile {
        api_version: raw.api_version,
        entries,
    })
}

fn validate(candidate: &ChartVersion) -> bool {
    !candidate.name.is_empty()
        && !candidate.version.is_empty()
        && parse_version(&candidate.version).is_some()
}

fn parse_version(version: &str) -> Option<semver::Version> {
    semver::Version::parse(version.trim_start_matches('v')).ok()
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    const INDEX_YAML: &str = indoc! {r#"
        apiVersion: v1
        entries:
          demo:
            - name: demo
              version: 0.1.0
              digest: sha256:aaa
              urls:
                - charts/demo-0.1.0.tgz
            - name: demo
              version: 0.2.0
              digest: sha256:bbb
              urls:
                - charts/demo-0.2.0.tgz
          broken:
            - name: broken
              version: not-a-version
    "#};

    #[test]
    fn versions_sort_newest_first() {
        let index = parse_index(INDEX_YAML.as_bytes()).unwrap();
        let newest = index.get("demo", "").unwrap();
        assert_eq!(newest.version, "0.2.0");
    }

    #[test]
    fn exact_version_lookup() {
        let index = parse_index(INDEX_YAML.as_bytes()).unwrap();
        assert_eq!(index.get("demo", "0.1.0").unwrap().digest, "sha256:aaa");
        let err = index.get("demo", "9.9.9").unwrap_err();
        assert!(matches!(err, IndexError::ChartNotFound { .. }));
    }

    #[test]
    fn invalid_entries_are_dropped() {
        let index = parse_index(INDEX_YAML.as_bytes()).unwrap();
        let err = index.get("broken", "").unwrap_err();
        assert!(matches!(err, IndexError::ChartNotFound { .. }));
    }

    #[test]
    fn missing_api_version_on_entries_defaults_to_v1() {
        let index = parse_index(INDEX_YAML.as_bytes()).unwrap();
        assert_eq!(index.get("demo", "0.1.0").unwrap().api_version, "v1");
    }

    #[test]
    fn json_indexes_parse_too() {
        let json = serde_json::json!({
            "apiVersion": "v1",
            "entries": {
                "demo": [
                    {"name": "demo", "version": "1.2.3", "urls": ["demo-1.2.3.tgz"]}
                ]
            }
        });
        let index = parse_index(json.to_string().as_bytes()).unwrap();
        assert_eq!(index.get("demo", "").unwrap().version, "1.2.3");
    }

    #[test]
    fn empty_and_versionless_indexes_reject() {
        assert!(matches!(parse_index(b""), Err(IndexError::Empty)));
        assert!(matches!(
            parse_index(b"entries: {}\n"),
            Err(IndexError::NoApiVersion)
        ));
    }
}
