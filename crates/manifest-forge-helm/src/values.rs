//! Value computation.
//!
//! Sources merge with later-overrides-earlier precedence: structured
//! complex values, then each value file in order, then each remote git
//! value file, then typed `key=value` expressions, then string-typed
//! expressions. Maps merge recursively; anything else (arrays included) is
//! replaced by the right-hand side.

use manifest_forge_api::{HelmRenderParameters, ValueMap};
use manifest_forge_fs::Filesystem;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ValuesError {
    #[error("repository is missing value file at '{path}'")]
    ValueFileMissing { path: String },

    #[error("failed to parse value expression '{expression}': {reason}")]
    Expression { expression: String, reason: String },

    #[error("value file at '{path}' is not a mapping")]
    NotAMapping { path: String },

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Fs(#[from] manifest_forge_fs::FsError),
}

pub type ValuesResult<T> = std::result::Result<T, ValuesError>;

/// Parse YAML bytes into a JSON-shaped mapping. Empty and null documents
/// yield an empty map.
pub fn yaml_bytes_to_map(data: &[u8]) -> ValuesResult<ValueMap> {
    let parsed: serde_yaml::Value = serde_yaml::from_slice(data)?;
    match serde_json::to_value(parsed)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(ValueMap::new()),
        _ => Err(ValuesError::NotAMapping {
            path: "<inline>".to_string(),
        }),
    }
}

/// Merge `overlay` into `base`; the overlay wins. When both sides hold a
/// map the merge recurses, otherwise the overlay value replaces the base
/// value outright.
pub fn deep_merge(base: &mut ValueMap, overlay: ValueMap) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Combine every value source for a render request. `remote_files` carries
/// the already-fetched contents of `remoteGitValueFiles`, in declaration
/// order.
pub fn merge_values(
    fs: &Filesystem,
    target_path: &str,
    parameters: &HelmRenderParameters,
    remote_files: &[Vec<u8>],
) -> ValuesResult<ValueMap> {
    let mut values = ValueMap::new();
    if let Some(complex) = &parameters.complex_values {
        deep_merge(&mut values, complex.clone());
    }

    let ignore_missing = parameters.ignore_missing_value_files.unwrap_or(false);
    for file_name in &parameters.value_files {
        let file_path = Filesystem::join(target_path, file_name);
        if fs.exists(&file_path)? {
            let overlay = yaml_bytes_to_map(&fs.read_file(&file_path)?).map_err(|e| {
                match e {
                    ValuesError::NotAMapping { .. } => ValuesError::NotAMapping {
                        path: file_path.clone(),
                    },
                    other => other,
                }
            })?;
            deep_merge(&mut values, overlay);
        } else if !ignore_missing {
            return Err(ValuesError::ValueFileMissing { path: file_path });
        }
    }

    for data in remote_files {
        let overlay = yaml_bytes_to_map(data)?;
        deep_merge(&mut values, overlay);
    }

    for expression in flatten(parameters.values.as_ref())
        .iter()
        .chain(parameters.values_flat.iter())
    {
        parse_into(expression, &mut values, false)?;
    }
    for expression in flatten(parameters.string_values.as_ref())
        .iter()
        .chain(parameters.string_values_flat.iter())
    {
        parse_into(expression, &mut values, true)?;
    }

    Ok(values)
}

fn flatten(values: Option<&std::collections::BTreeMap<String, String>>) -> Vec<String> {
    values
        .map(|map| {
            map.iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// Parse a `key=value` expression list into `target`. The left side is a
/// dotted/bracketed path; with `force_string` the leaf stays a string
/// literal regardless of how it parses.
pub fn parse_into(expression: &str, target: &mut ValueMap, force_string: bool) -> ValuesResult<()> {
    for assignment in split_unescaped(expression, ',') {
        if assignment.is_empty() {
            continue;
        }
        let Some((path, raw_value)) = assignment.split_once('=') else {
            return Err(ValuesError::Expression {
                expression: assignment,
                reason: "missing '='".to_string(),
            });
        };
        let segments = parse_path(path).ok_or_else(|| ValuesError::Expression {
            expression: assignment.clone(),
            reason: format!("invalid path '{path}'"),
        })?;
        let value = if force_string {
            Value::String(unescape(raw_value))
        } else {
            typed_value(raw_value)
        };
        set_path(target, &segments, value).map_err(|reason| ValuesError::Expression {
            expression: assignment.clone(),
            reason,
        })?;
    }
    Ok(())
}

fn split_unescaped(input: &str, separator: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in input.chars() {
        if escaped {
            current.push('\\');
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == separator {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    if escaped {
        current.push('\\');
    }
    parts.push(current);
    parts
}

fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut escaped = false;
    for c in input.chars() {
        if escaped {
            out.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else {
            out.push(c);
        }
    }
    if escaped {
        out.push('\\');
    }
    out
}

fn parse_path(path: &str) -> Option<Vec<Segment>> {
    let mut segments = Vec::new();
    for part in split_unescaped(path, '.') {
        let part = part.trim();
        if part.is_empty() {
            return None;
        }
        let (key, brackets) = match part.find('[') {
            Some(idx) => part.split_at(idx),
            None => (part, ""),
        };
        if key.is_empty() {
            return None;
        }
        segments.push(Segment::Key(unescape(key)));

        let mut rest = brackets;
        while let Some(stripped) = rest.strip_prefix('[') {
            let (index, tail) = stripped.split_once(']')?;
            segments.push(Segment::Index(index.parse().ok()?));
            rest = tail;
        }
        if !rest.is_empty() {
            return None;
        }
    }
    (!segments.is_empty()).then_some(segments)
}

fn typed_value(raw: &str) -> Value {
    let unescaped = unescape(raw);
    match unescaped.as_str() {
        "null" | "~" => Value::Null,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        other => {
            if let Ok(int) = other.parse::<i64>() {
                Value::from(int)
            } else if let Ok(float) = other.parse::<f64>() {
                Value::from(float)
            } else {
                Value::String(unescaped)
            }
        }
    }
}

fn set_path(target: &mut ValueMap, segments: &[Segment], value: Value) -> Result<(), String> {
    let Segment::Key(first) = &segments[0] else {
        return Err("path must begin with a key".to_string());
    };
    if segments.len() == 1 {
        // a typed null deletes the key
        if value.is_null() {
            target.remove(first);
        } else {
            target.insert(first.clone(), value);
        }
        return Ok(());
    }

    let slot = target
        .entry(first.clone())
        .or_insert_with(|| empty_container(&segments[1]));
    set_in_value(slot, &segments[1..], value)
}

fn set_in_value(slot: &mut Value, segments: &[Segment], value: Value) -> Result<(), String> {
    match &segments[0] {
        Segment::Key(key) => {
            if !slot.is_object() {
                *slot = Value::Object(ValueMap::new());
            }
            let map = slot.as_object_mut().expect("slot was just made an object");
            if segments.len() == 1 {
                if value.is_null() {
                    map.remove(key);
                } else {
                    map.insert(key.clone(), value);
                }
                return Ok(());
            }
            let next = map
                .entry(key.clone())
                .or_insert_with(|| empty_container(&segments[1]));
            set_in_value(next, &segments[1..], value)
        }
        Segment::Index(index) => {
            if !slot.is_array() {
                *slot = Value::Array(Vec::new());
            }
            let array = slot.as_array_mut().expect("slot was just made an array");
            if array.len() <= *index {
                array.resize(index + 1, Value::Null);
            }
            if segments.len() == 1 {
                array[*index] = value;
                return Ok(());
            }
            if array[*index].is_null() {
                array[*index] = empty_container(&segments[1]);
            }
            set_in_value(&mut array[*index], &segments[1..], value)
        }
    }
}

fn empty_container(next: &Segment) -> Value {
    match next {
        Segment::Key(_) => Value::Object(ValueMap::new()),
        Segment::Index(_) => Value::Array(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use similar_asserts::assert_eq as sim_assert_eq;

    use super::*;

    fn map(value: serde_json::Value) -> ValueMap {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn deep_merge_recurses_into_maps() {
        let mut base = map(json!({"a": {"x": 1, "y": 2}, "keep": true}));
        deep_merge(&mut base, map(json!({"a": {"y": 3, "z": 4}})));
        sim_assert_eq!(
            Value::Object(base),
            json!({"a": {"x": 1, "y": 3, "z": 4}, "keep": true})
        );
    }

    #[test]
    fn deep_merge_replaces_arrays() {
        let mut base = map(json!({"list": [1, 2, 3]}));
        deep_merge(&mut base, map(json!({"list": [9]})));
        sim_assert_eq!(Value::Object(base), json!({"list": [9]}));
    }

    #[test]
    fn expressions_build_nested_paths() {
        let mut target = ValueMap::new();
        parse_into("image.repository=nginx,image.tag=1.27", &mut target, false).unwrap();
        parse_into("replicas=3", &mut target, false).unwrap();
        sim_assert_eq!(
            Value::Object(target),
            json!({"image": {"repository": "nginx", "tag": 1.27}, "replicas": 3})
        );
    }

    #[test]
    fn bracket_indices_create_arrays() {
        let mut target = ValueMap::new();
        parse_into("servers[1].port=8080", &mut target, false).unwrap();
        sim_assert_eq!(
            Value::Object(target),
            json!({"servers": [null, {"port": 8080}]})
        );
    }

    #[test]
    fn string_parsing_keeps_literals() {
        let mut target = ValueMap::new();
        parse_into("tag=1.27,enabled=true", &mut target, true).unwrap();
        sim_assert_eq!(
            Value::Object(target),
            json!({"tag": "1.27", "enabled": "true"})
        );
    }

    #[test]
    fn typed_null_deletes_a_key() {
        let mut target = map(json!({"a": {"b": 1, "c": 2}}));
        parse_into("a.b=null", &mut target, false).unwrap();
        sim_assert_eq!(Value::Object(target), json!({"a": {"c": 2}}));
    }

    #[test]
    fn escaped_commas_stay_in_the_value() {
        let mut target = ValueMap::new();
        parse_into(r"annotation=a\,b", &mut target, false).unwrap();
        sim_assert_eq!(Value::Object(target), json!({"annotation": "a,b"}));
    }

    #[test]
    fn malformed_expressions_reject() {
        let mut target = ValueMap::new();
        assert!(parse_into("no-equals", &mut target, false).is_err());
        assert!(parse_into("a[x]=1", &mut target, false).is_err());
        assert!(parse_into("=v", &mut target, false).is_err());
    }

    #[test]
    fn precedence_later_sources_override_earlier() {
        let fs = Filesystem::new();
        fs.write_file("/chart/values-prod.yaml", b"shared: file\nfileOnly: yes\n")
            .unwrap();

        let parameters = HelmRenderParameters {
            complex_values: Some(map(json!({"shared": "complex", "complexOnly": 1}))),
            value_files: vec!["values-prod.yaml".to_string()],
            values_flat: vec!["shared=expr".to_string()],
            ..Default::default()
        };
        let merged = merge_values(&fs, "/chart", &parameters, &[]).unwrap();
        assert_eq!(merged["shared"], "expr");
        assert_eq!(merged["fileOnly"], "yes");
        assert_eq!(merged["complexOnly"], 1);

        // with the expression removed, the file wins
        let parameters = HelmRenderParameters {
            complex_values: Some(map(json!({"shared": "complex"}))),
            value_files: vec!["values-prod.yaml".to_string()],
            ..Default::default()
        };
        let merged = merge_values(&fs, "/chart", &parameters, &[]).unwrap();
        assert_eq!(merged["shared"], "file");
    }

    #[test]
    fn string_expressions_override_typed_ones() {
        let fs = Filesystem::new();
        let parameters = HelmRenderParameters {
            values_flat: vec!["port=8080".to_string()],
            string_values_flat: vec!["port=8080".to_string()],
            ..Default::default()
        };
        let merged = merge_values(&fs, "/", &parameters, &[]).unwrap();
        assert_eq!(merged["port"], "8080");
    }

    #[test]
    fn missing_value_file_fails_unless_ignored() {
        let fs = Filesystem::new();
        fs.create_dir_all("/chart").unwrap();

        let mut parameters = HelmRenderParameters {
            value_files: vec!["values-prod.yaml".to_string()],
            ..Default::default()
        };
        let err = merge_values(&fs, "/chart", &parameters, &[]).unwrap_err();
        let ValuesError::ValueFileMissing { path } = err else {
            panic!("expected ValueFileMissing, got {err}");
        };
        assert_eq!(path, "/chart/values-prod.yaml");

        parameters.ignore_missing_value_files = Some(true);
        assert!(merge_values(&fs, "/chart", &parameters, &[]).is_ok());
    }

    #[test]
    fn remote_files_sit_between_local_files_and_expressions() {
        let fs = Filesystem::new();
        fs.write_file("/c/values.extra.yaml", b"shared: local\n").unwrap();

        let parameters = HelmRenderParameters {
            value_files: vec!["values.extra.yaml".to_string()],
            ..Default::default()
        };
        let remote = vec![b"shared: remote\nremoteOnly: true\n".to_vec()];
        let merged = merge_values(&fs, "/c", &parameters, &remote).unwrap();
        assert_eq!(merged["shared"], "remote");
        assert_eq!(merged["remoteOnly"], true);
    }
}
