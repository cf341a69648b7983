//! Embedded go-template engine.
//!
//! Each template file renders with the chart's collected partials in scope.
//! `include` re-enters the partial set, so the common
//! `{{ include "chart.labels" . | nindent 4 }}` pattern works. The helper
//! set is a curated subset of the usual chart-template dialect; `tpl` and
//! `.Capabilities.APIVersions.Has` are not part of it.

use std::cell::RefCell;
use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use gtmpl::{Context, FuncError, Template};
use gtmpl_value::Value;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to parse template '{name}': {message}")]
    Parse { name: String, message: String },

    #[error("failed to render template '{name}': {message}")]
    Render { name: String, message: String },
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Separates partial output from template output in a combined parse. The
/// control characters never appear in chart templates.
const BOUNDARY: &str = "\u{1}--template-boundary--\u{1}";

thread_local! {
    static PARTIALS: RefCell<String> = const { RefCell::new(String::new()) };
}

/// Render one template file. `partials` is the concatenated source of every
/// partial file in the chart tree; its defines are visible to both the
/// `template` action and the `include` function.
pub fn render(name: &str, source: &str, partials: &str, dot: Value) -> EngineResult<String> {
    PARTIALS.with(|cell| partials.clone_into(&mut *cell.borrow_mut()));

    let text = if partials.is_empty() {
        source.to_string()
    } else {
        format!("{partials}{BOUNDARY}{source}")
    };

    let mut template = Template::default();
    register_functions(&mut template);
    template.parse(text).map_err(|e| EngineError::Parse {
        name: name.to_string(),
        message: e.to_string(),
    })?;
    let output = template
        .render(&Context::from(dot))
        .map_err(|e| EngineError::Render {
            name: name.to_string(),
            message: e.to_string(),
        })?;

    // everything before the boundary is partial-file whitespace
    Ok(match output.split_once(BOUNDARY) {
        Some((_, rest)) => rest.to_string(),
        None => output,
    })
}

/// Convert a JSON-shaped value into the engine's value space.
#[must_use]
pub fn to_engine(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                Value::from(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::Array(items.iter().map(to_engine).collect()),
        serde_json::Value::Object(map) => Value::Map(
            map.iter()
                .map(|(key, value)| (key.clone(), to_engine(value)))
                .collect(),
        ),
    }
}

fn from_engine(value: &Value) -> serde_json::Value {
    match value {
        Value::NoValue | Value::Nil | Value::Function(_) => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                serde_json::Value::from(i)
            } else if let Some(u) = n.as_u64() {
                serde_json::Value::from(u)
            } else {
                serde_json::Value::from(n.as_f64().unwrap_or_default())
            }
        }
        Value::Array(items) => serde_json::Value::Array(items.iter().map(from_engine).collect()),
        Value::Map(map) | Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            serde_json::Value::Object(
                keys.into_iter()
                    .map(|key| (key.clone(), from_engine(&map[key])))
                    .collect(),
            )
        }
    }
}

fn register_functions(template: &mut Template) {
    for (name, func) in [
        ("quote", func_quote as gtmpl::Func),
        ("squote", func_squote),
        ("default", func_default),
        ("required", func_required),
        ("empty", func_empty),
        ("coalesce", func_coalesce),
        ("ternary", func_ternary),
        ("include", func_include),
        ("indent", func_indent),
        ("nindent", func_nindent),
        ("toYaml", func_to_yaml),
        ("fromYaml", func_from_yaml),
        ("toJson", func_to_json),
        ("trim", func_trim),
        ("trimPrefix", func_trim_prefix),
        ("trimSuffix", func_trim_suffix),
        ("upper", func_upper),
        ("lower", func_lower),
        ("replace", func_replace),
        ("contains", func_contains),
        ("hasPrefix", func_has_prefix),
        ("hasSuffix", func_has_suffix),
        ("trunc", func_trunc),
        ("join", func_join),
        ("add", func_add),
        ("sub", func_sub),
        ("b64enc", func_b64enc),
        ("b64dec", func_b64dec),
        ("toString", func_to_string),
        ("lookup", func_lookup),
    ] {
        template.add_func(name, func);
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::NoValue | Value::Nil => String::new(),
        other => other.to_string(),
    }
}

fn arg<'a>(args: &'a [Value], index: usize, func: &str, want: usize) -> Result<&'a Value, FuncError> {
    args.get(index)
        .ok_or_else(|| FuncError::Generic(format!("{func} requires at least {want} argument(s)")))
}

fn int_arg(args: &[Value], index: usize, func: &str, want: usize) -> Result<i64, FuncError> {
    match arg(args, index, func, want)? {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| FuncError::Generic(format!("{func}: expected an integer"))),
        _ => Err(FuncError::Generic(format!("{func}: expected an integer"))),
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::NoValue | Value::Nil => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Map(map) | Value::Object(map) => map.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f == 0.0),
        Value::Function(_) => false,
    }
}

fn func_quote(args: &[Value]) -> Result<Value, FuncError> {
    let quoted: Vec<String> = args
        .iter()
        .map(|v| format!("\"{}\"", stringify(v).replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    Ok(Value::String(quoted.join(" ")))
}

fn func_squote(args: &[Value]) -> Result<Value, FuncError> {
    let quoted: Vec<String> = args.iter().map(|v| format!("'{}'", stringify(v))).collect();
    Ok(Value::String(quoted.join(" ")))
}

fn func_default(args: &[Value]) -> Result<Value, FuncError> {
    let fallback = arg(args, 0, "default", 2)?;
    match args.get(1) {
        Some(value) if !is_empty_value(value) => Ok(value.clone()),
        _ => Ok(fallback.clone()),
    }
}

fn func_required(args: &[Value]) -> Result<Value, FuncError> {
    let message = stringify(arg(args, 0, "required", 2)?);
    match args.get(1) {
        Some(value) if !is_empty_value(value) => Ok(value.clone()),
        _ => Err(FuncError::Generic(message)),
    }
}

fn func_empty(args: &[Value]) -> Result<Value, FuncError> {
    Ok(Value::Bool(args.first().is_none_or(is_empty_value)))
}

fn func_coalesce(args: &[Value]) -> Result<Value, FuncError> {
    Ok(args
        .iter()
        .find(|v| !is_empty_value(v))
        .cloned()
        .unwrap_or(Value::Nil))
}

fn func_ternary(args: &[Value]) -> Result<Value, FuncError> {
    let if_true = arg(args, 0, "ternary", 3)?;
    let if_false = arg(args, 1, "ternary", 3)?;
    let condition = arg(args, 2, "ternary", 3)?;
    if matches!(condition, Value::Bool(true)) {
        Ok(if_true.clone())
    } else {
        Ok(if_false.clone())
    }
}

fn func_include(args: &[Value]) -> Result<Value, FuncError> {
    let name = stringify(arg(args, 0, "include", 2)?);
    let dot = args.get(1).cloned().unwrap_or(Value::NoValue);

    let partials = PARTIALS.with(|cell| cell.borrow().clone());
    let text = format!("{partials}{BOUNDARY}{{{{template \"{name}\" .}}}}");

    let mut template = Template::default();
    register_functions(&mut template);
    template
        .parse(text)
        .map_err(|e| FuncError::Generic(format!("include {name:?}: {e}")))?;
    let output = template
        .render(&Context::from(dot))
        .map_err(|e| FuncError::Generic(format!("include {name:?}: {e}")))?;
    let output = match output.split_once(BOUNDARY) {
        Some((_, rest)) => rest.to_string(),
        None => output,
    };
    Ok(Value::String(output))
}

fn func_indent(args: &[Value]) -> Result<Value, FuncError> {
    let width = int_arg(args, 0, "indent", 2)?.max(0) as usize;
    let text = stringify(arg(args, 1, "indent", 2)?);
    let pad = " ".repeat(width);
    let indented: Vec<String> = text.lines().map(|line| format!("{pad}{line}")).collect();
    Ok(Value::String(indented.join("\n")))
}

fn func_nindent(args: &[Value]) -> Result<Value, FuncError> {
    match func_indent(args)? {
        Value::String(s) => Ok(Value::String(format!("\n{s}"))),
        other => Ok(other),
    }
}

fn func_to_yaml(args: &[Value]) -> Result<Value, FuncError> {
    let value = from_engine(arg(args, 0, "toYaml", 1)?);
    let yaml = serde_yaml::to_string(&value)
        .map_err(|e| FuncError::Generic(format!("toYaml: {e}")))?;
    Ok(Value::String(yaml.trim_end_matches('\n').to_string()))
}

fn func_from_yaml(args: &[Value]) -> Result<Value, FuncError> {
    let text = stringify(arg(args, 0, "fromYaml", 1)?);
    let parsed: serde_json::Value = serde_yaml::from_str::<serde_yaml::Value>(&text)
        .ok()
        .and_then(|v| serde_json::to_value(v).ok())
        .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));
    Ok(to_engine(&parsed))
}

fn func_to_json(args: &[Value]) -> Result<Value, FuncError> {
    let value = from_engine(arg(args, 0, "toJson", 1)?);
    serde_json::to_string(&value)
        .map(Value::String)
        .map_err(|e| FuncError::Generic(format!("toJson: {e}")))
}

fn func_trim(args: &[Value]) -> Result<Value, FuncError> {
    Ok(Value::String(stringify(arg(args, 0, "trim", 1)?).trim().to_string()))
}

fn func_trim_prefix(args: &[Value]) -> Result<Value, FuncError> {
    let prefix = stringify(arg(args, 0, "trimPrefix", 2)?);
    let text = stringify(arg(args, 1, "trimPrefix", 2)?);
    Ok(Value::String(
        text.strip_prefix(&prefix).unwrap_or(&text).to_string(),
    ))
}

fn func_trim_suffix(args: &[Value]) -> Result<Value, FuncError> {
    let suffix = stringify(arg(args, 0, "trimSuffix", 2)?);
    let text = stringify(arg(args, 1, "trimSuffix", 2)?);
    Ok(Value::String(
        text.strip_suffix(&suffix).unwrap_or(&text).to_string(),
    ))
}

fn func_upper(args: &[Value]) -> Result<Value, FuncError> {
    Ok(Value::String(stringify(arg(args, 0, "upper", 1)?).to_uppercase()))
}

fn func_lower(args: &[Value]) -> Result<Value, FuncError> {
    Ok(Value::String(stringify(arg(args, 0, "lower", 1)?).to_lowercase()))
}

fn func_replace(args: &[Value]) -> Result<Value, FuncError> {
    let old = stringify(arg(args, 0, "replace", 3)?);
    let new = stringify(arg(args, 1, "replace", 3)?);
    let text = stringify(arg(args, 2, "replace", 3)?);
    Ok(Value::String(text.replace(&old, &new)))
}

fn func_contains(args: &[Value]) -> Result<Value, FuncError> {
    let needle = stringify(arg(args, 0, "contains", 2)?);
    let haystack = stringify(arg(args, 1, "contains", 2)?);
    Ok(Value::Bool(haystack.contains(&needle)))
}

fn func_has_prefix(args: &[Value]) -> Result<Value, FuncError> {
    let prefix = stringify(arg(args, 0, "hasPrefix", 2)?);
    let text = stringify(arg(args, 1, "hasPrefix", 2)?);
    Ok(Value::Bool(text.starts_with(&prefix)))
}

fn func_has_suffix(args: &[Value]) -> Result<Value, FuncError> {
    let suffix = stringify(arg(args, 0, "hasSuffix", 2)?);
    let text = stringify(arg(args, 1, "hasSuffix", 2)?);
    Ok(Value::Bool(text.ends_with(&suffix)))
}

fn func_trunc(args: &[Value]) -> Result<Value, FuncError> {
    let length = int_arg(args, 0, "trunc", 2)?;
    let text = stringify(arg(args, 1, "trunc", 2)?);
    let truncated: String = if length >= 0 {
        text.chars().take(length as usize).collect()
    } else {
        let skip = text.chars().count().saturating_sub(length.unsigned_abs() as usize);
        text.chars().skip(skip).collect()
    };
    Ok(Value::String(truncated))
}

fn func_join(args: &[Value]) -> Result<Value, FuncError> {
    let separator = stringify(arg(args, 0, "join", 2)?);
    match arg(args, 1, "join", 2)? {
        Value::Array(items) => Ok(Value::String(
            items.iter().map(stringify).collect::<Vec<_>>().join(&separator),
        )),
        other => Ok(Value::String(stringify(other))),
    }
}

fn func_add(args: &[Value]) -> Result<Value, FuncError> {
    let mut sum = 0i64;
    for value in args {
        sum += match value {
            Value::Number(n) => n.as_i64().unwrap_or_default(),
            _ => return Err(FuncError::Generic("add: expected numbers".to_string())),
        };
    }
    Ok(Value::from(sum))
}

fn func_sub(args: &[Value]) -> Result<Value, FuncError> {
    let a = int_arg(args, 0, "sub", 2)?;
    let b = int_arg(args, 1, "sub", 2)?;
    Ok(Value::from(a - b))
}

fn func_b64enc(args: &[Value]) -> Result<Value, FuncError> {
    Ok(Value::String(BASE64.encode(stringify(arg(args, 0, "b64enc", 1)?))))
}

fn func_b64dec(args: &[Value]) -> Result<Value, FuncError> {
    let decoded = BASE64
        .decode(stringify(arg(args, 0, "b64dec", 1)?))
        .map_err(|e| FuncError::Generic(format!("b64dec: {e}")))?;
    String::from_utf8(decoded)
        .map(Value::String)
        .map_err(|e| FuncError::Generic(format!("b64dec: {e}")))
}

fn func_to_string(args: &[Value]) -> Result<Value, FuncError> {
    Ok(Value::String(stringify(arg(args, 0, "toString", 1)?)))
}

/// Cluster lookups have no cluster to ask; templates get an empty map, the
/// same as a dry-run render.
fn func_lookup(_args: &[Value]) -> Result<Value, FuncError> {
    Ok(Value::Map(HashMap::new()))
}
