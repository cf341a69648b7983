//! Environment-only configuration. Construction fails fast on malformed
//! values; nothing here is read again after startup.

use std::collections::HashMap;
use std::time::Duration;

use manifest_forge_registry::{BasicAuth, GetterKind, HostProviders, Provider};
use serde::Deserialize;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_DIRTY_SHUTDOWN: u8 = 10;
pub const EXIT_CREATE_FAILED: u8 = 20;
pub const EXIT_RUN_FAILED: u8 = 30;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynchronizationMethod {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStyle {
    Plain,
    Json,
}

#[derive(Debug, Clone)]
pub struct ApplicationConfig {
    pub application_name: String,
    pub server_address: String,
    pub server_primary_port: u16,
    pub helm_default_release_name: String,
    pub helm_default_kubernetes_namespace: String,
    pub helm_default_kubernetes_api_versions: Vec<String>,
    pub helm_host_providers: HostProviders,
    pub github_app_id: Option<u64>,
    pub github_app_installation_id: Option<u64>,
    pub github_app_private_key: Option<String>,
    pub synchronization_method: SynchronizationMethod,
    pub synchronization_redis_url: Option<String>,
    pub synchronization_redis_password: Option<String>,
    pub log_style: LogStyle,
    pub log_level: String,
    pub request_timeout: Duration,
}

impl ApplicationConfig {
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Parse from an arbitrary variable lookup (tests inject maps here).
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.is_empty());

        let synchronization_method = match get("SYNCHRONIZATION_METHOD").as_deref() {
            None | Some("MEMORY") => SynchronizationMethod::Memory,
            Some("REDIS") => SynchronizationMethod::Redis,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "SYNCHRONIZATION_METHOD",
                    reason: format!("unknown method '{other}'"),
                })
            }
        };

        let log_style = match get("LOG_STYLE").as_deref() {
            None | Some("PLAIN") => LogStyle::Plain,
            Some("JSON") => LogStyle::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "LOG_STYLE",
                    reason: format!("unknown style '{other}'"),
                })
            }
        };

        let server_primary_port = match get("SERVER_PRIMARY_PORT") {
            None => DEFAULT_PORT,
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                name: "SERVER_PRIMARY_PORT",
                reason: format!("'{raw}' is not a port"),
            })?,
        };

        let helm_host_providers = match get("HELM_HOST_PROVIDERS") {
            None => HostProviders::new(),
            Some(raw) => parse_host_providers(&raw, &lookup)?,
        };

        let parse_id = |name: &'static str| -> ConfigResult<Option<u64>> {
            get(name)
                .map(|raw| {
                    raw.parse().map_err(|_| ConfigError::Invalid {
                        name,
                        reason: format!("'{raw}' is not an integer"),
                    })
                })
                .transpose()
        };

        Ok(Self {
            application_name: get("APPLICATION_NAME").unwrap_or_else(|| "manifest-forge".to_string()),
            server_address: get("SERVER_ADDRESS").unwrap_or_default(),
            server_primary_port,
            helm_default_release_name: get("HELM_DEFAULT_RELEASE_NAME")
                .unwrap_or_else(|| "RELEASE-NAME".to_string()),
            helm_default_kubernetes_namespace: get("HELM_DEFAULT_KUBERNETES_NAMESPACE")
                .unwrap_or_else(|| "default".to_string()),
            helm_default_kubernetes_api_versions: get("HELM_DEFAULT_KUBERNETES_API_VERSIONS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|v| !v.is_empty())
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            helm_host_providers,
            github_app_id: parse_id("GITHUB_APP_ID")?,
            github_app_installation_id: parse_id("GITHUB_APP_INSTALLATION_ID")?,
            github_app_private_key: get("GITHUB_APP_PRIVATE_KEY"),
            synchronization_method,
            synchronization_redis_url: get("SYNCHRONIZATION_REDIS_URL"),
            synchronization_redis_password: get("SYNCHRONIZATION_REDIS_PASSWORD"),
            log_style,
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    #[must_use]
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server_address, self.server_primary_port)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawProvider {
    #[serde(rename = "type")]
    provider_type: String,
    #[serde(default)]
    schemes: Vec<String>,
    #[serde(default)]
    basic_auth: Option<RawBasicAuth>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawBasicAuth {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    username_env_var: Option<String>,
    #[serde(default)]
    password_env_var: Option<String>,
}

/// `HELM_HOST_PROVIDERS` is a JSON mapping
/// `host → [{type, schemes[], basicAuth?}]`; credentials may be inline or
/// referenced by environment-variable name.
fn parse_host_providers<F>(raw: &str, lookup: &F) -> ConfigResult<HostProviders>
where
    F: Fn(&str) -> Option<String>,
{
    let parsed: HashMap<String, Vec<RawProvider>> =
        serde_json::from_str(raw).map_err(|e| ConfigError::Invalid {
            name: "HELM_HOST_PROVIDERS",
            reason: e.to_string(),
        })?;

    let mut providers = HostProviders::new();
    for (host, raw_providers) in parsed {
        let mut entries = Vec::with_capacity(raw_providers.len());
        for (index, raw_provider) in raw_providers.into_iter().enumerate() {
            let kind = match raw_provider.provider_type.trim().to_lowercase().as_str() {
                "http" | "https" => GetterKind::Http,
                "oci" => GetterKind::Oci,
                "" => {
                    return Err(ConfigError::Invalid {
                        name: "HELM_HOST_PROVIDERS",
                        reason: format!("provider at index {index} for host '{host}' missing type"),
                    })
                }
                other => {
                    return Err(ConfigError::Invalid {
                        name: "HELM_HOST_PROVIDERS",
                        reason: format!(
                            "unsupported provider type '{other}' at index {index} for host '{host}'"
                        ),
                    })
                }
            };

            let schemes = if raw_provider.schemes.is_empty() {
                match kind {
                    GetterKind::Http => vec!["http".to_string(), "https".to_string()],
                    GetterKind::Oci => vec!["oci".to_string()],
                }
            } else {
                raw_provider.schemes
            };

            entries.push(Provider {
                schemes,
                kind,
                basic_auth: raw_provider
                    .basic_auth
                    .and_then(|auth| resolve_credentials(&auth, lookup)),
            });
        }
        providers.insert(host, entries);
    }
    Ok(providers)
}

/// Inline credentials win over env-referenced ones; both empty means no
/// auth.
fn resolve_credentials<F>(auth: &RawBasicAuth, lookup: &F) -> Option<BasicAuth>
where
    F: Fn(&str) -> Option<String>,
{
    let from_env = |name: &Option<String>| {
        name.as_deref()
            .filter(|n| !n.is_empty())
            .and_then(lookup)
            .filter(|v| !v.is_empty())
    };

    let username = auth
        .username
        .clone()
        .filter(|u| !u.is_empty())
        .or_else(|| from_env(&auth.username_env_var));
    let password = auth
        .password
        .clone()
        .filter(|p| !p.is_empty())
        .or_else(|| from_env(&auth.password_env_var));

    match (username, password) {
        (Some(username), Some(password)) => Some(BasicAuth { username, password }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value).to_string())
        }
    }

    #[test]
    fn defaults_apply_without_environment() {
        let config = ApplicationConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.server_primary_port, 8080);
        assert_eq!(config.helm_default_release_name, "RELEASE-NAME");
        assert_eq!(config.helm_default_kubernetes_namespace, "default");
        assert!(config.helm_default_kubernetes_api_versions.is_empty());
        assert_eq!(config.synchronization_method, SynchronizationMethod::Memory);
        assert_eq!(config.log_style, LogStyle::Plain);
    }

    #[test]
    fn api_versions_split_on_commas() {
        let config = ApplicationConfig::from_lookup(lookup(&[(
            "HELM_DEFAULT_KUBERNETES_API_VERSIONS",
            "apps/v1, batch/v1",
        )]))
        .unwrap();
        assert_eq!(
            config.helm_default_kubernetes_api_versions,
            vec!["apps/v1", "batch/v1"]
        );
    }

    #[test]
    fn unknown_synchronization_method_rejects() {
        let err = ApplicationConfig::from_lookup(lookup(&[("SYNCHRONIZATION_METHOD", "ETCD")]))
            .unwrap_err();
        assert!(err.to_string().contains("SYNCHRONIZATION_METHOD"));
    }

    #[test]
    fn host_providers_parse_with_env_credentials() {
        let vars = [
            (
                "HELM_HOST_PROVIDERS",
                r#"{"charts.example":[{"type":"https","basicAuth":{"usernameEnvVar":"CHART_USER","passwordEnvVar":"CHART_PASS"}},{"type":"oci"}]}"#,
            ),
            ("CHART_USER", "u"),
            ("CHART_PASS", "p"),
        ];
        let config = ApplicationConfig::from_lookup(lookup(&vars)).unwrap();
        let providers = &config.helm_host_providers["charts.example"];
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[0].kind, GetterKind::Http);
        assert_eq!(providers[0].schemes, vec!["http", "https"]);
        let auth = providers[0].basic_auth.as_ref().unwrap();
        assert_eq!((auth.username.as_str(), auth.password.as_str()), ("u", "p"));
        assert_eq!(providers[1].kind, GetterKind::Oci);
        assert_eq!(providers[1].schemes, vec!["oci"]);
    }

    #[test]
    fn unsupported_provider_type_rejects() {
        let err = ApplicationConfig::from_lookup(lookup(&[(
            "HELM_HOST_PROVIDERS",
            r#"{"h":[{"type":"ftp"}]}"#,
        )]))
        .unwrap_err();
        assert!(err.to_string().contains("unsupported provider type"));
    }
}
