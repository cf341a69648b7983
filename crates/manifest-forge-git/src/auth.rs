//! Pluggable transport authentication.
//!
//! The adapter asks the provider for credentials once per operation. The
//! GitHub-app provider mints an installation token on demand and refreshes
//! it when it is within 30 seconds of expiry; a race producing two tokens
//! is harmless because the second supersedes the first before use.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use time::OffsetDateTime;

use crate::{GitError, GitResult};

const REFRESH_MARGIN: time::Duration = time::Duration::seconds(30);
const GITHUB_API: &str = "https://api.github.com";

const TOKEN_ATTEMPTS: u32 = 3;
const TOKEN_RETRY_DELAY: Duration = Duration::from_secs(1);
const TOKEN_RETRY_DELAY_MAX: Duration = Duration::from_secs(10);
const RATE_LIMIT_PAUSE_MAX: Duration = Duration::from_secs(60);
const BREAKER_FAILURE_THRESHOLD: u32 = 5;
const BREAKER_OPEN_DURATION: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn credentials(&self) -> GitResult<Option<Credentials>>;
}

/// No credentials; public repositories only.
pub struct AnonymousAuth;

#[async_trait]
impl AuthProvider for AnonymousAuth {
    async fn credentials(&self) -> GitResult<Option<Credentials>> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct InstallationToken {
    token: String,
    #[serde(with = "time::serde::rfc3339")]
    expires_at: OffsetDateTime,
}

impl InstallationToken {
    fn needs_refresh(&self, now: OffsetDateTime) -> bool {
        self.expires_at - REFRESH_MARGIN <= now
    }
}

#[derive(serde::Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

/// Consecutive token-request failures open the breaker; requests while it
/// is open fail fast instead of hammering the API.
#[derive(Debug, Default)]
struct Breaker {
    failure_count: u32,
    open_until: Option<Instant>,
}

/// GitHub-app authentication: a short-lived app JWT is exchanged for an
/// installation token, which is cached until close to expiry. Token
/// requests retry on 5xx, honor rate-limit pauses and sit behind a circuit
/// breaker.
pub struct GitHubAppAuth {
    app_id: u64,
    installation_id: u64,
    encoding_key: jsonwebtoken::EncodingKey,
    client: reqwest::Client,
    api_base: String,
    token: tokio::sync::Mutex<Option<InstallationToken>>,
    breaker: tokio::sync::Mutex<Breaker>,
}

impl GitHubAppAuth {
    pub fn new(app_id: u64, installation_id: u64, private_key_pem: &str) -> GitResult<Self> {
        let encoding_key = jsonwebtoken::EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| GitError::Auth(format!("invalid GitHub app private key: {e}")))?;
        Ok(Self {
            app_id,
            installation_id,
            encoding_key,
            client: reqwest::Client::new(),
            api_base: GITHUB_API.to_string(),
            token: tokio::sync::Mutex::new(None),
            breaker: tokio::sync::Mutex::new(Breaker::default()),
        })
    }

    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn app_jwt(&self) -> GitResult<String> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = AppClaims {
            // 60s of clock-drift allowance, 9min lifetime (GitHub caps at 10)
            iat: now - 60,
            exp: now + 9 * 60,
            iss: self.app_id.to_string(),
        };
        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256),
            &claims,
            &self.encoding_key,
        )
        .map_err(|e| GitError::Auth(format!("failed to sign GitHub app JWT: {e}")))
    }

    async fn mint_token(&self) -> GitResult<InstallationToken> {
        {
            let breaker = self.breaker.lock().await;
            if let Some(open_until) = breaker.open_until {
                if Instant::now() < open_until {
                    return Err(GitError::Auth(
                        "github token circuit breaker is open".to_string(),
                    ));
                }
            }
        }

        match self.request_token().await {
            Ok(token) => {
                let mut breaker = self.breaker.lock().await;
                breaker.failure_count = 0;
                breaker.open_until = None;
                Ok(token)
            }
            Err(err) => {
                let mut breaker = self.breaker.lock().await;
                breaker.failure_count += 1;
                if breaker.failure_count >= BREAKER_FAILURE_THRESHOLD {
                    breaker.open_until = Some(Instant::now() + BREAKER_OPEN_DURATION);
                }
                Err(err)
            }
        }
    }

    async fn request_token(&self) -> GitResult<InstallationToken> {
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_base, self.installation_id
        );

        let mut delay = TOKEN_RETRY_DELAY;
        for attempt in 1..=TOKEN_ATTEMPTS {
            let jwt = self.app_jwt()?;
            let response = self
                .client
                .post(&url)
                .bearer_auth(jwt)
                .header(reqwest::header::ACCEPT, "application/vnd.github+json")
                .header(reqwest::header::USER_AGENT, "manifest-forge")
                .send()
                .await
                .map_err(|e| GitError::Auth(format!("installation token request failed: {e}")))?;

            let status = response.status();
            if status.is_success() {
                return response
                    .json::<InstallationToken>()
                    .await
                    .map_err(|e| GitError::Auth(format!("malformed installation token response: {e}")));
            }

            let retryable = status.is_server_error() || rate_limit_pause(&response).is_some();
            if retryable && attempt < TOKEN_ATTEMPTS {
                let pause = rate_limit_pause(&response).unwrap_or(delay);
                tokio::time::sleep(pause.min(RATE_LIMIT_PAUSE_MAX)).await;
                delay = (delay * 2).min(TOKEN_RETRY_DELAY_MAX);
                continue;
            }
            return Err(GitError::Auth(format!(
                "installation token request returned {status}"
            )));
        }
        unreachable!("loop returns on the final attempt")
    }
}

/// A `Retry-After` on 403/429 is GitHub's rate-limit signal.
fn rate_limit_pause(response: &reqwest::Response) -> Option<Duration> {
    let status = response.status();
    if status != reqwest::StatusCode::FORBIDDEN
        && status != reqwest::StatusCode::TOO_MANY_REQUESTS
    {
        return None;
    }
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl AuthProvider for GitHubAppAuth {
    async fn credentials(&self) -> GitResult<Option<Credentials>> {
        let mut guard = self.token.lock().await;
        let stale = guard
            .as_ref()
            .is_none_or(|token| token.needs_refresh(OffsetDateTime::now_utc()));
        if stale {
            *guard = Some(self.mint_token().await?);
        }

        let token = guard.as_ref().expect("token was just minted");
        Ok(Some(Credentials {
            username: "x-access-token".to_string(),
            password: token.token.clone(),
        }))
    }
}
