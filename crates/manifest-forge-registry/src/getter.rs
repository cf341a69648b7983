//! HTTP fetcher with bounded retries.
//!
//! Idempotent GETs retry up to 3 attempts on 5xx responses with an
//! exponential backoff of 1 s doubling towards 10 s, each delay jittered.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::{BasicAuth, RegistryError, RegistryResult};

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(10);

pub struct HttpGetter {
    client: reqwest::Client,
    basic_auth: Option<BasicAuth>,
}

impl HttpGetter {
    #[must_use]
    pub fn new(client: reqwest::Client, basic_auth: Option<BasicAuth>) -> Self {
        Self { client, basic_auth }
    }

    pub async fn get(&self, url: &str) -> RegistryResult<Vec<u8>> {
        let mut delay = INITIAL_DELAY;

        for attempt in 1..=MAX_ATTEMPTS {
            let mut request = self.client.get(url);
            if let Some(auth) = &self.basic_auth {
                request = request.basic_auth(&auth.username, Some(&auth.password));
            }

            let response = request.send().await?;
            let status = response.status();

            if status.is_success() {
                return Ok(response.bytes().await?.to_vec());
            }
            if status.is_server_error() && attempt < MAX_ATTEMPTS {
                warn!(url, status = status.as_u16(), attempt, "retrying after server error");
                tokio::time::sleep(jittered(delay)).await;
                delay = (delay * 2).min(MAX_DELAY);
                continue;
            }
            return Err(RegistryError::UnexpectedStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        unreachable!("loop returns on the final attempt")
    }
}

/// Full jitter over `[delay/2, delay]`.
fn jittered(delay: Duration) -> Duration {
    let base = delay.as_millis() as u64;
    let jitter = rand::thread_rng().gen_range(0..=base / 2);
    Duration::from_millis(base / 2 + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..64 {
            let d = jittered(Duration::from_secs(4));
            assert!(d >= Duration::from_secs(2));
            assert!(d <= Duration::from_secs(4));
        }
    }
}
