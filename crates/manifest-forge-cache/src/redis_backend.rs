use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::{ByteCache, CacheError, CacheResult};

/// Remote backend speaking the Redis protocol. Values live under
/// `<cacheName>:<key>` and TTLs are enforced by the remote.
pub struct RedisCache {
    connection: ConnectionManager,
    cache_name: String,
}

impl RedisCache {
    /// Connect to `url`, optionally overriding the password carried by the
    /// URL itself.
    pub async fn connect(
        url: &str,
        password: Option<&str>,
        cache_name: &str,
    ) -> CacheResult<Self> {
        let mut parsed = url::Url::parse(url).map_err(|e| CacheError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if let Some(password) = password {
            parsed
                .set_password(Some(password))
                .map_err(|()| CacheError::InvalidUrl {
                    url: url.to_string(),
                    reason: "cannot carry a password".to_string(),
                })?;
        }

        let client = redis::Client::open(parsed.as_str())?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self {
            connection,
            cache_name: cache_name.to_string(),
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{key}", self.cache_name)
    }
}

#[async_trait]
impl ByteCache for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut connection = self.connection.clone();
        let value: Option<Vec<u8>> = connection.get(self.namespaced(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let mut connection = self.connection.clone();
        let seconds = ttl.as_secs().max(1);
        connection
            .set_ex::<_, _, ()>(self.namespaced(key), value, seconds)
            .await?;
        Ok(())
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        let mut connection = self.connection.clone();
        let prefix = format!("{}:", self.cache_name);
        let namespaced: Vec<String> = connection.keys(format!("{prefix}*")).await?;
        Ok(namespaced
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(ToString::to_string))
            .collect())
    }
}
