//! Git-repo cache tier.
//!
//! The critical discipline: the symbolic reference is resolved through
//! `to_hash` first, and the entry is keyed by `(url, commit-hash)`. A
//! request for `HEAD` at the same commit as yesterday hits; a request for
//! `HEAD` after a push misses.

use std::sync::Arc;
use std::time::Duration;

use manifest_forge_cache::ByteCache;
use manifest_forge_fs::{targz, Filesystem, ROOT};
use manifest_forge_git::{is_commit_hash, is_fully_qualified_reference, GitError};
use tracing::{info, warn};

use crate::{GitSource, SourceResult};

const GIT_REPOSITORY_TTL: Duration = Duration::from_secs(60 * 60);

pub struct GitRepositoryCache {
    git: Arc<dyn GitSource>,
    cache: Arc<dyn ByteCache>,
}

impl GitRepositoryCache {
    #[must_use]
    pub fn new(git: Arc<dyn GitSource>, cache: Arc<dyn ByteCache>) -> Self {
        Self { git, cache }
    }

    /// The tar+gzip snapshot of the repository worktree at
    /// `reference_or_hash`.
    pub async fn retrieve_repository(
        &self,
        url: &str,
        reference_or_hash: &str,
    ) -> SourceResult<Vec<u8>> {
        let hash = self.to_hash(url, reference_or_hash).await?;

        let key = cache_key(url, &hash);
        if let Some(cached) = self.cache.get(&key).await? {
            info!("cache hit for git repository with key '{key}'");
            return Ok(cached);
        }
        info!("cache miss for git repository with key '{key}', retrieving from remote");
        self.refresh_repository(url, &hash).await
    }

    /// Materialize the snapshot at the root of `fs`.
    pub async fn retrieve_repository_to_filesystem(
        &self,
        url: &str,
        reference_or_hash: &str,
        fs: &Filesystem,
    ) -> SourceResult<()> {
        let tarball = self.retrieve_repository(url, reference_or_hash).await?;
        targz::extract(fs, tarball.as_slice(), ROOT)?;
        Ok(())
    }

    /// Clone unconditionally and overwrite the cache entry.
    pub async fn refresh_repository(&self, url: &str, reference: &str) -> SourceResult<Vec<u8>> {
        let hash = self.to_hash(url, reference).await?;

        let tarball = self.fetch_as_tarball(url, &hash).await?;
        let key = cache_key(url, &hash);
        match self.cache.set(&key, &tarball, GIT_REPOSITORY_TTL).await {
            Ok(()) => info!("successfully cached git repository with key '{key}'"),
            Err(e) => warn!("failed to cache git repository with key '{key}': {e}"),
        }
        Ok(tarball)
    }

    async fn to_hash(&self, url: &str, reference_or_hash: &str) -> SourceResult<String> {
        if !is_fully_qualified_reference(reference_or_hash) && !is_commit_hash(reference_or_hash) {
            return Err(GitError::InvalidReference {
                reference: reference_or_hash.to_string(),
            }
            .into());
        }
        Ok(self.git.to_hash(url, reference_or_hash).await?)
    }

    async fn fetch_as_tarball(&self, url: &str, hash: &str) -> SourceResult<Vec<u8>> {
        let worktree = self.git.clone_commit(url, hash).await?;
        Ok(targz::compress_to_vec(&worktree, ROOT, "")?)
    }
}

fn cache_key(url: &str, hash: &str) -> String {
    format!("{url}|{hash}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_url_and_hash() {
        assert_eq!(
            cache_key("https://git.example/x", "0123456789abcdef0123456789abcdef01234567"),
            "https://git.example/x|0123456789abcdef0123456789abcdef01234567"
        );
    }
}
