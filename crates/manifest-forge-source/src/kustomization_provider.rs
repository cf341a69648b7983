//! Kustomization provider: materializes the overlay tree for a Git
//! reference. Only Git-path references can carry an overlay.

use std::sync::Arc;

use manifest_forge_api::Reference;
use manifest_forge_fs::{Filesystem, ROOT};

use crate::git_repository::GitRepositoryCache;
use crate::{SourceError, SourceResult};

/// An overlay rooted in a materialized scratch tree.
pub struct Kustomization {
    pub fs: Filesystem,
    pub target_path: String,
}

pub struct KustomizationProvider {
    git_cache: Arc<GitRepositoryCache>,
}

impl KustomizationProvider {
    #[must_use]
    pub fn new(git_cache: Arc<GitRepositoryCache>) -> Self {
        Self { git_cache }
    }

    pub async fn get_kustomization(&self, reference: &Reference) -> SourceResult<Kustomization> {
        let Reference::GitPath(reference) = reference else {
            return Err(SourceError::KustomizationReferenceInvalid);
        };

        let fs = Filesystem::new();
        let target_path = match reference.path.as_deref().filter(|p| !p.is_empty()) {
            Some(path) if Filesystem::is_abs(path) => {
                return Err(SourceError::AbsoluteSourcePath {
                    path: path.to_string(),
                })
            }
            Some(path) => Filesystem::join(ROOT, path),
            None => ROOT.to_string(),
        };

        self.git_cache
            .retrieve_repository_to_filesystem(&reference.url, &reference.reference, &fs)
            .await?;

        Ok(Kustomization { fs, target_path })
    }
}
