//! Git source adapter.
//!
//! Resolves symbolic references against the remote without cloning, and
//! materializes a single commit at depth 1 into the in-memory filesystem.
//! libgit2 calls are blocking and run on the blocking thread pool.

pub mod auth;

use std::path::Path;
use std::sync::Arc;

use manifest_forge_fs::{Filesystem, FsError};

use crate::auth::{AuthProvider, Credentials};

const LOCAL_BRANCH: &str = "refs/heads/local";

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git repository '{url}' does not exist")]
    RepositoryNotFound { url: String },

    #[error("reference '{reference}' does not exist in git repository '{url}'")]
    ReferenceNotFound { url: String, reference: String },

    #[error("'{reference}' is neither a fully qualified reference nor a commit hash")]
    InvalidReference { reference: String },

    #[error("failed to obtain git credentials: {0}")]
    Auth(String),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background git task failed: {0}")]
    Task(String),
}

pub type GitResult<T> = std::result::Result<T, GitError>;

/// A single remote reference listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteReference {
    pub name: String,
    pub hash: String,
}

/// True iff `reference` is exactly 40 lowercase hex characters.
#[must_use]
pub fn is_commit_hash(reference: &str) -> bool {
    reference.len() == 40
        && reference
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// True for `HEAD`, `refs/heads/<n>` and `refs/tags/<n>`.
#[must_use]
pub fn is_fully_qualified_reference(reference: &str) -> bool {
    reference == "HEAD"
        || reference.starts_with("refs/heads/")
        || reference.starts_with("refs/tags/")
}

/// Rewrite scp-style `git@host:owner/repo` URLs to `https://host/owner/repo`.
#[must_use]
pub fn map_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("git@") {
        if let Some((host, path)) = rest.split_once(':') {
            if !path.starts_with("//") {
                return format!("https://{host}/{path}");
            }
        }
    }
    url.to_string()
}

pub struct Git {
    auth: Arc<dyn AuthProvider>,
}

impl Git {
    #[must_use]
    pub fn new(auth: Arc<dyn AuthProvider>) -> Self {
        Self { auth }
    }

    /// List the remote's references as `(name, hash)` pairs.
    pub async fn resolve_references(&self, url: &str) -> GitResult<Vec<RemoteReference>> {
        let url = map_url(url);
        let credentials = self.auth.credentials().await?;

        let listed_url = url.clone();
        tokio::task::spawn_blocking(move || list_references(&listed_url, credentials))
            .await
            .map_err(|e| GitError::Task(e.to_string()))?
            .map_err(|e| classify(e, &url))
    }

    /// Fetch `reference` at depth 1 into a fixed local branch, check it out
    /// and copy the worktree into a fresh in-memory filesystem.
    pub async fn clone_commit(&self, url: &str, reference: &str) -> GitResult<Filesystem> {
        let url = map_url(url);
        let credentials = self.auth.credentials().await?;

        let cloned_url = url.clone();
        let reference = reference.to_string();
        tokio::task::spawn_blocking(move || fetch_worktree(&cloned_url, &reference, credentials))
            .await
            .map_err(|e| GitError::Task(e.to_string()))?
            .map_err(|e| classify(e, &url))
    }

    /// Resolve `reference` to a commit hash. A 40-hex input is returned
    /// verbatim without network I/O; otherwise the remote listing is
    /// consulted for a reference whose full name equals the input.
    pub async fn to_hash(&self, url: &str, reference: &str) -> GitResult<String> {
        if is_commit_hash(reference) {
            return Ok(reference.to_string());
        }

        let remote_references = self.resolve_references(url).await?;
        remote_references
            .into_iter()
            .find(|r| r.name == reference)
            .map(|r| r.hash)
            .ok_or_else(|| GitError::ReferenceNotFound {
                url: url.to_string(),
                reference: reference.to_string(),
            })
    }
}

fn remote_callbacks(credentials: Option<Credentials>) -> git2::RemoteCallbacks<'static> {
    let mut callbacks = git2::RemoteCallbacks::new();
    callbacks.credentials(move |_url, username_from_url, _allowed| match &credentials {
        Some(c) => git2::Cred::userpass_plaintext(&c.username, &c.password),
        None => git2::Cred::default().or_else(|_| {
            git2::Cred::username(username_from_url.unwrap_or("git"))
        }),
    });
    callbacks
}

fn list_references(
    url: &str,
    credentials: Option<Credentials>,
) -> std::result::Result<Vec<RemoteReference>, git2::Error> {
    let mut remote = git2::Remote::create_detached(url)?;
    let connection =
        remote.connect_auth(git2::Direction::Fetch, Some(remote_callbacks(credentials)), None)?;

    let references = connection
        .list()?
        .iter()
        .map(|head| RemoteReference {
            name: head.name().to_string(),
            hash: head.oid().to_string(),
        })
        .collect();
    Ok(references)
}

fn fetch_worktree(
    url: &str,
    reference: &str,
    credentials: Option<Credentials>,
) -> std::result::Result<Filesystem, git2::Error> {
    let workdir = tempfile::tempdir().map_err(|e| {
        git2::Error::from_str(&format!("failed to create clone directory: {e}"))
    })?;
    let repo = git2::Repository::init(workdir.path())?;

    let mut remote = repo.remote("origin", url)?;
    let mut fetch_options = git2::FetchOptions::new();
    fetch_options.remote_callbacks(remote_callbacks(credentials));
    fetch_options.depth(1);

    let refspec = format!("{reference}:{LOCAL_BRANCH}");
    remote.fetch(&[refspec.as_str()], Some(&mut fetch_options), None)?;

    repo.set_head(LOCAL_BRANCH)?;
    repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;
    drop(remote);

    let fs = Filesystem::new();
    copy_worktree(workdir.path(), "", &fs)
        .map_err(|e| git2::Error::from_str(&e.to_string()))?;
    Ok(fs)
}

/// Copy the checked-out tree into the in-memory filesystem, skipping the
/// `.git` directory. Symlinks and other irregular files reject the clone.
fn copy_worktree(dir: &Path, prefix: &str, fs: &Filesystem) -> GitResult<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;
    entries.sort_by_key(std::fs::DirEntry::file_name);

    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();
        if prefix.is_empty() && name == ".git" {
            continue;
        }
        let target = Filesystem::join(&format!("/{prefix}"), &name);
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            fs.create_dir_all(&target)?;
            copy_worktree(
                &entry.path(),
                target.trim_start_matches(manifest_forge_fs::SEPARATOR),
                fs,
            )?;
        } else if file_type.is_file() {
            let data = std::fs::read(entry.path())?;
            fs.write_file(&target, &data)?;
        } else {
            return Err(FsError::Irregular { path: target }.into());
        }
    }
    Ok(())
}

fn classify(err: git2::Error, url: &str) -> GitError {
    let message = err.message().to_ascii_lowercase();
    let not_found = matches!(err.code(), git2::ErrorCode::NotFound)
        || matches!(err.class(), git2::ErrorClass::Http | git2::ErrorClass::Net)
        || message.starts_with("authentication required")
        || message.starts_with("unsupported scheme")
        || message.starts_with("repository not found")
        || message.starts_with("unsupported url protocol")
        || message.starts_with("failed to resolve address");
    if not_found {
        GitError::RepositoryNotFound {
            url: url.to_string(),
        }
    } else {
        GitError::Git(err)
    }
}
