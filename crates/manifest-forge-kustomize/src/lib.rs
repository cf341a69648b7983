//! Layered overlay rendering.
//!
//! The engine consumes a kustomization rooted in the in-memory filesystem:
//! resources (and nested kustomizations) are loaded in declaration order,
//! strategic-merge patches are applied, and the common transformations
//! (namespace, name prefix/suffix, labels, annotations) run last.

pub mod engine;
pub mod renderer;

pub use engine::{run, Kustomization};
pub use renderer::OverlayRenderer;

#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("no kustomization file under '{path}'")]
    MissingKustomization { path: String },

    #[error("failed to parse '{path}': {reason}")]
    Parse { path: String, reason: String },

    #[error("resource '{path}' does not exist")]
    ResourceNotFound { path: String },

    #[error("injection filename cannot be empty")]
    EmptyInjectionFileName,

    #[error("injection filename '{file_name}' cannot contain '{separator}'")]
    InjectionFileNameWithSeparator { file_name: String, separator: char },

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Fs(#[from] manifest_forge_fs::FsError),
}

pub type OverlayResult<T> = std::result::Result<T, OverlayError>;
