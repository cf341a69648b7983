use std::path::PathBuf;
use std::sync::Once;

use color_eyre::eyre;
use manifest_forge_fs::Filesystem;

pub mod prelude {
    pub use crate::write;
    pub use crate::{Builder, LogLevel};
    pub use googletest::{assert_that, matcher::MatcherBase, matchers::*};
    pub use similar_asserts::assert_eq as sim_assert_eq;
}

/// Returns the workspace root directory via the `CARGO_WORKSPACE_DIR` env var
/// set in `.cargo/config.toml`.
///
/// # Panics
///
/// Panics if `CARGO_WORKSPACE_DIR` is not set.
#[must_use]
pub fn workspace_root() -> PathBuf {
    PathBuf::from(
        std::env::var("CARGO_WORKSPACE_DIR")
            .expect("CARGO_WORKSPACE_DIR must be set in .cargo/config.toml"),
    )
}

/// Write `data` into the in-memory filesystem at `path`, creating parent
/// directories as needed.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written to.
pub fn write(fs: &Filesystem, path: &str, data: impl AsRef<[u8]>) -> eyre::Result<()> {
    fs.write_file(path, data.as_ref())?;
    Ok(())
}

pub type LogLevel = tracing::metadata::Level;

static INIT_EYRE: Once = Once::new();

#[derive(Default)]
pub struct TestGuard {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Builder {
    install_eyre: bool,
    log_level: LogLevel,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            install_eyre: true,
            log_level: LogLevel::DEBUG,
        }
    }
}

impl Builder {
    /// Initialize test.
    ///
    /// This ensures `color_eyre` is setup once and env variables are read.
    ///
    /// # Panics
    ///
    /// Panics if `color_eyre` installation fails.
    pub fn build(self) -> TestGuard {
        if self.install_eyre {
            INIT_EYRE.call_once(|| {
                color_eyre::install().expect("failed to install eyre");
            });
        }
        TestGuard::default()
    }

    /// Toggle installation of `color_eyre`.
    #[must_use]
    pub fn with_eyre(mut self, enabled: bool) -> Self {
        self.install_eyre = enabled;
        self
    }

    /// Toggle log level for tracing inside the test.
    #[must_use]
    pub fn with_log_level(mut self, log_level: impl Into<LogLevel>) -> Self {
        self.log_level = log_level.into();
        self
    }
}

/// Create a new builder.
#[must_use]
pub fn builder() -> Builder {
    Builder::default()
}
