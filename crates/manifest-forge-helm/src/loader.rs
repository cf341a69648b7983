//! Chart loading from a materialized filesystem tree or a chart archive.
//!
//! The walk honors `.helmignore` rules (gitignore syntax) unioned with the
//! engine defaults; matching directories are pruned. Files become
//! slash-normalized buffered files relative to the chart root.

use std::io::Read;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use manifest_forge_fs::{relative_to, EntryKind, Filesystem, FsError, WalkControl};

use crate::model::{BufferedFile, Chart, ChartMetadata};
use crate::values;

const HELMIGNORE: &str = ".helmignore";
const CHART_MANIFEST: &str = "Chart.yaml";
const VALUES_FILE: &str = "values.yaml";
const SCHEMA_FILE: &str = "values.schema.json";

/// Hidden files under `templates/` are always ignored, matching the
/// engine's built-in rule.
const DEFAULT_IGNORE: &str = "templates/.*";

#[derive(Debug, thiserror::Error)]
pub enum ChartError {
    #[error("chart at '{path}' is missing {CHART_MANIFEST}")]
    MissingChartManifest { path: String },

    #[error("chart path '{path}' must be absolute")]
    PathNotAbsolute { path: String },

    #[error("failed to parse {CHART_MANIFEST}: {0}")]
    Metadata(serde_yaml::Error),

    #[error("failed to parse {VALUES_FILE}: {0}")]
    Values(#[from] values::ValuesError),

    #[error("invalid ignore rules: {0}")]
    Ignore(#[from] ignore::Error),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error("failed to read chart archive: {0}")]
    Archive(std::io::Error),
}

pub type ChartResult<T> = std::result::Result<T, ChartError>;

struct IgnoreRules {
    matcher: Gitignore,
}

impl IgnoreRules {
    fn load(fs: &Filesystem, target_path: &str) -> ChartResult<Self> {
        let mut builder = GitignoreBuilder::new("/");
        builder.add_line(None, DEFAULT_IGNORE)?;

        let ignore_file = Filesystem::join(target_path, HELMIGNORE);
        if fs.exists(&ignore_file)? {
            let content = String::from_utf8_lossy(&fs.read_file(&ignore_file)?).to_string();
            for line in content.lines() {
                // malformed patterns are skipped, like git does
                let _ = builder.add_line(None, line);
            }
        }
        Ok(Self {
            matcher: builder.build()?,
        })
    }

    fn ignores(&self, relative: &str, is_dir: bool) -> bool {
        self.matcher
            .matched_path_or_any_parents(relative, is_dir)
            .is_ignore()
    }
}

/// Load the chart rooted at the absolute `target_path`.
pub fn load_chart(fs: &Filesystem, target_path: &str) -> ChartResult<Chart> {
    if !Filesystem::is_abs(target_path) {
        return Err(ChartError::PathNotAbsolute {
            path: target_path.to_string(),
        });
    }

    let rules = IgnoreRules::load(fs, target_path)?;
    let mut files = Vec::new();

    fs.walk(target_path, |path, kind| {
        let relative = relative_to(path, target_path);
        if relative.is_empty() {
            return Ok(WalkControl::Continue);
        }
        match kind {
            EntryKind::Directory => {
                if rules.ignores(&relative, true) {
                    return Ok(WalkControl::SkipDir);
                }
            }
            EntryKind::File => {
                if !rules.ignores(&relative, false) {
                    files.push(BufferedFile {
                        name: relative,
                        data: fs.read_file(path)?,
                    });
                }
            }
        }
        Ok(WalkControl::Continue)
    })?;

    load_files(files, target_path)
}

/// Load a chart from gzipped-tar archive bytes. The archive's single root
/// directory is stripped from entry names.
pub fn load_archive(data: &[u8]) -> ChartResult<Chart> {
    let gz = flate2::read::GzDecoder::new(data);
    let mut archive = tar::Archive::new(gz);

    let mut files = Vec::new();
    for entry in archive.entries().map_err(ChartError::Archive)? {
        let mut entry = entry.map_err(ChartError::Archive)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let raw = entry
            .path()
            .map_err(ChartError::Archive)?
            .to_string_lossy()
            .to_string();
        let Some((_root, name)) = raw.split_once('/') else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data).map_err(ChartError::Archive)?;
        files.push(BufferedFile {
            name: name.to_string(),
            data,
        });
    }

    load_files(files, "<archive>")
}

/// Assemble a chart from buffered files.
pub fn load_files(files: Vec<BufferedFile>, origin: &str) -> ChartResult<Chart> {
    let mut metadata: Option<ChartMetadata> = None;
    let mut default_values = manifest_forge_api::ValueMap::new();
    let mut schema = None;
    let mut templates = Vec::new();
    let mut crds = Vec::new();
    let mut rest = Vec::new();

    for file in files {
        match file.name.as_str() {
            CHART_MANIFEST => {
                metadata = Some(serde_yaml::from_slice(&file.data).map_err(ChartError::Metadata)?);
            }
            VALUES_FILE => {
                default_values = values::yaml_bytes_to_map(&file.data)?;
            }
            SCHEMA_FILE => schema = Some(file.data),
            name if name.starts_with("templates/") => templates.push(file),
            name if name.starts_with("crds/") => crds.push(file),
            _ => rest.push(file),
        }
    }

    let metadata = metadata.ok_or_else(|| ChartError::MissingChartManifest {
        path: origin.to_string(),
    })?;

    Ok(Chart {
        metadata,
        default_values,
        schema,
        templates,
        crds,
        files: rest,
        dependencies: Vec::new(),
    })
}
