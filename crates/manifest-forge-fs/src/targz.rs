//! Freeze a filesystem subtree into a single gzip-framed tar stream and
//! thaw it back. Only regular files are carried; directories are recreated
//! lazily on extraction.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::{relative_to, EntryKind, Filesystem, FsError, FsResult, WalkControl};

/// Write every regular file under `source_path` into `out` as a gzipped tar
/// stream. Each entry is named `join(prefix, relpath(file, source_path))`;
/// directories contribute no explicit entry.
pub fn compress<W: Write>(
    fs: &Filesystem,
    source_path: &str,
    prefix: &str,
    out: W,
) -> FsResult<()> {
    if !fs.exists(source_path)? {
        return Err(FsError::NotFound {
            path: source_path.to_string(),
        });
    }

    let gz = GzEncoder::new(out, Compression::default());
    let mut tar = tar::Builder::new(gz);

    fs.walk(source_path, |path, kind| {
        if kind == EntryKind::Directory {
            return Ok(WalkControl::Continue);
        }
        let data = fs.read_file(path)?;
        let name = join_entry_name(prefix, &relative_to(path, source_path));

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(data.len() as u64);
        header.set_cksum();
        tar.append_data(&mut header, &name, data.as_slice())?;
        Ok(WalkControl::Continue)
    })?;

    tar.into_inner()?.finish()?;
    Ok(())
}

/// Materialize a gzipped tar stream under `target_path`. Directory entries
/// are skipped (parents are created on demand); any entry that is neither a
/// directory nor a regular file fails the extraction.
pub fn extract<R: Read>(fs: &Filesystem, reader: R, target_path: &str) -> FsResult<()> {
    fs.create_dir_all(target_path)?;

    let gz = GzDecoder::new(reader);
    let mut archive = tar::Archive::new(gz);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().to_string();
        let entry_type = entry.header().entry_type();

        if entry_type.is_dir() {
            continue;
        }
        if !matches!(entry_type, tar::EntryType::Regular | tar::EntryType::Continuous) {
            return Err(FsError::Irregular { path: name });
        }

        let file_path = Filesystem::join(target_path, &name);
        fs.create_dir_all(&Filesystem::dir(&file_path))?;
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        fs.write_file(&file_path, &data)?;
    }

    Ok(())
}

/// Serialize a subtree straight to bytes.
pub fn compress_to_vec(fs: &Filesystem, source_path: &str, prefix: &str) -> FsResult<Vec<u8>> {
    let mut buf = Vec::new();
    compress(fs, source_path, prefix, &mut buf)?;
    Ok(buf)
}

fn join_entry_name(prefix: &str, rel: &str) -> String {
    let prefix = prefix.trim_matches(crate::SEPARATOR);
    if prefix.is_empty() {
        rel.to_string()
    } else {
        format!("{prefix}/{rel}")
    }
}
