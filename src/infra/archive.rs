// ============================================================
// Layer 6: Archive
// ============================================================
// An export folder `out/` compresses to the single file `out.zip`
// next to it. Compression is a pure tree → file transform:
// entries are written in sorted order with a fixed timestamp so
// the same tree always yields the same archive.
//
// ExtractedScope is the read side. It unpacks `out.zip` into a
// hidden temporary directory beside it and removes that
// directory when dropped, so repeated loads never leave stale
// extracted trees behind.
//
// Reference: zip crate docs (ZipWriter, ZipArchive::extract)

use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::constants::ARCHIVE_EXTENSION;
use crate::error::{Error, IoContext, Result};
use crate::infra::io::remove_path;

/// `out` → `out.zip` (appends, so dotted folder names survive).
pub fn archive_path(folder: &Path) -> PathBuf {
    let mut name: OsString = folder.as_os_str().to_owned();
    name.push(".");
    name.push(ARCHIVE_EXTENSION);
    PathBuf::from(name)
}

fn zip_err(path: &Path) -> impl FnOnce(zip::result::ZipError) -> Error + '_ {
    move |source| Error::Archive { path: path.to_path_buf(), source }
}

/// Relative paths of every file and directory under `root`, sorted.
fn walk(root: &Path) -> Result<Vec<(String, PathBuf, bool)>> {
    let mut out   = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).at(&dir)? {
            let path = entry.at(&dir)?.path();
            let rel  = path
                .strip_prefix(root)
                .map_err(|e| Error::config("archive", e.to_string()))?
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let is_dir = path.is_dir();
            if is_dir {
                stack.push(path.clone());
            }
            out.push((rel, path, is_dir));
        }
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

/// Zip `folder` into `folder.zip`, optionally deleting the tree afterwards.
pub fn compress(folder: &Path, remove_original: bool) -> Result<PathBuf> {
    if !folder.is_dir() {
        return Err(Error::missing("folder to compress", folder));
    }
    let target  = archive_path(folder);
    let partial = target.with_extension(format!("{ARCHIVE_EXTENSION}.partial"));

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    {
        let file    = File::create(&partial).at(&partial)?;
        let mut zip = ZipWriter::new(file);
        for (rel, path, is_dir) in walk(folder)? {
            if is_dir {
                zip.add_directory(rel, options).map_err(zip_err(&partial))?;
            } else {
                zip.start_file(rel, options).map_err(zip_err(&partial))?;
                let mut src = File::open(&path).at(&path)?;
                io::copy(&mut src, &mut zip).at(&path)?;
            }
        }
        zip.finish().map_err(zip_err(&partial))?;
    }
    fs::rename(&partial, &target).at(&target)?;

    if remove_original {
        remove_path(folder)?;
    }
    tracing::debug!("Compressed '{}' → '{}'", folder.display(), target.display());
    Ok(target)
}

/// Unpack `archive` into the existing directory `into`.
pub fn extract(archive: &Path, into: &Path) -> Result<()> {
    let file    = File::open(archive).at(archive)?;
    let mut zip = ZipArchive::new(file).map_err(zip_err(archive))?;
    zip.extract(into).map_err(zip_err(archive))?;
    Ok(())
}

// ─── ExtractedScope ───────────────────────────────────────────────────────────
/// A readable export folder for the lifetime of the scope.
#[derive(Debug)]
pub struct ExtractedScope {
    root:  PathBuf,
    temp:  Option<TempDir>,
}

impl ExtractedScope {
    /// With `compress`, prefer `folder.zip`; fall back to a plain `folder`.
    pub fn open(folder: &Path, compress: bool) -> Result<Self> {
        let archive = archive_path(folder);
        if compress && archive.is_file() {
            let parent = folder.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let temp = tempfile::Builder::new()
                .prefix(".extract-")
                .tempdir_in(parent)
                .at(parent)?;
            extract(&archive, temp.path())?;
            tracing::debug!("Extracted '{}' into '{}'", archive.display(), temp.path().display());
            return Ok(Self { root: temp.path().to_path_buf(), temp: Some(temp) });
        }
        if folder.is_dir() {
            return Ok(Self { root: folder.to_path_buf(), temp: None });
        }
        let expected = if compress { archive } else { folder.to_path_buf() };
        Err(Error::missing("export", expected))
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }
}
