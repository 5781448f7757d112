// ============================================================
// Error taxonomy
// ============================================================
// Every fatal error names the offending path or field so the
// message alone is enough to locate the problem. Recoverable
// conditions never reach this type: they are logged with
// WARNING_PREFIX and replaced by a neutral value at the call site.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid configuration for `{field}`: {reason}")]
    Config { field: String, reason: String },

    #[error("missing {what} in '{}'", path.display())]
    MissingArtifact { what: String, path: PathBuf },

    #[error("i/o failure on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed json in '{}': {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("csv failure on '{}': {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("archive failure on '{}': {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("could not acquire export lock '{}' within {waited:?}", path.display())]
    Lock { path: PathBuf, waited: Duration },

    #[error("tensor conversion failed: {0}")]
    Tensor(String),

    #[error("onnx failure on '{}': {reason}", path.display())]
    Onnx { path: PathBuf, reason: String },

    #[error("checkpoint '{}' is unusable: {reason}", path.display())]
    Checkpoint { path: PathBuf, reason: String },
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Config { field: field.into(), reason: reason.into() }
    }

    pub fn missing(what: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Error::MissingArtifact { what: what.into(), path: path.as_ref().to_path_buf() }
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Error::Io { path: path.as_ref().to_path_buf(), source }
    }

    pub fn json(path: impl AsRef<Path>, source: serde_json::Error) -> Self {
        Error::Json { path: path.as_ref().to_path_buf(), source }
    }

    pub fn csv(path: impl AsRef<Path>, source: csv::Error) -> Self {
        Error::Csv { path: path.as_ref().to_path_buf(), source }
    }

    pub fn onnx(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Error::Onnx { path: path.as_ref().to_path_buf(), reason: reason.into() }
    }

    pub fn checkpoint(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Error::Checkpoint { path: path.as_ref().to_path_buf(), reason: reason.into() }
    }
}

/// Attach a path to a bare `std::io::Result`.
pub trait IoContext<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|source| Error::io(path, source))
    }
}
