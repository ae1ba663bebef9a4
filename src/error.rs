use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CilError {
    #[error("config file not found: {0}")]
    MissingConfig(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("batch file not found: {0}")]
    BatchNotFound(PathBuf),

    #[error("failed to parse batch file {path}: {message}")]
    BatchParse { path: PathBuf, message: String },

    #[error("legacy nested headers in {0}, rerun the fix-json tool to flatten them")]
    LegacyHeaders(PathBuf),

    #[error("no file name set for record with id {0}")]
    MissingFileName(u64),

    #[error("no headers recorded for {0}")]
    MissingHeaders(String),

    #[error("filename= not found in Content-Disposition: {0}")]
    ContentDisposition(String),

    #[error("{0} is not a zip file")]
    NotAZipFile(PathBuf),

    #[error("expected a single entry in {path}, found {count}")]
    ZipEntryCount { path: PathBuf, count: usize },

    #[error("zip error: {0}")]
    Zip(String),

    #[error("no dataset entries found under {0}")]
    EmptyDataset(PathBuf),
}

impl From<rusqlite::Error> for CilError {
    fn from(err: rusqlite::Error) -> Self {
        CilError::Database(err.to_string())
    }
}
