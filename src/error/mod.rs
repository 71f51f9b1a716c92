mod from;

use std::{fmt::Display, path::PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("no item found for key `{0}`")]
    ItemNotFound(String),

    #[error("storage URL `{0}` is invalid")]
    InvalidStorageUrl(String),

    #[error("environment variable `{0}` is not set")]
    MissingEnvVar(String),

    #[error("environment variable `{name}` has invalid value `{value}`")]
    InvalidEnvVar { name: String, value: String },

    #[error("unknown composer `{0}`")]
    UnknownComposer(String),

    #[error("{composer} composer needs {input}")]
    MissingComposerInput {
        composer: &'static str,
        input: &'static str,
    },

    #[error("{0} composer needs files metadata")]
    FilesMetadataRequired(String),

    #[error("{name} must be at least 1")]
    InvalidConcurrency { name: &'static str },

    #[error("tar size threshold must be positive")]
    InvalidTarSizeThreshold,

    #[error("block size {0} is not a power of two between 512 and 32768")]
    InvalidBlockSize(u32),

    #[error("`{0}` vanished before it could be read")]
    FileVanished(PathBuf),

    #[error("`{0}` is not a directory")]
    FileIsNotDirectory(PathBuf),

    #[error("operation was cancelled")]
    Cancelled,

    #[error("container queue is closed")]
    QueueClosed,

    #[error("container `{name}` cannot {action} while {state}")]
    InvalidContainerState {
        name: String,
        action: &'static str,
        state: &'static str,
    },

    #[error("entry `{name}` declared {expected} bytes but {actual} were written")]
    EntrySizeMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("`{0}` is not a relation file path")]
    InvalidRelationPath(String),

    #[error("block {0} has an invalid page header")]
    InvalidBlock(u32),

    #[error("increment header is invalid")]
    InvalidIncrementHeader,

    #[error("increment is truncated: expected {expected} bytes of pages, found {actual}")]
    TruncatedIncrement { expected: u64, actual: u64 },

    #[error("backup `{0}` has no sentinel")]
    BackupNotFound(String),

    #[error(transparent)]
    Other(AnyError),
}

impl Error {
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Other(AnyError(error.into()))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

#[derive(Error, Debug)]
pub struct AnyError(anyhow::Error);

impl Display for AnyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialEq for AnyError {
    fn eq(&self, _other: &Self) -> bool {
        false
    }
}

impl From<anyhow::Error> for Error {
    fn from(error: anyhow::Error) -> Self {
        Error::Other(AnyError(error))
    }
}
