use std::{fmt, path::PathBuf, str::FromStr};

use crate::error::Error;

pub const S3_PREFIX: &str = "s3://";
pub const LOCAL_PREFIX: &str = "file://";
pub const MEMORY_URL: &str = "memory://";

#[derive(Debug, Clone, PartialEq)]
pub enum StorageUrl {
    S3(String),
    Local(PathBuf),
    Memory,
}

impl FromStr for StorageUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(bucket) = s.strip_prefix(S3_PREFIX) {
            if bucket.is_empty() {
                return Err(Error::InvalidStorageUrl(s.to_owned()));
            }

            Ok(StorageUrl::S3(bucket.trim_end_matches('/').to_owned()))
        } else if let Some(path_str) = s.strip_prefix(LOCAL_PREFIX) {
            let path = path_str.into();
            Ok(StorageUrl::Local(path))
        } else if s == MEMORY_URL {
            Ok(StorageUrl::Memory)
        } else {
            Err(Error::InvalidStorageUrl(s.to_owned()))
        }
    }
}

impl fmt::Display for StorageUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageUrl::S3(bucket) => write!(f, "{S3_PREFIX}{bucket}"),
            StorageUrl::Local(path) => write!(f, "{LOCAL_PREFIX}{}", path.display()),
            StorageUrl::Memory => f.write_str(MEMORY_URL),
        }
    }
}
