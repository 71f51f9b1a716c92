use std::{env::VarError, fmt::Debug, io, path::StripPrefixError};

use async_channel::SendError;
use aws_sdk_s3::{error::SdkError, primitives::ByteStreamError};
use humantime::DurationError;
use tokio::{sync::AcquireError, task::JoinError};

use super::Error;

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::other(error)
    }
}

impl From<VarError> for Error {
    fn from(error: VarError) -> Self {
        Error::other(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::other(error)
    }
}

impl From<JoinError> for Error {
    fn from(error: JoinError) -> Self {
        Error::other(error)
    }
}

impl From<AcquireError> for Error {
    fn from(error: AcquireError) -> Self {
        Error::other(error)
    }
}

impl From<ByteStreamError> for Error {
    fn from(error: ByteStreamError) -> Self {
        Error::other(error)
    }
}

impl From<StripPrefixError> for Error {
    fn from(error: StripPrefixError) -> Self {
        Error::other(error)
    }
}

impl From<DurationError> for Error {
    fn from(error: DurationError) -> Self {
        Error::other(error)
    }
}

impl From<async_walkdir::Error> for Error {
    fn from(error: async_walkdir::Error) -> Self {
        Error::other(error)
    }
}

impl<E: std::error::Error + Send + Sync + 'static, R: Debug + Send + Sync + 'static>
    From<SdkError<E, R>> for Error
{
    fn from(error: SdkError<E, R>) -> Self {
        Error::other(error)
    }
}

impl<T: Send + Sync + 'static> From<SendError<T>> for Error {
    fn from(error: SendError<T>) -> Self {
        Error::other(error)
    }
}
