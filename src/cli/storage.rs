use std::sync::Arc;

use humantime::parse_duration;
use log::warn;

use crate::{
    env,
    error::Result,
    storage::{BoxedStorage, LocalStorage, MemoryStorage, S3Storage, StorageUrl},
};

use super::args::GlobalArgs;

pub const ENV_STORAGE: &str = "PGBUNDLE_STORAGE";
pub const ENV_LATENCY: &str = "PGBUNDLE_LATENCY";

/// Flags win over `PGBUNDLE_STORAGE` and `PGBUNDLE_LATENCY`.
pub async fn create_storage(args: &GlobalArgs) -> Result<BoxedStorage> {
    let url = match &args.storage {
        Some(url) => url.clone(),
        None => env::var(ENV_STORAGE)?.parse()?,
    };

    let latency = match args.latency {
        Some(latency) => Some(latency),
        None => env::try_var(ENV_LATENCY)?
            .as_deref()
            .map(parse_duration)
            .transpose()?,
    };

    if latency.is_some() && !matches!(url, StorageUrl::Local(_)) {
        warn!("latency only applies to local storage");
    }

    let storage: BoxedStorage = match url {
        StorageUrl::S3(location) => Arc::new(S3Storage::new(&location).await),
        StorageUrl::Local(path) => Arc::new(LocalStorage::new(path, latency)),
        StorageUrl::Memory => {
            warn!("using in-memory storage, nothing will be kept");
            Arc::new(MemoryStorage::new())
        }
    };

    Ok(storage)
}
