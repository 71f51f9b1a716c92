use std::{collections::BTreeMap, fmt::Debug, sync::Arc};

use parking_lot::Mutex;

pub type TarFileSetMap = BTreeMap<String, Vec<String>>;

/// Which container holds which files.
pub trait TarFileSets: Debug + Send + Sync {
    fn add_file(&self, container: &str, path: &str);
    fn add_files(&self, container: &str, paths: &[String]);
    fn files(&self) -> TarFileSetMap;
}

pub type SharedTarFileSets = Arc<dyn TarFileSets>;

#[derive(Debug, Default)]
pub struct RegularTarFileSets {
    files: Mutex<TarFileSetMap>,
}

impl RegularTarFileSets {
    pub fn new() -> Self {
        RegularTarFileSets::default()
    }
}

impl TarFileSets for RegularTarFileSets {
    fn add_file(&self, container: &str, path: &str) {
        self.files
            .lock()
            .entry(container.to_owned())
            .or_default()
            .push(path.to_owned());
    }

    fn add_files(&self, container: &str, paths: &[String]) {
        self.files
            .lock()
            .entry(container.to_owned())
            .or_default()
            .extend_from_slice(paths);
    }

    fn files(&self) -> TarFileSetMap {
        self.files.lock().clone()
    }
}

/// Discards membership; used when file-level metadata is not wanted.
#[derive(Debug, Default)]
pub struct NopTarFileSets;

impl TarFileSets for NopTarFileSets {
    fn add_file(&self, _container: &str, _path: &str) {}

    fn add_files(&self, _container: &str, _paths: &[String]) {}

    fn files(&self) -> TarFileSetMap {
        TarFileSetMap::new()
    }
}
