//! In-memory catalog of discovered units.
//!
//! Readers get an `Arc` snapshot; a refresh builds the new list off to the
//! side and swaps it in with a single assignment, so a reader sees either
//! the old list or the new one.

use crate::discovery;
use crate::error::{CatalogError, ScanError};
use crate::model::{DiscoveryConfig, LaunchableUnit};
use std::sync::{Arc, Mutex, RwLock};

pub struct Catalog {
    cfg: DiscoveryConfig,
    units: RwLock<Arc<Vec<LaunchableUnit>>>,
    refresh_lock: Mutex<()>,
}

impl Catalog {
    /// Empty catalog; call `refresh` to populate.
    pub fn new(cfg: DiscoveryConfig) -> Self {
        Self {
            cfg,
            units: RwLock::new(Arc::new(Vec::new())),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Rescan. On failure the previous list is kept.
    pub fn refresh(&self) -> Result<usize, ScanError> {
        let _guard = self
            .refresh_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let fresh = discovery::scan(&self.cfg).map_err(|e| {
            tracing::warn!(error = %e, "catalog refresh failed, keeping previous list");
            e
        })?;
        let count = fresh.len();

        let mut units = self
            .units
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *units = Arc::new(fresh);
        Ok(count)
    }

    pub fn list(&self) -> Arc<Vec<LaunchableUnit>> {
        self.units
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn get(&self, id: &str) -> Result<LaunchableUnit, CatalogError> {
        self.list()
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }
}
