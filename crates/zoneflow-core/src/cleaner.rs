//! Removal of generated per-zone artifacts

use crate::error::ZoneflowError;
use crate::inventory::Inventory;
use crate::zone::{Zone, ZoneRegistry};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

const STATE_FILE: &str = "terraform.tfstate";
const STATE_BACKUP: &str = "terraform.tfstate.backup";
const CACHE_DIR: &str = ".terraform";

/// What a clean pass did
#[derive(Debug, Default)]
pub struct CleanReport {
    /// Paths that existed and were removed
    pub removed: Vec<PathBuf>,
    /// Removals that failed; never fatal
    pub failures: Vec<ZoneflowError>,
}

impl CleanReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Deletes state files, state backups and tool caches of every discovered
/// zone, plus the aggregated inventory. Missing targets are not an error.
pub struct ArtifactCleaner {
    inventory_path: PathBuf,
}

impl ArtifactCleaner {
    pub fn new(inventory_path: impl Into<PathBuf>) -> Self {
        Self {
            inventory_path: inventory_path.into(),
        }
    }

    /// Artifacts generated inside a zone directory
    pub fn zone_artifacts(zone: &Zone) -> [PathBuf; 3] {
        [
            zone.path.join(STATE_FILE),
            zone.path.join(STATE_BACKUP),
            zone.path.join(CACHE_DIR),
        ]
    }

    pub async fn clean(&self, registry: &ZoneRegistry) -> CleanReport {
        let mut report = CleanReport::default();

        for zone in registry.zones() {
            tracing::info!(zone = %zone.id, "cleaning {}", zone.id);
            for path in Self::zone_artifacts(zone) {
                remove_path(&path, &mut report).await;
            }
        }

        match Inventory::remove(&self.inventory_path).await {
            Ok(true) => report.removed.push(self.inventory_path.clone()),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(error = %err, "Could not remove inventory");
                report.failures.push(err);
            }
        }

        report
    }
}

async fn remove_path(path: &Path, report: &mut CleanReport) {
    let metadata = match fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return,
        Err(e) => {
            record_failure(path, e, report);
            return;
        }
    };

    let result = if metadata.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };

    match result {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Removed");
            report.removed.push(path.to_path_buf());
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => record_failure(path, e, report),
    }
}

fn record_failure(path: &Path, source: std::io::Error, report: &mut CleanReport) {
    let err = ZoneflowError::Cleanup {
        path: path.to_path_buf(),
        source,
    };
    tracing::warn!(error = %err, "Skipping artifact");
    report.failures.push(err);
}
