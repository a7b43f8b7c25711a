//! Zone discovery and selection
//!
//! A zone is one subdirectory of the zones root (`vpcs/`), holding an opaque
//! infrastructure project. The registry lists what exists on disk; the
//! selector narrows it down to what the configured filter asks for.

use crate::error::{Result, ZoneflowError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Filter value selecting every discovered zone
pub const ALL_ZONES: &str = "all";

/// Filter used when none is configured
pub const DEFAULT_ZONE_FILTER: &str = "us-south-3";

/// Zone identifier, equal to the basename of the zone directory
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(String);

impl ZoneId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ZoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ZoneId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ZoneId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for ZoneId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A discovered zone definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    pub id: ZoneId,
    pub path: PathBuf,
}

impl Zone {
    pub fn new(id: impl Into<ZoneId>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }
}

/// Zones found beneath the zones root
#[derive(Debug, Clone)]
pub struct ZoneRegistry {
    root: PathBuf,
    zones: Vec<Zone>,
}

impl ZoneRegistry {
    /// List the immediate subdirectories of `root`.
    ///
    /// Zones are sorted by identifier so every run enumerates them in the
    /// same order regardless of how the filesystem returns entries.
    pub async fn discover(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        let metadata = fs::metadata(&root)
            .await
            .map_err(|e| ZoneflowError::Discovery {
                path: root.clone(),
                message: e.to_string(),
            })?;
        if !metadata.is_dir() {
            return Err(ZoneflowError::Discovery {
                path: root,
                message: "not a directory".to_string(),
            });
        }

        let mut entries = fs::read_dir(&root)
            .await
            .map_err(|e| ZoneflowError::Discovery {
                path: root.clone(),
                message: e.to_string(),
            })?;

        let mut zones = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::warn!(path = %entry.path().display(), "Skipping zone with non UTF-8 name");
                continue;
            };
            zones.push(Zone::new(name, entry.path()));
        }
        zones.sort_by(|a, b| a.id.cmp(&b.id));

        tracing::debug!(root = %root.display(), count = zones.len(), "Discovered zones");
        Ok(Self { root, zones })
    }

    /// Build a registry from already known zones
    pub fn from_zones(root: impl Into<PathBuf>, zones: Vec<Zone>) -> Self {
        Self {
            root: root.into(),
            zones,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn ids(&self) -> impl Iterator<Item = &ZoneId> {
        self.zones.iter().map(|z| &z.id)
    }

    pub fn get(&self, id: &str) -> Option<&Zone> {
        self.zones.iter().find(|z| z.id.as_str() == id)
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

/// Parsed zone filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneSelector {
    /// Every discovered zone
    All,
    /// Explicit identifiers, trimmed and de-duplicated, in filter order
    Named(Vec<ZoneId>),
}

impl ZoneSelector {
    /// Parse a comma-separated filter, or the `all` sentinel
    pub fn parse(filter: &str) -> Self {
        if filter.trim().eq_ignore_ascii_case(ALL_ZONES) {
            return ZoneSelector::All;
        }

        let mut seen = HashSet::new();
        let ids = filter
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .filter(|token| seen.insert(token.to_string()))
            .map(ZoneId::from)
            .collect();
        ZoneSelector::Named(ids)
    }

    /// Resolve the filter against discovered zones.
    ///
    /// Requested identifiers without a matching zone directory are left out
    /// of the zone set and reported in [`Selection::unknown`].
    pub fn select(&self, registry: &ZoneRegistry) -> Selection {
        match self {
            ZoneSelector::All => Selection {
                zones: registry.zones().to_vec(),
                unknown: Vec::new(),
            },
            ZoneSelector::Named(ids) => {
                let mut zones = Vec::new();
                let mut unknown = Vec::new();
                for id in ids {
                    match registry.get(id.as_str()) {
                        Some(zone) => zones.push(zone.clone()),
                        None => unknown.push(id.clone()),
                    }
                }
                Selection { zones, unknown }
            }
        }
    }
}

impl std::fmt::Display for ZoneSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ZoneSelector::All => f.write_str(ALL_ZONES),
            ZoneSelector::Named(ids) => {
                let names: Vec<&str> = ids.iter().map(ZoneId::as_str).collect();
                f.write_str(&names.join(","))
            }
        }
    }
}

/// Outcome of resolving a filter
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Zones to operate on
    pub zones: Vec<Zone>,
    /// Requested identifiers with no zone directory
    pub unknown: Vec<ZoneId>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}
