//! Inventory aggregation
//!
//! Queries every selected zone for its outputs and merges them into one JSON
//! document keyed by zone identifier. The document is rebuilt from scratch on
//! each run and replaces whatever was persisted before.

use crate::error::{Result, ZoneflowError};
use crate::executor::{Parameters, Verb, ZoneExecutor};
use crate::lock::{self, ZoneLock};
use crate::zone::{Zone, ZoneId};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Output variables of one zone, as reported by the tool
pub type ZoneResult = Map<String, Value>;

/// Zone identifier → zone outputs, in zone processing order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Inventory {
    zones: Map<String, Value>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, zone: &ZoneId, result: ZoneResult) {
        self.zones
            .insert(zone.as_str().to_string(), Value::Object(result));
    }

    pub fn get(&self, zone: &str) -> Option<&ZoneResult> {
        self.zones.get(zone).and_then(Value::as_object)
    }

    pub fn zone_ids(&self) -> impl Iterator<Item = &str> {
        self.zones.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Load a persisted inventory
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write the inventory to `path`, replacing any existing file
    pub async fn persist(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let tmp_path = temp_path(path);
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&tmp_path, content).await?;
        if let Err(e) = fs::rename(&tmp_path, path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        tracing::info!(path = %path.display(), zones = self.len(), "Wrote inventory");
        Ok(())
    }

    /// Delete a persisted inventory. Returns whether a file was removed.
    pub async fn remove(path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        match fs::remove_file(path).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), "Removed inventory");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ZoneflowError::Cleanup {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Decode captured `output` data into a zone result
pub fn parse_zone_result(stdout: &str) -> std::result::Result<ZoneResult, String> {
    if stdout.trim().is_empty() {
        return Err("tool produced no output".to_string());
    }
    match serde_json::from_str::<Value>(stdout) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got {}", json_kind(&other))),
        Err(e) => Err(format!("invalid JSON: {}", e)),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Inventory built by one aggregation pass
#[derive(Debug, Default)]
pub struct Aggregation {
    pub inventory: Inventory,
    /// Zones left out of the inventory, as `Aggregation` errors
    pub failures: Vec<ZoneflowError>,
}

impl Aggregation {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Collects zone outputs into an [`Inventory`]
pub struct InventoryAggregator<'a> {
    executor: &'a ZoneExecutor,
    parallelism: usize,
    init_first: bool,
}

impl<'a> InventoryAggregator<'a> {
    pub fn new(executor: &'a ZoneExecutor) -> Self {
        Self {
            executor,
            parallelism: 1,
            init_first: false,
        }
    }

    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Initialize each zone before querying it
    pub fn init_first(mut self, init_first: bool) -> Self {
        self.init_first = init_first;
        self
    }

    /// Query every zone. A zone that cannot be queried is left out of the
    /// inventory and reported in [`Aggregation::failures`].
    pub async fn collect(&self, zones: &[Zone]) -> Aggregation {
        let results: Vec<(&ZoneId, Result<ZoneResult>)> = stream::iter(zones)
            .map(|zone| async move { (&zone.id, self.query(zone).await) })
            .buffered(self.parallelism)
            .collect()
            .await;

        let mut aggregation = Aggregation::default();
        for (zone, result) in results {
            match result {
                Ok(outputs) => aggregation.inventory.insert(zone, outputs),
                Err(err) => {
                    tracing::warn!(zone = %zone, error = %err, "Zone left out of inventory");
                    aggregation.failures.push(err);
                }
            }
        }
        aggregation
    }

    async fn query(&self, zone: &Zone) -> Result<ZoneResult> {
        let to_aggregation = |reason: String| ZoneflowError::Aggregation {
            zone: zone.id.clone(),
            reason,
        };

        let guard = ZoneLock::acquire(zone, lock::stale_after(self.executor.timeout()))
            .await
            .map_err(|e| to_aggregation(e.to_string()))?;

        let params = Parameters::new();
        let output = if self.init_first {
            self.executor
                .init_then(zone, Verb::Output, &params, true)
                .await
        } else {
            self.executor.execute(zone, Verb::Output, &params, true).await
        };
        if let Err(err) = guard.release().await {
            tracing::warn!(zone = %zone.id, error = %err, "Could not release zone lock");
        }

        let output = output.map_err(|e| match e {
            ZoneflowError::Execution {
                verb: Verb::Output,
                reason,
                ..
            } => to_aggregation(reason),
            ZoneflowError::Execution { verb, reason, .. } => {
                to_aggregation(format!("{} failed: {}", verb, reason))
            }
            other => to_aggregation(other.to_string()),
        })?;

        parse_zone_result(output.stdout.as_deref().unwrap_or_default()).map_err(to_aggregation)
    }
}
