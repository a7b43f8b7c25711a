//! Top-level action dispatcher
//!
//! ```text
//! Uninitialized ──configure──▶ Configured ──run──▶ Applying   ─┐
//!                                                  Destroying ─┤
//!                                                  Querying   ─┼──▶ Done
//!                                                  Cleaning   ─┘
//! ```
//!
//! Pre-flight problems (missing API key, missing zones root) abort before any
//! zone is touched. Everything after that is per-zone and best-effort: a zone
//! that fails is recorded in the [`RunReport`] and the remaining zones carry on.

use crate::cleaner::ArtifactCleaner;
use crate::config::Config;
use crate::credential::KeyGenerator;
use crate::error::{Result, ZoneflowError};
use crate::executor::{Parameters, ProvisioningTool, Verb, ZoneExecutor};
use crate::inventory::{Inventory, InventoryAggregator};
use crate::lock::{self, ZoneLock};
use crate::zone::{Selection, Zone, ZoneId, ZoneRegistry};
use chrono::{DateTime, Local};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Tool variable carrying the cloud API key
pub const API_KEY_VAR: &str = "api_key";
/// Tool variable carrying the generated public key
pub const SSH_PUBLIC_KEY_VAR: &str = "ssh_public_key";
/// Tool variable carrying the generated private key
pub const SSH_PRIVATE_KEY_VAR: &str = "ssh_private_key";

const TIMESTAMP_FORMAT: &str = "%A, %B %d, %Y %I:%M:%S";

/// Operator-requested action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Create or update every selected zone, then refresh the inventory
    Apply,
    /// Tear down every selected zone and drop the inventory
    Destroy,
    /// Refresh the inventory only
    Output,
    /// Remove generated artifacts of every discovered zone
    Clean,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Apply => write!(f, "apply"),
            Action::Destroy => write!(f, "destroy"),
            Action::Output => write!(f, "output"),
            Action::Clean => write!(f, "clean"),
        }
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "apply" => Ok(Action::Apply),
            "destroy" => Ok(Action::Destroy),
            "output" => Ok(Action::Output),
            "clean" => Ok(Action::Clean),
            other => Err(format!(
                "unknown action '{}' (expected apply, destroy, output or clean)",
                other
            )),
        }
    }
}

/// Orchestrator lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Configured,
    Applying,
    Destroying,
    Querying,
    Cleaning,
    Done,
}

impl Phase {
    fn for_action(action: Action) -> Self {
        match action {
            Action::Apply => Phase::Applying,
            Action::Destroy => Phase::Destroying,
            Action::Output => Phase::Querying,
            Action::Clean => Phase::Cleaning,
        }
    }
}

/// A zone that did not complete its part of the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneFailure {
    pub zone: ZoneId,
    /// Verb that failed, when the failure came from the tool
    pub verb: Option<Verb>,
    pub reason: String,
}

impl ZoneFailure {
    fn from_error(zone: &ZoneId, err: &ZoneflowError) -> Self {
        match err {
            ZoneflowError::Execution { verb, reason, .. } => Self {
                zone: zone.clone(),
                verb: Some(*verb),
                reason: reason.clone(),
            },
            ZoneflowError::Aggregation { reason, .. } => Self {
                zone: zone.clone(),
                verb: Some(Verb::Output),
                reason: reason.clone(),
            },
            other => Self {
                zone: zone.clone(),
                verb: None,
                reason: other.to_string(),
            },
        }
    }
}

impl std::fmt::Display for ZoneFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.verb {
            Some(verb) => write!(f, "{}: {} failed: {}", self.zone, verb, self.reason),
            None => write!(f, "{}: {}", self.zone, self.reason),
        }
    }
}

/// Summary of one run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub action: Action,
    /// Zones the action was applied to, in processing order
    pub zones: Vec<ZoneId>,
    /// Requested zones that have no definition directory
    pub unknown_zones: Vec<ZoneId>,
    pub failures: Vec<ZoneFailure>,
    /// Non-fatal problems (e.g. artifacts that could not be removed)
    pub warnings: Vec<String>,
    /// Inventory written by this run, with the zones it contains
    pub inventory: Option<(PathBuf, Vec<ZoneId>)>,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl RunReport {
    fn new(action: Action, started_at: DateTime<Local>) -> Self {
        Self {
            action,
            zones: Vec::new(),
            unknown_zones: Vec::new(),
            failures: Vec::new(),
            warnings: Vec::new(),
            inventory: None,
            started_at,
            finished_at: started_at,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Distinct zones with at least one failure
    pub fn failed_zones(&self) -> Vec<&ZoneId> {
        let mut zones: Vec<&ZoneId> = Vec::new();
        for failure in &self.failures {
            if !zones.contains(&&failure.zone) {
                zones.push(&failure.zone);
            }
        }
        zones
    }

    pub fn elapsed_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Sequences registry, selector, executor, aggregator and cleaner for an action
pub struct Orchestrator {
    config: Config,
    executor: ZoneExecutor,
    keygen: Arc<dyn KeyGenerator>,
    phase: Phase,
}

impl Orchestrator {
    /// Validate configuration. Fails before any zone work when the API key
    /// is missing.
    pub fn configure(
        config: Config,
        tool: Arc<dyn ProvisioningTool>,
        keygen: Arc<dyn KeyGenerator>,
    ) -> Result<Self> {
        if config.api_key().is_none() {
            return Err(ZoneflowError::Configuration(
                "please set env API_KEY for your cloud account".to_string(),
            ));
        }

        let executor = ZoneExecutor::new(tool, config.zone_timeout());
        let mut orchestrator = Self {
            config,
            executor,
            keygen,
            phase: Phase::Uninitialized,
        };
        orchestrator.transition(Phase::Configured);
        Ok(orchestrator)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run an action to completion.
    ///
    /// Returns `Err` only for run-wide failures; per-zone failures are in the
    /// report.
    pub async fn run(&mut self, action: Action) -> Result<RunReport> {
        let started_at = Local::now();
        tracing::info!("process start time: {}", started_at.format(TIMESTAMP_FORMAT));
        tracing::debug!(
            zones = %self.config.zones(),
            image_match = %self.config.image_match(),
            tool = %self.executor.tool_name(),
            "Starting {}",
            action
        );

        let mut report = RunReport::new(action, started_at);
        self.transition(Phase::for_action(action));

        let outcome = match action {
            Action::Apply => self.apply(&mut report).await,
            Action::Destroy => self.destroy(&mut report).await,
            Action::Output => self.output(&mut report).await,
            Action::Clean => self.clean(&mut report).await,
        };

        self.transition(Phase::Done);
        report.finished_at = Local::now();
        tracing::info!(
            "process end time: {} - ran {} (seconds)",
            report.finished_at.format(TIMESTAMP_FORMAT),
            report.elapsed_secs()
        );

        outcome.map(|()| report)
    }

    fn transition(&mut self, next: Phase) {
        tracing::debug!(from = ?self.phase, to = ?next, "Orchestrator phase");
        self.phase = next;
    }

    async fn select(&self, report: &mut RunReport) -> Result<Selection> {
        let registry = ZoneRegistry::discover(self.config.zones_root()).await?;
        let selection = self.config.zones().select(&registry);

        for unknown in &selection.unknown {
            tracing::warn!(zone = %unknown, "Requested zone has no definition in {}", registry.root().display());
        }
        if selection.is_empty() {
            tracing::warn!(filter = %self.config.zones(), "No zones selected");
        }

        report.zones = selection.zones.iter().map(|z| z.id.clone()).collect();
        report.unknown_zones = selection.unknown.clone();
        Ok(selection)
    }

    fn lock_stale_after(&self) -> std::time::Duration {
        lock::stale_after(self.config.zone_timeout())
    }

    fn base_parameters(&self) -> Parameters {
        let mut params = Parameters::new();
        if let Some(api_key) = self.config.api_key() {
            params.insert(API_KEY_VAR, api_key);
        }
        params
    }

    async fn apply(&self, report: &mut RunReport) -> Result<()> {
        let selection = self.select(report).await?;

        let results = self
            .for_each_zone(&selection.zones, |zone| self.apply_zone(zone))
            .await;
        record(report, results);

        self.refresh_inventory(&selection.zones, false, report).await
    }

    async fn apply_zone(&self, zone: &Zone) -> Result<()> {
        let _lock = ZoneLock::acquire(zone, self.lock_stale_after()).await?;

        let mut params = self.base_parameters();
        if self.config.provision_credentials() {
            let keygen = Arc::clone(&self.keygen);
            let id = zone.id.clone();
            let material = tokio::task::spawn_blocking(move || keygen.generate(&id))
                .await
                .map_err(|e| ZoneflowError::Credential(e.to_string()))??;
            params.insert(SSH_PUBLIC_KEY_VAR, material.public_key);
            params.insert(SSH_PRIVATE_KEY_VAR, material.private_key);
        }

        self.executor
            .execute(zone, Verb::Apply, &params, false)
            .await?;
        Ok(())
    }

    async fn destroy(&self, report: &mut RunReport) -> Result<()> {
        let selection = self.select(report).await?;
        let params = self.base_parameters();

        let results = self
            .for_each_zone(&selection.zones, |zone| {
                let params = &params;
                async move {
                    let _lock = ZoneLock::acquire(zone, self.lock_stale_after()).await?;
                    self.executor
                        .execute(zone, Verb::Destroy, params, false)
                        .await?;
                    Ok::<(), ZoneflowError>(())
                }
            })
            .await;
        record(report, results);

        if let Err(err) = Inventory::remove(self.config.inventory_path()).await {
            tracing::warn!(error = %err, "Could not remove inventory");
            report.warnings.push(err.to_string());
        }
        Ok(())
    }

    async fn output(&self, report: &mut RunReport) -> Result<()> {
        let selection = self.select(report).await?;
        self.refresh_inventory(&selection.zones, true, report).await
    }

    async fn clean(&self, report: &mut RunReport) -> Result<()> {
        let registry = ZoneRegistry::discover(self.config.zones_root()).await?;
        report.zones = registry.ids().cloned().collect();

        let cleaned = ArtifactCleaner::new(self.config.inventory_path())
            .clean(&registry)
            .await;
        report
            .warnings
            .extend(cleaned.failures.iter().map(ToString::to_string));
        Ok(())
    }

    async fn refresh_inventory(
        &self,
        zones: &[Zone],
        init_first: bool,
        report: &mut RunReport,
    ) -> Result<()> {
        let aggregation = InventoryAggregator::new(&self.executor)
            .parallelism(self.config.parallelism())
            .init_first(init_first)
            .collect(zones)
            .await;

        for err in &aggregation.failures {
            if let Some(zone) = err.zone() {
                report.failures.push(ZoneFailure::from_error(zone, err));
            }
        }
        if !aggregation.is_complete() {
            let message = format!(
                "inventory is partial: {} of {} zones could not be queried",
                aggregation.failures.len(),
                zones.len()
            );
            tracing::warn!("{}", message);
            report.warnings.push(message);
        }

        let path = self.config.inventory_path();
        aggregation.inventory.persist(path).await?;
        report.inventory = Some((
            path.to_path_buf(),
            aggregation.inventory.zone_ids().map(ZoneId::from).collect(),
        ));
        Ok(())
    }

    /// Run `task` for every zone with bounded parallelism; results keep zone order
    async fn for_each_zone<'z, F, Fut>(
        &self,
        zones: &'z [Zone],
        task: F,
    ) -> Vec<(ZoneId, Result<()>)>
    where
        F: Fn(&'z Zone) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        stream::iter(zones)
            .map(|zone| {
                let fut = task(zone);
                async move { (zone.id.clone(), fut.await) }
            })
            .buffered(self.config.parallelism())
            .collect()
            .await
    }
}

fn record(report: &mut RunReport, results: Vec<(ZoneId, Result<()>)>) {
    for (zone, result) in results {
        if let Err(err) = result {
            tracing::error!(zone = %zone, error = %err, "Zone failed");
            report.failures.push(ZoneFailure::from_error(&zone, &err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_parse_is_case_insensitive() {
        assert_eq!("apply".parse::<Action>().unwrap(), Action::Apply);
        assert_eq!("DESTROY".parse::<Action>().unwrap(), Action::Destroy);
        assert_eq!("Output".parse::<Action>().unwrap(), Action::Output);
        assert_eq!(" clean ".parse::<Action>().unwrap(), Action::Clean);
        assert!("plan".parse::<Action>().is_err());
    }

    #[test]
    fn test_failure_display() {
        let failure = ZoneFailure::from_error(
            &ZoneId::from("z2"),
            &ZoneflowError::Aggregation {
                zone: ZoneId::from("z2"),
                reason: "exit status 1".to_string(),
            },
        );
        assert_eq!(failure.verb, Some(Verb::Output));
        assert_eq!(failure.to_string(), "z2: output failed: exit status 1");
    }

    #[test]
    fn test_failed_zones_are_distinct() {
        let mut report = RunReport::new(Action::Apply, Local::now());
        for verb in [Verb::Apply, Verb::Output] {
            report.failures.push(ZoneFailure {
                zone: ZoneId::from("z2"),
                verb: Some(verb),
                reason: "boom".to_string(),
            });
        }
        assert_eq!(report.failed_zones(), vec![&ZoneId::from("z2")]);
        assert!(!report.is_success());
    }
}
