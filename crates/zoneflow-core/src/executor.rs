//! Per-zone invocation of the provisioning tool
//!
//! The tool itself sits behind [`ProvisioningTool`], a deliberately narrow
//! interface: a zone, a verb, a parameter mapping in; captured output or an
//! error out. [`ZoneExecutor`] adds what every invocation needs on top of
//! that (init sequencing, timeouts, tagging failures with zone and verb).

use crate::error::{Result, ZoneflowError};
use crate::zone::Zone;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle verb understood by the provisioning tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    /// Prepare the zone's local working state (idempotent)
    Init,
    /// Create or update the zone's resources
    Apply,
    /// Tear down the zone's resources
    Destroy,
    /// Query current outputs as structured data
    Output,
}

impl Verb {
    /// Whether the working directory must be initialized first
    pub fn requires_init(&self) -> bool {
        matches!(self, Verb::Apply | Verb::Destroy)
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verb::Init => write!(f, "init"),
            Verb::Apply => write!(f, "apply"),
            Verb::Destroy => write!(f, "destroy"),
            Verb::Output => write!(f, "output"),
        }
    }
}

/// Named input variables for a zone project
///
/// Values are secrets more often than not (API key, private key) and are
/// never printed by `Debug`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    values: BTreeMap<String, String>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

impl std::fmt::Debug for Parameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

/// One call into the provisioning tool
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub zone: &'a Zone,
    pub verb: Verb,
    pub params: &'a Parameters,
    /// Return stdout to the caller instead of streaming it to the log
    pub capture_output: bool,
}

/// Result of a successful invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutput {
    /// Captured stdout, when capture was requested
    pub stdout: Option<String>,
}

impl ExecutionOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn captured(stdout: impl Into<String>) -> Self {
        Self {
            stdout: Some(stdout.into()),
        }
    }
}

/// External provisioning tool abstraction
///
/// Implementations run one verb against one zone working directory. They do
/// not need to handle timeouts or sequencing; [`ZoneExecutor`] does.
#[async_trait]
pub trait ProvisioningTool: Send + Sync {
    /// Tool name for logs (e.g. "terraform")
    fn name(&self) -> &str;

    /// Run a single verb
    async fn invoke(&self, invocation: &Invocation<'_>) -> Result<ExecutionOutput>;
}

/// Runs tool verbs for zones with a per-invocation timeout
#[derive(Clone)]
pub struct ZoneExecutor {
    tool: Arc<dyn ProvisioningTool>,
    timeout: Duration,
}

impl ZoneExecutor {
    pub fn new(tool: Arc<dyn ProvisioningTool>, timeout: Duration) -> Self {
        Self { tool, timeout }
    }

    pub fn tool_name(&self) -> &str {
        self.tool.name()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one verb, initializing the zone first when the verb requires it.
    /// Any failure comes back as [`ZoneflowError::Execution`].
    pub async fn execute(
        &self,
        zone: &Zone,
        verb: Verb,
        params: &Parameters,
        capture_output: bool,
    ) -> Result<ExecutionOutput> {
        if verb.requires_init() {
            self.init_then(zone, verb, params, capture_output).await
        } else {
            self.invoke(zone, verb, params, capture_output).await
        }
    }

    /// Initialize the zone, then run `verb` if init succeeded
    pub async fn init_then(
        &self,
        zone: &Zone,
        verb: Verb,
        params: &Parameters,
        capture_output: bool,
    ) -> Result<ExecutionOutput> {
        self.invoke(zone, Verb::Init, &Parameters::new(), false)
            .await?;
        self.invoke(zone, verb, params, capture_output).await
    }

    async fn invoke(
        &self,
        zone: &Zone,
        verb: Verb,
        params: &Parameters,
        capture_output: bool,
    ) -> Result<ExecutionOutput> {
        tracing::info!(zone = %zone.id, verb = %verb, "running {} on {}", verb, zone.id);

        let invocation = Invocation {
            zone,
            verb,
            params,
            capture_output,
        };

        match tokio::time::timeout(self.timeout, self.tool.invoke(&invocation)).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(tag(zone, verb, err)),
            Err(_) => Err(ZoneflowError::Execution {
                zone: zone.id.clone(),
                verb,
                reason: ZoneflowError::Timeout(self.timeout.as_secs()).to_string(),
            }),
        }
    }
}

fn tag(zone: &Zone, verb: Verb, err: ZoneflowError) -> ZoneflowError {
    match err {
        ZoneflowError::Execution { .. } => err,
        ZoneflowError::Tool(reason) => ZoneflowError::Execution {
            zone: zone.id.clone(),
            verb,
            reason,
        },
        other => ZoneflowError::Execution {
            zone: zone.id.clone(),
            verb,
            reason: other.to_string(),
        },
    }
}
