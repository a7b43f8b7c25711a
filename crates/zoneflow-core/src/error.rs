//! zoneflow error types

use crate::executor::Verb;
use crate::zone::ZoneId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the orchestration engine
#[derive(Error, Debug)]
pub enum ZoneflowError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Zone discovery failed for {path}: {message}")]
    Discovery { path: PathBuf, message: String },

    #[error("Credential generation failed: {0}")]
    Credential(String),

    #[error("{verb} failed for zone {zone}: {reason}")]
    Execution {
        zone: ZoneId,
        verb: Verb,
        reason: String,
    },

    #[error("Inventory query failed for zone {zone}: {reason}")]
    Aggregation { zone: ZoneId, reason: String },

    #[error("Failed to remove {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Zone lock unavailable: {0}")]
    Lock(String),

    /// Raw failure reported by a provisioning tool implementation.
    /// The executor tags it with zone and verb before it reaches the caller.
    #[error("Tool failure: {0}")]
    Tool(String),

    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ZoneflowError {
    /// Zone this error is attached to, if it is a per-zone failure
    pub fn zone(&self) -> Option<&ZoneId> {
        match self {
            ZoneflowError::Execution { zone, .. } | ZoneflowError::Aggregation { zone, .. } => {
                Some(zone)
            }
            _ => None,
        }
    }

    /// Whether this error must abort the whole run
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            ZoneflowError::Configuration(_) | ZoneflowError::Discovery { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ZoneflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_message_names_zone_and_verb() {
        let err = ZoneflowError::Execution {
            zone: ZoneId::from("us-south-1"),
            verb: Verb::Apply,
            reason: "exit status 1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "apply failed for zone us-south-1: exit status 1"
        );
        assert_eq!(err.zone().map(ZoneId::as_str), Some("us-south-1"));
        assert!(!err.is_preflight());
    }

    #[test]
    fn test_preflight_classification() {
        assert!(ZoneflowError::Configuration("API_KEY".into()).is_preflight());
        assert!(
            ZoneflowError::Discovery {
                path: PathBuf::from("/nope"),
                message: "missing".into()
            }
            .is_preflight()
        );
        assert!(!ZoneflowError::Credential("rng".into()).is_preflight());
    }
}
