//! zoneflow core
//!
//! Orchestrates lifecycle operations (apply, destroy, output, clean) across a
//! set of per-zone infrastructure projects driven by an external provisioning
//! tool, and aggregates the zones' outputs into a single inventory document.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  zoneflow CLI                    │
//! │        (zoneflow apply|destroy|output|clean)     │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                zoneflow-core                     │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │               Orchestrator                │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌────────────┐ ┌────────────┐ ┌────────────┐   │
//! │  │ Zone select│ │  Inventory │ │  Cleaner   │   │
//! │  └────────────┘ └────────────┘ └────────────┘   │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │   ZoneExecutor → trait ProvisioningTool   │   │
//! │  └──────────────────────────────────────────┘   │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//!           ┌───────▼───────┐
//!           │   terraform   │
//!           │  (subprocess) │
//!           └───────────────┘
//! ```

pub mod cleaner;
pub mod config;
pub mod credential;
pub mod error;
pub mod executor;
pub mod inventory;
pub mod lock;
pub mod orchestrator;
pub mod zone;

// Re-exports
pub use cleaner::{ArtifactCleaner, CleanReport};
pub use config::{Config, ConfigBuilder};
pub use credential::{CredentialMaterial, KeyGenerator, RsaKeyGenerator};
pub use error::{Result, ZoneflowError};
pub use executor::{ExecutionOutput, Invocation, Parameters, ProvisioningTool, Verb, ZoneExecutor};
pub use inventory::{Aggregation, Inventory, InventoryAggregator, ZoneResult};
pub use lock::ZoneLock;
pub use orchestrator::{Action, Orchestrator, Phase, RunReport, ZoneFailure};
pub use zone::{Selection, Zone, ZoneId, ZoneRegistry, ZoneSelector};
