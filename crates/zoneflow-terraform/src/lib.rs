//! Terraform driver for zoneflow
//!
//! Implements [`zoneflow_core::ProvisioningTool`] by running the `terraform`
//! CLI inside each zone directory.
//!
//! # Requirements
//!
//! - `terraform` must be on `PATH`, or its location given explicitly
//! - Provider credentials are passed as `TF_VAR_*` variables, never as
//!   command-line arguments
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use zoneflow_core::{Config, Orchestrator, RsaKeyGenerator};
//! use zoneflow_terraform::TerraformCli;
//!
//! let tool = Arc::new(TerraformCli::new("terraform"));
//! let mut orchestrator = Orchestrator::configure(config, tool, Arc::new(RsaKeyGenerator::new()))?;
//! let report = orchestrator.run(Action::Apply).await?;
//! ```

pub mod error;
pub mod terraform;

pub use error::{Result, TerraformError};
pub use terraform::{DEFAULT_BIN, TerraformCli};
