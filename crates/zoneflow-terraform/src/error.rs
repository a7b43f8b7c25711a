//! Terraform driver error types

use thiserror::Error;
use zoneflow_core::ZoneflowError;

#[derive(Error, Debug)]
pub enum TerraformError {
    #[error("{0} not found. Please install terraform or set TERRAFORM_BIN")]
    NotFound(String),

    #[error("terraform exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<TerraformError> for ZoneflowError {
    fn from(err: TerraformError) -> Self {
        ZoneflowError::Tool(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TerraformError>;
