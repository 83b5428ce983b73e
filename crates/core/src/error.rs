//! Error taxonomy for core operations.
//!
//! The facade surfaces these kinds to the API layer, which maps them onto
//! status codes: `NotFound` → 404, `Conflict` → 409, `Config` → 422,
//! everything else → 500. The pipeline executor itself never propagates
//! failures to callers; it converts them into persisted state.

use thiserror::Error;

use crate::client::ClientError;
use crate::registry::ConfigError;
use crate::store::StoreError;

/// Failure kinds surfaced by the core facade.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A referenced id or name does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A lifecycle precondition was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A request was structurally invalid.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Registry configuration failed to validate.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The persistent store failed.
    #[error(transparent)]
    Store(StoreError),

    /// The agent runner failed outside of a step context.
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RowNotFound { what, id } => {
                CoreError::NotFound(format!("{what} {id} not found"))
            }
            other => CoreError::Store(other),
        }
    }
}
