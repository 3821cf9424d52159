//! Crate-level error type returned by the job manager.
//!
//! Errors fall into three groups:
//! - validation (caller's fault, no job is created): [`FleetError::Resolution`],
//!   [`FleetError::Validation`], [`FleetError::InvalidRequest`]
//! - operational: [`FleetError::NotFound`], [`FleetError::AlreadyTerminal`]
//! - internal: store, state machine, configuration and executor failures

use crate::config::ConfigurationError;
use crate::resolver::ResolutionError;
use crate::state_machine::{JobState, StateMachineError};
use crate::store::StoreError;
use crate::validation::ValidationReport;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationReport),

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Job {job_id} not found")]
    NotFound { job_id: Uuid },

    #[error("Job {job_id} is already {status}")]
    AlreadyTerminal { job_id: Uuid, status: JobState },

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateMachineError),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Executor error: {0:#}")]
    Executor(anyhow::Error),
}

impl FleetError {
    /// Caller-fault errors raised before any job exists
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Resolution(_) | Self::Validation(_) | Self::InvalidRequest { .. }
        )
    }

    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }
}

impl From<StoreError> for FleetError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { job_id } => Self::NotFound { job_id },
            StoreError::InvalidTransition(inner) => Self::StateTransition(inner),
            other => Self::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
