use super::states::JobState;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Invalid state transition from {from} on event '{event}'")]
    InvalidTransition { from: JobState, event: String },
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
