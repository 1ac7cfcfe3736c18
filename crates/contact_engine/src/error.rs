use contact_core::{ConfigError, TransitionError};
use thiserror::Error;

use crate::persist::StoreError;

/// Reasons a run stops before every target has been settled.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("storage failure: {0}")]
    Storage(StoreError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transition(TransitionError),
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Transition(transition) => PipelineError::Transition(transition),
            other => PipelineError::Storage(other),
        }
    }
}
