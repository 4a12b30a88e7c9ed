//! Scheduler error types.

use thiserror::Error;

/// Errors that abort a pod launch or a sync pass.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("coordination store error: {0}")]
    Store(#[from] raftainer_consul::StoreError),

    #[error("container runtime error: {0}")]
    Runtime(#[from] raftainer_docker::RuntimeError),

    #[error("secret provider error: {0}")]
    Secrets(#[from] raftainer_vault::VaultError),

    #[error("invalid pod definition: {0}")]
    Model(#[from] raftainer_model::ModelError),

    #[error("secret '{key}' not found for pod {pod}")]
    MissingSecret { pod: String, key: String },

    #[error("hardware inventory error: {0}")]
    Inventory(String),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SchedulerError {
    /// The store no longer knows the host session this host runs under.
    pub fn is_session_lost(&self) -> bool {
        matches!(
            self,
            SchedulerError::Store(raftainer_consul::StoreError::SessionNotFound(_))
        )
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
