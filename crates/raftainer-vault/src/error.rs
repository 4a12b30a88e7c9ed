use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("vault transport error: {0}")]
    Transport(String),

    #[error("vault returned {status} for {path}: {body}")]
    Status { status: u16, path: String, body: String },

    #[error("secret at {path} is missing field '{field}'")]
    MissingField { path: String, field: String },

    #[error("failed to decode vault response: {0}")]
    Decode(String),
}

impl VaultError {
    /// The token was rejected and a fresh login is needed.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, VaultError::Status { status: 403, .. })
    }
}

impl From<reqwest::Error> for VaultError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            VaultError::Decode(e.to_string())
        } else {
            VaultError::Transport(e.to_string())
        }
    }
}

pub type VaultResult<T> = Result<T, VaultError>;
