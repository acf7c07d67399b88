//! Error taxonomy shared by every portal operation.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PortalError {
    #[error("Not logged in. Please log in again.")]
    NotAuthenticated,
    #[error("Session expired. Please log in again.")]
    SessionExpired,
    #[error("Network error: {0}")]
    Transport(String),
    #[error("Invalid response: {0}")]
    Decode(String),
    #[error("{message}")]
    Backend {
        status: Option<u16>,
        message: String,
    },
    #[error("{0}")]
    InvalidInput(String),
    #[error("Invoice not found")]
    InvoiceNotFound,
    #[error("Method binding failed for {code}")]
    BindingFailed { code: String },
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PortalError>;

impl PortalError {
    /// Build a backend business error, preferring the backend's own message.
    pub fn backend(status: Option<u16>, message: Option<&str>, default: &str) -> Self {
        let message = message
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(default)
            .to_string();
        PortalError::Backend { status, message }
    }

    /// Errors that should send the user back to the login screen
    pub fn is_auth(&self) -> bool {
        matches!(self, PortalError::NotAuthenticated | PortalError::SessionExpired)
    }

    /// Errors worth offering a "try again" for
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PortalError::Transport(_) | PortalError::Decode(_) | PortalError::BindingFailed { .. }
        )
    }
}

impl From<serde_json::Error> for PortalError {
    fn from(err: serde_json::Error) -> Self {
        PortalError::Decode(err.to_string())
    }
}
