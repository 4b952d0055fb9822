//! Error types for the DPP provisioning service

use thiserror::Error;

/// Result type for radio/security stack operations
pub type StackResult<T> = Result<T, StackError>;

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors reported by the underlying DPP/WiFi stack
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    #[error("Stack unavailable: {0}")]
    Unavailable(String),

    #[error("DPP bootstrap generation failed: {0}")]
    BootstrapFailed(String),

    #[error("DPP listen failed: {0}")]
    ListenFailed(String),

    #[error("Network configuration rejected: {0}")]
    ConfigRejected(String),

    #[error("Association request failed: {0}")]
    ConnectFailed(String),

    #[error("Command {command} failed: {response}")]
    CommandFailed { command: String, response: String },

    #[error("wpa_supplicant error: {0}")]
    WpaSupplicantError(String),
}

/// Errors while preparing the bootstrapping key
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    #[error("Invalid key length: expected {expected} hex digits, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    #[error("Failed to allocate bootstrapping key buffer")]
    AllocationFailure,

    #[error("Stack error: {0}")]
    Stack(#[from] StackError),
}

impl BootstrapError {
    /// Configuration errors are reported distinctly from stack failures
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            BootstrapError::InvalidKeyLength { .. } | BootstrapError::InvalidKeyEncoding(_)
        )
    }
}

/// Errors in user supplied configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid channel list {list:?}: {reason}")]
    InvalidChannelList { list: String, reason: String },

    #[error("Invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}

/// Errors related to core service operations
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Stack bring-up failed: {0}")]
    BringUp(#[source] StackError),
}
