//! CLI-specific error types
//!
//! Every CLI error is fatal: the command prints it and exits non-zero.

use std::fmt;
use std::io;

use crate::engine::EngineError;
use crate::model::ModelError;
use crate::rules::RegistrationError;
use crate::store::StoreError;

/// CLI error codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file error
    ConfigError,
    /// Catalog definition error
    ModelError,
    /// Rule registration error
    RegistrationError,
    /// A transaction was rejected or failed
    TransactionError,
    /// I/O error (stdout, export file)
    IoError,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "RULECAST_CLI_CONFIG_ERROR",
            Self::ModelError => "RULECAST_CLI_MODEL_ERROR",
            Self::RegistrationError => "RULECAST_CLI_REGISTRATION_ERROR",
            Self::TransactionError => "RULECAST_CLI_TRANSACTION_ERROR",
            Self::IoError => "RULECAST_CLI_IO_ERROR",
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    /// Create a new CLI error
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Config error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    /// Get the error code
    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::new(CliErrorCode::IoError, e.to_string())
    }
}

impl From<crate::config::ConfigError> for CliError {
    fn from(e: crate::config::ConfigError) -> Self {
        Self::config_error(e.to_string())
    }
}

impl From<ModelError> for CliError {
    fn from(e: ModelError) -> Self {
        Self::new(CliErrorCode::ModelError, e.to_string())
    }
}

impl From<RegistrationError> for CliError {
    fn from(e: RegistrationError) -> Self {
        Self::new(CliErrorCode::RegistrationError, e.to_string())
    }
}

impl From<EngineError> for CliError {
    fn from(e: EngineError) -> Self {
        Self::new(CliErrorCode::TransactionError, e.to_string())
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        Self::new(CliErrorCode::TransactionError, e.to_string())
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
