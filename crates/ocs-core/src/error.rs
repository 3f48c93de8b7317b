//! Unified error handling for the charging engine
//!
//! Every failure of a debit path maps to one `ChargingError`. The variants
//! fall into three groups: eligibility rejection (the balance should be
//! skipped), evaluation failures (configuration or collaborator problems)
//! and delegation failures coming back from the rating bridge.

use thiserror::Error;

/// Main charging error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChargingError {
    // ==================== Eligibility ====================
    #[error("Filter not passing for balance: {0}")]
    FilterNotPassing(String),

    // ==================== Evaluation Errors ====================
    #[error("Filter error: {0}")]
    Filter(String),

    #[error("Malformed filter: {0}")]
    MalformedFilter(String),

    #[error("Invalid balance limit: {0}")]
    InvalidBalanceLimit(String),

    #[error("Invalid unit factor: {0}")]
    InvalidUnitFactor(String),

    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Arithmetic overflow: {0}")]
    Arithmetic(String),

    // ==================== Delegation Errors ====================
    #[error("Rating error: {0}")]
    Rating(String),

    #[error("No rating available for rate profiles: {0}")]
    RatingUnavailable(String),

    #[error("Maximum iterations exceeded: {0}")]
    MaxIterationsExceeded(u32),

    // ==================== Dispatch Errors ====================
    #[error("Operation {operation} not supported by balance {balance_id}")]
    UnsupportedOperation {
        balance_id: String,
        operation: &'static str,
    },

    #[error("Unknown balance type: {0}")]
    UnknownBalanceType(String),

    // ==================== Internal Errors ====================
    #[error("Inconsistent event charges: {0}")]
    InconsistentCharges(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ChargingError {
    /// True when the balance filters evaluated cleanly but did not match
    ///
    /// Callers iterating several balances skip the balance on rejection and
    /// abort on anything else.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ChargingError::FilterNotPassing(_))
    }

    /// Returns the error code used in logs and replies
    pub fn error_code(&self) -> &'static str {
        match self {
            ChargingError::FilterNotPassing(_) => "filter_not_passing",
            ChargingError::Filter(_) => "filter_error",
            ChargingError::MalformedFilter(_) => "malformed_filter",
            ChargingError::InvalidBalanceLimit(_) => "invalid_balance_limit",
            ChargingError::InvalidUnitFactor(_) => "invalid_unit_factor",
            ChargingError::InvalidUsage(_) => "invalid_usage",
            ChargingError::InvalidEvent(_) => "invalid_event",
            ChargingError::Arithmetic(_) => "arithmetic_overflow",
            ChargingError::Rating(_) => "rating_error",
            ChargingError::RatingUnavailable(_) => "rating_unavailable",
            ChargingError::MaxIterationsExceeded(_) => "max_iterations_exceeded",
            ChargingError::UnsupportedOperation { .. } => "unsupported_operation",
            ChargingError::UnknownBalanceType(_) => "unknown_balance_type",
            ChargingError::InconsistentCharges(_) => "inconsistent_charges",
            ChargingError::Config(_) => "config_error",
            ChargingError::Serialization(_) => "serialization_error",
        }
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for ChargingError {
    fn from(err: serde_json::Error) -> Self {
        ChargingError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for ChargingError {
    fn from(err: config::ConfigError) -> Self {
        ChargingError::Config(err.to_string())
    }
}
