//! OCS Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the OCS charging engine. It includes:
//!
//! - Domain models (Balance, ChargingEvent, EventCharges, etc.)
//! - The filter service trait consumed by balance operators
//! - Unified error handling for the debit paths
//! - Engine configuration

pub mod config;
pub mod error;
pub mod models;
pub mod traits;

pub use config::EngineConfig;
pub use error::ChargingError;

/// Result type alias using ChargingError
pub type ChargingResult<T> = Result<T, ChargingError>;
