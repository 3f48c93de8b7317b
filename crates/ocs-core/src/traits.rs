//! Common traits for collaborators of the debit engine
//!
//! Defines the eligibility filter abstraction consumed by balance operators
//! and policy resolvers.

use crate::models::ChargingEvent;
use crate::ChargingResult;
use async_trait::async_trait;

/// Eligibility filter service
#[async_trait]
pub trait FilterService: Send + Sync {
    /// Check whether every filter in `filter_ids` matches the event
    ///
    /// An empty filter list always passes. `Ok(false)` is a clean non-match;
    /// `Err` means the filters could not be evaluated.
    async fn pass(
        &self,
        tenant: &str,
        filter_ids: &[String],
        event: &ChargingEvent,
    ) -> ChargingResult<bool>;
}
