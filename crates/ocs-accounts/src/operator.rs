//! Balance operator abstraction
//!
//! Every balance kind exposes the same capability set: identify itself,
//! debit abstract usage, debit concrete units. Operators are created through
//! the [`OperatorRegistry`], keyed by balance type, so callers never switch
//! on the kind of balance they are charging.

use async_trait::async_trait;
use ocs_core::{
    models::{Balance, BalanceType, ChargingEvent, EventCharges},
    traits::FilterService,
    ChargingError, ChargingResult,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

use crate::abstracts::AbstractBalance;
use crate::bridge::RatingBridge;
use crate::concrete::ConcreteBalance;

/// Shared handle to a balance; the lock is the single-writer guard
pub type BalanceHandle = Arc<Mutex<Balance>>;

/// Result of one debit call
///
/// `charges` is `None` when nothing was charged, which is a normal outcome
/// and distinct from an error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DebitOutcome {
    /// Amount actually debited, in the unit the caller asked in
    pub debited: Decimal,
    pub charges: Option<EventCharges>,
}

impl DebitOutcome {
    /// Outcome of a debit that charged nothing
    pub fn nothing() -> Self {
        Self::default()
    }

    pub fn charged(debited: Decimal, charges: EventCharges) -> Self {
        Self {
            debited,
            charges: Some(charges),
        }
    }

    pub fn is_charged(&self) -> bool {
        self.charges.is_some()
    }
}

/// Debit capability of one balance instance
#[async_trait]
pub trait BalanceOperator: Send + Sync {
    /// Balance identifier
    fn id(&self) -> &str;

    /// Kind of balance behind the operator
    fn balance_type(&self) -> BalanceType;

    /// Charge abstract usage (seconds, bytes, ...)
    async fn debit_abstracts(
        &self,
        usage: Decimal,
        event: &ChargingEvent,
    ) -> ChargingResult<DebitOutcome>;

    /// Debit units expressed in the balance's external unit
    async fn debit_concretes(
        &self,
        units: Decimal,
        event: &ChargingEvent,
    ) -> ChargingResult<DebitOutcome>;
}

/// Collaborators shared by the operators of one engine
#[derive(Clone)]
pub struct OperatorContext {
    pub filters: Arc<dyn FilterService>,
    pub bridge: Arc<dyn RatingBridge>,
}

impl OperatorContext {
    pub fn new(filters: Arc<dyn FilterService>, bridge: Arc<dyn RatingBridge>) -> Self {
        Self { filters, bridge }
    }
}

/// Fail with a rejection unless the balance filters match the event
///
/// An event without a tenant cannot be matched against any filter and fails
/// with `InvalidEvent` instead.
pub(crate) async fn ensure_eligible(
    filters: &dyn FilterService,
    balance_id: &str,
    filter_ids: &[String],
    event: &ChargingEvent,
) -> ChargingResult<()> {
    if event.tenant.trim().is_empty() {
        return Err(ChargingError::InvalidEvent(format!("event {} has no tenant", event.id)));
    }
    if filters.pass(&event.tenant, filter_ids, event).await? {
        Ok(())
    } else {
        Err(ChargingError::FilterNotPassing(balance_id.to_string()))
    }
}

pub(crate) fn ensure_non_negative(quantity: Decimal) -> ChargingResult<()> {
    if quantity.is_sign_negative() && !quantity.is_zero() {
        return Err(ChargingError::InvalidUsage(quantity.to_string()));
    }
    Ok(())
}

/// Builds an operator around a balance handle
pub type OperatorBuilder =
    fn(account_id: &str, balance: BalanceHandle, ctx: &OperatorContext) -> Arc<dyn BalanceOperator>;

/// Operator constructors keyed by balance type
pub struct OperatorRegistry {
    builders: HashMap<BalanceType, OperatorBuilder>,
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(BalanceType::Concrete, build_concrete);
        registry.register(BalanceType::Abstract, build_abstract);
        registry
    }
}

fn build_concrete(
    account_id: &str,
    balance: BalanceHandle,
    ctx: &OperatorContext,
) -> Arc<dyn BalanceOperator> {
    Arc::new(ConcreteBalance::new(account_id, balance, ctx))
}

fn build_abstract(
    account_id: &str,
    balance: BalanceHandle,
    ctx: &OperatorContext,
) -> Arc<dyn BalanceOperator> {
    Arc::new(AbstractBalance::new(account_id, balance, ctx))
}

impl OperatorRegistry {
    /// Registry without any balance type
    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Register or replace the builder of a balance type
    pub fn register(&mut self, balance_type: BalanceType, builder: OperatorBuilder) {
        self.builders.insert(balance_type, builder);
    }

    /// Build the operator matching the type of `balance`
    pub fn build(
        &self,
        account_id: &str,
        balance: BalanceHandle,
        ctx: &OperatorContext,
    ) -> ChargingResult<Arc<dyn BalanceOperator>> {
        let balance_type = balance.lock().balance_type;
        let builder = self
            .builders
            .get(&balance_type)
            .ok_or_else(|| ChargingError::UnknownBalanceType(balance_type.to_string()))?;
        Ok(builder(account_id, balance, ctx))
    }
}
