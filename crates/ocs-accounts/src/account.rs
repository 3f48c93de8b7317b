//! Account level debit
//!
//! Runs a debit through the balances of one account, highest weight first,
//! until the requested quantity is covered.

use ocs_core::{
    models::{ChargingEvent, EventCharges},
    ChargingError, ChargingResult,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::operator::{
    BalanceHandle, BalanceOperator, DebitOutcome, OperatorContext, OperatorRegistry,
};

/// Result of an account level debit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountDebit {
    /// Merged fragments of every balance that charged something
    pub charges: EventCharges,
    pub debited: Decimal,
    /// Part of the request no balance could cover
    pub remaining: Decimal,
}

impl AccountDebit {
    pub fn is_covered(&self) -> bool {
        self.remaining.is_zero()
    }
}

/// Account debit that failed on one balance after others were charged
///
/// `partial` holds everything charged before the failure; those balances
/// keep their new values, so the fragment must still reach the ledger.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("account debit stopped after {} debited: {source}", .partial.debited)]
pub struct AccountDebitError {
    pub partial: AccountDebit,
    pub source: ChargingError,
}

impl AccountDebitError {
    /// Failure before anything was charged
    fn untouched(&self) -> bool {
        self.partial.charges.is_empty()
    }
}

impl From<AccountDebitError> for ChargingError {
    fn from(err: AccountDebitError) -> Self {
        err.source
    }
}

#[derive(Clone, Copy, Debug)]
enum DebitKind {
    Abstracts,
    Concretes,
}

/// Debits the balances of one account in weight order
pub struct AccountDebitor {
    account_id: String,
    operators: Vec<Arc<dyn BalanceOperator>>,
}

impl AccountDebitor {
    pub fn new(
        account_id: &str,
        balances: Vec<BalanceHandle>,
        registry: &OperatorRegistry,
        ctx: &OperatorContext,
    ) -> ChargingResult<Self> {
        let mut weighted: Vec<(Decimal, BalanceHandle)> = balances
            .into_iter()
            .map(|handle| {
                let weight = handle.lock().weight;
                (weight, handle)
            })
            .collect();
        // stable, so equal weights keep their configured order
        weighted.sort_by(|a, b| b.0.cmp(&a.0));

        let operators = weighted
            .into_iter()
            .map(|(_, handle)| registry.build(account_id, handle, ctx))
            .collect::<ChargingResult<Vec<_>>>()?;

        Ok(Self {
            account_id: account_id.to_string(),
            operators,
        })
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Balance ids in debit order
    pub fn balance_ids(&self) -> Vec<&str> {
        self.operators.iter().map(|op| op.id()).collect()
    }

    /// Charge abstract usage across the account balances
    #[instrument(skip(self, event), fields(account = %self.account_id, event_id = %event.id))]
    pub async fn debit_abstracts(
        &self,
        usage: Decimal,
        event: &ChargingEvent,
    ) -> Result<AccountDebit, AccountDebitError> {
        self.debit(DebitKind::Abstracts, usage, event).await
    }

    /// Debit concrete units across the account balances
    #[instrument(skip(self, event), fields(account = %self.account_id, event_id = %event.id))]
    pub async fn debit_concretes(
        &self,
        units: Decimal,
        event: &ChargingEvent,
    ) -> Result<AccountDebit, AccountDebitError> {
        self.debit(DebitKind::Concretes, units, event).await
    }

    async fn debit(
        &self,
        kind: DebitKind,
        quantity: Decimal,
        event: &ChargingEvent,
    ) -> Result<AccountDebit, AccountDebitError> {
        let mut result = AccountDebit {
            remaining: quantity,
            ..Default::default()
        };

        for op in &self.operators {
            if result.remaining <= Decimal::ZERO {
                break;
            }
            let outcome = match kind {
                DebitKind::Abstracts => op.debit_abstracts(result.remaining, event).await,
                DebitKind::Concretes => op.debit_concretes(result.remaining, event).await,
            };
            let DebitOutcome { charges, .. } = match outcome {
                Ok(outcome) => outcome,
                Err(err) if err.is_rejection() => {
                    debug!(balance = op.id(), "filters not passing, skipping balance");
                    continue;
                }
                Err(ChargingError::UnsupportedOperation { .. }) => {
                    debug!(balance = op.id(), ?kind, "balance does not support debit");
                    continue;
                }
                Err(source) => return Err(stop(result, op.id(), source)),
            };
            let Some(charges) = charges else {
                continue;
            };

            if let Err(source) = result.add(kind, charges) {
                return Err(stop(result, op.id(), source));
            }
        }

        debug!(debited = %result.debited, remaining = %result.remaining, "account debit done");
        Ok(result)
    }
}

impl AccountDebit {
    fn add(&mut self, kind: DebitKind, charges: EventCharges) -> ChargingResult<()> {
        let covered = match kind {
            DebitKind::Abstracts => charges.abstracts,
            DebitKind::Concretes => charges.concretes,
        };
        let debited = self
            .debited
            .checked_add(covered)
            .ok_or_else(|| ChargingError::Arithmetic(format!("{} + {}", self.debited, covered)))?;
        let remaining = self.remaining.checked_sub(covered).ok_or_else(|| {
            ChargingError::Arithmetic(format!("{} - {}", self.remaining, covered))
        })?;
        self.charges.merge(charges)?;
        self.debited = debited;
        self.remaining = remaining;
        Ok(())
    }
}

fn stop(partial: AccountDebit, balance_id: &str, source: ChargingError) -> AccountDebitError {
    let err = AccountDebitError { partial, source };
    if err.untouched() {
        debug!(balance = balance_id, error = %err.source, "account debit failed");
    } else {
        warn!(
            balance = balance_id,
            debited = %err.partial.debited,
            error = %err.source,
            "account debit failed after charging earlier balances"
        );
    }
    err
}
