//! Abstract balance operator
//!
//! `*abstract` balances hold usage units (free minutes, bytes). They are
//! debited in abstract units only and never carry concrete value.

use async_trait::async_trait;
use ocs_core::{
    models::{
        new_charge_id, AccountCharge, BalanceType, ChargeEntry, ChargingEvent, EventCharges,
    },
    traits::FilterService,
    ChargingError, ChargingResult,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::bridge::cost_increment_interval;
use crate::operator::{
    ensure_eligible, ensure_non_negative, BalanceHandle, BalanceOperator, DebitOutcome,
    OperatorContext,
};
use crate::policy::{
    bounded_subtract, resolve_balance_limit, resolve_cost_increment, resolve_unit_factor,
};

pub struct AbstractBalance {
    account_id: String,
    balance_id: String,
    balance: BalanceHandle,
    filters: Arc<dyn FilterService>,
}

impl AbstractBalance {
    pub fn new(account_id: &str, balance: BalanceHandle, ctx: &OperatorContext) -> Self {
        let balance_id = balance.lock().id.clone();
        Self {
            account_id: account_id.to_string(),
            balance_id,
            balance,
            filters: ctx.filters.clone(),
        }
    }

    /// Current unit value
    pub fn units(&self) -> Decimal {
        self.balance.lock().units
    }
}

#[async_trait]
impl BalanceOperator for AbstractBalance {
    fn id(&self) -> &str {
        &self.balance_id
    }

    fn balance_type(&self) -> BalanceType {
        BalanceType::Abstract
    }

    #[instrument(skip(self, event), fields(balance = %self.balance_id, event_id = %event.id))]
    async fn debit_abstracts(
        &self,
        usage: Decimal,
        event: &ChargingEvent,
    ) -> ChargingResult<DebitOutcome> {
        ensure_non_negative(usage)?;
        let cfg = self.balance.lock().clone();
        ensure_eligible(self.filters.as_ref(), &cfg.id, &cfg.filter_ids, event).await?;

        let unit_factor = resolve_unit_factor(&cfg.unit_factors, self.filters.as_ref(), event)
            .await?
            .filter(|uf| uf.factor != Decimal::ONE);
        let cost_increment =
            resolve_cost_increment(&cfg.cost_increments, self.filters.as_ref(), event).await?;
        let limit = resolve_balance_limit(&cfg.opts)?;

        let native = match &unit_factor {
            Some(uf) => usage
                .checked_mul(uf.factor)
                .ok_or_else(|| ChargingError::Arithmetic(format!("{} * {}", usage, uf.factor)))?,
            None => usage,
        };

        let debited = {
            let mut balance = self.balance.lock();
            // usage balances never go negative unless told so
            let floor = limit.unwrap_or(Decimal::ZERO);
            let (removed, remaining) = bounded_subtract(balance.units, native, Some(floor))?;
            let debited = match &unit_factor {
                Some(uf) => removed.checked_div(uf.factor).ok_or_else(|| {
                    ChargingError::Arithmetic(format!("{} / {}", removed, uf.factor))
                })?,
                None => removed,
            };
            balance.units = remaining;
            debited
        };

        if debited.is_zero() {
            debug!("no usage charged");
            return Ok(DebitOutcome::nothing());
        }

        let mut ec = EventCharges::new();
        ec.abstracts = debited;
        let unit_factor_id = unit_factor.map(|uf| {
            let id = new_charge_id();
            ec.unit_factors.insert(id.clone(), uf);
            id
        });
        let rating_id = cost_increment.map(|ci| {
            let id = new_charge_id();
            ec.rating
                .insert(id.clone(), cost_increment_interval(&ci, debited, Decimal::ZERO));
            id
        });
        let charge_id = new_charge_id();
        ec.accounting.insert(
            charge_id.clone(),
            AccountCharge {
                account_id: self.account_id.clone(),
                balance_id: self.balance_id.clone(),
                units: debited,
                balance_limit: limit,
                unit_factor_id,
                rating_id,
                ..Default::default()
            },
        );
        ec.charges.push(ChargeEntry::new(charge_id));

        debug!(%debited, "debited abstracts");
        Ok(DebitOutcome::charged(debited, ec))
    }

    async fn debit_concretes(
        &self,
        _units: Decimal,
        _event: &ChargingEvent,
    ) -> ChargingResult<DebitOutcome> {
        Err(ChargingError::UnsupportedOperation {
            balance_id: self.balance_id.clone(),
            operation: "debit_concretes",
        })
    }
}
