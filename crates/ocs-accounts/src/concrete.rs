//! Concrete balance operator
//!
//! Operator for `*concrete` balances: monetary or unit stores that are
//! debited directly (`debit_concretes`) or charged for abstract usage through
//! the rating bridge (`debit_abstracts`).

use async_trait::async_trait;
use ocs_core::{
    models::{
        new_charge_id, AccountCharge, Balance, BalanceType, ChargeEntry, ChargingEvent,
        CostIncrement, EventCharges,
    },
    traits::FilterService,
    ChargingError, ChargingResult,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::bridge::{cost_increment_interval, BridgeDebit, RatingBridge};
use crate::constants::TRANSIENT_ABSTRACT_BALANCE;
use crate::operator::{
    ensure_eligible, ensure_non_negative, BalanceHandle, BalanceOperator, DebitOutcome,
    OperatorContext,
};
use crate::policy::{
    bounded_subtract, resolve_balance_limit, resolve_cost_increment, resolve_unit_factor,
};

/// Operator bound to one concrete balance
///
/// Cloning is cheap and clones share the same balance handle.
#[derive(Clone)]
pub struct ConcreteBalance {
    account_id: String,
    balance_id: String,
    balance: BalanceHandle,
    filters: Arc<dyn FilterService>,
    bridge: Arc<dyn RatingBridge>,
}

impl ConcreteBalance {
    pub fn new(account_id: &str, balance: BalanceHandle, ctx: &OperatorContext) -> Self {
        let balance_id = balance.lock().id.clone();
        Self {
            account_id: account_id.to_string(),
            balance_id,
            balance,
            filters: ctx.filters.clone(),
            bridge: ctx.bridge.clone(),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Current unit value
    pub fn units(&self) -> Decimal {
        self.balance.lock().units
    }

    /// Give back native units taken by an earlier debit
    ///
    /// Adds to the current value, so debits committed in between are kept.
    pub fn refund_units(&self, native: Decimal) -> ChargingResult<()> {
        let mut balance = self.balance.lock();
        let current = balance.units;
        balance.units = current
            .checked_add(native)
            .ok_or_else(|| ChargingError::Arithmetic(format!("{} + {}", current, native)))?;
        Ok(())
    }

    /// Debit concrete units and report the native units removed
    ///
    /// Same as [`BalanceOperator::debit_concretes`]; the second value is what
    /// [`ConcreteBalance::refund_units`] needs to undo the debit exactly.
    #[instrument(skip(self, event), fields(balance = %self.balance_id, event_id = %event.id))]
    pub async fn debit_concretes_native(
        &self,
        units: Decimal,
        event: &ChargingEvent,
    ) -> ChargingResult<(DebitOutcome, Decimal)> {
        ensure_non_negative(units)?;
        let cfg = self.config();
        ensure_eligible(self.filters.as_ref(), &cfg.id, &cfg.filter_ids, event).await?;

        let unit_factor = resolve_unit_factor(&cfg.unit_factors, self.filters.as_ref(), event)
            .await?
            .filter(|uf| uf.factor != Decimal::ONE);
        let native = match &unit_factor {
            Some(uf) => units
                .checked_mul(uf.factor)
                .ok_or_else(|| ChargingError::Arithmetic(format!("{} * {}", units, uf.factor)))?,
            None => units,
        };
        let limit = resolve_balance_limit(&cfg.opts)?;

        let (debited, removed) = {
            let mut balance = self.balance.lock();
            let (removed, remaining) = bounded_subtract(balance.units, native, limit)?;
            let debited = match &unit_factor {
                Some(uf) => removed.checked_div(uf.factor).ok_or_else(|| {
                    ChargingError::Arithmetic(format!("{} / {}", removed, uf.factor))
                })?,
                None => removed,
            };
            balance.units = remaining;
            (debited, removed)
        };

        if debited.is_zero() {
            debug!("nothing debited");
            return Ok((DebitOutcome::nothing(), removed));
        }

        let mut ec = EventCharges::new();
        ec.concretes = debited;
        let unit_factor_id = unit_factor.map(|uf| {
            let id = new_charge_id();
            ec.unit_factors.insert(id.clone(), uf);
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
                ..Default::default()
            },
        );
        ec.charges.push(ChargeEntry::new(charge_id));

        debug!(%debited, %removed, "debited concretes");
        Ok((DebitOutcome::charged(debited, ec), removed))
    }

    /// Shared handle, for callers persisting the balance after a debit
    pub fn handle(&self) -> &BalanceHandle {
        &self.balance
    }

    fn config(&self) -> Balance {
        self.balance.lock().clone()
    }
}

#[async_trait]
impl BalanceOperator for ConcreteBalance {
    fn id(&self) -> &str {
        &self.balance_id
    }

    fn balance_type(&self) -> BalanceType {
        BalanceType::Concrete
    }

    #[instrument(skip(self, event), fields(balance = %self.balance_id, event_id = %event.id))]
    async fn debit_abstracts(
        &self,
        usage: Decimal,
        event: &ChargingEvent,
    ) -> ChargingResult<DebitOutcome> {
        ensure_non_negative(usage)?;
        let cfg = self.config();
        ensure_eligible(self.filters.as_ref(), &cfg.id, &cfg.filter_ids, event).await?;

        let cost_increment =
            resolve_cost_increment(&cfg.cost_increments, self.filters.as_ref(), event).await?;

        let BridgeDebit {
            charges: bridged,
            debited,
        } = self
            .bridge
            .max_debit_abstracts_from_concretes(
                usage,
                &self.account_id,
                std::slice::from_ref(self),
                event,
                &cfg.attribute_ids,
                &cfg.rate_profile_ids,
                cost_increment.clone(),
            )
            .await?;

        if bridged.abstracts.is_zero() {
            if !debited.is_zero() {
                warn!(%debited, "rating bridge debited concretes without covering any usage");
            }
            debug!("no usage charged");
            return Ok(DebitOutcome {
                debited,
                charges: None,
            });
        }

        let charges = join_abstract_charges(&self.account_id, bridged, cost_increment.as_ref())?;
        debug!(abstracts = %charges.abstracts, concretes = %charges.concretes, "debited abstracts");
        Ok(DebitOutcome::charged(debited, charges))
    }

    async fn debit_concretes(
        &self,
        units: Decimal,
        event: &ChargingEvent,
    ) -> ChargingResult<DebitOutcome> {
        let (outcome, _) = self.debit_concretes_native(units, event).await?;
        Ok(outcome)
    }
}

/// Fold the bridge fragment under one transient abstract accounting entry
///
/// The bridge's per-balance entries are kept (rating reference cleared) and
/// joined under the new entry, which becomes the only visible charge.
fn join_abstract_charges(
    account_id: &str,
    bridged: EventCharges,
    cost_increment: Option<&CostIncrement>,
) -> ChargingResult<EventCharges> {
    let EventCharges {
        abstracts,
        concretes,
        charges,
        mut accounting,
        mut unit_factors,
        mut rating,
    } = bridged;

    let mut ec = EventCharges::new();
    ec.abstracts = abstracts;
    ec.concretes = concretes;

    let rating_id = match cost_increment {
        Some(ci) => {
            let id = new_charge_id();
            ec.rating
                .insert(id.clone(), cost_increment_interval(ci, abstracts, concretes));
            Some(id)
        }
        None => charges
            .first()
            .and_then(|entry| accounting.get(&entry.charging_id))
            .and_then(|charge| charge.rating_id.clone())
            .and_then(|id| {
                let interval = rating.remove(&id)?;
                ec.rating.insert(id.clone(), interval);
                Some(id)
            }),
    };

    let mut joined = AccountCharge {
        account_id: account_id.to_string(),
        balance_id: TRANSIENT_ABSTRACT_BALANCE.to_string(),
        units: abstracts,
        rating_id,
        ..Default::default()
    };
    for entry in charges {
        if ec.accounting.contains_key(&entry.charging_id) {
            continue;
        }
        let mut charge = accounting.remove(&entry.charging_id).ok_or_else(|| {
            ChargingError::InconsistentCharges(format!(
                "rating bridge charge {} has no accounting entry",
                entry.charging_id
            ))
        })?;
        if let Some(uf_id) = &charge.unit_factor_id {
            if let Some(uf) = unit_factors.remove(uf_id) {
                ec.unit_factors.insert(uf_id.clone(), uf);
            }
        }
        charge.rating_id = None;
        ec.accounting.insert(entry.charging_id.clone(), charge);
        joined.joined_charge_ids.push(entry.charging_id);
    }

    let joined_id = new_charge_id();
    ec.accounting.insert(joined_id.clone(), joined);
    ec.charges = vec![ChargeEntry::new(joined_id)];
    Ok(ec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{CostIncrementBridge, MockRatingBridge};
    use crate::constants::COST_INCREMENT_RATE_ID;
    use crate::filters::InlineFilters;
    use ocs_core::models::{RateIncrement, RateInterval, UnitFactor};
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    fn event() -> ChargingEvent {
        ChargingEvent::new("cgrates.org", "ev1")
            .with_field("Account", "1001")
            .with_field("Destination", "+4917")
    }

    fn operator(balance: Balance, bridge: Arc<dyn RatingBridge>) -> ConcreteBalance {
        let ctx = OperatorContext::new(Arc::new(InlineFilters::new()), bridge);
        ConcreteBalance::new("1001", Arc::new(Mutex::new(balance)), &ctx)
    }

    fn concrete(units: Decimal) -> Balance {
        Balance::new("cb1", BalanceType::Concrete, units)
    }

    fn local_bridge() -> Arc<dyn RatingBridge> {
        Arc::new(CostIncrementBridge::new(100))
    }

    #[tokio::test]
    async fn test_debit_concretes_plain() {
        let cb = operator(concrete(dec!(100)), local_bridge());

        let outcome = cb.debit_concretes(dec!(30), &event()).await.unwrap();

        assert_eq!(outcome.debited, dec!(30));
        assert_eq!(cb.units(), dec!(70));
        assert_eq!(cb.handle().lock().units, dec!(70));
        assert_eq!(cb.account_id(), "1001");
        let ec = outcome.charges.unwrap();
        assert_eq!(ec.concretes, dec!(30));
        assert_eq!(ec.abstracts, dec!(0));
        assert_eq!(ec.charges.len(), 1);
        assert_eq!(ec.charges[0].compress_factor, 1);
        let charge = ec.account_charge(&ec.charges[0]).unwrap();
        assert_eq!(charge.balance_id, "cb1");
        assert_eq!(charge.account_id, "1001");
        assert_eq!(charge.units, dec!(30));
        assert_eq!(charge.balance_limit, None);
        assert!(ec.validate().is_ok());
    }

    #[tokio::test]
    async fn test_debit_concretes_partial_with_limit() {
        let cb = operator(concrete(dec!(10)).with_limit(dec!(-20)), local_bridge());

        let outcome = cb.debit_concretes(dec!(50), &event()).await.unwrap();

        assert_eq!(outcome.debited, dec!(30));
        assert_eq!(cb.units(), dec!(-20));
        let ec = outcome.charges.unwrap();
        let charge = ec.account_charge(&ec.charges[0]).unwrap();
        assert_eq!(charge.balance_limit, Some(dec!(-20)));

        // exhausted, the next debit charges nothing
        let outcome = cb.debit_concretes(dec!(5), &event()).await.unwrap();
        assert_eq!(outcome, DebitOutcome::nothing());
        assert_eq!(cb.units(), dec!(-20));
    }

    #[tokio::test]
    async fn test_debit_concretes_within_limit() {
        let cb = operator(concrete(dec!(10)).with_limit(dec!(-20)), local_bridge());

        let outcome = cb.debit_concretes(dec!(25), &event()).await.unwrap();

        assert_eq!(outcome.debited, dec!(25));
        assert_eq!(cb.units(), dec!(-15));
    }

    #[tokio::test]
    async fn test_debit_concretes_unit_factor() {
        let mut blnc = concrete(dec!(100));
        blnc.unit_factors = vec![UnitFactor {
            filter_ids: vec![],
            factor: dec!(2),
        }];
        let cb = operator(blnc, local_bridge());

        let outcome = cb.debit_concretes(dec!(10), &event()).await.unwrap();

        assert_eq!(outcome.debited, dec!(10));
        assert_eq!(cb.units(), dec!(80));
        let ec = outcome.charges.unwrap();
        let charge = ec.account_charge(&ec.charges[0]).unwrap();
        let uf_id = charge.unit_factor_id.as_ref().unwrap();
        assert_eq!(ec.unit_factors[uf_id].factor, dec!(2));
        assert!(ec.validate().is_ok());
    }

    #[tokio::test]
    async fn test_unit_factor_of_one_is_not_recorded() {
        let mut blnc = concrete(dec!(100));
        blnc.unit_factors = vec![UnitFactor {
            filter_ids: vec![],
            factor: dec!(1.00),
        }];
        let cb = operator(blnc, local_bridge());

        let ec = cb
            .debit_concretes(dec!(10), &event())
            .await
            .unwrap()
            .charges
            .unwrap();
        assert!(ec.unit_factors.is_empty());
        assert_eq!(ec.account_charge(&ec.charges[0]).unwrap().unit_factor_id, None);
    }

    #[tokio::test]
    async fn test_debit_concretes_zero() {
        let cb = operator(concrete(dec!(100)), local_bridge());

        let outcome = cb.debit_concretes(dec!(0), &event()).await.unwrap();

        assert_eq!(outcome, DebitOutcome::nothing());
        assert_eq!(cb.units(), dec!(100));
    }

    #[tokio::test]
    async fn test_filter_reject_leaves_balance() {
        let mut blnc = concrete(dec!(100));
        blnc.filter_ids = vec!["*string:~*req.Account:2002".to_string()];
        let cb = operator(blnc, local_bridge());

        let err = cb.debit_concretes(dec!(10), &event()).await.unwrap_err();
        assert!(err.is_rejection());
        let err = cb.debit_abstracts(dec!(10), &event()).await.unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(cb.units(), dec!(100));
    }

    #[tokio::test]
    async fn test_malformed_limit_leaves_balance() {
        let mut blnc = concrete(dec!(100));
        blnc.opts.insert(
            ocs_core::models::BALANCE_LIMIT_OPT.to_string(),
            serde_json::json!(true),
        );
        let cb = operator(blnc, local_bridge());

        assert!(matches!(
            cb.debit_concretes(dec!(10), &event()).await,
            Err(ChargingError::InvalidBalanceLimit(_))
        ));
        assert_eq!(cb.units(), dec!(100));
    }

    #[tokio::test]
    async fn test_below_floor_gives_nothing() {
        let cb = operator(concrete(dec!(-25)).with_limit(dec!(-20)), local_bridge());

        let outcome = cb.debit_concretes(dec!(5), &event()).await.unwrap();

        // stays below the floor instead of being lifted to it
        assert_eq!(outcome, DebitOutcome::nothing());
        assert_eq!(cb.units(), dec!(-25));
    }

    #[tokio::test]
    async fn test_empty_tenant_rejected() {
        let cb = operator(concrete(dec!(100)), local_bridge());
        let mut ev = event();
        ev.tenant = " ".to_string();

        let err = cb.debit_concretes(dec!(10), &ev).await.unwrap_err();
        assert_eq!(err.error_code(), "invalid_event");
        assert!(!err.is_rejection());
        let err = cb.debit_abstracts(dec!(10), &ev).await.unwrap_err();
        assert_eq!(err.error_code(), "invalid_event");
        assert_eq!(cb.units(), dec!(100));
    }

    #[tokio::test]
    async fn test_negative_quantity_rejected() {
        let cb = operator(concrete(dec!(100)), local_bridge());
        assert!(matches!(
            cb.debit_concretes(dec!(-1), &event()).await,
            Err(ChargingError::InvalidUsage(_))
        ));
    }

    #[tokio::test]
    async fn test_debit_abstracts_with_cost_increment() {
        let mut blnc = concrete(dec!(10));
        blnc.cost_increments = vec![CostIncrement {
            increment: Some(dec!(60)),
            recurrent_fee: Some(dec!(0.5)),
            ..Default::default()
        }];
        let cb = operator(blnc, local_bridge());

        let outcome = cb.debit_abstracts(dec!(120), &event()).await.unwrap();

        assert_eq!(outcome.debited, dec!(1));
        assert_eq!(cb.units(), dec!(9));
        let ec = outcome.charges.unwrap();
        assert_eq!(ec.abstracts, dec!(120));
        assert_eq!(ec.concretes, dec!(1));
        assert_eq!(ec.charges.len(), 1);

        let top = ec.account_charge(&ec.charges[0]).unwrap();
        assert_eq!(top.balance_id, TRANSIENT_ABSTRACT_BALANCE);
        assert_eq!(top.units, dec!(120));
        assert_eq!(top.joined_charge_ids.len(), 1);
        let rating = &ec.rating[top.rating_id.as_ref().unwrap()];
        assert_eq!(rating.increments[0].rate_id, COST_INCREMENT_RATE_ID);
        assert_eq!(rating.increments[0].recurrent_fee, Some(dec!(0.5)));

        let joined = &ec.accounting[&top.joined_charge_ids[0]];
        assert_eq!(joined.balance_id, "cb1");
        assert_eq!(joined.units, dec!(1));
        assert_eq!(joined.rating_id, None);
        assert!(ec.validate().is_ok());
    }

    #[tokio::test]
    async fn test_debit_abstracts_copies_bridge_rating() {
        let mut bridge = MockRatingBridge::new();
        bridge
            .expect_max_debit_abstracts_from_concretes()
            .withf(|usage, account_id, candidates, _, _, _, ci| {
                *usage == dec!(30) && account_id == "1001" && candidates.len() == 1 && ci.is_none()
            })
            .times(1)
            .returning(|_, _, _, _, _, _, _| {
                let mut ec = EventCharges::new();
                ec.abstracts = dec!(30);
                ec.concretes = dec!(3);
                ec.rating.insert(
                    "r1".to_string(),
                    RateInterval::single(RateIncrement {
                        rate_id: "RT_STANDARD".to_string(),
                        usage: dec!(30),
                        cost: dec!(3),
                        compress_factor: 1,
                        ..Default::default()
                    }),
                );
                ec.unit_factors.insert(
                    "uf1".to_string(),
                    UnitFactor {
                        filter_ids: vec![],
                        factor: dec!(100),
                    },
                );
                ec.accounting.insert(
                    "c1".to_string(),
                    AccountCharge {
                        account_id: "1001".to_string(),
                        balance_id: "cb1".to_string(),
                        units: dec!(3),
                        unit_factor_id: Some("uf1".to_string()),
                        rating_id: Some("r1".to_string()),
                        ..Default::default()
                    },
                );
                ec.charges.push(ChargeEntry::new("c1"));
                Ok(BridgeDebit {
                    charges: ec,
                    debited: dec!(3),
                })
            });
        let cb = operator(concrete(dec!(10)), Arc::new(bridge));

        let outcome = cb.debit_abstracts(dec!(30), &event()).await.unwrap();

        assert_eq!(outcome.debited, dec!(3));
        let ec = outcome.charges.unwrap();
        let top = ec.account_charge(&ec.charges[0]).unwrap();
        assert_eq!(top.rating_id.as_deref(), Some("r1"));
        assert_eq!(top.joined_charge_ids, vec!["c1".to_string()]);
        assert_eq!(ec.rating["r1"].increments[0].rate_id, "RT_STANDARD");
        assert_eq!(ec.unit_factors["uf1"].factor, dec!(100));
        assert_eq!(ec.accounting["c1"].rating_id, None);
        assert!(ec.validate().is_ok());
    }

    #[tokio::test]
    async fn test_debit_abstracts_zero_usage() {
        let mut bridge = MockRatingBridge::new();
        bridge
            .expect_max_debit_abstracts_from_concretes()
            .times(1)
            .returning(|_, _, _, _, _, _, _| Ok(BridgeDebit::default()));
        let cb = operator(concrete(dec!(10)), Arc::new(bridge));

        let outcome = cb.debit_abstracts(dec!(0), &event()).await.unwrap();

        assert_eq!(outcome, DebitOutcome::nothing());
        assert_eq!(cb.units(), dec!(10));
    }

    #[tokio::test]
    async fn test_debit_abstracts_bridge_error_propagates() {
        let mut bridge = MockRatingBridge::new();
        bridge
            .expect_max_debit_abstracts_from_concretes()
            .returning(|_, _, _, _, _, _, _| Err(ChargingError::Rating("RateS down".to_string())));
        let cb = operator(concrete(dec!(10)), Arc::new(bridge));

        assert_eq!(
            cb.debit_abstracts(dec!(60), &event()).await.unwrap_err(),
            ChargingError::Rating("RateS down".to_string())
        );
        assert_eq!(cb.units(), dec!(10));
    }

    #[tokio::test]
    async fn test_debit_abstracts_dangling_bridge_charge() {
        let mut bridge = MockRatingBridge::new();
        bridge
            .expect_max_debit_abstracts_from_concretes()
            .returning(|_, _, _, _, _, _, _| {
                let mut ec = EventCharges::new();
                ec.abstracts = dec!(1);
                ec.charges.push(ChargeEntry::new("ghost"));
                Ok(BridgeDebit {
                    charges: ec,
                    debited: dec!(0),
                })
            });
        let cb = operator(concrete(dec!(10)), Arc::new(bridge));

        assert!(matches!(
            cb.debit_abstracts(dec!(1), &event()).await,
            Err(ChargingError::InconsistentCharges(_))
        ));
    }
}
