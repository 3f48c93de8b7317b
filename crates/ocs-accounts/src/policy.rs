//! Policy resolvers
//!
//! Resolve the optional debit policies configured on a balance against a
//! usage event: cost increment override, unit factor and balance limit.
//! None of them mutate anything; absence of a policy is not an error.

use ocs_core::{
    models::{ChargingEvent, CostIncrement, UnitFactor, BALANCE_LIMIT_OPT},
    traits::FilterService,
    ChargingError, ChargingResult,
};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;

/// First cost increment whose filters match the event
pub async fn resolve_cost_increment(
    policies: &[CostIncrement],
    filters: &dyn FilterService,
    event: &ChargingEvent,
) -> ChargingResult<Option<CostIncrement>> {
    for policy in policies {
        if filters.pass(&event.tenant, &policy.filter_ids, event).await? {
            return Ok(Some(policy.clone()));
        }
    }
    Ok(None)
}

/// First unit factor whose filters match the event
///
/// Factors must be strictly positive; anything else is a configuration error.
pub async fn resolve_unit_factor(
    policies: &[UnitFactor],
    filters: &dyn FilterService,
    event: &ChargingEvent,
) -> ChargingResult<Option<UnitFactor>> {
    for policy in policies {
        if filters.pass(&event.tenant, &policy.filter_ids, event).await? {
            if policy.factor <= Decimal::ZERO {
                return Err(ChargingError::InvalidUnitFactor(policy.factor.to_string()));
            }
            return Ok(Some(policy.clone()));
        }
    }
    Ok(None)
}

/// Overdraft floor configured under `*balanceLimit`
pub fn resolve_balance_limit(opts: &HashMap<String, Value>) -> ChargingResult<Option<Decimal>> {
    let value = match opts.get(BALANCE_LIMIT_OPT) {
        None | Some(Value::Null) => return Ok(None),
        Some(value) => value,
    };
    let raw = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        other => return Err(ChargingError::InvalidBalanceLimit(other.to_string())),
    };
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map(Some)
        .map_err(|_| ChargingError::InvalidBalanceLimit(raw))
}

/// Subtract `amount` from `value` without crossing `floor`
///
/// Returns `(removed, new_value)`. Without a floor the full amount is always
/// removed. With a floor, a request reaching or exceeding the room above it
/// exhausts the balance down to the floor.
///
/// A balance already below its floor gives `(0, value)`. It is not pulled up
/// to the floor, since that would report a negative debit; the value stays
/// where it is until a refund or top-up lifts it.
pub fn bounded_subtract(
    value: Decimal,
    amount: Decimal,
    floor: Option<Decimal>,
) -> ChargingResult<(Decimal, Decimal)> {
    let overflow = || ChargingError::Arithmetic(format!("{} - {}", value, amount));
    let floor = match floor {
        None => return Ok((amount, value.checked_sub(amount).ok_or_else(overflow)?)),
        Some(floor) => floor,
    };
    let available = value.checked_sub(floor).ok_or_else(overflow)?;
    if available <= Decimal::ZERO {
        return Ok((Decimal::ZERO, value));
    }
    if available <= amount {
        return Ok((available, floor));
    }
    Ok((amount, value.checked_sub(amount).ok_or_else(overflow)?))
}
