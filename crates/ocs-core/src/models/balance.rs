//! Balance model
//!
//! A balance is a typed store of units owned by one account, together with
//! the policies that shape how it is debited.

use crate::{ChargingError, ChargingResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Option key holding the overdraft floor of a balance
pub const BALANCE_LIMIT_OPT: &str = "*balanceLimit";

/// Balance type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BalanceType {
    /// Monetary or unit store debited directly
    #[default]
    #[serde(rename = "*concrete")]
    Concrete,
    /// Usage store (free minutes, bytes) debited in abstract units
    #[serde(rename = "*abstract")]
    Abstract,
}

impl fmt::Display for BalanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceType::Concrete => write!(f, "*concrete"),
            BalanceType::Abstract => write!(f, "*abstract"),
        }
    }
}

impl BalanceType {
    /// Parse from the wire name
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "*concrete" => Some(BalanceType::Concrete),
            "*abstract" => Some(BalanceType::Abstract),
            _ => None,
        }
    }
}

/// Fixed/recurrent fee override applied instead of normal rating
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostIncrement {
    #[serde(rename = "FilterIDs", default)]
    pub filter_ids: Vec<String>,

    #[serde(rename = "Increment", default)]
    pub increment: Option<Decimal>,

    #[serde(rename = "FixedFee", default)]
    pub fixed_fee: Option<Decimal>,

    #[serde(rename = "RecurrentFee", default)]
    pub recurrent_fee: Option<Decimal>,
}

impl CostIncrement {
    /// Usage step, one unit when not configured
    pub fn step(&self) -> Decimal {
        match self.increment {
            Some(step) if step > Decimal::ZERO => step,
            _ => Decimal::ONE,
        }
    }

    /// Cost of a usage quantity
    ///
    /// `fixed_fee + recurrent_fee * ceil(usage / increment)`; zero usage is free.
    pub fn cost_for(&self, usage: Decimal) -> ChargingResult<Decimal> {
        if usage <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }
        let steps = usage
            .checked_div(self.step())
            .ok_or_else(|| ChargingError::Arithmetic(format!("{} / {}", usage, self.step())))?
            .ceil();
        let recurrent = self.recurrent_fee.unwrap_or(Decimal::ZERO);
        recurrent
            .checked_mul(steps)
            .and_then(|r| r.checked_add(self.fixed_fee.unwrap_or(Decimal::ZERO)))
            .ok_or_else(|| ChargingError::Arithmetic(format!("{} * {}", recurrent, steps)))
    }

    /// Largest usage, in whole increments, whose cost fits into `amount`
    ///
    /// Returns `None` when the cost does not grow with usage, or when the
    /// usage does not fit into a decimal.
    pub fn usage_for(&self, amount: Decimal) -> Option<Decimal> {
        let fixed = self.fixed_fee.unwrap_or(Decimal::ZERO);
        if amount < fixed || amount <= Decimal::ZERO {
            return Some(Decimal::ZERO);
        }
        let recurrent = self.recurrent_fee.unwrap_or(Decimal::ZERO);
        if recurrent <= Decimal::ZERO {
            return None;
        }
        amount
            .checked_sub(fixed)?
            .checked_div(recurrent)?
            .floor()
            .checked_mul(self.step())
    }
}

/// Multiplicative conversion between external and native units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitFactor {
    #[serde(rename = "FilterIDs", default)]
    pub filter_ids: Vec<String>,

    #[serde(rename = "Factor")]
    pub factor: Decimal,
}

/// Balance entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "Type", default)]
    pub balance_type: BalanceType,

    /// Ordering among the balances of one account (higher debits first)
    #[serde(rename = "Weight", default)]
    pub weight: Decimal,

    #[serde(rename = "Units")]
    pub units: Decimal,

    #[serde(rename = "FilterIDs", default)]
    pub filter_ids: Vec<String>,

    #[serde(rename = "CostIncrements", default)]
    pub cost_increments: Vec<CostIncrement>,

    #[serde(rename = "UnitFactors", default)]
    pub unit_factors: Vec<UnitFactor>,

    #[serde(rename = "Opts", default)]
    pub opts: HashMap<String, Value>,

    #[serde(rename = "AttributeIDs", default)]
    pub attribute_ids: Vec<String>,

    #[serde(rename = "RateProfileIDs", default)]
    pub rate_profile_ids: Vec<String>,
}

impl Balance {
    /// Create a balance of the given type holding `units`
    pub fn new(id: impl Into<String>, balance_type: BalanceType, units: Decimal) -> Self {
        Self {
            id: id.into(),
            balance_type,
            units,
            ..Default::default()
        }
    }

    /// Builder-style overdraft floor
    pub fn with_limit(mut self, limit: Decimal) -> Self {
        self.opts
            .insert(BALANCE_LIMIT_OPT.to_string(), Value::String(limit.to_string()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_cost_for_rounds_up_to_increment() {
        let ci = CostIncrement {
            increment: Some(dec!(60)),
            fixed_fee: Some(dec!(0.10)),
            recurrent_fee: Some(dec!(0.50)),
            ..Default::default()
        };

        assert_eq!(ci.cost_for(dec!(60)).unwrap(), dec!(0.60));
        // 61s = two increments
        assert_eq!(ci.cost_for(dec!(61)).unwrap(), dec!(1.10));
        assert_eq!(ci.cost_for(dec!(0)).unwrap(), dec!(0));
    }

    #[test]
    fn test_usage_for_inverts_cost() {
        let ci = CostIncrement {
            increment: Some(dec!(60)),
            fixed_fee: Some(dec!(0.10)),
            recurrent_fee: Some(dec!(0.50)),
            ..Default::default()
        };

        assert_eq!(ci.usage_for(dec!(1.10)), Some(dec!(120)));
        assert_eq!(ci.usage_for(dec!(1.09)), Some(dec!(60)));
        assert_eq!(ci.usage_for(dec!(0.05)), Some(dec!(0)));

        let flat = CostIncrement {
            fixed_fee: Some(dec!(1)),
            ..Default::default()
        };
        assert_eq!(flat.usage_for(dec!(2)), None);

        let tiny = CostIncrement {
            recurrent_fee: Some(Decimal::new(1, 28)),
            ..Default::default()
        };
        assert_eq!(tiny.usage_for(Decimal::MAX), None);
    }

    #[test]
    fn test_balance_type_wire_names() {
        assert_eq!(BalanceType::from_str("*abstract"), Some(BalanceType::Abstract));
        assert_eq!(BalanceType::from_str("*monetary"), None);
        assert_eq!(BalanceType::Concrete.to_string(), "*concrete");
    }

    #[test]
    fn test_balance_json_shape() {
        let blnc: Balance = serde_json::from_str(
            r#"{"ID":"cb1","Type":"*concrete","Units":"10.5","Opts":{"*balanceLimit":-20}}"#,
        )
        .unwrap();
        assert_eq!(blnc.units, dec!(10.5));
        assert_eq!(blnc.balance_type, BalanceType::Concrete);
        assert!(blnc.opts.contains_key(BALANCE_LIMIT_OPT));
    }

    #[test]
    fn test_with_limit() {
        let blnc = Balance::new("cb1", BalanceType::Concrete, dec!(10)).with_limit(dec!(-20));
        assert_eq!(
            blnc.opts.get(BALANCE_LIMIT_OPT),
            Some(&Value::String("-20".to_string()))
        );
    }
}
