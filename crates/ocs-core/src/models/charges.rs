//! EventCharges ledger
//!
//! One debit call produces one `EventCharges` fragment. The fragment links
//! the externally visible charge entries to accounting records, and those in
//! turn to the rating intervals and unit factors that explain them.
//! Fragments coming from independent debits are combined with
//! [`EventCharges::merge`].

use crate::models::UnitFactor;
use crate::{ChargingError, ChargingResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Generate a fresh identifier for accounting, rating or unit factor records
pub fn new_charge_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Externally visible charge event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeEntry {
    #[serde(rename = "ChargingID")]
    pub charging_id: String,

    #[serde(rename = "CompressFactor")]
    pub compress_factor: u64,
}

impl ChargeEntry {
    pub fn new(charging_id: impl Into<String>) -> Self {
        Self {
            charging_id: charging_id.into(),
            compress_factor: 1,
        }
    }
}

/// Accounting record of units taken from one balance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountCharge {
    #[serde(rename = "AccountID")]
    pub account_id: String,

    #[serde(rename = "BalanceID")]
    pub balance_id: String,

    #[serde(rename = "Units")]
    pub units: Decimal,

    /// Overdraft floor in force when the debit happened
    #[serde(rename = "BalanceLimit", skip_serializing_if = "Option::is_none", default)]
    pub balance_limit: Option<Decimal>,

    #[serde(rename = "UnitFactorID", skip_serializing_if = "Option::is_none", default)]
    pub unit_factor_id: Option<String>,

    #[serde(rename = "RatingID", skip_serializing_if = "Option::is_none", default)]
    pub rating_id: Option<String>,

    #[serde(rename = "JoinedChargeIDs", skip_serializing_if = "Vec::is_empty", default)]
    pub joined_charge_ids: Vec<String>,
}

/// One step of a rate interval
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateIncrement {
    #[serde(rename = "RateID")]
    pub rate_id: String,

    #[serde(rename = "Usage")]
    pub usage: Decimal,

    #[serde(rename = "Increment", skip_serializing_if = "Option::is_none", default)]
    pub increment: Option<Decimal>,

    #[serde(rename = "FixedFee", skip_serializing_if = "Option::is_none", default)]
    pub fixed_fee: Option<Decimal>,

    #[serde(rename = "RecurrentFee", skip_serializing_if = "Option::is_none", default)]
    pub recurrent_fee: Option<Decimal>,

    #[serde(rename = "Cost")]
    pub cost: Decimal,

    #[serde(rename = "CompressFactor")]
    pub compress_factor: u64,
}

/// How the cost of a debit was computed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateInterval {
    #[serde(rename = "Increments")]
    pub increments: Vec<RateIncrement>,

    #[serde(rename = "CompressFactor")]
    pub compress_factor: u64,
}

impl RateInterval {
    /// Interval made of a single increment
    pub fn single(increment: RateIncrement) -> Self {
        Self {
            increments: vec![increment],
            compress_factor: 1,
        }
    }
}

/// Ledger fragment of one debit call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventCharges {
    #[serde(rename = "Abstracts")]
    pub abstracts: Decimal,

    #[serde(rename = "Concretes")]
    pub concretes: Decimal,

    #[serde(rename = "Charges", default)]
    pub charges: Vec<ChargeEntry>,

    #[serde(rename = "Accounting", default)]
    pub accounting: HashMap<String, AccountCharge>,

    #[serde(rename = "UnitFactors", default)]
    pub unit_factors: HashMap<String, UnitFactor>,

    #[serde(rename = "Rating", default)]
    pub rating: HashMap<String, RateInterval>,
}

impl EventCharges {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when nothing was charged
    pub fn is_empty(&self) -> bool {
        self.charges.is_empty() && self.abstracts.is_zero() && self.concretes.is_zero()
    }

    /// Accounting record behind a charge entry
    pub fn account_charge(&self, entry: &ChargeEntry) -> Option<&AccountCharge> {
        self.accounting.get(&entry.charging_id)
    }

    /// Merge another fragment into this one
    ///
    /// Totals are summed and charge entries appended in order. Identifiers of
    /// the incoming fragment that already exist here are replaced by fresh
    /// ones, and every reference to them is rewritten. On overflow of the
    /// totals nothing is merged.
    pub fn merge(&mut self, other: EventCharges) -> ChargingResult<()> {
        let EventCharges {
            abstracts,
            concretes,
            charges,
            accounting,
            unit_factors,
            rating,
        } = other;

        let total_abstracts = self.abstracts.checked_add(abstracts).ok_or_else(|| {
            ChargingError::Arithmetic(format!("{} + {}", self.abstracts, abstracts))
        })?;
        let total_concretes = self.concretes.checked_add(concretes).ok_or_else(|| {
            ChargingError::Arithmetic(format!("{} + {}", self.concretes, concretes))
        })?;
        self.abstracts = total_abstracts;
        self.concretes = total_concretes;

        let rating_ids = free_ids(&self.rating, rating.keys());
        let unit_factor_ids = free_ids(&self.unit_factors, unit_factors.keys());
        let accounting_ids = free_ids(&self.accounting, accounting.keys());

        for (id, interval) in rating {
            let id = rating_ids.get(&id).cloned().unwrap_or(id);
            self.rating.insert(id, interval);
        }
        for (id, factor) in unit_factors {
            let id = unit_factor_ids.get(&id).cloned().unwrap_or(id);
            self.unit_factors.insert(id, factor);
        }
        for (id, mut charge) in accounting {
            let id = accounting_ids.get(&id).cloned().unwrap_or(id);
            rename(&mut charge.rating_id, &rating_ids);
            rename(&mut charge.unit_factor_id, &unit_factor_ids);
            for joined in charge.joined_charge_ids.iter_mut() {
                if let Some(renamed) = accounting_ids.get(joined.as_str()) {
                    *joined = renamed.clone();
                }
            }
            self.accounting.insert(id, charge);
        }
        self.charges.extend(charges.into_iter().map(|mut entry| {
            if let Some(renamed) = accounting_ids.get(&entry.charging_id) {
                entry.charging_id = renamed.clone();
            }
            entry
        }));
        Ok(())
    }

    /// Check the referential integrity of the fragment
    pub fn validate(&self) -> ChargingResult<()> {
        for entry in &self.charges {
            if !self.accounting.contains_key(&entry.charging_id) {
                return Err(ChargingError::InconsistentCharges(format!(
                    "charge {} has no accounting entry",
                    entry.charging_id
                )));
            }
        }
        for (id, charge) in &self.accounting {
            if let Some(rating_id) = &charge.rating_id {
                if !self.rating.contains_key(rating_id) {
                    return Err(ChargingError::InconsistentCharges(format!(
                        "accounting {} references missing rating {}",
                        id, rating_id
                    )));
                }
            }
            if let Some(uf_id) = &charge.unit_factor_id {
                if !self.unit_factors.contains_key(uf_id) {
                    return Err(ChargingError::InconsistentCharges(format!(
                        "accounting {} references missing unit factor {}",
                        id, uf_id
                    )));
                }
            }
            if let Some(joined) = charge
                .joined_charge_ids
                .iter()
                .find(|joined| !self.accounting.contains_key(*joined))
            {
                return Err(ChargingError::InconsistentCharges(format!(
                    "accounting {} joins missing charge {}",
                    id, joined
                )));
            }
        }
        Ok(())
    }
}

/// Map every incoming id that collides with `existing` to a fresh one
fn free_ids<'a, V>(
    existing: &HashMap<String, V>,
    incoming: impl Iterator<Item = &'a String>,
) -> HashMap<String, String> {
    incoming
        .filter(|id| existing.contains_key(*id))
        .map(|id| {
            let mut fresh = new_charge_id();
            while existing.contains_key(&fresh) {
                fresh = new_charge_id();
            }
            (id.clone(), fresh)
        })
        .collect()
}

fn rename(reference: &mut Option<String>, renamed: &HashMap<String, String>) {
    if let Some(id) = reference {
        if let Some(fresh) = renamed.get(id.as_str()) {
            *id = fresh.clone();
        }
    }
}
