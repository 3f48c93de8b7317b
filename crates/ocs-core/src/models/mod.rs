//! Domain models for the charging engine
//!
//! This module contains the balance configuration, the usage event a debit
//! is evaluated against, and the `EventCharges` ledger produced by a debit.

pub mod balance;
pub mod charges;
pub mod event;

pub use balance::{Balance, BalanceType, CostIncrement, UnitFactor, BALANCE_LIMIT_OPT};
pub use charges::{
    new_charge_id, AccountCharge, ChargeEntry, EventCharges, RateIncrement, RateInterval,
};
pub use event::ChargingEvent;
