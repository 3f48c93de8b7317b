//! Balance debit engine for the OCS charging engine
//!
//! This crate turns a usage event into balance mutations and an
//! `EventCharges` ledger fragment describing them.
//!
//! # Architecture
//!
//! - Every balance is wrapped in an operator implementing [`BalanceOperator`]
//! - Operators are built by the [`OperatorRegistry`], keyed by balance type
//! - The balance lock is never held across an await point
//! - Abstract usage on concrete balances is priced through a [`RatingBridge`]
//!
//! # Operators
//!
//! - `ConcreteBalance` - monetary balances, debited directly or through rating
//! - `AbstractBalance` - usage balances (free minutes, bytes)
//! - `AccountDebitor` - weight ordered debit across an account's balances

pub mod abstracts;
pub mod account;
pub mod bridge;
pub mod concrete;
pub mod filters;
pub mod operator;
pub mod policy;

pub use abstracts::AbstractBalance;
pub use account::{AccountDebit, AccountDebitError, AccountDebitor};
pub use bridge::{refund_units, BridgeDebit, CostIncrementBridge, RatingBridge};
pub use concrete::ConcreteBalance;
pub use filters::InlineFilters;
pub use operator::{
    BalanceHandle, BalanceOperator, DebitOutcome, OperatorContext, OperatorRegistry,
};

/// Debit engine constants
pub mod constants {
    /// Balance id of the accounting entry joining an abstract debit
    pub const TRANSIENT_ABSTRACT_BALANCE: &str = "*transabstract";

    /// Rate id recorded when a cost increment override priced the usage
    pub const COST_INCREMENT_RATE_ID: &str = "*costIncrement";
}
