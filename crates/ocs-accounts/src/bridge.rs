//! Rating bridge
//!
//! The rating bridge turns abstract usage into a cost and takes that cost
//! from a list of concrete balances. A remote rating service normally sits
//! behind it; [`CostIncrementBridge`] covers the case where a balance carries
//! its own cost increment and no remote rating is needed.

use async_trait::async_trait;
use ocs_core::{
    config::AccountsConfig,
    models::{
        new_charge_id, ChargingEvent, CostIncrement, EventCharges, RateIncrement, RateInterval,
    },
    ChargingError, ChargingResult,
};
use rust_decimal::Decimal;
use tracing::{debug, instrument};

use crate::concrete::ConcreteBalance;
use crate::constants::COST_INCREMENT_RATE_ID;
use crate::operator::{BalanceOperator, DebitOutcome};

/// What the bridge charged
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BridgeDebit {
    /// Fragment whose `abstracts` is the usage actually covered
    pub charges: EventCharges,
    /// Concrete amount taken from the candidates
    pub debited: Decimal,
}

/// Rating and multi-balance debit collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RatingBridge: Send + Sync {
    /// Debit at most `usage` worth of cost from `candidates`, in order
    ///
    /// Insufficient balances are not an error: the returned fragment simply
    /// covers less usage. On error every unit taken by the call is given
    /// back to the candidate it came from.
    #[allow(clippy::too_many_arguments)]
    async fn max_debit_abstracts_from_concretes(
        &self,
        usage: Decimal,
        account_id: &str,
        candidates: &[ConcreteBalance],
        event: &ChargingEvent,
        attribute_ids: &[String],
        rate_profile_ids: &[String],
        cost_increment: Option<CostIncrement>,
    ) -> ChargingResult<BridgeDebit>;
}

/// Rating interval describing a cost increment override
pub(crate) fn cost_increment_interval(
    cost_increment: &CostIncrement,
    usage: Decimal,
    cost: Decimal,
) -> RateInterval {
    RateInterval::single(RateIncrement {
        rate_id: COST_INCREMENT_RATE_ID.to_string(),
        usage,
        increment: cost_increment.increment,
        fixed_fee: cost_increment.fixed_fee,
        recurrent_fee: cost_increment.recurrent_fee,
        cost,
        compress_factor: 1,
    })
}

/// Give back the native units a debit chain took from each candidate
///
/// `taken[i]` belongs to `candidates[i]`. Units are added back, so debits
/// committed on the same balances in the meantime survive the rollback.
pub fn refund_units(candidates: &[ConcreteBalance], taken: &[Decimal]) -> ChargingResult<()> {
    for (candidate, native) in candidates.iter().zip(taken) {
        if !native.is_zero() {
            candidate.refund_units(*native)?;
        }
    }
    Ok(())
}

/// Bridge rating usage with the cost increment override of the balance
pub struct CostIncrementBridge {
    max_iterations: u32,
}

impl CostIncrementBridge {
    pub fn new(max_iterations: u32) -> Self {
        Self { max_iterations }
    }

    pub fn from_config(config: &AccountsConfig) -> Self {
        Self::new(config.max_iterations)
    }
}

#[async_trait]
impl RatingBridge for CostIncrementBridge {
    #[instrument(skip_all, fields(account = %account_id, usage = %usage))]
    async fn max_debit_abstracts_from_concretes(
        &self,
        usage: Decimal,
        account_id: &str,
        candidates: &[ConcreteBalance],
        event: &ChargingEvent,
        _attribute_ids: &[String],
        rate_profile_ids: &[String],
        cost_increment: Option<CostIncrement>,
    ) -> ChargingResult<BridgeDebit> {
        let cost_increment = cost_increment
            .ok_or_else(|| ChargingError::RatingUnavailable(rate_profile_ids.join(",")))?;

        let mut covered = usage;
        for _ in 0..self.max_iterations {
            if covered <= Decimal::ZERO {
                return Ok(BridgeDebit::default());
            }
            let cost = cost_increment.cost_for(covered)?;
            let DebitChain {
                mut charges,
                paid,
                taken,
            } = debit_in_order(cost, candidates, event).await?;
            if paid >= cost {
                let rating_id = new_charge_id();
                charges.rating.insert(
                    rating_id.clone(),
                    cost_increment_interval(&cost_increment, covered, cost),
                );
                for charge in charges.accounting.values_mut() {
                    charge.rating_id = Some(rating_id.clone());
                }
                charges.abstracts = covered;
                return Ok(BridgeDebit {
                    charges,
                    debited: paid,
                });
            }

            refund_units(candidates, &taken)?;
            let affordable = cost_increment.usage_for(paid).unwrap_or(covered);
            covered = if affordable < covered {
                affordable
            } else {
                covered - cost_increment.step()
            };
            debug!(%cost, %paid, %covered, "concretes short, reducing usage");
        }

        Err(ChargingError::MaxIterationsExceeded(self.max_iterations))
    }
}

/// One pass over the candidates
struct DebitChain {
    charges: EventCharges,
    paid: Decimal,
    /// Native units removed, per candidate
    taken: Vec<Decimal>,
}

/// Take `cost` from the candidates in order, skipping rejected ones
///
/// On error every candidate already debited is refunded before returning.
async fn debit_in_order(
    cost: Decimal,
    candidates: &[ConcreteBalance],
    event: &ChargingEvent,
) -> ChargingResult<DebitChain> {
    let mut chain = DebitChain {
        charges: EventCharges::new(),
        paid: Decimal::ZERO,
        taken: vec![Decimal::ZERO; candidates.len()],
    };
    for (idx, candidate) in candidates.iter().enumerate() {
        let remaining = cost - chain.paid;
        if remaining <= Decimal::ZERO {
            break;
        }
        let (outcome, removed) = match candidate.debit_concretes_native(remaining, event).await {
            Ok(debited) => debited,
            Err(err) if err.is_rejection() => {
                debug!(balance = candidate.id(), "filters not passing, skipping balance");
                continue;
            }
            Err(err) => {
                refund_units(candidates, &chain.taken)?;
                return Err(err);
            }
        };
        chain.taken[idx] = removed;
        if let Err(err) = add_outcome(&mut chain, outcome) {
            refund_units(candidates, &chain.taken)?;
            return Err(err);
        }
    }
    Ok(chain)
}

fn add_outcome(chain: &mut DebitChain, outcome: DebitOutcome) -> ChargingResult<()> {
    let paid = chain.paid;
    chain.paid = paid
        .checked_add(outcome.debited)
        .ok_or_else(|| ChargingError::Arithmetic(format!("{} + {}", paid, outcome.debited)))?;
    if let Some(fragment) = outcome.charges {
        chain.charges.merge(fragment)?;
    }
    Ok(())
}
