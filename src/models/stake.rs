use bigdecimal::BigDecimal;
use num_traits::{One, Zero};
use serde::Serialize;

use crate::utils::checked_div;

/// A reward cut as configured (`raw`) and as actually felt by delegators (`effective`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CutPair {
    /// Fraction of rewards the indexer keeps, 0..=1
    pub raw: BigDecimal,
    /// `None` when the indexer has no delegation
    pub effective: Option<BigDecimal>,
}

impl CutPair {
    /// Effective cut = 1 - (1 - raw) * (self + delegated) / delegated.
    ///
    /// Negative values are meaningful (the indexer subsidizes delegators) and kept.
    pub fn new(raw: BigDecimal, self_stake: &BigDecimal, delegated_stake: &BigDecimal) -> Self {
        let total = self_stake + delegated_stake;
        let delegator_part = (BigDecimal::one() - &raw) * total;
        let effective = checked_div(&delegator_part, delegated_stake)
            .map(|share| BigDecimal::one() - share);
        Self { raw, effective }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RewardCuts {
    pub indexing: CutPair,
    pub query_fee: CutPair,
}

/// Point-in-time stake figures of one indexer (one per indexer per run).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StakeSnapshot {
    pub indexer_address: String,
    pub self_stake: BigDecimal,
    pub delegated_stake: BigDecimal,
    pub allocated_stake: BigDecimal,
    pub delegation_capacity: BigDecimal,
    /// Total shares issued by the indexer's delegation pool
    pub delegator_shares: BigDecimal,
    pub reward_cuts: RewardCuts,
}

impl StakeSnapshot {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        indexer_address: String,
        self_stake: BigDecimal,
        delegated_stake: BigDecimal,
        allocated_stake: BigDecimal,
        delegation_capacity: BigDecimal,
        delegator_shares: BigDecimal,
        indexing_cut: BigDecimal,
        query_fee_cut: BigDecimal,
    ) -> Self {
        let reward_cuts = RewardCuts {
            indexing: CutPair::new(indexing_cut, &self_stake, &delegated_stake),
            query_fee: CutPair::new(query_fee_cut, &self_stake, &delegated_stake),
        };

        Self {
            indexer_address,
            self_stake,
            delegated_stake,
            allocated_stake,
            delegation_capacity,
            delegator_shares,
            reward_cuts,
        }
    }

    /// Self stake plus delegated stake.
    pub fn total_stake(&self) -> BigDecimal {
        &self.self_stake + &self.delegated_stake
    }

    /// Delegation the indexer can still accept before hitting capacity (never negative).
    pub fn remaining_delegation_capacity(&self) -> BigDecimal {
        let remaining = &self.delegation_capacity - &self.delegated_stake;
        if remaining < BigDecimal::zero() {
            BigDecimal::zero()
        } else {
            remaining
        }
    }

    /// Token value of `shares` in this indexer's delegation pool.
    pub fn share_value(&self, shares: &BigDecimal) -> BigDecimal {
        checked_div(&(shares * &self.delegated_stake), &self.delegator_shares)
            .unwrap_or_else(BigDecimal::zero)
    }
}

/// Current totals of a subgraph deployment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentState {
    pub deployment_id: String,
    pub ipfs_hash: String,
    pub subgraph_id: Option<String>,
    pub signalled_tokens: BigDecimal,
    pub staked_tokens: BigDecimal,
}

/// Network-wide parameters needed for reward rates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkState {
    /// GRT issued per block
    pub issuance_per_block: BigDecimal,
    pub total_tokens_signalled: BigDecimal,
    pub total_tokens_allocated: BigDecimal,
    pub delegation_ratio: u32,
    pub current_epoch: i64,
}

impl NetworkState {
    pub fn issuance_per_period(&self, blocks_per_period: u64) -> BigDecimal {
        &self.issuance_per_block * BigDecimal::from(blocks_per_period)
    }

    /// Network average indexing reward per allocated token per period.
    ///
    /// `None` when nothing is allocated network-wide.
    pub fn average_reward_rate(&self, blocks_per_period: u64) -> Option<BigDecimal> {
        checked_div(&self.issuance_per_period(blocks_per_period), &self.total_tokens_allocated)
    }
}

/// A delegator's current share count in one indexer's pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DelegationHolding {
    pub delegator_address: String,
    pub indexer_address: String,
    pub shares: BigDecimal,
    /// Lifetime delegated minus undelegated tokens, floored at zero
    pub principal: BigDecimal,
}
