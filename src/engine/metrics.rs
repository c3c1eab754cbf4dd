//! Derived per-entity figures: reward rates, APR, allocation health and delegator profit.
//!
//! All figures are exact `BigDecimal` arithmetic. Ratios multiply before they divide so
//! that terminating results stay exact.

use std::collections::{BTreeMap, HashMap};

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use log::debug;
use num_traits::{Signed, Zero};

use crate::config::AnalysisSettings;
use crate::error::{ReportError, Result};
use crate::models::{
    AllocationEvent, DelegationEvent, DelegationHolding, DelegationKind, DelegatorMetrics,
    DeploymentState, IndexerMetrics, MetricValue, NetworkState, PositionMetrics, RewardSplit,
    StakeSnapshot, ThawStatus, ThawingTokens, UnallocatedStake,
};
use crate::utils::{checked_div, checked_percent, clamp_non_negative};

/// Knobs the metrics need from configuration.
#[derive(Debug, Clone)]
pub struct MetricsParams {
    pub blocks_per_period: u64,
    pub periods_per_year: u64,
    /// Percent
    pub unallocated_threshold: BigDecimal,
    pub default_thawing_period: Duration,
}

impl MetricsParams {
    pub fn from_settings(settings: &AnalysisSettings) -> Self {
        Self {
            blocks_per_period: settings.blocks_per_period,
            periods_per_year: settings.periods_per_year,
            unallocated_threshold: BigDecimal::from(settings.unallocated_warning_threshold),
            default_thawing_period: settings.thawing_period(),
        }
    }
}

impl Default for MetricsParams {
    fn default() -> Self {
        Self::from_settings(&AnalysisSettings::default())
    }
}

// ============================================
// Allocation Health
// ============================================

pub fn is_over_allocated(snapshot: &StakeSnapshot) -> bool {
    snapshot.allocated_stake > snapshot.total_stake()
}

/// Unallocated percentage of `total` given `allocated`, floored at zero.
///
/// `None` when the indexer has no stake at all.
pub fn unallocated_percent(total: &BigDecimal, allocated: &BigDecimal) -> Option<BigDecimal> {
    checked_percent(&(total - allocated), total).map(clamp_non_negative)
}

pub fn unallocated_ratio(snapshot: &StakeSnapshot) -> Option<BigDecimal> {
    unallocated_percent(&snapshot.total_stake(), &snapshot.allocated_stake)
}

/// Unallocated stake flagged against `threshold` (percent, exclusive).
pub fn unallocated_stake(
    total: &BigDecimal,
    allocated: &BigDecimal,
    threshold: &BigDecimal,
) -> Option<UnallocatedStake> {
    unallocated_percent(total, allocated).map(|ratio| UnallocatedStake {
        warning: &ratio > threshold,
        ratio,
    })
}

pub fn unallocated_warning(snapshot: &StakeSnapshot, threshold: &BigDecimal) -> Option<UnallocatedStake> {
    unallocated_stake(&snapshot.total_stake(), &snapshot.allocated_stake, threshold)
}

// ============================================
// Rewards
// ============================================

/// Expected indexing rewards per period for `allocations`.
///
/// Each allocation earns the deployment's share of issuance (by signal) scaled by the
/// allocation's share of the deployment's stake. Terms with a zero denominator or an
/// unknown deployment contribute nothing.
pub fn indexer_reward_rate(
    allocations: &[AllocationEvent],
    deployments: &HashMap<String, DeploymentState>,
    network: &NetworkState,
    blocks_per_period: u64,
) -> BigDecimal {
    let issuance = network.issuance_per_period(blocks_per_period);

    allocations
        .iter()
        .filter(|a| !a.is_closed())
        .filter_map(|a| {
            let Some(deployment) = deployments.get(&a.subgraph_deployment_id) else {
                debug!("No deployment state for {}", a.subgraph_deployment_id);
                return None;
            };
            let numerator = &issuance * &deployment.signalled_tokens * &a.tokens_allocated;
            let denominator = &network.total_tokens_signalled * &deployment.staked_tokens;
            checked_div(&numerator, &denominator)
        })
        .fold(BigDecimal::zero(), |acc, term| acc + term)
}

/// Reward rate per allocated token, `None` for an indexer with nothing allocated.
pub fn rate_per_token(reward_rate: &BigDecimal, allocated: &BigDecimal) -> Option<BigDecimal> {
    checked_div(reward_rate, allocated)
}

/// Indexer per-token reward rate as a percentage of the network average.
pub fn reward_proportion(
    indexer_rate_per_token: &BigDecimal,
    network_average: Option<&BigDecimal>,
) -> Result<BigDecimal> {
    network_average
        .and_then(|average| checked_percent(indexer_rate_per_token, average))
        .ok_or_else(|| ReportError::MissingBaseline {
            metric: "reward_proportion".to_string(),
        })
}

/// Split `total` rewards into the indexer's cut and the delegators' remainder.
///
/// `indexing_cut` is the fraction the indexer keeps (0..=1).
pub fn reward_split(total: &BigDecimal, indexing_cut: &BigDecimal) -> RewardSplit {
    let indexer = total * indexing_cut;
    RewardSplit {
        delegators: total - &indexer,
        indexer,
        total: total.clone(),
    }
}

/// Rewards of the indexer's allocations closed at or after `since`, split by its indexing cut.
pub fn window_rewards(snapshot: &StakeSnapshot, allocations: &[AllocationEvent], since: DateTime<Utc>) -> RewardSplit {
    let total = allocations
        .iter()
        .filter(|a| a.indexer_address == snapshot.indexer_address)
        .filter(|a| a.closed_at.is_some_and(|closed| closed >= since))
        .fold(BigDecimal::zero(), |acc, a| acc + &a.indexing_rewards);
    reward_split(&total, &snapshot.reward_cuts.indexing.raw)
}

/// Annualized return on the indexer's total stake, in percent. Zero for an unstaked indexer.
pub fn instant_apr(reward_rate: &BigDecimal, snapshot: &StakeSnapshot, periods_per_year: u64) -> BigDecimal {
    let yearly = reward_rate * BigDecimal::from(periods_per_year) * BigDecimal::from(100);
    checked_div(&yearly, &snapshot.total_stake()).unwrap_or_else(BigDecimal::zero)
}

/// Full metric set for one indexer plus the warnings raised computing it.
///
/// `since` bounds the collected rewards to the report window.
pub fn indexer_metrics(
    snapshot: &StakeSnapshot,
    allocations: &[AllocationEvent],
    deployments: &HashMap<String, DeploymentState>,
    network: Option<&NetworkState>,
    since: DateTime<Utc>,
    params: &MetricsParams,
) -> (IndexerMetrics, Vec<ReportError>) {
    let mut warnings = Vec::new();
    let active: Vec<AllocationEvent> = allocations
        .iter()
        .filter(|a| !a.is_closed() && a.indexer_address == snapshot.indexer_address)
        .cloned()
        .collect();

    let reward_rate = network
        .map(|n| indexer_reward_rate(&active, deployments, n, params.blocks_per_period))
        .unwrap_or_else(BigDecimal::zero);

    let network_average = network.and_then(|n| n.average_reward_rate(params.blocks_per_period));
    let reward_proportion = match rate_per_token(&reward_rate, &snapshot.allocated_stake) {
        None => MetricValue::Unavailable {
            reason: "no allocated stake".to_string(),
        },
        Some(per_token) => match reward_proportion(&per_token, network_average.as_ref()) {
            Ok(value) => MetricValue::Available { value },
            Err(e) => {
                let reason = e.to_string();
                warnings.push(e);
                MetricValue::Unavailable { reason }
            },
        },
    };

    let metrics = IndexerMetrics {
        indexer_address: snapshot.indexer_address.clone(),
        self_stake: snapshot.self_stake.clone(),
        delegated_stake: snapshot.delegated_stake.clone(),
        allocated_stake: snapshot.allocated_stake.clone(),
        remaining_delegation_capacity: snapshot.remaining_delegation_capacity(),
        reward_cuts: snapshot.reward_cuts.clone(),
        active_allocations: active.len(),
        instant_apr: instant_apr(&reward_rate, snapshot, params.periods_per_year),
        reward_rate_per_period: reward_rate,
        reward_proportion,
        over_allocated: is_over_allocated(snapshot),
        unallocated: unallocated_warning(snapshot, &params.unallocated_threshold),
        window_rewards: window_rewards(snapshot, allocations, since),
        highlighted: false,
    };

    (metrics, warnings)
}

// ============================================
// Delegation
// ============================================

/// Time left before undelegated tokens can be withdrawn.
pub fn thaw_status(thaw_end: DateTime<Utc>, now: DateTime<Utc>) -> ThawStatus {
    let remaining_secs = (thaw_end - now).num_seconds();
    if remaining_secs > 0 {
        ThawStatus::Thawing { remaining_secs }
    } else {
        ThawStatus::Withdrawable
    }
}

/// Per-delegator positions, principal and profit.
///
/// Principal is net delegated tokens, value is the current worth of the shares held.
/// Profit is clamped at zero per position before summing. Only undelegations that still
/// lock tokens show up as thawing.
pub fn accumulated_profit(
    events: &[DelegationEvent],
    holdings: &[DelegationHolding],
    snapshots: &[StakeSnapshot],
    now: DateTime<Utc>,
    default_thawing_period: Duration,
) -> BTreeMap<String, DelegatorMetrics> {
    let pools: HashMap<&str, &StakeSnapshot> = snapshots
        .iter()
        .map(|s| (s.indexer_address.as_str(), s))
        .collect();

    let mut delegators: BTreeMap<String, DelegatorMetrics> = BTreeMap::new();

    for holding in holdings {
        let position_events = events.iter().filter(|e| {
            e.delegator_address == holding.delegator_address && e.indexer_address == holding.indexer_address
        });

        let thawing: Vec<ThawingTokens> = position_events
            .filter(|e| e.kind == DelegationKind::Undelegated && e.tokens.is_positive())
            .filter_map(|e| {
                e.effective_thaw_end(default_thawing_period).map(|thaw_end| ThawingTokens {
                    tokens: e.tokens.clone(),
                    thaw_end,
                    status: thaw_status(thaw_end, now),
                })
            })
            .collect();

        let principal = holding.principal.clone();
        let current_value = pools
            .get(holding.indexer_address.as_str())
            .map(|pool| pool.share_value(&holding.shares))
            .unwrap_or_else(BigDecimal::zero);
        let profit = clamp_non_negative(&current_value - &principal);

        let delegator = delegators
            .entry(holding.delegator_address.clone())
            .or_insert_with(|| DelegatorMetrics {
                delegator_address: holding.delegator_address.clone(),
                positions: Vec::new(),
                total_principal: BigDecimal::zero(),
                total_value: BigDecimal::zero(),
                accumulated_profit: BigDecimal::zero(),
            });
        delegator.total_principal += &principal;
        delegator.total_value += &current_value;
        delegator.accumulated_profit += &profit;
        delegator.positions.push(PositionMetrics {
            indexer_address: holding.indexer_address.clone(),
            shares: holding.shares.clone(),
            principal,
            current_value,
            profit,
            thawing,
        });
    }

    for delegator in delegators.values_mut() {
        delegator
            .positions
            .sort_by(|a, b| a.indexer_address.cmp(&b.indexer_address));
    }

    delegators
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CutPair, RewardCuts};
    use num_traits::One;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap()
    }

    fn snapshot(address: &str, self_stake: i64, delegated: i64, allocated: i64) -> StakeSnapshot {
        StakeSnapshot::new(
            address.to_string(),
            BigDecimal::from(self_stake),
            BigDecimal::from(delegated),
            BigDecimal::from(allocated),
            BigDecimal::from(self_stake * 16),
            BigDecimal::from(delegated),
            dec("0.1"),
            dec("0.1"),
        )
    }

    fn network() -> NetworkState {
        NetworkState {
            issuance_per_block: dec("100"),
            total_tokens_signalled: dec("1000"),
            total_tokens_allocated: dec("720000"),
            delegation_ratio: 16,
            current_epoch: 100,
        }
    }

    fn deployment(id: &str, signal: &str, staked: &str) -> DeploymentState {
        DeploymentState {
            deployment_id: id.to_string(),
            ipfs_hash: format!("Qm{}", id),
            subgraph_id: None,
            signalled_tokens: dec(signal),
            staked_tokens: dec(staked),
        }
    }

    fn allocation(id: &str, deployment: &str, tokens: i64, closed: bool) -> AllocationEvent {
        let created = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        AllocationEvent::new(
            id.to_string(),
            "0xindexer".to_string(),
            deployment.to_string(),
            BigDecimal::from(tokens),
            created,
            closed.then(|| created + Duration::hours(2)),
            closed,
        )
    }

    #[test]
    fn test_unallocated_scenario() {
        let s = snapshot("0xindexer", 100_000, 50_000, 40_000);
        let ratio = unallocated_ratio(&s).unwrap();
        assert_eq!(ratio.round(1), dec("73.3"));

        let flagged = unallocated_warning(&s, &dec("40")).unwrap();
        assert!(flagged.warning);
        assert!(!is_over_allocated(&s));
    }

    #[test]
    fn test_over_allocated_is_floored() {
        let s = snapshot("0xindexer", 100, 0, 150);
        assert!(is_over_allocated(&s));
        assert_eq!(unallocated_ratio(&s), Some(BigDecimal::zero()));
        assert!(!unallocated_warning(&s, &dec("40")).unwrap().warning);
    }

    #[test]
    fn test_unallocated_undefined_without_stake() {
        let s = snapshot("0xindexer", 0, 0, 0);
        assert_eq!(unallocated_ratio(&s), None);
        assert_eq!(unallocated_warning(&s, &dec("40")), None);
    }

    #[test]
    fn test_indexer_reward_rate() {
        let deployments: HashMap<String, DeploymentState> = [
            ("0xd1".to_string(), deployment("0xd1", "500", "10000")),
            ("0xd2".to_string(), deployment("0xd2", "250", "0")),
        ]
        .into_iter()
        .collect();
        let allocations = vec![
            allocation("a1", "0xd1", 5000, false),
            allocation("a2", "0xd2", 1000, false),
            allocation("a3", "0xd1", 5000, true),
            allocation("a4", "0xunknown", 1000, false),
        ];

        // 100 * 7200 = 720000 per period; d1 gets half by signal, a1 holds half of d1
        let rate = indexer_reward_rate(&allocations, &deployments, &network(), 7200);
        assert_eq!(rate, dec("180000"));
    }

    #[test]
    fn test_instant_apr() {
        let s = snapshot("0xindexer", 100_000, 50_000, 40_000);
        assert_eq!(instant_apr(&dec("150"), &s, 365), dec("36.5"));

        let empty = snapshot("0xindexer", 0, 0, 0);
        assert_eq!(instant_apr(&dec("150"), &empty, 365), BigDecimal::zero());
    }

    #[test]
    fn test_reward_proportion() {
        assert_eq!(reward_proportion(&dec("2"), Some(&dec("1"))).unwrap(), dec("200"));

        let err = reward_proportion(&dec("2"), Some(&BigDecimal::zero())).unwrap_err();
        assert!(matches!(err, ReportError::MissingBaseline { .. }));
        assert!(reward_proportion(&dec("2"), None).is_err());
        assert_eq!(rate_per_token(&dec("10"), &BigDecimal::zero()), None);
    }

    #[test]
    fn test_indexer_metrics_degrade_without_baseline() {
        let s = snapshot("0xindexer", 100_000, 50_000, 5000);
        let deployments: HashMap<String, DeploymentState> =
            [("0xd1".to_string(), deployment("0xd1", "500", "10000"))].into_iter().collect();
        let allocations = vec![allocation("a1", "0xd1", 5000, false)];
        let mut net = network();
        net.total_tokens_allocated = BigDecimal::zero();

        let (metrics, warnings) =
            indexer_metrics(&s, &allocations, &deployments, Some(&net), now(), &MetricsParams::default());
        assert_eq!(metrics.active_allocations, 1);
        assert_eq!(metrics.reward_rate_per_period, dec("180000"));
        assert!(metrics.reward_proportion.value().is_none());
        assert_eq!(warnings.len(), 1);

        let (metrics, warnings) =
            indexer_metrics(&s, &allocations, &deployments, Some(&network()), now(), &MetricsParams::default());
        // per token: 180000 / 5000 = 36, network: 720000 / 720000 = 1
        assert_eq!(metrics.reward_proportion.value(), Some(&dec("3600")));
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_zero_allocation_indexer_has_no_proportion() {
        let s = snapshot("0xindexer", 100_000, 0, 0);
        let (metrics, warnings) =
            indexer_metrics(&s, &[], &HashMap::new(), Some(&network()), now(), &MetricsParams::default());
        assert!(matches!(metrics.reward_proportion, MetricValue::Unavailable { .. }));
        assert_eq!(metrics.instant_apr, BigDecimal::zero());
        assert!(warnings.is_empty());
        assert_eq!(
            metrics.reward_cuts,
            RewardCuts {
                indexing: CutPair::new(dec("0.1"), &dec("100000"), &BigDecimal::zero()),
                query_fee: CutPair::new(dec("0.1"), &dec("100000"), &BigDecimal::zero()),
            }
        );
    }

    #[test]
    fn test_reward_split() {
        let split = reward_split(&dec("1000"), &dec("0.1"));
        assert_eq!(split.indexer, dec("100"));
        assert_eq!(split.delegators, dec("900"));
        assert_eq!(split.total, dec("1000"));

        let solo = reward_split(&dec("1000"), &BigDecimal::one());
        assert_eq!(solo.delegators, BigDecimal::zero());
    }

    #[test]
    fn test_window_rewards_only_count_closes_in_window() {
        let s = snapshot("0xindexer", 100_000, 50_000, 0);
        // allocation() closes two hours after 2025-01-01 00:00
        let closed = allocation("a1", "0xd1", 5000, true).with_indexing_rewards(dec("500"));
        let open = allocation("a2", "0xd1", 5000, false).with_indexing_rewards(dec("70"));
        let mut other = allocation("a3", "0xd1", 5000, true).with_indexing_rewards(dec("300"));
        other.indexer_address = "0xother".to_string();
        let allocations = vec![closed, open, other];

        let since = Utc.with_ymd_and_hms(2025, 1, 1, 1, 0, 0).unwrap();
        let split = window_rewards(&s, &allocations, since);
        assert_eq!(split.total, dec("500"));
        assert_eq!(split.indexer, dec("50"));
        assert_eq!(split.delegators, dec("450"));

        let later = Utc.with_ymd_and_hms(2025, 1, 1, 3, 0, 0).unwrap();
        assert_eq!(window_rewards(&s, &allocations, later).total, BigDecimal::zero());
    }

    #[test]
    fn test_thaw_status() {
        let past = now() - Duration::hours(1);
        assert_eq!(thaw_status(past, now()), ThawStatus::Withdrawable);
        assert_eq!(thaw_status(now(), now()), ThawStatus::Withdrawable);
        assert_eq!(
            thaw_status(now() + Duration::hours(1), now()),
            ThawStatus::Thawing { remaining_secs: 3600 }
        );
    }

    fn position_events() -> Vec<DelegationEvent> {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        vec![
            DelegationEvent::delegated("s1-delegated".into(), "0xdel".into(), "0xa".into(), dec("1000"), ts),
            DelegationEvent::undelegated(
                "s1-undelegated".into(),
                "0xdel".into(),
                "0xa".into(),
                dec("200"),
                ts + Duration::days(1),
                Some(now() - Duration::hours(1)),
            ),
            DelegationEvent::delegated("s2-delegated".into(), "0xdel".into(), "0xb".into(), dec("500"), ts),
        ]
    }

    fn holding(indexer: &str, shares: &str, principal: &str) -> DelegationHolding {
        DelegationHolding {
            delegator_address: "0xdel".into(),
            indexer_address: indexer.into(),
            shares: dec(shares),
            principal: dec(principal),
        }
    }

    #[test]
    fn test_accumulated_profit() {
        let holdings = vec![
            holding("0xb", "500", "500"),
            holding("0xa", "800", "800"),
        ];
        // pool a: 1100 tokens for 1000 shares, pool b lost value: 400 tokens for 1000 shares
        let mut a = snapshot("0xa", 1000, 1100, 0);
        a.delegator_shares = dec("1000");
        let mut b = snapshot("0xb", 1000, 400, 0);
        b.delegator_shares = dec("1000");

        let result = accumulated_profit(&position_events(), &holdings, &[a, b], now(), Duration::days(28));
        let del = &result["0xdel"];

        assert_eq!(del.positions[0].indexer_address, "0xa");
        assert_eq!(del.positions[0].principal, dec("800"));
        assert_eq!(del.positions[0].current_value, dec("880"));
        assert_eq!(del.positions[0].profit, dec("80"));
        assert!(del.positions[0].thawing[0].status.is_withdrawable());

        // loss is clamped, not subtracted from the total
        assert_eq!(del.positions[1].current_value, dec("200"));
        assert_eq!(del.positions[1].profit, BigDecimal::zero());
        assert_eq!(del.accumulated_profit, dec("80"));
        assert_eq!(del.total_principal, dec("1300"));
    }

    #[test]
    fn test_profit_never_negative_without_pool() {
        let holdings = vec![holding("0xa", "800", "800")];
        let result = accumulated_profit(&position_events(), &holdings, &[], now(), Duration::days(28));
        let del = &result["0xdel"];
        assert_eq!(del.total_value, BigDecimal::zero());
        assert_eq!(del.accumulated_profit, BigDecimal::zero());
    }

    #[test]
    fn test_withdrawn_position_has_nothing_thawing() {
        let ts = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        // fully undelegated and withdrawn: only the delegation is left on record
        let events = vec![DelegationEvent::delegated(
            "s1-delegated".into(),
            "0xdel".into(),
            "0xa".into(),
            dec("1000"),
            ts,
        )];
        let holdings = vec![holding("0xa", "0", "0")];

        let result = accumulated_profit(&events, &holdings, &[], now(), Duration::days(28));
        let position = &result["0xdel"].positions[0];
        assert!(position.thawing.is_empty());
        assert_eq!(position.principal, BigDecimal::zero());
    }
}
