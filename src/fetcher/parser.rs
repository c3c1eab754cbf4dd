//! Converts raw subgraph JSON entities into typed records.
//!
//! Every parser returns `MalformedRecord` instead of panicking on a missing or
//! unparsable field; the fetcher turns those into report warnings.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use num_traits::{Signed, Zero};
use serde_json::Value;

use crate::error::{ReportError, Result};
use crate::models::{
    AllocationEvent, DelegationEvent, DelegationHolding, DeploymentState, NetworkState,
    SignalEvent, StakeSnapshot,
};
use crate::utils::{clamp_non_negative, is_submitted_poi, normalize_address, ppm_to_fraction, wei_to_grt};

/// Values the delegation parser needs to turn epochs into timestamps.
#[derive(Debug, Clone, Copy)]
pub struct EpochClock {
    pub now: DateTime<Utc>,
    /// Unknown when the network entity could not be read
    pub current_epoch: Option<i64>,
    pub epoch_duration_secs: i64,
}

impl EpochClock {
    /// Wall-clock estimate of the start of `epoch`.
    ///
    /// `None` without a current epoch or when the offset does not fit a timestamp.
    pub fn epoch_to_time(&self, epoch: i64) -> Option<DateTime<Utc>> {
        let offset = epoch
            .checked_sub(self.current_epoch?)?
            .checked_mul(self.epoch_duration_secs)?;
        Duration::try_seconds(offset).and_then(|offset| self.now.checked_add_signed(offset))
    }
}

// ============================================
// Field Helpers
// ============================================

fn malformed(entity: &str, id: Option<&str>, detail: impl Into<String>) -> ReportError {
    ReportError::MalformedRecord {
        entity: match id {
            Some(id) => format!("{} {}", entity, id),
            None => entity.to_string(),
        },
        detail: detail.into(),
    }
}

fn str_field<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(Value::as_str)
}

/// `entity { id }` nested reference.
fn ref_id<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(|r| r.get("id")).and_then(Value::as_str)
}

/// Int fields arrive as JSON numbers, BigInt fields as strings; accept both.
fn int_field(v: &Value, key: &str) -> Option<i64> {
    match v.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn wei_field(v: &Value, key: &str) -> Option<BigDecimal> {
    match v.get(key)? {
        Value::String(s) => wei_to_grt(s),
        Value::Number(n) => wei_to_grt(&n.to_string()),
        _ => None,
    }
}

fn timestamp_field(v: &Value, key: &str) -> Option<DateTime<Utc>> {
    int_field(v, key)
        .filter(|ts| *ts > 0)
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
}

/// Subgraph id of the latest version of a deployment, if present.
fn deployment_subgraph_id(deployment: &Value) -> Option<String> {
    deployment
        .get("versions")
        .and_then(Value::as_array)
        .and_then(|versions| versions.first())
        .and_then(|version| ref_id(version, "subgraph"))
        .map(String::from)
}

// ============================================
// Entity Parsers
// ============================================

pub fn parse_allocation(v: &Value) -> Result<AllocationEvent> {
    let id = str_field(v, "id").ok_or_else(|| malformed("allocation", None, "missing id"))?;
    let err = |detail: &str| malformed("allocation", Some(id), detail);

    let indexer = ref_id(v, "indexer").ok_or_else(|| err("missing indexer"))?;
    let deployment = ref_id(v, "subgraphDeployment").ok_or_else(|| err("missing deployment"))?;
    let tokens = wei_field(v, "allocatedTokens").ok_or_else(|| err("bad allocatedTokens"))?;
    let created_at = timestamp_field(v, "createdAt").ok_or_else(|| err("bad createdAt"))?;
    // closedAt is null or 0 while the allocation is active
    let closed_at = timestamp_field(v, "closedAt");
    let rewards = wei_field(v, "indexingRewards").unwrap_or_else(BigDecimal::zero);

    Ok(AllocationEvent::new(
        normalize_address(id),
        normalize_address(indexer),
        deployment.to_lowercase(),
        tokens,
        created_at,
        closed_at,
        closed_at.is_some() && is_submitted_poi(str_field(v, "poi")),
    )
    .with_indexing_rewards(rewards))
}

pub fn parse_signal_transaction(v: &Value) -> Result<SignalEvent> {
    let id = str_field(v, "id").ok_or_else(|| malformed("signal", None, "missing id"))?;
    let err = |detail: &str| malformed("signal", Some(id), detail);

    let tokens = wei_field(v, "tokens").ok_or_else(|| err("bad tokens"))?;
    let delta = match str_field(v, "type") {
        Some("MintSignal") => tokens.abs(),
        Some("BurnSignal") => -tokens.abs(),
        other => return Err(err(&format!("unexpected type {:?}", other))),
    };
    let timestamp = timestamp_field(v, "timestamp").ok_or_else(|| err("bad timestamp"))?;
    let curator = ref_id(v, "signer").ok_or_else(|| err("missing signer"))?;
    let deployment = v
        .get("signal")
        .and_then(|s| s.get("subgraphDeployment"))
        .ok_or_else(|| err("missing deployment"))?;
    let deployment_id = str_field(deployment, "id").ok_or_else(|| err("missing deployment id"))?;

    Ok(SignalEvent::new(
        id.to_string(),
        deployment_id.to_lowercase(),
        deployment_subgraph_id(deployment),
        delta,
        timestamp,
        normalize_address(curator),
    ))
}

pub fn parse_deployment(v: &Value) -> Result<DeploymentState> {
    let id = str_field(v, "id").ok_or_else(|| malformed("deployment", None, "missing id"))?;
    let err = |detail: &str| malformed("deployment", Some(id), detail);

    Ok(DeploymentState {
        deployment_id: id.to_lowercase(),
        ipfs_hash: str_field(v, "ipfsHash").unwrap_or_default().to_string(),
        subgraph_id: deployment_subgraph_id(v),
        signalled_tokens: wei_field(v, "signalledTokens").ok_or_else(|| err("bad signalledTokens"))?,
        staked_tokens: wei_field(v, "stakedTokens").ok_or_else(|| err("bad stakedTokens"))?,
    })
}

/// The deployment queried by ipfs hash plus every deployment of the same subgraph.
pub fn parse_deployment_with_versions(v: &Value) -> Result<(DeploymentState, Vec<DeploymentState>)> {
    let mut deployment = parse_deployment(v)?;

    let subgraph = v
        .get("versions")
        .and_then(Value::as_array)
        .and_then(|versions| versions.first())
        .and_then(|version| version.get("subgraph"));

    let Some(subgraph) = subgraph else {
        return Ok((deployment, Vec::new()));
    };

    let subgraph_id = str_field(subgraph, "id").map(String::from);
    deployment.subgraph_id = subgraph_id.clone();

    let mut siblings = Vec::new();
    for version in subgraph
        .get("versions")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        if let Some(raw) = version.get("subgraphDeployment") {
            let mut sibling = parse_deployment(raw)?;
            if sibling.deployment_id == deployment.deployment_id {
                continue;
            }
            sibling.subgraph_id = subgraph_id.clone();
            siblings.push(sibling);
        }
    }

    Ok((deployment, siblings))
}

pub fn parse_indexer(v: &Value, delegation_ratio: u32) -> Result<StakeSnapshot> {
    let id = str_field(v, "id").ok_or_else(|| malformed("indexer", None, "missing id"))?;
    let err = |detail: &str| malformed("indexer", Some(id), detail);

    let self_stake = wei_field(v, "stakedTokens").ok_or_else(|| err("bad stakedTokens"))?;
    let delegated = wei_field(v, "delegatedTokens").ok_or_else(|| err("bad delegatedTokens"))?;
    let allocated = wei_field(v, "allocatedTokens").ok_or_else(|| err("bad allocatedTokens"))?;
    let shares = wei_field(v, "delegatorShares").unwrap_or_else(BigDecimal::zero);
    let cut = |key: &str| {
        v.get(key)
            .map(|c| match c {
                Value::Number(n) => n.to_string(),
                other => other.as_str().unwrap_or_default().to_string(),
            })
            .and_then(|c| ppm_to_fraction(&c))
    };
    let indexing_cut = cut("indexingRewardCut").ok_or_else(|| err("bad indexingRewardCut"))?;
    let query_fee_cut = cut("queryFeeCut").ok_or_else(|| err("bad queryFeeCut"))?;
    let capacity = &self_stake * BigDecimal::from(delegation_ratio);

    Ok(StakeSnapshot::new(
        normalize_address(id),
        self_stake,
        delegated,
        allocated,
        capacity,
        shares,
        indexing_cut,
        query_fee_cut,
    ))
}

pub fn parse_network(v: &Value) -> Result<NetworkState> {
    let err = |detail: &str| malformed("graphNetwork", None, detail);

    Ok(NetworkState {
        issuance_per_block: wei_field(v, "networkGRTIssuancePerBlock")
            .ok_or_else(|| err("bad networkGRTIssuancePerBlock"))?,
        total_tokens_signalled: wei_field(v, "totalTokensSignalled")
            .ok_or_else(|| err("bad totalTokensSignalled"))?,
        total_tokens_allocated: wei_field(v, "totalTokensAllocated")
            .ok_or_else(|| err("bad totalTokensAllocated"))?,
        delegation_ratio: int_field(v, "delegationRatio")
            .and_then(|r| u32::try_from(r).ok())
            .ok_or_else(|| err("bad delegationRatio"))?,
        current_epoch: int_field(v, "currentEpoch").ok_or_else(|| err("bad currentEpoch"))?,
    })
}

/// One delegated stake entity yields the delegator's current holding plus up to two events:
/// the last delegation and, while tokens are still locked, the last undelegation.
///
/// The entity only keeps lifetime totals, so the delegation event carries the cumulative
/// `stakedTokens` at `lastDelegatedAt` rather than the size of the last deposit. The
/// undelegation carries `lockedTokens`; withdrawn tokens leave no event behind.
pub fn parse_delegated_stake(
    v: &Value,
    clock: &EpochClock,
) -> Result<(DelegationHolding, Vec<DelegationEvent>)> {
    let id = str_field(v, "id").ok_or_else(|| malformed("delegatedStake", None, "missing id"))?;
    let err = |detail: &str| malformed("delegatedStake", Some(id), detail);

    let delegator = normalize_address(ref_id(v, "delegator").ok_or_else(|| err("missing delegator"))?);
    let indexer = normalize_address(ref_id(v, "indexer").ok_or_else(|| err("missing indexer"))?);
    let shares = wei_field(v, "shareAmount").ok_or_else(|| err("bad shareAmount"))?;
    let staked = wei_field(v, "stakedTokens").ok_or_else(|| err("bad stakedTokens"))?;
    let unstaked = wei_field(v, "unstakedTokens").unwrap_or_else(BigDecimal::zero);
    let locked = wei_field(v, "lockedTokens").unwrap_or_else(BigDecimal::zero);
    let created_at = timestamp_field(v, "createdAt").ok_or_else(|| err("bad createdAt"))?;
    let principal = clamp_non_negative(&staked - &unstaked);

    let mut events = Vec::with_capacity(2);

    if staked.is_positive() {
        events.push(DelegationEvent::delegated(
            format!("{}-delegated", id),
            delegator.clone(),
            indexer.clone(),
            staked,
            timestamp_field(v, "lastDelegatedAt").unwrap_or(created_at),
        ));
    }

    if locked.is_positive() {
        let undelegated_at = timestamp_field(v, "lastUndelegatedAt")
            .ok_or_else(|| err("lockedTokens without lastUndelegatedAt"))?;
        // unknown epoch mapping leaves the configured thawing period to apply
        let thaw_end = int_field(v, "lockedUntil")
            .filter(|epoch| *epoch > 0)
            .and_then(|epoch| clock.epoch_to_time(epoch));
        events.push(DelegationEvent::undelegated(
            format!("{}-undelegated", id),
            delegator.clone(),
            indexer.clone(),
            locked,
            undelegated_at,
            thaw_end,
        ));
    }

    Ok((
        DelegationHolding {
            delegator_address: delegator,
            indexer_address: indexer,
            shares,
            principal,
        },
        events,
    ))
}
