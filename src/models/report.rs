use std::collections::BTreeMap;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{RewardCuts, ThawStatus, TimelineEntry, UnallocatedStake};
use crate::error::ReportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Subgraph,
    Indexer,
    Delegator,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportMetadata {
    pub kind: ReportKind,
    /// Deployment hash, indexer or delegator address the report is about
    pub subject: String,
    pub generated_at: DateTime<Utc>,
    pub window_hours: i64,
    pub window_start: DateTime<Utc>,
    pub highlighted: Option<String>,
}

/// A derived figure that may be unavailable when its baseline is missing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MetricValue {
    Available { value: BigDecimal },
    Unavailable { reason: String },
}

impl MetricValue {
    pub fn value(&self) -> Option<&BigDecimal> {
        match self {
            Self::Available { value } => Some(value),
            Self::Unavailable { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexerMetrics {
    pub indexer_address: String,
    pub self_stake: BigDecimal,
    pub delegated_stake: BigDecimal,
    pub allocated_stake: BigDecimal,
    pub remaining_delegation_capacity: BigDecimal,
    pub reward_cuts: RewardCuts,
    pub active_allocations: usize,
    /// Indexing rewards per period across active allocations
    pub reward_rate_per_period: BigDecimal,
    /// Percentage of the network average per-token reward rate
    pub reward_proportion: MetricValue,
    /// Percentage
    pub instant_apr: BigDecimal,
    pub over_allocated: bool,
    pub unallocated: Option<UnallocatedStake>,
    /// Rewards collected by allocations closed inside the report window
    pub window_rewards: RewardSplit,
    pub highlighted: bool,
}

/// Indexing rewards divided by the indexer's reward cut.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RewardSplit {
    pub total: BigDecimal,
    pub indexer: BigDecimal,
    pub delegators: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThawingTokens {
    pub tokens: BigDecimal,
    pub thaw_end: DateTime<Utc>,
    pub status: ThawStatus,
}

/// One delegator's position in one indexer's pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionMetrics {
    pub indexer_address: String,
    pub shares: BigDecimal,
    pub principal: BigDecimal,
    pub current_value: BigDecimal,
    /// Never negative
    pub profit: BigDecimal,
    pub thawing: Vec<ThawingTokens>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DelegatorMetrics {
    pub delegator_address: String,
    pub positions: Vec<PositionMetrics>,
    pub total_principal: BigDecimal,
    pub total_value: BigDecimal,
    pub accumulated_profit: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentSummary {
    pub deployment_id: String,
    pub ipfs_hash: String,
    pub subgraph_id: Option<String>,
    pub signalled_tokens: BigDecimal,
    pub staked_tokens: BigDecimal,
    pub active_allocations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportTotals {
    pub total_signal: BigDecimal,
    pub total_allocated: BigDecimal,
    pub total_self_stake: BigDecimal,
    pub total_delegated: BigDecimal,
    pub active_allocations: usize,
    pub timeline_entries: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    DataInconsistency,
    MissingBaseline,
    MalformedRecord,
    NameResolution,
}

/// A dropped or degraded record, disclosed alongside the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportWarning {
    pub kind: WarningKind,
    pub entity_id: Option<String>,
    pub message: String,
}

impl ReportWarning {
    pub fn name_resolution(message: String) -> Self {
        Self {
            kind: WarningKind::NameResolution,
            entity_id: None,
            message,
        }
    }
}

impl From<&ReportError> for ReportWarning {
    fn from(err: &ReportError) -> Self {
        let (kind, entity_id) = match err {
            ReportError::DataInconsistency { entity_id, .. } => {
                (WarningKind::DataInconsistency, Some(entity_id.clone()))
            },
            ReportError::MissingBaseline { metric } => {
                (WarningKind::MissingBaseline, Some(metric.clone()))
            },
            ReportError::MalformedRecord { entity, .. } => {
                (WarningKind::MalformedRecord, Some(entity.clone()))
            },
            ReportError::UnknownName(name) => (WarningKind::NameResolution, Some(name.clone())),
            ReportError::TransportFailure(_) | ReportError::InvalidWindow(_) => {
                (WarningKind::NameResolution, None)
            },
        };

        Self {
            kind,
            entity_id,
            message: err.to_string(),
        }
    }
}

/// Everything the presentation layer needs, computed once per run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportModel {
    pub metadata: ReportMetadata,
    pub totals: ReportTotals,
    pub deployments: BTreeMap<String, DeploymentSummary>,
    pub indexers: BTreeMap<String, IndexerMetrics>,
    pub delegators: BTreeMap<String, DelegatorMetrics>,
    pub timeline: Vec<TimelineEntry>,
    pub aliases: BTreeMap<String, String>,
    pub warnings: Vec<ReportWarning>,
}

impl ReportModel {
    /// Alias for an address, falling back to the address itself.
    pub fn display_name<'a>(&'a self, address: &'a str) -> &'a str {
        self.aliases.get(address).map(String::as_str).unwrap_or(address)
    }
}
