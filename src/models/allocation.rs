use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use num_traits::Zero;
use serde::Serialize;

use crate::error::ReportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    Active,
    Closed,
}

/// Indexer allocation on a subgraph deployment.
///
/// Opened with `closed_at = None` (Active). Once `closed_at` is set the record is
/// Closed and never changes again.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationEvent {
    pub entity_id: String,
    pub indexer_address: String,
    pub subgraph_deployment_id: String,
    pub tokens_allocated: BigDecimal,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub status: AllocationStatus,
    pub poi_submitted: bool,
    /// Indexing rewards collected on close (zero while active or when unknown)
    pub indexing_rewards: BigDecimal,
}

impl AllocationEvent {
    pub fn new(
        entity_id: String,
        indexer_address: String,
        subgraph_deployment_id: String,
        tokens_allocated: BigDecimal,
        created_at: DateTime<Utc>,
        closed_at: Option<DateTime<Utc>>,
        poi_submitted: bool,
    ) -> Self {
        let status = if closed_at.is_some() {
            AllocationStatus::Closed
        } else {
            AllocationStatus::Active
        };

        Self {
            entity_id,
            indexer_address,
            subgraph_deployment_id,
            tokens_allocated,
            created_at,
            closed_at,
            status,
            poi_submitted,
            indexing_rewards: BigDecimal::zero(),
        }
    }

    pub fn with_indexing_rewards(mut self, rewards: BigDecimal) -> Self {
        self.indexing_rewards = rewards;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.status == AllocationStatus::Closed
    }

    /// Ranking used when the same allocation is observed by several queries.
    /// A closed observation beats an active one; a submitted POI beats none.
    pub fn completeness(&self) -> u8 {
        (self.closed_at.is_some() as u8) * 2 + self.poi_submitted as u8
    }

    /// Fails with `DataInconsistency` when the allocation closed before it was created.
    pub fn check_ordering(&self) -> Result<(), ReportError> {
        match self.closed_at {
            Some(closed_at) if closed_at < self.created_at => Err(ReportError::DataInconsistency {
                entity_id: self.entity_id.clone(),
                detail: format!(
                    "closed_at {} precedes created_at {}",
                    closed_at.to_rfc3339(),
                    self.created_at.to_rfc3339()
                ),
            }),
            _ => Ok(()),
        }
    }
}
