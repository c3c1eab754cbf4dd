use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationKind {
    Delegated,
    Undelegated,
}

/// Delegation or undelegation of tokens by a delegator to an indexer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DelegationEvent {
    pub entity_id: String,
    pub delegator_address: String,
    pub indexer_address: String,
    pub tokens: BigDecimal,
    pub timestamp: DateTime<Utc>,
    pub kind: DelegationKind,
    /// Only set for undelegations
    pub thaw_end: Option<DateTime<Utc>>,
}

impl DelegationEvent {
    pub fn delegated(
        entity_id: String,
        delegator_address: String,
        indexer_address: String,
        tokens: BigDecimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_id,
            delegator_address,
            indexer_address,
            tokens,
            timestamp,
            kind: DelegationKind::Delegated,
            thaw_end: None,
        }
    }

    pub fn undelegated(
        entity_id: String,
        delegator_address: String,
        indexer_address: String,
        tokens: BigDecimal,
        timestamp: DateTime<Utc>,
        thaw_end: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            entity_id,
            delegator_address,
            indexer_address,
            tokens,
            timestamp,
            kind: DelegationKind::Undelegated,
            thaw_end,
        }
    }

    pub fn completeness(&self) -> u8 {
        self.thaw_end.is_some() as u8
    }

    /// Thaw end for an undelegation, falling back to `timestamp + default_period`
    /// when the record does not carry one. `None` for delegations.
    pub fn effective_thaw_end(&self, default_period: Duration) -> Option<DateTime<Utc>> {
        match self.kind {
            DelegationKind::Delegated => None,
            DelegationKind::Undelegated => self
                .thaw_end
                .or_else(|| self.timestamp.checked_add_signed(default_period)),
        }
    }
}
