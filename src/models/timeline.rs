use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{AllocationEvent, DelegationEvent, SignalEvent};

/// Remaining time before undelegated tokens can be withdrawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ThawStatus {
    Thawing { remaining_secs: i64 },
    Withdrawable,
}

impl ThawStatus {
    pub fn is_withdrawable(&self) -> bool {
        matches!(self, Self::Withdrawable)
    }

    /// Remaining seconds, zero once withdrawable.
    pub fn remaining_secs(&self) -> i64 {
        match self {
            Self::Thawing { remaining_secs } => *remaining_secs,
            Self::Withdrawable => 0,
        }
    }
}

/// Unallocated share of an indexer's stake right after an allocation closed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnallocatedStake {
    /// Percentage of (self + delegated) stake left unallocated
    pub ratio: BigDecimal,
    pub warning: bool,
}

/// Display classification of a timeline entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Marker {
    Opened {
        allocation: AllocationEvent,
    },
    /// Allocation closed. `reward_collection` is set when a POI was submitted.
    Closed {
        allocation: AllocationEvent,
        reward_collection: bool,
        unallocated: Option<UnallocatedStake>,
    },
    Signal {
        event: SignalEvent,
    },
    /// Signal moved from one version of a subgraph to another.
    Upgrade {
        removed: SignalEvent,
        added: SignalEvent,
    },
    /// Latest delegation; `event.tokens` is the lifetime total delegated, not the deposit size
    Delegated {
        event: DelegationEvent,
    },
    Thawing {
        event: DelegationEvent,
        thaw_end: DateTime<Utc>,
        status: ThawStatus,
    },
}

impl Marker {
    /// Tie-break rank for entries sharing timestamp and entity id.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Opened { .. } => 0,
            Self::Closed { .. } => 1,
            Self::Signal { .. } => 2,
            Self::Upgrade { .. } => 3,
            Self::Delegated { .. } => 4,
            Self::Thawing { .. } => 5,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Opened { .. } => "opened",
            Self::Closed {
                reward_collection: true,
                ..
            } => "closed+collect",
            Self::Closed { .. } => "closed",
            Self::Signal { event } if event.is_removal() => "unsignal",
            Self::Signal { .. } => "signal",
            Self::Upgrade { .. } => "upgrade",
            Self::Delegated { .. } => "delegated",
            Self::Thawing { .. } => "thawing",
        }
    }

    /// Addresses of the actors involved in this entry.
    pub fn actors(&self) -> Vec<&str> {
        match self {
            Self::Opened { allocation } | Self::Closed { allocation, .. } => {
                vec![allocation.indexer_address.as_str()]
            },
            Self::Signal { event } => vec![event.curator_address.as_str()],
            Self::Upgrade { removed, added } => {
                vec![removed.curator_address.as_str(), added.curator_address.as_str()]
            },
            Self::Delegated { event } | Self::Thawing { event, .. } => {
                vec![event.delegator_address.as_str(), event.indexer_address.as_str()]
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEntry {
    pub timestamp: DateTime<Utc>,
    pub entity_id: String,
    pub marker: Marker,
    /// Set by the report builder when an actor matches the highlighted identifier
    pub highlighted: bool,
}

impl TimelineEntry {
    pub fn new(timestamp: DateTime<Utc>, entity_id: String, marker: Marker) -> Self {
        Self {
            timestamp,
            entity_id,
            marker,
            highlighted: false,
        }
    }

    /// Total order: timestamp, then entity id, then marker rank.
    pub fn sort_key(&self) -> (DateTime<Utc>, &str, u8) {
        (self.timestamp, self.entity_id.as_str(), self.marker.rank())
    }
}
