use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use num_traits::{Signed, Zero};
use serde::Serialize;

/// Curation signal change on a deployment.
///
/// `signal_delta` is positive for a mint, negative for a burn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalEvent {
    pub entity_id: String,
    pub deployment_id: String,
    /// Subgraph the deployment is a version of, used to pair upgrades
    pub subgraph_id: Option<String>,
    pub signal_delta: BigDecimal,
    pub timestamp: DateTime<Utc>,
    pub curator_address: String,
    pub is_upgrade: bool,
}

impl SignalEvent {
    pub fn new(
        entity_id: String,
        deployment_id: String,
        subgraph_id: Option<String>,
        signal_delta: BigDecimal,
        timestamp: DateTime<Utc>,
        curator_address: String,
    ) -> Self {
        Self {
            entity_id,
            deployment_id,
            subgraph_id,
            signal_delta,
            timestamp,
            curator_address,
            is_upgrade: false,
        }
    }

    pub fn is_addition(&self) -> bool {
        self.signal_delta.is_positive()
    }

    pub fn is_removal(&self) -> bool {
        self.signal_delta.is_negative()
    }

    /// Whether `self` and `other` look like the two halves of a version upgrade:
    /// opposite-sign deltas on two deployments of the same subgraph, close in time.
    pub fn pairs_with(&self, other: &SignalEvent, tolerance: Duration) -> bool {
        let same_subgraph = match (&self.subgraph_id, &other.subgraph_id) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
        if !same_subgraph || self.deployment_id == other.deployment_id {
            return false;
        }
        if self.signal_delta.is_zero() || other.signal_delta.is_zero() {
            return false;
        }
        if self.is_addition() == other.is_addition() {
            return false;
        }

        (self.timestamp - other.timestamp).abs() <= tolerance
    }
}
