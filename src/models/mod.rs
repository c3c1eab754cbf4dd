//! Typed records fetched from the network subgraph and the report model built from them.

pub mod allocation;
pub mod delegation;
pub mod report;
pub mod signal;
pub mod stake;
pub mod timeline;

pub use allocation::{AllocationEvent, AllocationStatus};
pub use delegation::{DelegationEvent, DelegationKind};
pub use report::{
    DelegatorMetrics, DeploymentSummary, IndexerMetrics, MetricValue, PositionMetrics,
    ReportKind, ReportMetadata, ReportModel, ReportTotals, ReportWarning, RewardSplit,
    ThawingTokens, WarningKind,
};
pub use signal::SignalEvent;
pub use stake::{
    CutPair, DelegationHolding, DeploymentState, NetworkState, RewardCuts, StakeSnapshot,
};
pub use timeline::{Marker, ThawStatus, TimelineEntry, UnallocatedStake};
