//! Pure analysis core: timeline reconciliation, metrics and report assembly.
//!
//! Nothing here touches the network or the clock; "now" is always passed in.

pub mod metrics;
mod reconciler;
mod report;

pub use metrics::MetricsParams;
pub use reconciler::{reconcile, ReconcileInput, ReconcileParams, Reconciled};
pub use report::{build_report, ReportInput};
