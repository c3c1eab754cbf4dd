//! Turns network subgraph responses into typed record sets.

mod parser;
mod queries;
mod snapshot;

pub use parser::EpochClock;
pub use snapshot::{Snapshot, SnapshotFetcher};
