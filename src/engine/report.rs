use std::collections::{BTreeMap, HashMap};

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use num_traits::Zero;

use super::reconciler::Reconciled;
use crate::error::ReportError;
use crate::models::{
    DelegatorMetrics, DeploymentState, DeploymentSummary, IndexerMetrics, ReportKind,
    ReportMetadata, ReportModel, ReportTotals, ReportWarning, StakeSnapshot,
};

/// Everything a report is built from. "Now" is part of the input; building never reads
/// the clock or the network.
#[derive(Debug, Clone)]
pub struct ReportInput<'a> {
    pub kind: ReportKind,
    pub subject: String,
    pub now: DateTime<Utc>,
    pub window_hours: i64,
    pub deployments: &'a [DeploymentState],
    pub stakes: &'a [StakeSnapshot],
    pub reconciled: &'a Reconciled,
    pub indexers: Vec<IndexerMetrics>,
    pub delegators: BTreeMap<String, DelegatorMetrics>,
    /// Warnings raised before reconciliation (fetch) and while computing metrics
    pub warnings: &'a [ReportError],
    pub aliases: HashMap<String, String>,
    pub name_resolution_failure: Option<String>,
    /// Lowercased address whose entries get highlighted
    pub highlighted: Option<String>,
}

pub fn build_report(input: ReportInput<'_>) -> ReportModel {
    let highlighted = input.highlighted.as_deref();
    let is_highlighted = |address: &str| highlighted.is_some_and(|h| h == address);

    let active = || input.reconciled.allocations.iter().filter(|a| !a.is_closed());

    let deployments: BTreeMap<String, DeploymentSummary> = input
        .deployments
        .iter()
        .map(|d| {
            let summary = DeploymentSummary {
                deployment_id: d.deployment_id.clone(),
                ipfs_hash: d.ipfs_hash.clone(),
                subgraph_id: d.subgraph_id.clone(),
                signalled_tokens: d.signalled_tokens.clone(),
                staked_tokens: d.staked_tokens.clone(),
                active_allocations: active()
                    .filter(|a| a.subgraph_deployment_id == d.deployment_id)
                    .count(),
            };
            (d.deployment_id.clone(), summary)
        })
        .collect();

    let indexers: BTreeMap<String, IndexerMetrics> = input
        .indexers
        .into_iter()
        .map(|mut m| {
            m.highlighted = is_highlighted(&m.indexer_address);
            (m.indexer_address.clone(), m)
        })
        .collect();

    let timeline: Vec<_> = input
        .reconciled
        .timeline
        .iter()
        .cloned()
        .map(|mut entry| {
            entry.highlighted = entry.marker.actors().into_iter().any(is_highlighted);
            entry
        })
        .collect();

    let totals = ReportTotals {
        total_signal: sum(input.deployments.iter().map(|d| &d.signalled_tokens)),
        total_allocated: sum(input.stakes.iter().map(|s| &s.allocated_stake)),
        total_self_stake: sum(input.stakes.iter().map(|s| &s.self_stake)),
        total_delegated: sum(input.stakes.iter().map(|s| &s.delegated_stake)),
        active_allocations: active().count(),
        timeline_entries: timeline.len(),
    };

    let mut warnings: Vec<ReportWarning> = input
        .warnings
        .iter()
        .chain(input.reconciled.warnings.iter())
        .map(ReportWarning::from)
        .collect();
    if let Some(message) = input.name_resolution_failure {
        warnings.push(ReportWarning::name_resolution(message));
    }

    ReportModel {
        metadata: ReportMetadata {
            kind: input.kind,
            subject: input.subject,
            generated_at: input.now,
            window_hours: input.window_hours,
            window_start: input.reconciled.window_start,
            highlighted: input.highlighted.clone(),
        },
        totals,
        deployments,
        indexers,
        delegators: input.delegators,
        timeline,
        aliases: input.aliases.into_iter().collect(),
        warnings,
    }
}

fn sum<'a>(values: impl Iterator<Item = &'a BigDecimal>) -> BigDecimal {
    values.fold(BigDecimal::zero(), |acc, v| acc + v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisSettings;
    use crate::engine::reconciler::{reconcile, ReconcileInput, ReconcileParams};
    use crate::models::{AllocationEvent, Marker, WarningKind};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 3, 0, 0, 0).unwrap()
    }

    fn allocation(id: &str, indexer: &str, closed: bool) -> AllocationEvent {
        let created = now() - Duration::hours(10);
        AllocationEvent::new(
            id.to_string(),
            indexer.to_string(),
            "0xdep".to_string(),
            BigDecimal::from(100),
            created,
            closed.then(|| created + Duration::hours(2)),
            closed,
        )
    }

    fn stake(indexer: &str) -> StakeSnapshot {
        StakeSnapshot::new(
            indexer.to_string(),
            BigDecimal::from(1000),
            BigDecimal::from(500),
            BigDecimal::from(100),
            BigDecimal::from(16_000),
            BigDecimal::from(500),
            BigDecimal::zero(),
            BigDecimal::zero(),
        )
    }

    fn deployment() -> DeploymentState {
        DeploymentState {
            deployment_id: "0xdep".to_string(),
            ipfs_hash: "QmDep".to_string(),
            subgraph_id: Some("0xsg".to_string()),
            signalled_tokens: BigDecimal::from(42),
            staked_tokens: BigDecimal::from(200),
        }
    }

    fn reconciled() -> Reconciled {
        let input = ReconcileInput {
            allocations: vec![
                allocation("0xa1", "0xmine", false),
                allocation("0xa2", "0xother", true),
                // closed before created
                AllocationEvent::new(
                    "0xbad".to_string(),
                    "0xother".to_string(),
                    "0xdep".to_string(),
                    BigDecimal::from(1),
                    now() - Duration::hours(1),
                    Some(now() - Duration::hours(2)),
                    false,
                ),
            ],
            ..Default::default()
        };
        reconcile(input, &[], now(), &ReconcileParams::new(48, &AnalysisSettings::default())).unwrap()
    }

    fn input<'a>(
        reconciled: &'a Reconciled,
        deployments: &'a [DeploymentState],
        stakes: &'a [StakeSnapshot],
        warnings: &'a [ReportError],
    ) -> ReportInput<'a> {
        ReportInput {
            kind: ReportKind::Subgraph,
            subject: "QmDep".to_string(),
            now: now(),
            window_hours: 48,
            deployments,
            stakes,
            reconciled,
            indexers: Vec::new(),
            delegators: BTreeMap::new(),
            warnings,
            aliases: [("0xmine".to_string(), "mine.eth".to_string())].into_iter().collect(),
            name_resolution_failure: None,
            highlighted: Some("0xmine".to_string()),
        }
    }

    #[test]
    fn test_build_report() {
        let reconciled = reconciled();
        let deployments = [deployment()];
        let stakes = [stake("0xmine"), stake("0xother")];
        let fetch_warnings = [ReportError::MalformedRecord {
            entity: "allocation 0xzzz".to_string(),
            detail: "bad allocatedTokens".to_string(),
        }];

        let report = build_report(input(&reconciled, &deployments, &stakes, &fetch_warnings));

        assert_eq!(report.metadata.generated_at, now());
        assert_eq!(report.metadata.window_start, now() - Duration::hours(48));
        assert_eq!(report.totals.active_allocations, 1);
        assert_eq!(report.totals.total_signal, BigDecimal::from(42));
        assert_eq!(report.totals.total_self_stake, BigDecimal::from(2000));
        assert_eq!(report.totals.timeline_entries, report.timeline.len());
        assert_eq!(report.deployments["0xdep"].active_allocations, 1);
        assert_eq!(report.display_name("0xmine"), "mine.eth");
        assert_eq!(report.display_name("0xother"), "0xother");

        let kinds: Vec<WarningKind> = report.warnings.iter().map(|w| w.kind).collect();
        assert_eq!(kinds, vec![WarningKind::MalformedRecord, WarningKind::DataInconsistency]);
    }

    #[test]
    fn test_highlighting_follows_actor() {
        let reconciled = reconciled();
        let deployments = [deployment()];
        let report = build_report(input(&reconciled, &deployments, &[], &[]));

        for entry in &report.timeline {
            let indexer = match &entry.marker {
                Marker::Opened { allocation } | Marker::Closed { allocation, .. } => {
                    allocation.indexer_address.as_str()
                },
                other => panic!("unexpected marker {:?}", other),
            };
            assert_eq!(entry.highlighted, indexer == "0xmine");
        }
        assert!(report.timeline.iter().any(|e| e.highlighted));
    }

    #[test]
    fn test_name_resolution_failure_becomes_warning() {
        let reconciled = reconciled();
        let mut input = input(&reconciled, &[], &[], &[]);
        input.name_resolution_failure = Some("ENS unavailable".to_string());
        input.highlighted = None;

        let report = build_report(input);
        assert_eq!(report.warnings.last().map(|w| w.kind), Some(WarningKind::NameResolution));
        assert!(report.timeline.iter().all(|e| !e.highlighted));
    }

    #[test]
    fn test_build_is_pure() {
        let reconciled = reconciled();
        let deployments = [deployment()];
        let stakes = [stake("0xmine")];
        let first = build_report(input(&reconciled, &deployments, &stakes, &[]));
        let second = build_report(input(&reconciled, &deployments, &stakes, &[]));
        assert_eq!(first, second);
    }
}
