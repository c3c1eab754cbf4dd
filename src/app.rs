//! End-to-end report pipelines shared by the three binaries.
//!
//! fetch -> reconcile -> metrics -> alias lookup -> report model.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::client::{EnsResolver, GraphQLClient, NameResolver, QueryClient};
use crate::config::Settings;
use crate::engine::metrics::{accumulated_profit, indexer_metrics};
use crate::engine::{build_report, reconcile, MetricsParams, ReconcileInput, ReconcileParams, ReportInput};
use crate::error::{ReportError, Result};
use crate::fetcher::{Snapshot, SnapshotFetcher};
use crate::models::{AllocationEvent, DeploymentState, IndexerMetrics, ReportKind, ReportModel};
use crate::utils::{looks_like_address, normalize_address};

/// Everything needed to run reports against one network subgraph.
pub struct App<C, R> {
    fetcher: SnapshotFetcher<C>,
    resolver: Option<R>,
    settings: Settings,
}

impl App<GraphQLClient, EnsResolver<GraphQLClient>> {
    /// HTTP clients for the configured endpoints.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let timeout = Duration::from_secs(settings.request_timeout_secs);
        let network = GraphQLClient::new(&settings.network_subgraph_url, timeout)?;
        let resolver = match &settings.ens_subgraph_url {
            Some(url) => Some(EnsResolver::new(GraphQLClient::new(url, timeout)?)),
            None => None,
        };

        Ok(Self::new(network, resolver, settings))
    }
}

impl<C: QueryClient, R: NameResolver> App<C, R> {
    pub fn new(client: C, resolver: Option<R>, settings: Settings) -> Self {
        Self {
            fetcher: SnapshotFetcher::new(client, settings.analysis.clone()),
            resolver,
            settings,
        }
    }

    /// Deployment report: allocations, signal changes and upgrades.
    pub async fn subgraph_report(&self, ipfs_hash: &str, hours: i64, now: DateTime<Utc>) -> Result<ReportModel> {
        let snapshot = self.fetcher.fetch_subgraph(ipfs_hash, now, hours).await?;
        self.report(ReportKind::Subgraph, ipfs_hash.to_string(), snapshot, hours, now)
            .await
    }

    /// Indexer report: stake, allocation health, rewards and delegation activity.
    ///
    /// `indexer` is an address or an ENS name.
    pub async fn indexer_report(&self, indexer: &str, hours: i64, now: DateTime<Utc>) -> Result<ReportModel> {
        let indexer = self.resolve_subject(indexer).await?;
        let snapshot = self.fetcher.fetch_indexer(&indexer, now, hours).await?;
        self.report(ReportKind::Indexer, indexer, snapshot, hours, now).await
    }

    /// Delegator report: positions, profit and thawing tokens.
    ///
    /// `delegator` is an address or an ENS name.
    pub async fn delegator_report(&self, delegator: &str, hours: i64, now: DateTime<Utc>) -> Result<ReportModel> {
        let delegator = self.resolve_subject(delegator).await?;
        let snapshot = self.fetcher.fetch_delegator(&delegator, now, hours).await?;
        self.report(ReportKind::Delegator, delegator, snapshot, hours, now)
            .await
    }

    async fn report(
        &self,
        kind: ReportKind,
        subject: String,
        snapshot: Snapshot,
        hours: i64,
        now: DateTime<Utc>,
    ) -> Result<ReportModel> {
        let analysis = &self.settings.analysis;
        let (aliases, name_resolution_failure) = self.resolve_aliases(&snapshot.addresses()).await;

        let Snapshot {
            deployments,
            allocations,
            signals,
            delegations,
            holdings,
            stakes,
            network,
            other_allocations,
            other_deployments,
            mut warnings,
        } = snapshot;

        let reconciled = reconcile(
            ReconcileInput {
                allocations,
                signals,
                delegations,
            },
            &stakes,
            now,
            &ReconcileParams::new(hours, analysis),
        )?;

        let params = MetricsParams::from_settings(analysis);
        let deployment_index: HashMap<String, DeploymentState> = deployments
            .iter()
            .chain(other_deployments.iter())
            .map(|d| (d.deployment_id.clone(), d.clone()))
            .collect();
        // metrics cover every active allocation of an indexer, not just those in the report
        let metric_allocations: Vec<AllocationEvent> = reconciled
            .allocations
            .iter()
            .chain(other_allocations.iter())
            .cloned()
            .collect();

        let mut indexers: Vec<IndexerMetrics> = Vec::with_capacity(stakes.len());
        for stake in &stakes {
            let (metrics, metric_warnings) = indexer_metrics(
                stake,
                &metric_allocations,
                &deployment_index,
                network.as_ref(),
                reconciled.window_start,
                &params,
            );
            indexers.push(metrics);
            warnings.extend(metric_warnings);
        }

        let delegators = match kind {
            ReportKind::Subgraph => Default::default(),
            ReportKind::Indexer | ReportKind::Delegator => accumulated_profit(
                &reconciled.delegations,
                &holdings,
                &stakes,
                now,
                params.default_thawing_period,
            ),
        };

        if !warnings.is_empty() || !reconciled.warnings.is_empty() {
            warn!(
                "{} records degraded or dropped, see report warnings",
                warnings.len() + reconciled.warnings.len()
            );
        }

        let report = build_report(ReportInput {
            kind,
            subject,
            now,
            window_hours: hours,
            deployments: &deployments,
            stakes: &stakes,
            reconciled: &reconciled,
            indexers,
            delegators,
            warnings: &warnings,
            aliases,
            name_resolution_failure,
            highlighted: self.settings.my_indexer_id.clone(),
        });

        info!(
            "Built {:?} report for {}: {} timeline entries, {} warnings",
            report.metadata.kind,
            report.metadata.subject,
            report.timeline.len(),
            report.warnings.len()
        );

        Ok(report)
    }

    /// Address of a report subject given as an address or an ENS name.
    async fn resolve_subject(&self, subject: &str) -> Result<String> {
        if looks_like_address(subject) {
            return Ok(normalize_address(subject));
        }
        let Some(resolver) = &self.resolver else {
            return Err(ReportError::UnknownName(subject.trim().to_string()));
        };
        match resolver.lookup(subject).await? {
            Some(address) => {
                info!("Resolved {} to {}", subject.trim(), address);
                Ok(address)
            },
            None => Err(ReportError::UnknownName(subject.trim().to_string())),
        }
    }

    /// Alias lookup never fails a report; a failed lookup is returned as a message.
    async fn resolve_aliases(&self, addresses: &[String]) -> (HashMap<String, String>, Option<String>) {
        let Some(resolver) = &self.resolver else {
            return (HashMap::new(), None);
        };
        match resolver.resolve(addresses).await {
            Ok(aliases) => (aliases, None),
            Err(e) => {
                warn!("ENS resolution failed: {}", e);
                (HashMap::new(), Some(format!("ENS name resolution failed: {}", e)))
            },
        }
    }
}

/// Map a fatal pipeline error to a short hint for the user.
pub fn error_hint(err: &ReportError) -> Option<&'static str> {
    match err {
        ReportError::InvalidWindow(_) => Some("--hours must be a positive number"),
        ReportError::TransportFailure(_) => Some("check THEGRAPH_NETWORK_SUBGRAPH_URL and network access"),
        ReportError::UnknownName(_) => Some("pass a 0x address or a registered ENS name (ENS_SUBGRAPH_URL)"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockClient;
    use crate::config::AnalysisSettings;
    use crate::models::{Marker, WarningKind};
    use bigdecimal::BigDecimal;
    use chrono::TimeZone;
    use serde_json::{json, Value};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap()
    }

    fn settings() -> Settings {
        Settings {
            network_subgraph_url: "http://localhost:8000/subgraphs/name/graph-network".to_string(),
            ens_subgraph_url: None,
            my_indexer_id: Some("0xindexer".to_string()),
            request_timeout_secs: 30,
            analysis: AnalysisSettings::default(),
        }
    }

    struct FailingResolver;

    impl NameResolver for FailingResolver {
        async fn resolve(&self, _addresses: &[String]) -> Result<HashMap<String, String>> {
            Err(ReportError::TransportFailure("ens down".to_string()))
        }

        async fn lookup(&self, _name: &str) -> Result<Option<String>> {
            Err(ReportError::TransportFailure("ens down".to_string()))
        }
    }

    /// Knows a single name.
    struct StaticResolver;

    impl NameResolver for StaticResolver {
        async fn resolve(&self, _addresses: &[String]) -> Result<HashMap<String, String>> {
            Ok([("0xindexer".to_string(), "indexer.eth".to_string())].into_iter().collect())
        }

        async fn lookup(&self, name: &str) -> Result<Option<String>> {
            Ok((name == "indexer").then(|| "0xindexer".to_string()))
        }
    }

    fn network_client() -> MockClient {
        MockClient::new(|query, variables| {
            let filter = &variables["where"];
            if query.contains("query Network") {
                Ok(json!({ "graphNetwork": {
                    "networkGRTIssuancePerBlock": "100000000000000000000",
                    "totalTokensSignalled": "1000000000000000000000",
                    "totalTokensAllocated": "720000000000000000000000",
                    "delegationRatio": 16,
                    "currentEpoch": 100
                }}))
            } else if query.contains("query Allocations") {
                let records: Vec<Value> = if filter.get("status").is_some() {
                    vec![json!({
                        "id": "0xa1",
                        "allocatedTokens": "40000000000000000000000",
                        "createdAt": 1735732800,
                        "closedAt": 0,
                        "indexer": { "id": "0xindexer" },
                        "subgraphDeployment": { "id": "0xdep" }
                    })]
                } else {
                    Vec::new()
                };
                Ok(json!({ "allocations": records }))
            } else if query.contains("query DelegatedStakes") {
                Ok(json!({ "delegatedStakes": [] }))
            } else if query.contains("query Indexers") {
                Ok(json!({ "indexers": [{
                    "id": "0xindexer",
                    "stakedTokens": "100000000000000000000000",
                    "delegatedTokens": "50000000000000000000000",
                    "allocatedTokens": "40000000000000000000000",
                    "delegatorShares": "50000000000000000000000",
                    "indexingRewardCut": 100000,
                    "queryFeeCut": 100000
                }]}))
            } else if query.contains("query Deployments") {
                Ok(json!({ "subgraphDeployments": [{
                    "id": "0xdep",
                    "ipfsHash": "QmDep",
                    "signalledTokens": "500000000000000000000",
                    "stakedTokens": "80000000000000000000000",
                    "versions": []
                }]}))
            } else {
                Err(ReportError::TransportFailure(format!("unexpected query {}", query)))
            }
        })
    }

    #[tokio::test]
    async fn test_indexer_report_end_to_end() {
        let app = App::new(network_client(), Some(FailingResolver), settings());
        let report = app.indexer_report("0xINDEXER", 48, now()).await.unwrap();

        assert_eq!(report.metadata.subject, "0xindexer");
        let metrics = &report.indexers["0xindexer"];
        assert!(metrics.highlighted);
        assert_eq!(metrics.active_allocations, 1);
        assert!(!metrics.over_allocated);
        assert!(metrics.unallocated.as_ref().unwrap().warning);
        assert!(metrics.reward_proportion.value().is_some());

        assert_eq!(report.timeline.len(), 1);
        assert!(matches!(report.timeline[0].marker, Marker::Opened { .. }));
        assert!(report.timeline[0].highlighted);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::NameResolution));
    }

    /// One indexer with equal allocations on four identical deployments.
    fn spread_client() -> MockClient {
        MockClient::new(|query, variables| {
            let filter = &variables["where"];
            let deployment = |id: &str| {
                json!({
                    "id": id,
                    "ipfsHash": format!("Qm{}", id),
                    "signalledTokens": "250000000000000000000",
                    "stakedTokens": "10000000000000000000000",
                    "versions": []
                })
            };
            if query.contains("query Network") {
                Ok(json!({ "graphNetwork": {
                    "networkGRTIssuancePerBlock": "1000000000000000000",
                    "totalTokensSignalled": "1000000000000000000000",
                    "totalTokensAllocated": "40000000000000000000000",
                    "delegationRatio": 16,
                    "currentEpoch": 100
                }}))
            } else if query.contains("query Deployment(") {
                Ok(json!({ "subgraphDeployments": [deployment("0xd1")] }))
            } else if query.contains("query Deployments") {
                let ids = filter["id_in"].as_array().cloned().unwrap_or_default();
                let found: Vec<Value> = ids.iter().filter_map(Value::as_str).map(deployment).collect();
                Ok(json!({ "subgraphDeployments": found }))
            } else if query.contains("query Allocations") {
                if filter.get("closedAt_gte").is_some() {
                    return Ok(json!({ "allocations": [] }));
                }
                let records: Vec<Value> = ["0xd1", "0xd2", "0xd3", "0xd4"]
                    .into_iter()
                    .filter(|d| filter.get("subgraphDeployment").map_or(true, |f| f.as_str() == Some(*d)))
                    .filter(|d| filter.get("subgraphDeployment_not").map_or(true, |f| f.as_str() != Some(*d)))
                    .map(|d| {
                        json!({
                            "id": format!("0xa-{}", d),
                            "allocatedTokens": "10000000000000000000000",
                            "createdAt": 1735689600,
                            "closedAt": 0,
                            "indexer": { "id": "0xindexer" },
                            "subgraphDeployment": { "id": d }
                        })
                    })
                    .collect();
                Ok(json!({ "allocations": records }))
            } else if query.contains("query Indexers") {
                Ok(json!({ "indexers": [{
                    "id": "0xindexer",
                    "stakedTokens": "40000000000000000000000",
                    "delegatedTokens": "0",
                    "allocatedTokens": "40000000000000000000000",
                    "delegatorShares": "0",
                    "indexingRewardCut": 100000,
                    "queryFeeCut": 100000
                }]}))
            } else {
                Ok(json!({ "signalTransactions": [], "delegatedStakes": [] }))
            }
        })
    }

    #[tokio::test]
    async fn test_subgraph_report_uses_all_indexer_allocations() {
        let app: App<_, FailingResolver> = App::new(spread_client(), None, settings());
        let subgraph = app.subgraph_report("Qm0xd1", 48, now()).await.unwrap();
        let indexer = app.indexer_report("0xindexer", 48, now()).await.unwrap();

        let from_subgraph = &subgraph.indexers["0xindexer"];
        let from_indexer = &indexer.indexers["0xindexer"];
        assert_eq!(from_subgraph.active_allocations, 4);
        assert_eq!(from_subgraph.instant_apr, from_indexer.instant_apr);
        assert_eq!(from_subgraph.reward_proportion, from_indexer.reward_proportion);
        assert_eq!(
            from_subgraph.reward_proportion.value().map(|v| v.round(2)),
            Some(BigDecimal::from(100))
        );

        // the timeline still only covers the queried deployment
        assert_eq!(subgraph.timeline.len(), 1);
        assert_eq!(subgraph.deployments.len(), 1);
    }

    #[tokio::test]
    async fn test_indexer_report_by_name() {
        let app = App::new(network_client(), Some(StaticResolver), settings());
        let report = app.indexer_report("indexer", 48, now()).await.unwrap();
        assert_eq!(report.metadata.subject, "0xindexer");
        assert_eq!(report.display_name("0xindexer"), "indexer.eth");

        let err = app.indexer_report("stranger", 48, now()).await.unwrap_err();
        assert_eq!(err, ReportError::UnknownName("stranger".to_string()));
        assert!(err.is_fatal());
        assert!(error_hint(&err).is_some());

        let no_ens: App<_, StaticResolver> = App::new(network_client(), None, settings());
        assert!(matches!(
            no_ens.delegator_report("indexer", 48, now()).await,
            Err(ReportError::UnknownName(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_window_is_fatal() {
        let app: App<_, FailingResolver> = App::new(network_client(), None, settings());
        let err = app.indexer_report("0xindexer", 0, now()).await.unwrap_err();
        assert_eq!(err, ReportError::InvalidWindow(0));
        assert!(error_hint(&err).is_some());
    }
}
