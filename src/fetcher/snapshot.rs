use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde_json::{json, Value};

use super::parser::{
    parse_allocation, parse_delegated_stake, parse_deployment, parse_deployment_with_versions,
    parse_indexer, parse_network, parse_signal_transaction, EpochClock,
};
use super::queries::{
    ALLOCATIONS_QUERY, DELEGATED_STAKES_QUERY, DEPLOYMENTS_QUERY, DEPLOYMENT_QUERY, INDEXERS_QUERY,
    NETWORK_QUERY, PAGE_SIZE, SIGNAL_TRANSACTIONS_QUERY,
};
use crate::client::QueryClient;
use crate::config::AnalysisSettings;
use crate::error::{ReportError, Result};
use crate::models::{
    AllocationEvent, DelegationEvent, DelegationHolding, DeploymentState, NetworkState,
    SignalEvent, StakeSnapshot,
};
use crate::utils::{normalize_address, validate_window_hours};

/// Upper bound on pages fetched for a single list query
const MAX_PAGES: usize = 50;

/// Delegation ratio assumed when the network entity is unavailable
const DEFAULT_DELEGATION_RATIO: u32 = 16;

/// Raw records for one report run, as returned by the subgraph.
///
/// Records may be duplicated (the same allocation seen by two queries) and unsorted;
/// the reconciler sorts that out.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub deployments: Vec<DeploymentState>,
    pub allocations: Vec<AllocationEvent>,
    pub signals: Vec<SignalEvent>,
    pub delegations: Vec<DelegationEvent>,
    pub holdings: Vec<DelegationHolding>,
    pub stakes: Vec<StakeSnapshot>,
    pub network: Option<NetworkState>,
    /// Active allocations of the listed indexers outside the report's own deployments.
    /// They feed indexer metrics only, never the timeline.
    pub other_allocations: Vec<AllocationEvent>,
    /// Deployments behind `other_allocations`
    pub other_deployments: Vec<DeploymentState>,
    /// Records that could not be parsed
    pub warnings: Vec<ReportError>,
}

impl Snapshot {
    /// Every address appearing in the records, for alias resolution.
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses = BTreeSet::new();
        for a in &self.allocations {
            addresses.insert(a.indexer_address.clone());
        }
        for s in &self.signals {
            addresses.insert(s.curator_address.clone());
        }
        for d in &self.delegations {
            addresses.insert(d.delegator_address.clone());
            addresses.insert(d.indexer_address.clone());
        }
        for s in &self.stakes {
            addresses.insert(s.indexer_address.clone());
        }
        addresses.into_iter().collect()
    }
}

/// Fetches current state and windowed history from the network subgraph.
pub struct SnapshotFetcher<C> {
    client: C,
    settings: AnalysisSettings,
}

impl<C: QueryClient> SnapshotFetcher<C> {
    pub fn new(client: C, settings: AnalysisSettings) -> Self {
        Self { client, settings }
    }

    /// Snapshot for one deployment (looked up by IPFS hash): its allocations, the
    /// signal history of every version of its subgraph, and the involved indexers with
    /// all of their active allocations.
    pub async fn fetch_subgraph(
        &self,
        ipfs_hash: &str,
        now: DateTime<Utc>,
        hours: i64,
    ) -> Result<Snapshot> {
        let start = std::time::Instant::now();
        let since = window_start(now, hours)?;
        let mut warnings = Vec::new();

        let data = self
            .client
            .query(DEPLOYMENT_QUERY, json!({ "ipfsHash": ipfs_hash }))
            .await?;
        let raw = data
            .get("subgraphDeployments")
            .and_then(Value::as_array)
            .and_then(|list| list.first())
            .ok_or_else(|| ReportError::TransportFailure(format!("deployment {} not found", ipfs_hash)))?;
        let (deployment, siblings) = parse_deployment_with_versions(raw)?;

        let mut deployment_ids: Vec<String> = vec![deployment.deployment_id.clone()];
        deployment_ids.extend(siblings.iter().map(|d| d.deployment_id.clone()));

        let (active, closed, signals, network) = tokio::try_join!(
            self.fetch_list(
                ALLOCATIONS_QUERY,
                "allocations",
                json!({ "subgraphDeployment": deployment.deployment_id, "status": "Active" }),
            ),
            self.fetch_list(
                ALLOCATIONS_QUERY,
                "allocations",
                json!({ "subgraphDeployment": deployment.deployment_id, "closedAt_gte": since.timestamp() }),
            ),
            self.fetch_list(
                SIGNAL_TRANSACTIONS_QUERY,
                "signalTransactions",
                json!({
                    "timestamp_gte": since.timestamp(),
                    "signal_": { "subgraphDeployment_in": deployment_ids }
                }),
            ),
            self.fetch_network(),
        )?;

        let network = parse_network_entry(network, &mut warnings);
        let allocations = parse_all(active.iter().chain(closed.iter()), parse_allocation, &mut warnings);
        let signals = parse_all(signals.iter(), parse_signal_transaction, &mut warnings);

        let indexer_ids: BTreeSet<String> =
            allocations.iter().map(|a| a.indexer_address.clone()).collect();
        let (indexers_raw, other_raw) = tokio::try_join!(
            self.fetch_indexers_raw(&indexer_ids),
            self.fetch_other_allocations(&indexer_ids, &deployment.deployment_id),
        )?;
        let stakes = parse_indexers(&indexers_raw, network.as_ref(), &mut warnings);
        let other_allocations = parse_all(other_raw.iter(), parse_allocation, &mut warnings);

        let mut deployments = vec![deployment];
        deployments.extend(siblings);

        let other_ids: BTreeSet<String> = other_allocations
            .iter()
            .map(|a| a.subgraph_deployment_id.clone())
            .filter(|id| !deployments.iter().any(|d| &d.deployment_id == id))
            .collect();
        let other_raw = self.fetch_deployments(&other_ids).await?;
        // siblings of the queried deployment are already in `deployments`
        let other_deployments = parse_all(other_raw.iter(), parse_deployment, &mut warnings);

        info!(
            "Fetched deployment {}: {} allocations, {} signal changes, {} indexers in {:?}",
            ipfs_hash,
            allocations.len(),
            signals.len(),
            stakes.len(),
            start.elapsed()
        );

        Ok(Snapshot {
            deployments,
            allocations,
            signals,
            stakes,
            network,
            other_allocations,
            other_deployments,
            warnings,
            ..Default::default()
        })
    }

    /// Snapshot for one indexer: stake, allocations, recent delegation activity and the
    /// deployments its active allocations point at.
    pub async fn fetch_indexer(
        &self,
        indexer: &str,
        now: DateTime<Utc>,
        hours: i64,
    ) -> Result<Snapshot> {
        let start = std::time::Instant::now();
        let since = window_start(now, hours)?;
        let indexer = normalize_address(indexer);
        let mut warnings = Vec::new();

        let (network, active, closed, delegated, undelegated) = tokio::try_join!(
            self.fetch_network(),
            self.fetch_list(
                ALLOCATIONS_QUERY,
                "allocations",
                json!({ "indexer": indexer, "status": "Active" }),
            ),
            self.fetch_list(
                ALLOCATIONS_QUERY,
                "allocations",
                json!({ "indexer": indexer, "closedAt_gte": since.timestamp() }),
            ),
            self.fetch_list(
                DELEGATED_STAKES_QUERY,
                "delegatedStakes",
                json!({ "indexer": indexer, "lastDelegatedAt_gte": since.timestamp() }),
            ),
            self.fetch_list(
                DELEGATED_STAKES_QUERY,
                "delegatedStakes",
                json!({ "indexer": indexer, "lastUndelegatedAt_gte": since.timestamp() }),
            ),
        )?;

        let network = parse_network_entry(network, &mut warnings);
        let allocations = parse_all(active.iter().chain(closed.iter()), parse_allocation, &mut warnings);
        let clock = self.epoch_clock(now, network.as_ref());
        let (holdings, delegations) =
            parse_stakes(delegated.iter().chain(undelegated.iter()), &clock, &mut warnings);

        let ids: BTreeSet<String> = [indexer.clone()].into_iter().collect();
        let deployment_ids: BTreeSet<String> = allocations
            .iter()
            .filter(|a| !a.is_closed())
            .map(|a| a.subgraph_deployment_id.clone())
            .collect();

        let (stakes, deployments) = tokio::try_join!(
            self.fetch_indexers_raw(&ids),
            self.fetch_deployments(&deployment_ids),
        )?;
        let stakes = parse_indexers(&stakes, network.as_ref(), &mut warnings);
        let deployments = parse_all(deployments.iter(), parse_deployment, &mut warnings);

        if stakes.is_empty() {
            return Err(ReportError::TransportFailure(format!("indexer {} not found", indexer)));
        }

        info!(
            "Fetched indexer {}: {} allocations, {} delegation events in {:?}",
            indexer,
            allocations.len(),
            delegations.len(),
            start.elapsed()
        );

        Ok(Snapshot {
            deployments,
            allocations,
            delegations,
            holdings,
            stakes,
            network,
            warnings,
            ..Default::default()
        })
    }

    /// Snapshot for one delegator: all its delegated stakes, the indexers behind them and
    /// their active allocations (for APR).
    pub async fn fetch_delegator(
        &self,
        delegator: &str,
        now: DateTime<Utc>,
        hours: i64,
    ) -> Result<Snapshot> {
        let start = std::time::Instant::now();
        window_start(now, hours)?;
        let delegator = normalize_address(delegator);
        let mut warnings = Vec::new();

        let (network, stakes_raw) = tokio::try_join!(
            self.fetch_network(),
            self.fetch_list(
                DELEGATED_STAKES_QUERY,
                "delegatedStakes",
                json!({ "delegator": delegator }),
            ),
        )?;

        let network = parse_network_entry(network, &mut warnings);
        let clock = self.epoch_clock(now, network.as_ref());
        let (holdings, delegations) = parse_stakes(stakes_raw.iter(), &clock, &mut warnings);

        let indexer_ids: BTreeSet<String> =
            holdings.iter().map(|h| h.indexer_address.clone()).collect();

        let (indexers_raw, active_raw) = tokio::try_join!(
            self.fetch_indexers_raw(&indexer_ids),
            self.fetch_list(
                ALLOCATIONS_QUERY,
                "allocations",
                json!({ "indexer_in": indexer_ids.iter().collect::<Vec<_>>(), "status": "Active" }),
            ),
        )?;
        let stakes = parse_indexers(&indexers_raw, network.as_ref(), &mut warnings);
        let allocations = parse_all(active_raw.iter(), parse_allocation, &mut warnings);

        let deployment_ids: BTreeSet<String> =
            allocations.iter().map(|a| a.subgraph_deployment_id.clone()).collect();
        let deployments_raw = self.fetch_deployments(&deployment_ids).await?;
        let deployments = parse_all(deployments_raw.iter(), parse_deployment, &mut warnings);

        info!(
            "Fetched delegator {}: {} positions, {} indexers in {:?}",
            delegator,
            holdings.len(),
            stakes.len(),
            start.elapsed()
        );

        Ok(Snapshot {
            deployments,
            allocations,
            delegations,
            holdings,
            stakes,
            network,
            warnings,
            ..Default::default()
        })
    }

    // ============================================
    // Query helpers
    // ============================================

    /// Run a list query page by page using an `id_gt` cursor.
    async fn fetch_list(&self, query: &str, key: &str, filter: Value) -> Result<Vec<Value>> {
        let mut records: Vec<Value> = Vec::new();
        let mut last_id: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut filter = filter.clone();
            if let (Some(map), Some(last)) = (filter.as_object_mut(), &last_id) {
                map.insert("id_gt".to_string(), Value::String(last.clone()));
            }

            let data = self.client.query(query, json!({ "where": filter })).await?;
            let page = match data.get(key) {
                Some(Value::Array(items)) => items.clone(),
                Some(Value::Null) | None => Vec::new(),
                Some(other) => {
                    return Err(ReportError::TransportFailure(format!(
                        "unexpected {} payload: {}",
                        key, other
                    )))
                },
            };

            let page_len = page.len();
            last_id = page
                .last()
                .and_then(|r| r.get("id"))
                .and_then(Value::as_str)
                .map(String::from);
            records.extend(page);

            if page_len < PAGE_SIZE || last_id.is_none() {
                debug!("{}: {} records", key, records.len());
                return Ok(records);
            }
        }

        warn!("{}: stopped after {} pages ({} records)", key, MAX_PAGES, records.len());
        Ok(records)
    }

    /// Raw `graphNetwork` entity; parsed by [`parse_network_entry`] once warnings can be collected.
    async fn fetch_network(&self) -> Result<Option<Value>> {
        let data = self.client.query(NETWORK_QUERY, json!({})).await?;
        Ok(data.get("graphNetwork").filter(|raw| !raw.is_null()).cloned())
    }

    /// Active allocations of `indexers` on any deployment but `deployment_id`.
    async fn fetch_other_allocations(
        &self,
        indexers: &BTreeSet<String>,
        deployment_id: &str,
    ) -> Result<Vec<Value>> {
        if indexers.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch_list(
            ALLOCATIONS_QUERY,
            "allocations",
            json!({
                "indexer_in": indexers.iter().collect::<Vec<_>>(),
                "status": "Active",
                "subgraphDeployment_not": deployment_id
            }),
        )
        .await
    }

    async fn fetch_indexers_raw(&self, ids: &BTreeSet<String>) -> Result<Vec<Value>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch_list(INDEXERS_QUERY, "indexers", json!({ "id_in": ids.iter().collect::<Vec<_>>() }))
            .await
    }

    async fn fetch_deployments(&self, ids: &BTreeSet<String>) -> Result<Vec<Value>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch_list(
            DEPLOYMENTS_QUERY,
            "subgraphDeployments",
            json!({ "id_in": ids.iter().collect::<Vec<_>>() }),
        )
        .await
    }

    fn epoch_clock(&self, now: DateTime<Utc>, network: Option<&NetworkState>) -> EpochClock {
        EpochClock {
            now,
            current_epoch: network.map(|n| n.current_epoch),
            epoch_duration_secs: self.settings.epoch_duration_secs,
        }
    }
}

fn window_start(now: DateTime<Utc>, hours: i64) -> Result<DateTime<Utc>> {
    validate_window_hours(hours).ok_or(ReportError::InvalidWindow(hours))?;
    Duration::try_hours(hours)
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or(ReportError::InvalidWindow(hours))
}

fn parse_all<'a, T, I, F>(records: I, parse: F, warnings: &mut Vec<ReportError>) -> Vec<T>
where
    I: Iterator<Item = &'a Value>,
    F: Fn(&Value) -> Result<T>,
{
    records
        .filter_map(|raw| match parse(raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping record: {}", e);
                warnings.push(e);
                None
            },
        })
        .collect()
}

/// A missing network entity is not an error; a malformed one is reported and dropped.
fn parse_network_entry(raw: Option<Value>, warnings: &mut Vec<ReportError>) -> Option<NetworkState> {
    parse_all(raw.iter(), parse_network, warnings).pop()
}

fn parse_indexers(
    raw: &[Value],
    network: Option<&NetworkState>,
    warnings: &mut Vec<ReportError>,
) -> Vec<StakeSnapshot> {
    let ratio = network.map(|n| n.delegation_ratio).unwrap_or(DEFAULT_DELEGATION_RATIO);
    parse_all(raw.iter(), |v| parse_indexer(v, ratio), warnings)
}

/// Delegated stakes can show up in both windowed queries; holdings are kept once per entity.
fn parse_stakes<'a, I>(
    raw: I,
    clock: &EpochClock,
    warnings: &mut Vec<ReportError>,
) -> (Vec<DelegationHolding>, Vec<DelegationEvent>)
where
    I: Iterator<Item = &'a Value>,
{
    let mut seen = BTreeSet::new();
    let mut holdings = Vec::new();
    let mut events = Vec::new();

    for (holding, mut stake_events) in parse_all(raw, |v| parse_delegated_stake(v, clock), warnings) {
        // events are de-duplicated by the reconciler, holdings have no entity id of their own
        if seen.insert((holding.delegator_address.clone(), holding.indexer_address.clone())) {
            holdings.push(holding);
        }
        events.append(&mut stake_events);
    }

    (holdings, events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockClient;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap()
    }

    fn allocation(id: &str, closed_at: Option<i64>) -> Value {
        json!({
            "id": id,
            "allocatedTokens": "1000000000000000000000",
            "createdAt": 1735689600,
            "closedAt": closed_at,
            "poi": closed_at.map(|_| "0xbeef"),
            "indexer": { "id": "0xindexer" },
            "subgraphDeployment": { "id": "0xdep" }
        })
    }

    fn network() -> Value {
        json!({
            "networkGRTIssuancePerBlock": "100000000000000000000",
            "totalTokensSignalled": "1000000000000000000000",
            "totalTokensAllocated": "7200000000000000000000000",
            "delegationRatio": 16,
            "currentEpoch": 100
        })
    }

    fn indexer() -> Value {
        json!({
            "id": "0xindexer",
            "stakedTokens": "100000000000000000000000",
            "delegatedTokens": "50000000000000000000000",
            "allocatedTokens": "40000000000000000000000",
            "delegatorShares": "50000000000000000000000",
            "indexingRewardCut": 100000,
            "queryFeeCut": 100000
        })
    }

    fn subgraph_client() -> MockClient {
        MockClient::new(|query, variables| {
            let filter = &variables["where"];
            if query.contains("query Deployment(") {
                Ok(json!({ "subgraphDeployments": [{
                    "id": "0xdep",
                    "ipfsHash": "QmDep",
                    "signalledTokens": "1000000000000000000000",
                    "stakedTokens": "40000000000000000000000",
                    "versions": [{ "subgraph": { "id": "0xsg", "versions": [] } }]
                }]}))
            } else if query.contains("query Network") {
                Ok(json!({ "graphNetwork": network() }))
            } else if query.contains("query Allocations") {
                if filter.get("subgraphDeployment_not").is_some() {
                    let mut elsewhere = allocation("0xa9", None);
                    elsewhere["subgraphDeployment"] = json!({ "id": "0xother" });
                    Ok(json!({ "allocations": [elsewhere] }))
                } else if filter.get("status").is_some() {
                    Ok(json!({ "allocations": [allocation("0xa1", None), allocation("0xa2", None)] }))
                } else {
                    // 0xa2 closed between the two queries: seen twice
                    Ok(json!({ "allocations": [allocation("0xa2", Some(1735696800)), json!({ "id": "0xbad" })] }))
                }
            } else if query.contains("query SignalTransactions") {
                Ok(json!({ "signalTransactions": [] }))
            } else if query.contains("query Indexers") {
                Ok(json!({ "indexers": [indexer()] }))
            } else if query.contains("query Deployments") {
                Ok(json!({ "subgraphDeployments": [{
                    "id": "0xother",
                    "ipfsHash": "QmOther",
                    "signalledTokens": "1000000000000000000000",
                    "stakedTokens": "1000000000000000000000"
                }]}))
            } else {
                Err(ReportError::TransportFailure(format!("unexpected query {}", query)))
            }
        })
    }

    #[tokio::test]
    async fn test_fetch_subgraph_collects_records_and_warnings() {
        let fetcher = SnapshotFetcher::new(subgraph_client(), AnalysisSettings::default());
        let snapshot = fetcher.fetch_subgraph("QmDep", now(), 48).await.unwrap();

        assert_eq!(snapshot.deployments.len(), 1);
        assert_eq!(snapshot.deployments[0].subgraph_id.as_deref(), Some("0xsg"));
        // duplicates are kept here; the reconciler collapses them
        assert_eq!(snapshot.allocations.len(), 3);
        assert_eq!(snapshot.stakes.len(), 1);
        assert!(snapshot.network.is_some());
        assert_eq!(snapshot.warnings.len(), 1);
        assert!(matches!(snapshot.warnings[0], ReportError::MalformedRecord { .. }));
        assert_eq!(snapshot.addresses(), vec!["0xindexer".to_string()]);

        // allocations elsewhere stay out of the deployment's own records
        assert_eq!(snapshot.other_allocations.len(), 1);
        assert_eq!(snapshot.other_allocations[0].subgraph_deployment_id, "0xother");
        assert_eq!(snapshot.other_deployments.len(), 1);
        assert!(snapshot.allocations.iter().all(|a| a.subgraph_deployment_id == "0xdep"));
    }

    #[tokio::test]
    async fn test_malformed_network_is_a_warning() {
        let client = MockClient::new(|query, _| {
            if query.contains("query Network") {
                Ok(json!({ "graphNetwork": { "currentEpoch": "soon" } }))
            } else if query.contains("query DelegatedStakes") {
                Ok(json!({ "delegatedStakes": [{
                    "id": "0xdel-0xindexer",
                    "shareAmount": "100000000000000000000",
                    "stakedTokens": "100000000000000000000",
                    "unstakedTokens": "50000000000000000000",
                    "lockedTokens": "50000000000000000000",
                    "lockedUntil": 900,
                    "createdAt": 1735000000,
                    "lastUndelegatedAt": 1735700000,
                    "delegator": { "id": "0xdel" },
                    "indexer": { "id": "0xindexer" }
                }]}))
            } else if query.contains("query Indexers") {
                Ok(json!({ "indexers": [indexer()] }))
            } else {
                Ok(json!({ "allocations": [], "subgraphDeployments": [] }))
            }
        });
        let fetcher = SnapshotFetcher::new(client, AnalysisSettings::default());
        let snapshot = fetcher.fetch_delegator("0xdel", now(), 48).await.unwrap();

        assert!(snapshot.network.is_none());
        assert_eq!(snapshot.warnings.len(), 1);
        assert!(matches!(&snapshot.warnings[0], ReportError::MalformedRecord { entity, .. } if entity == "graphNetwork"));
        // no epoch to anchor lockedUntil: the thawing period default applies later
        let undelegation = snapshot
            .delegations
            .iter()
            .find(|e| e.kind == crate::models::DelegationKind::Undelegated)
            .unwrap();
        assert_eq!(undelegation.thaw_end, None);
    }

    #[tokio::test]
    async fn test_fetch_rejects_empty_window() {
        let fetcher = SnapshotFetcher::new(subgraph_client(), AnalysisSettings::default());
        let err = fetcher.fetch_subgraph("QmDep", now(), 0).await.unwrap_err();
        assert_eq!(err, ReportError::InvalidWindow(0));
        assert_eq!(fetcher.client.calls(), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_is_fatal() {
        let fetcher = SnapshotFetcher::new(
            MockClient::new(|_, _| Err(ReportError::TransportFailure("timeout".into()))),
            AnalysisSettings::default(),
        );
        let err = fetcher.fetch_indexer("0xindexer", now(), 24).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_fetch_list_pages_with_cursor() {
        let client = MockClient::new(|_, variables| {
            let after = variables["where"]["id_gt"].as_str().map(String::from);
            let start = match after {
                None => 0,
                Some(last) => last.trim_start_matches("0x").parse::<usize>().unwrap() + 1,
            };
            let end = (start + PAGE_SIZE).min(2500);
            let page: Vec<Value> = (start..end).map(|i| json!({ "id": format!("0x{:06}", i) })).collect();
            Ok(json!({ "indexers": page }))
        });
        let fetcher = SnapshotFetcher::new(client, AnalysisSettings::default());

        let records = fetcher
            .fetch_list(INDEXERS_QUERY, "indexers", json!({ "id_in": ["0x1"] }))
            .await
            .unwrap();

        assert_eq!(records.len(), 2500);
        assert_eq!(fetcher.client.calls(), 3);
    }
}
