//! GraphQL documents sent to the network subgraph.
//!
//! List queries take a typed `$where` filter and are paged by the fetcher with an
//! `id_gt` cursor, so they must order by `id`.

/// Max entities per page (graph-node limit)
pub const PAGE_SIZE: usize = 1000;

pub const DEPLOYMENT_QUERY: &str = r#"
query Deployment($ipfsHash: String!) {
    subgraphDeployments(where: { ipfsHash: $ipfsHash }, first: 1) {
        id
        ipfsHash
        signalledTokens
        stakedTokens
        versions(first: 1, orderBy: createdAt, orderDirection: desc) {
            subgraph {
                id
                versions(first: 20, orderBy: createdAt, orderDirection: desc) {
                    subgraphDeployment {
                        id
                        ipfsHash
                        signalledTokens
                        stakedTokens
                    }
                }
            }
        }
    }
}
"#;

pub const DEPLOYMENTS_QUERY: &str = r#"
query Deployments($where: SubgraphDeployment_filter!) {
    subgraphDeployments(where: $where, first: 1000, orderBy: id, orderDirection: asc) {
        id
        ipfsHash
        signalledTokens
        stakedTokens
        versions(first: 1, orderBy: createdAt, orderDirection: desc) {
            subgraph { id }
        }
    }
}
"#;

pub const ALLOCATIONS_QUERY: &str = r#"
query Allocations($where: Allocation_filter!) {
    allocations(where: $where, first: 1000, orderBy: id, orderDirection: asc) {
        id
        allocatedTokens
        createdAt
        closedAt
        status
        poi
        indexingRewards
        indexer { id }
        subgraphDeployment { id }
    }
}
"#;

pub const SIGNAL_TRANSACTIONS_QUERY: &str = r#"
query SignalTransactions($where: SignalTransaction_filter!) {
    signalTransactions(where: $where, first: 1000, orderBy: id, orderDirection: asc) {
        id
        type
        tokens
        timestamp
        signer { id }
        signal {
            subgraphDeployment {
                id
                versions(first: 1, orderBy: createdAt, orderDirection: desc) {
                    subgraph { id }
                }
            }
        }
    }
}
"#;

pub const INDEXERS_QUERY: &str = r#"
query Indexers($where: Indexer_filter!) {
    indexers(where: $where, first: 1000, orderBy: id, orderDirection: asc) {
        id
        stakedTokens
        delegatedTokens
        allocatedTokens
        delegatorShares
        indexingRewardCut
        queryFeeCut
    }
}
"#;

pub const DELEGATED_STAKES_QUERY: &str = r#"
query DelegatedStakes($where: DelegatedStake_filter!) {
    delegatedStakes(where: $where, first: 1000, orderBy: id, orderDirection: asc) {
        id
        shareAmount
        stakedTokens
        unstakedTokens
        lockedTokens
        lockedUntil
        createdAt
        lastDelegatedAt
        lastUndelegatedAt
        delegator { id }
        indexer { id }
    }
}
"#;

pub const NETWORK_QUERY: &str = r#"
query Network {
    graphNetwork(id: "1") {
        networkGRTIssuancePerBlock
        totalTokensSignalled
        totalTokensAllocated
        delegationRatio
        currentEpoch
    }
}
"#;
