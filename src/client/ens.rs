use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use log::debug;
use moka::future::Cache;
use serde_json::{json, Value};

use super::QueryClient;
use crate::error::Result;
use crate::utils::normalize_address;

/// Maps addresses to human-readable aliases and back.
pub trait NameResolver: Send + Sync {
    /// The returned map only contains addresses that have an alias; keys are lowercased.
    fn resolve(
        &self,
        addresses: &[String],
    ) -> impl Future<Output = Result<HashMap<String, String>>> + Send;

    /// Address behind a (possibly partial) name, `None` when nothing matches.
    fn lookup(&self, name: &str) -> impl Future<Output = Result<Option<String>>> + Send;
}

/// Max addresses per ENS subgraph query
const BATCH_SIZE: usize = 100;

/// How long answers (including "no name") are kept
const CACHE_TTL: Duration = Duration::from_secs(86_400);

const RESOLVE_ADDRESSES_QUERY: &str = r#"
query ResolveAddresses($addresses: [String!]!) {
    domains(where: { resolvedAddress_in: $addresses }, first: 1000) {
        name
        resolvedAddress { id }
    }
}
"#;

const RESOLVE_NAME_QUERY: &str = r#"
query ResolveName($name: String!) {
    domains(where: { name: $name }, first: 1) {
        name
        resolvedAddress { id }
    }
}
"#;

const SEARCH_NAME_QUERY: &str = r#"
query SearchName($search: String!) {
    domains(where: { name_contains: $search }, first: 20, orderBy: createdAt, orderDirection: desc) {
        name
        resolvedAddress { id }
    }
}
"#;

/// ENS lookups through an ENS subgraph.
pub struct EnsResolver<C> {
    client: C,
    /// `None` caches a negative answer
    cache: Cache<String, Option<String>>,
}

impl<C: QueryClient> EnsResolver<C> {
    pub fn new(client: C) -> Self {
        let cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(CACHE_TTL)
            .build();

        Self { client, cache }
    }

    async fn query_batch(&self, batch: &[String]) -> Result<HashMap<String, String>> {
        let data = self
            .client
            .query(RESOLVE_ADDRESSES_QUERY, json!({ "addresses": batch }))
            .await?;

        let mut names: HashMap<String, String> = HashMap::new();
        let domains = data.get("domains").and_then(Value::as_array);
        for domain in domains.into_iter().flatten() {
            let name = domain.get("name").and_then(Value::as_str);
            let address = domain
                .get("resolvedAddress")
                .and_then(|a| a.get("id"))
                .and_then(Value::as_str);

            if let (Some(name), Some(address)) = (name, address) {
                let address = normalize_address(address);
                // Several names can point at one address; keep the shortest for stable output
                let keep = match names.get(&address) {
                    Some(existing) => (name.len(), name) < (existing.len(), existing.as_str()),
                    None => true,
                };
                if keep {
                    names.insert(address, name.to_string());
                }
            }
        }

        Ok(names)
    }

    /// `(name, address)` of every domain in the answer that resolves to an address.
    async fn query_domains(&self, query: &str, variables: Value) -> Result<Vec<(String, String)>> {
        let data = self.client.query(query, variables).await?;
        let domains = data.get("domains").and_then(Value::as_array);

        Ok(domains
            .into_iter()
            .flatten()
            .filter_map(|domain| {
                let name = domain.get("name").and_then(Value::as_str)?;
                let address = domain
                    .get("resolvedAddress")
                    .and_then(|a| a.get("id"))
                    .and_then(Value::as_str)?;
                Some((name.to_lowercase(), normalize_address(address)))
            })
            .collect())
    }
}

/// Best partial match for `search`: a name continuing with `-` or `.` first, then any
/// name starting with it, then the most recent match.
fn best_match(search: &str, domains: &[(String, String)]) -> Option<String> {
    let separated = |name: &str| {
        name.strip_prefix(search)
            .is_some_and(|rest| rest.starts_with('-') || rest.starts_with('.'))
    };

    domains
        .iter()
        .find(|(name, _)| separated(name))
        .or_else(|| domains.iter().find(|(name, _)| name.starts_with(search)))
        .or_else(|| domains.first())
        .map(|(_, address)| address.clone())
}

impl<C: QueryClient> NameResolver for EnsResolver<C> {
    async fn resolve(&self, addresses: &[String]) -> Result<HashMap<String, String>> {
        let mut result = HashMap::new();
        let mut to_query: Vec<String> = Vec::new();

        for address in addresses {
            let address = normalize_address(address);
            if to_query.contains(&address) || result.contains_key(&address) {
                continue;
            }
            match self.cache.get(&address).await {
                Some(Some(name)) => {
                    result.insert(address, name);
                },
                Some(None) => {},
                None => to_query.push(address),
            }
        }

        if to_query.is_empty() {
            return Ok(result);
        }

        debug!("Resolving {} addresses via ENS", to_query.len());

        let batches = to_query.chunks(BATCH_SIZE).map(|batch| self.query_batch(batch));
        let answers = futures::future::try_join_all(batches).await?;

        for (batch, names) in to_query.chunks(BATCH_SIZE).zip(answers) {
            for address in batch {
                let name = names.get(address).cloned();
                self.cache.insert(address.clone(), name.clone()).await;
                if let Some(name) = name {
                    result.insert(address.clone(), name);
                }
            }
        }

        Ok(result)
    }

    async fn lookup(&self, name: &str) -> Result<Option<String>> {
        let name = name.trim().to_lowercase();
        if name.is_empty() {
            return Ok(None);
        }

        let mut candidates = vec![name.clone()];
        if !name.ends_with(".eth") {
            candidates.push(format!("{}.eth", name));
        }
        for candidate in &candidates {
            let exact = self
                .query_domains(RESOLVE_NAME_QUERY, json!({ "name": candidate }))
                .await?;
            if let Some((_, address)) = exact.into_iter().next() {
                debug!("ENS name {} resolves to {}", candidate, address);
                return Ok(Some(address));
            }
        }

        let matches = self
            .query_domains(SEARCH_NAME_QUERY, json!({ "search": name }))
            .await?;
        Ok(best_match(&name, &matches))
    }
}
