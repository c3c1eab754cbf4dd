use std::future::Future;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::{ReportError, Result};

/// Executes GraphQL queries against one endpoint.
///
/// Returns the `data` object of the response. Any transport problem, HTTP error
/// status or GraphQL `errors` entry is a [`ReportError::TransportFailure`].
pub trait QueryClient: Send + Sync {
    fn query(&self, query: &str, variables: Value) -> impl Future<Output = Result<Value>> + Send;
}

#[derive(Serialize)]
struct GraphQLRequest<'a> {
    query: &'a str,
    variables: &'a Value,
}

#[derive(Debug, Deserialize)]
struct GraphQLResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQLErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct GraphQLErrorMessage {
    #[serde(default)]
    message: Option<String>,
}

/// HTTP GraphQL client for subgraph endpoints.
#[derive(Clone, Debug)]
pub struct GraphQLClient {
    url: Url,
    http: reqwest::Client,
}

/// Default timeout for a single query (30 seconds)
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

impl GraphQLClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url.trim_end_matches('/'))
            .map_err(|e| ReportError::TransportFailure(format!("invalid endpoint {}: {}", url, e)))?;

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { url, http })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl QueryClient for GraphQLClient {
    async fn query(&self, query: &str, variables: Value) -> Result<Value> {
        let start = std::time::Instant::now();

        let response = self
            .http
            .post(self.url.clone())
            .json(&GraphQLRequest {
                query,
                variables: &variables,
            })
            .send()
            .await?
            .error_for_status()?;

        let body: GraphQLResponse = response.json().await?;

        debug!("GraphQL query to {} answered in {:?}", self.url, start.elapsed());

        into_data(body)
    }
}

fn into_data(body: GraphQLResponse) -> Result<Value> {
    if !body.errors.is_empty() {
        let messages: Vec<String> = body
            .errors
            .into_iter()
            .map(|e| e.message.unwrap_or_else(|| "Unknown GraphQL error".to_string()))
            .collect();
        return Err(ReportError::TransportFailure(format!(
            "GraphQL error: {}",
            messages.join("; ")
        )));
    }

    body.data
        .ok_or_else(|| ReportError::TransportFailure("GraphQL response without data".to_string()))
}
