//! GraphQL transport over HTTPS.

use super::Query;
use crate::Result;
use crate::policy::{CallOutcome, RateLimitHeaders, classify_http_failure};
use crate::tokens::TokenPool;
use core::fmt::Debug;
use core::time::Duration;
use futures::future::BoxFuture;
use ohno::app_err;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tick::Clock;
use url::Url;

const LOG_TARGET: &str = "     graph";

/// Response path of the sub-query the upstream is known to time out on.
pub const FLAKY_PATH: [&str; 2] = ["repository", "dependencyGraphManifests"];

/// Error message the upstream reports for that timeout.
pub const FLAKY_MESSAGE: &str = "timedout";

/// Executes a rendered graph query and classifies the outcome.
pub trait GraphTransport: Send + Sync + Debug {
    fn execute<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, CallOutcome<Value>>;
}

#[derive(Debug, Deserialize)]
struct GraphResponse {
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphError>,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    message: String,
    #[serde(default)]
    path: Vec<Value>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl GraphError {
    fn is_flaky(&self) -> bool {
        self.message == FLAKY_MESSAGE && self.path.iter().map(Value::as_str).eq(FLAKY_PATH.iter().map(|s| Some(*s)))
    }
}

/// Client for the graph endpoint.
#[derive(Debug, Clone)]
pub struct GraphClient {
    client: reqwest::Client,
    url: Url,
    tokens: Arc<TokenPool>,
    clock: Clock,
}

impl GraphClient {
    pub fn new(url: Url, tokens: Arc<TokenPool>, clock: Clock, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("gh-harvest/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            url,
            tokens,
            clock,
        })
    }

    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    async fn post(&self, query: &Query) -> CallOutcome<Value> {
        let mut request = self
            .client
            .post(self.url.clone())
            .header(reqwest::header::ACCEPT, "application/vnd.github.hawkgirl-preview+json")
            .json(&json!({ "query": query.render() }));

        if let Some(token) = self.tokens.next_token() {
            request = request.bearer_auth(token);
        }

        let resp = match request.send().await {
            Ok(resp) => resp,
            Err(e) => return CallOutcome::Transient(app_err!("graph request to '{}' failed: {e}", self.url)),
        };

        let headers = RateLimitHeaders::from_headers(resp.headers(), self.clock.system_time().into());
        let status = resp.status();
        if !status.is_success() {
            log::debug!(target: LOG_TARGET, "Graph endpoint answered {status}");
            return classify_http_failure(status, &headers, self.url.as_str());
        }

        // A truncated body surfaces here and is worth another try
        let body = match resp.bytes().await {
            Ok(body) => body,
            Err(e) => return CallOutcome::Transient(app_err!("reading graph response body: {e}")),
        };

        match serde_json::from_slice::<GraphResponse>(&body) {
            Ok(response) => classify_graph_response(response, &headers),
            Err(e) => CallOutcome::Transient(app_err!("decoding graph response: {e}")),
        }
    }
}

impl GraphTransport for GraphClient {
    fn execute<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, CallOutcome<Value>> {
        Box::pin(self.post(query))
    }
}

fn classify_graph_response(response: GraphResponse, headers: &RateLimitHeaders) -> CallOutcome<Value> {
    if response.errors.is_empty() {
        return response
            .data
            .map_or_else(|| CallOutcome::Fatal(app_err!("graph response carried neither data nor errors")), CallOutcome::Success);
    }

    if response.errors.iter().any(|e| e.kind.as_deref() == Some("RATE_LIMITED")) {
        return CallOutcome::Throttled {
            reset_at: headers.resume_at(),
        };
    }

    if response.errors.iter().all(GraphError::is_flaky) {
        return CallOutcome::FlakyUpstream(app_err!(
            "upstream timed out resolving {}",
            FLAKY_PATH.join(".")
        ));
    }

    let messages: Vec<_> = response.errors.iter().map(|e| e.message.as_str()).collect();
    CallOutcome::Fatal(app_err!("graph query failed: {}", messages.join("; ")))
}

/// The `rateLimit` selection appended to queries when accounting is requested.
#[must_use]
pub fn rate_limit_field() -> super::Field {
    super::Field::new(crate::policy::RATE_LIMIT_KEY).select(["cost", "limit", "remaining", "resetAt", "nodeCount", "used"])
}
