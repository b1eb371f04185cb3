//! Client for the flat REST API.

use crate::Result;
use crate::policy::{CallOutcome, RateLimitHeaders, RetryPolicy, classify_http_failure};
use crate::tokens::TokenPool;
use core::time::Duration;
use ohno::{IntoAppError, app_err};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderValue, LINK};
use serde_json::Value;
use std::sync::Arc;
use url::Url;

const LOG_TARGET: &str = "      rest";

/// Upper bound on pages followed for one listing.
pub const MAX_PAGES: usize = 100;

/// One successful REST response: its body (`None` for 404) and the next-page link.
#[derive(Debug)]
struct RestResponse {
    body: Option<Value>,
    next: Option<Url>,
}

/// REST API client. Every call goes through the shared [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: Url,
    tokens: Arc<TokenPool>,
    policy: RetryPolicy,
}

impl RestClient {
    pub fn new(base_url: &Url, tokens: Arc<TokenPool>, policy: RetryPolicy, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("gh-harvest/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: with_trailing_slash(base_url),
            tokens,
            policy,
        })
    }

    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .into_app_err_with(|| format!("invalid REST path '{path}'"))
    }

    /// GET `path`, failing on 404.
    pub async fn get_json(&self, path: &str) -> Result<Value> {
        let url = self.endpoint(path)?;
        self.get_optional_url(&url)
            .await?
            .ok_or_else(|| app_err!("'{url}' was not found"))
    }

    /// GET `path`, mapping 404 to `None`.
    pub async fn get_optional(&self, path: &str) -> Result<Option<Value>> {
        let url = self.endpoint(path)?;
        self.get_optional_url(&url).await
    }

    async fn get_optional_url(&self, url: &Url) -> Result<Option<Value>> {
        let resp = self.call_with_retry(url).await?;
        Ok(resp.body)
    }

    async fn call_with_retry(&self, url: &Url) -> Result<RestResponse> {
        let client = self.clone();
        let target = url.clone();
        self.policy
            .call(&format!("GET {url}"), move || {
                let client = client.clone();
                let target = target.clone();
                async move { client.api_call(&target).await }
            })
            .await
    }

    /// GET `path` and follow `Link: rel="next"` headers, concatenating array pages.
    ///
    /// A 404 on the first page yields an empty list.
    pub async fn get_all_pages(&self, path: &str) -> Result<Vec<Value>> {
        let mut url = self.endpoint(path)?;
        let mut items = Vec::new();

        for page in 1..=MAX_PAGES {
            let resp = self.call_with_retry(&url).await?;

            let page_items = match resp.body {
                Some(Value::Array(page_items)) => page_items,
                Some(other) => return Err(app_err!("expected a list from '{url}', got {other}")),
                None => break,
            };

            if page_items.is_empty() {
                break;
            }
            items.extend(page_items);

            match resp.next {
                Some(next) => url = next,
                None => break,
            }

            if page == MAX_PAGES {
                log::debug!(target: LOG_TARGET, "Reached maximum page limit ({MAX_PAGES}) for '{path}' after {} items", items.len());
            }
        }

        Ok(items)
    }

    async fn api_call(&self, url: &Url) -> CallOutcome<RestResponse> {
        let mut request = self
            .client
            .get(url.clone())
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");

        if let Some(token) = self.tokens.next_token() {
            match HeaderValue::from_str(&format!("token {token}")) {
                Ok(mut auth_val) => {
                    auth_val.set_sensitive(true);
                    request = request.header(AUTHORIZATION, auth_val);
                }
                Err(e) => return CallOutcome::Fatal(app_err!("invalid API token: {e}")),
            }
        }

        let resp = match request.send().await {
            Ok(resp) => resp,
            Err(e) => return CallOutcome::Transient(app_err!("request to '{url}' failed: {e}")),
        };

        let headers = RateLimitHeaders::from_headers(resp.headers(), self.policy.now());
        if let Some(remaining) = headers.remaining {
            log::trace!(target: LOG_TARGET, "{remaining} REST requests remaining");
        }

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return CallOutcome::Success(RestResponse { body: None, next: None });
        }

        if !status.is_success() {
            return classify_http_failure(status, &headers, url.as_str());
        }

        let next = resp
            .headers()
            .get(LINK)
            .and_then(|h| h.to_str().ok())
            .and_then(parse_next_link);

        match resp.json::<Value>().await {
            Ok(body) => CallOutcome::Success(RestResponse { body: Some(body), next }),
            Err(e) => CallOutcome::Transient(app_err!("decoding response from '{url}': {e}")),
        }
    }
}

fn with_trailing_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        return url.clone();
    }

    let mut url = url.clone();
    let path = format!("{}/", url.path());
    url.set_path(&path);
    url
}

/// Extract the `rel="next"` target from a `Link` header.
fn parse_next_link(header: &str) -> Option<Url> {
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        if !params.split(';').any(|p| p.trim() == r#"rel="next""#) {
            return None;
        }

        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        Url::parse(target).ok()
    })
}
