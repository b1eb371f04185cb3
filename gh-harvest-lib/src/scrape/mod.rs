//! Numbers only available on rendered web pages.

use crate::Result;
use crate::policy::{CallOutcome, RateLimitHeaders, RetryPolicy, classify_http_failure};
use core::time::Duration;
use ohno::{IntoAppError, app_err};
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

const LOG_TARGET: &str = "    scrape";

static TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("invalid regex"));

/// Fetches web pages through the shared [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct WebClient {
    client: reqwest::Client,
    base_url: Url,
    policy: RetryPolicy,
}

impl WebClient {
    pub fn new(base_url: Url, policy: RetryPolicy, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("gh-harvest/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self { client, base_url, policy })
    }

    /// Number of repositories depending on `owner/name`, read from the dependents page.
    pub async fn dependents(&self, owner: &str, name: &str) -> Result<u64> {
        let href = dependents_href(owner, name);
        let url = self
            .base_url
            .join(&href)
            .into_app_err_with(|| format!("invalid dependents URL for '{owner}/{name}'"))?;

        let web = self.clone();
        let target = url.clone();
        let page = self
            .policy
            .call(&format!("GET {url}"), move || {
                let web = web.clone();
                let target = target.clone();
                async move { web.fetch(&target).await }
            })
            .await?;
        let count = parse_dependents(&page, &href).ok_or_else(|| app_err!("no dependents count found on '{url}'"))?;

        log::debug!(target: LOG_TARGET, "'{owner}/{name}' has {count} dependent repositories");
        Ok(count)
    }

    async fn fetch(&self, url: &Url) -> CallOutcome<String> {
        let resp = match self.client.get(url.clone()).send().await {
            Ok(resp) => resp,
            Err(e) => return CallOutcome::Transient(app_err!("request to '{url}' failed: {e}")),
        };

        let status = resp.status();
        if !status.is_success() {
            let headers = RateLimitHeaders::from_headers(resp.headers(), self.policy.now());
            return classify_http_failure(status, &headers, url.as_str());
        }

        match resp.text().await {
            Ok(text) => CallOutcome::Success(text),
            Err(e) => CallOutcome::Transient(app_err!("reading '{url}': {e}")),
        }
    }
}

fn dependents_href(owner: &str, name: &str) -> String {
    format!("/{owner}/{name}/network/dependents?dependent_type=REPOSITORY")
}

/// Find the anchor linking to `href` and parse the leading number of its text,
/// e.g. `"1,234 Repositories"` yields 1234.
fn parse_dependents(html: &str, href: &str) -> Option<u64> {
    let anchor = Regex::new(&format!(r#"(?s)<a\b[^>]*\bhref="{}"[^>]*>(.*?)</a>"#, regex::escape(href))).ok()?;
    let inner = anchor.captures(html)?.get(1)?.as_str();
    let text = TAG_REGEX.replace_all(inner, " ");
    let first = text.split_whitespace().next()?;
    first.replace(',', "").parse().ok()
}
