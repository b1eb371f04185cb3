use crate::Result;
use crate::policy::RetryPolicy;
use crate::subjects::DEFAULT_PAGE_SIZE;
use camino::{Utf8Path, Utf8PathBuf};
use core::time::Duration;
use ohno::{IntoAppError, app_err};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use tick::Clock;
use url::Url;

const LOG_TARGET: &str = "    config";

/// The default configuration TOML content, embedded from `default_config.toml`
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../../default_config.toml");

/// File looked up in the working directory when no `--config` is given.
pub const CONFIG_FILE_NAME: &str = "harvest.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Endpoint receiving graph queries
    pub graphql_url: Url,

    /// Base URL of the REST API
    pub rest_url: Url,

    /// Base URL of the rendered web pages
    pub web_url: Url,

    /// Base URL repositories are cloned from
    pub clone_url: Url,

    /// Extra wait added on top of an advertised rate-limit reset
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,

    /// Wait used when a throttled response does not say when the limit resets
    #[serde(with = "humantime_serde")]
    pub throttle_fallback_wait: Duration,

    /// Retries of connection failures, 5xx responses, and undecodable bodies
    pub max_transient_retries: u32,

    /// Retries of the upstream's known dependency-manifest timeouts
    pub max_flaky_retries: u32,

    /// Give up after this many throttle waits on one call; unbounded when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_throttle_waits: Option<u32>,

    /// Timeout of one HTTP request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Timeout of one git command
    #[serde(with = "humantime_serde")]
    pub git_timeout: Duration,

    /// Items requested per connection page (1..=100)
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Without `--since`, only look this far back in time-ordered connections
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub lookback: Option<Duration>,
}

const fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl Config {
    /// Load configuration from a file or use defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub fn load(base_dir: &Utf8Path, config_path: Option<&Utf8PathBuf>) -> Result<Self> {
        let (final_path, text) = if let Some(path) = config_path {
            let text = fs::read_to_string(path).into_app_err_with(|| format!("reading gh-harvest configuration file '{path}'"))?;
            (path.clone(), text)
        } else {
            let path = base_dir.join(CONFIG_FILE_NAME);
            match fs::read_to_string(&path) {
                Ok(text) => (path, text),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    // No config file found, use defaults
                    return Ok(Self::default());
                }
                Err(e) => return Err(e).into_app_err_with(|| format!("reading gh-harvest configuration file '{path}'")),
            }
        };

        let config: Self = toml::from_str(&text).into_app_err_with(|| format!("parsing configuration file '{final_path}'"))?;
        config.validate()?;

        log::debug!(target: LOG_TARGET, "Loaded configuration from '{final_path}'");
        Ok(config)
    }

    /// Save the default configuration to a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written
    pub fn save_default(output_path: &Utf8Path) -> Result<()> {
        fs::write(output_path, DEFAULT_CONFIG_TOML).into_app_err_with(|| format!("writing default configuration to {output_path}"))?;
        Ok(())
    }

    /// The retry policy described by this configuration, sleeping on `clock`.
    #[must_use]
    pub fn retry_policy(&self, clock: Clock) -> RetryPolicy {
        RetryPolicy::new(clock)
            .with_grace_period(self.grace_period)
            .with_fallback_wait(self.throttle_fallback_wait)
            .with_max_transient_retries(self.max_transient_retries)
            .with_max_flaky_retries(self.max_flaky_retries)
            .with_max_throttle_waits(self.max_throttle_waits)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns an error if a URL is not HTTP(S) or a size or timeout is zero
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("graphql_url", &self.graphql_url),
            ("rest_url", &self.rest_url),
            ("web_url", &self.web_url),
            ("clone_url", &self.clone_url),
        ] {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(app_err!("{name} must be an http or https URL, got '{url}'"));
            }
        }

        if !(1..=100).contains(&self.page_size) {
            return Err(app_err!("page_size must be between 1 and 100, got {}", self.page_size));
        }

        if self.request_timeout.is_zero() {
            return Err(app_err!("request_timeout must not be zero"));
        }

        if self.git_timeout.is_zero() {
            return Err(app_err!("git_timeout must not be zero"));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG_TOML).expect("default_config.toml should be valid TOML that deserializes to Config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.page_size, 100);
        assert_eq!(config.grace_period, Duration::from_secs(5));
        assert_eq!(config.throttle_fallback_wait, Duration::from_secs(60));
        assert_eq!(config.max_transient_retries, 5);
        assert_eq!(config.max_flaky_retries, 20);
        assert_eq!(config.max_throttle_waits, None);
        assert_eq!(config.graphql_url.as_str(), "https://api.github.com/graphql");
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let config = Config { page_size: 0, ..Config::default() };
        assert!(config.validate().is_err());

        let config = Config { page_size: 101, ..Config::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_http_urls_are_rejected() {
        let config = Config {
            rest_url: Url::parse("ftp://example.com/").unwrap(),
            ..Config::default()
        };
        let msg = config.validate().unwrap_err().to_string();
        assert!(msg.contains("rest_url"));
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let config = Config {
            request_timeout: Duration::ZERO,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let text = format!("{DEFAULT_CONFIG_TOML}\nbogus = 1\n");
        assert!(toml::from_str::<Config>(&text).is_err());
    }

    #[test]
    fn durations_parse_from_humantime() {
        let text = DEFAULT_CONFIG_TOML.replace("grace_period = \"5s\"", "grace_period = \"1m 30s\"");
        let config: Config = toml::from_str(&format!("{text}\nlookback = \"90days\"\nmax_throttle_waits = 3\n")).unwrap();
        assert_eq!(config.grace_period, Duration::from_secs(90));
        assert_eq!(config.lookback, Some(Duration::from_secs(90 * 24 * 60 * 60)));
        assert_eq!(config.max_throttle_waits, Some(3));
    }

    #[tokio::test]
    async fn retry_policy_uses_configured_waits() {
        let config = Config {
            grace_period: Duration::from_secs(1),
            throttle_fallback_wait: Duration::from_secs(10),
            ..Config::default()
        };
        let policy = config.retry_policy(tick::Clock::new_tokio());
        assert_eq!(policy.throttle_wait(None), Duration::from_secs(11));
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn save_default_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let output_path = Utf8PathBuf::try_from(tmp.path().join(CONFIG_FILE_NAME)).unwrap();
        Config::save_default(&output_path).unwrap();
        let loaded = Config::load(&Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap(), Some(&output_path)).unwrap();
        loaded.validate().unwrap();
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn missing_config_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        let config = Config::load(&base, None).unwrap();
        assert_eq!(config.page_size, Config::default().page_size);
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn config_in_base_dir_is_found() {
        let tmp = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        let text = DEFAULT_CONFIG_TOML.replace("page_size = 100", "page_size = 25");
        fs::write(base.join(CONFIG_FILE_NAME), text).unwrap();

        let config = Config::load(&base, None).unwrap();
        assert_eq!(config.page_size, 25);
    }
}
