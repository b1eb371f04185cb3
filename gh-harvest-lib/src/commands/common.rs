//! Processing logic shared by every harvest subcommand.

use super::config::Config;
use super::{Host, ProgressReporter};
use crate::Result;
use crate::graph::GraphClient;
use crate::progress::Progress;
use crate::rest::RestClient;
use crate::scrape::WebClient;
use crate::subjects::{self, Sources, Subject};
use crate::tokens::TokenPool;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::Args;
use clap::ValueEnum;
use core::time::Duration;
use ohno::IntoAppError;
use owo_colors::OwoColorize;
use std::fs;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tick::Clock;

const LOG_TARGET: &str = "   harvest";

/// Color mode configuration for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Always use colors
    Always,

    /// Never use colors
    Never,

    /// Use colors if the output is a terminal, otherwise don't use colors
    Auto,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// No logging output
    None,

    /// Only error messages
    Error,

    /// Warning and error messages
    Warn,

    /// Info, warning, and error messages
    Info,

    /// Debug, info, warning, and error messages
    Debug,

    /// Trace, debug, info, warning, and error messages
    Trace,
}

/// Arguments shared by every harvest subcommand
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// GitHub personal access token
    #[arg(long, value_name = "TOKEN", env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Comma-separated GitHub tokens, used in rotation instead of --github-token
    #[arg(long, value_name = "TOKENS", env = "GITHUB_TOKEN_LIST", hide_env_values = true)]
    pub github_token_list: Option<String>,

    /// Path to configuration file (default is `harvest.toml`)
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<Utf8PathBuf>,

    /// Only harvest pull requests, issues, and releases created after this date (YYYY-MM-DD or RFC 3339)
    #[arg(long, value_name = "DATE", value_parser = parse_since)]
    pub since: Option<DateTime<Utc>>,

    /// Include the graph API's rate-limit accounting in the result
    #[arg(long)]
    pub rate_limit: bool,

    /// Write the result tree to this file instead of the terminal
    #[arg(long, short = 'o', value_name = "PATH")]
    pub output: Option<Utf8PathBuf>,

    /// Control when to use colored output
    #[arg(long, value_name = "WHEN", default_value = "auto")]
    pub color: ColorMode,

    /// Set the logging level for diagnostic output
    #[arg(long, value_name = "LEVEL", default_value = "none", global = true)]
    pub log_level: LogLevel,
}

impl CommonArgs {
    fn token_pool(&self) -> TokenPool {
        if let Some(list) = &self.github_token_list {
            let pool = TokenPool::from_list(list);
            if !pool.is_empty() {
                return pool;
            }
        }

        match &self.github_token {
            Some(token) => TokenPool::new([token.as_str()]),
            None => TokenPool::anonymous(),
        }
    }

    fn since(&self, config: &Config, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.since.or_else(|| {
            config
                .lookback
                .and_then(|lookback| chrono::Duration::from_std(lookback).ok())
                .and_then(|lookback| now.checked_sub_signed(lookback))
        })
    }
}

fn parse_since(s: &str) -> core::result::Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|date| date.and_time(NaiveTime::MIN).and_utc())
        .map_err(|e| format!("invalid date '{s}' ({e}), expected YYYY-MM-DD or RFC 3339"))
}

fn use_colors(mode: ColorMode, is_terminal: bool) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => is_terminal,
    }
}

/// Initialize logger based on log level
pub fn init_logging(log_level: LogLevel) {
    let level = match log_level {
        LogLevel::None => return,
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    let env = env_logger::Env::default().filter_or("RUST_LOG", level);

    // A second initialization (e.g. several runs in one test process) is harmless
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(matches!(log_level, LogLevel::Debug | LogLevel::Trace))
        .try_init();
}

/// Harvest `subject` and write the result tree.
pub async fn harvest<H: Host>(host: &mut H, args: &CommonArgs, subject: &dyn Subject) -> Result<()> {
    init_logging(args.log_level);

    let config = Config::load(Utf8Path::new("."), args.config.as_ref())?;
    let tokens = Arc::new(args.token_pool());
    if tokens.is_empty() {
        log::warn!(target: LOG_TARGET, "No GitHub token given; the graph API will refuse anonymous queries");
    }

    let clock = Clock::new_tokio();
    let policy = config.retry_policy(clock.clone());

    let transport = Arc::new(GraphClient::new(
        config.graphql_url.clone(),
        Arc::clone(&tokens),
        clock,
        config.request_timeout,
    )?);

    let sources = Sources {
        rest: Arc::new(RestClient::new(&config.rest_url, tokens, policy.clone(), config.request_timeout)?),
        web: Arc::new(WebClient::new(config.web_url.clone(), policy.clone(), config.request_timeout)?),
        clone_url: config.clone_url.clone(),
        git_timeout: config.git_timeout,
        page_size: config.page_size,
        since: args.since(&config, policy.now()),
    };

    if let Some(since) = sources.since {
        log::info!(target: LOG_TARGET, "Harvesting items created since {}", since.to_rfc3339());
    }

    let delay = if args.log_level == LogLevel::None {
        Duration::from_millis(300)
    } else {
        Duration::from_hours(365 * 24)
    };

    let stderr_colors = {
        use std::io::{IsTerminal, stderr};
        use_colors(args.color, stderr().is_terminal())
    };

    let progress: Arc<dyn Progress> = Arc::new(ProgressReporter::new(delay, stderr_colors));

    let start = Instant::now();
    let tree = subjects::aggregate(subject, transport, policy, &sources, args.rate_limit, Some(progress)).await?;
    let elapsed = start.elapsed();

    let json = serde_json::to_string_pretty(&tree).into_app_err("serializing the result tree")?;

    match &args.output {
        Some(path) => {
            fs::write(path, format!("{json}\n")).into_app_err_with(|| format!("writing result to '{path}'"))?;

            let summary = format!("Harvested {subject} into '{path}' in {:.1}s", elapsed.as_secs_f64());
            if stderr_colors {
                let _ = writeln!(host.error(), "{}", summary.green());
            } else {
                let _ = writeln!(host.error(), "{summary}");
            }
        }
        None => {
            let _ = writeln!(host.output(), "{json}");
        }
    }

    Ok(())
}
