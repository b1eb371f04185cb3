use chrono::{DateTime, Utc};
use strum::{Display, IntoStaticStr};

/// Classified result of one outbound call.
///
/// Each transport (graph, REST, scrape) maps its raw response onto this type;
/// [`super::RetryPolicy`] then decides whether to wait, retry, or give up.
#[derive(Debug)]
pub enum CallOutcome<T> {
    /// The call succeeded.
    Success(T),

    /// Rate limited. Retry once the advertised reset time has passed.
    Throttled { reset_at: Option<DateTime<Utc>> },

    /// Transport hiccup (connection reset, truncated body, 5xx). Retry right away.
    Transient(ohno::AppError),

    /// The upstream is known to time out on one specific sub-query. Retry a bounded number of times.
    FlakyUpstream(ohno::AppError),

    /// Unrecoverable.
    Fatal(ohno::AppError),
}

/// The error taxonomy, without payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum FailureKind {
    Throttled,
    Transient,
    FlakyUpstream,
    Fatal,
}

impl<T> CallOutcome<T> {
    /// The failure class, or `None` on success.
    #[must_use]
    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success(_) => None,
            Self::Throttled { .. } => Some(FailureKind::Throttled),
            Self::Transient(_) => Some(FailureKind::Transient),
            Self::FlakyUpstream(_) => Some(FailureKind::FlakyUpstream),
            Self::Fatal(_) => Some(FailureKind::Fatal),
        }
    }

    /// Transform the success payload, leaving failures untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CallOutcome<U> {
        match self {
            Self::Success(v) => CallOutcome::Success(f(v)),
            Self::Throttled { reset_at } => CallOutcome::Throttled { reset_at },
            Self::Transient(e) => CallOutcome::Transient(e),
            Self::FlakyUpstream(e) => CallOutcome::FlakyUpstream(e),
            Self::Fatal(e) => CallOutcome::Fatal(e),
        }
    }
}
