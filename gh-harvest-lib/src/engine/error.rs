use super::ChannelKind;
use core::fmt::{Display, Formatter};

/// Where in the run a failure happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Preparing the run, before any worker started.
    Setup,

    /// A graph round trip or its follow-up rule evaluation.
    Pagination { round: usize },

    /// A queued task.
    Task { name: String },

    /// The worker itself stopped abnormally (panic or abort).
    Worker,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Pagination { round } => write!(f, "pagination round {round}"),
            Self::Task { name } => write!(f, "task '{name}'"),
            Self::Worker => write!(f, "worker"),
        }
    }
}

/// The first failure of an aggregation run, tagged with where it happened.
#[derive(Debug)]
pub struct AggregateError {
    pub channel: ChannelKind,
    pub phase: Phase,
    pub error: ohno::AppError,
}

impl AggregateError {
    #[must_use]
    pub const fn new(channel: ChannelKind, phase: Phase, error: ohno::AppError) -> Self {
        Self { channel, phase, error }
    }
}

impl Display for AggregateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} channel failed in {}: {:#}", self.channel, self.phase, self.error)
    }
}

impl core::error::Error for AggregateError {}
