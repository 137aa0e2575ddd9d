use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by the ranking engine.
///
/// A member missing from a leaderboard is not represented here: point lookups
/// return `Ok(None)` and the query service reports such members as unranked.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RankingError {
    /// A request field was missing or malformed; no command was executed.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The backing store rejected a call.
    #[error("store error: {0}")]
    Store(String),

    /// A key was used as a leaderboard while holding a key group, or the
    /// other way round.
    #[error("WRONGTYPE operation against key '{0}' holding the wrong kind of value")]
    WrongType(String),

    /// A store call did not finish within the configured budget.
    #[error("store call timed out after {0:?}")]
    StoreTimeout(Duration),

    /// Rebuilding leaderboards from the system of record failed.
    #[error("startup load failed: {0}")]
    StartupLoad(String),

    /// The dispatcher has stopped and no longer accepts commands.
    #[error("ranking dispatcher is not running")]
    DispatcherClosed,
}

impl RankingError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_wrong_type(&self) -> bool {
        matches!(self, Self::WrongType(_))
    }
}

pub type Result<T, E = RankingError> = std::result::Result<T, E>;
