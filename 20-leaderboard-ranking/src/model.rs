//! Value types shared by the store, the query service and the transport.

use std::fmt;

use serde::{Deserialize, Serialize};

const KEY_SEPARATOR: char = '|';

/// Identifies one ordered leaderboard.
///
/// Keys are composed deterministically from a category and a scope (an
/// invalidation group such as `ScoreKey`, or a duration such as `daily`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaderboardKey(String);

impl LeaderboardKey {
    pub fn compose(category: &str, scope: &str) -> Self {
        Self(format!("{category}{KEY_SEPARATOR}{scope}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaderboardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for LeaderboardKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for LeaderboardKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

/// One member's score inside a leaderboard.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub member: String,
    pub score: f64,
}

impl Entry {
    pub fn new(member: impl Into<String>, score: f64) -> Self {
        Self {
            member: member.into(),
            score,
        }
    }
}

/// A `(member, category, summed amount)` triple produced by the system of record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRow {
    pub member: String,
    pub category: String,
    pub amount: f64,
}

/// Inclusive score bounds for a descending range read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRange {
    pub min: f64,
    pub max: f64,
}

impl ScoreRange {
    /// Scores visible on public leaderboards: `[1, +inf)`.
    pub const PUBLIC: ScoreRange = ScoreRange {
        min: 1.0,
        max: f64::INFINITY,
    };

    /// Every non-negative score: `[0, +inf)`.
    pub const NON_NEGATIVE: ScoreRange = ScoreRange {
        min: 0.0,
        max: f64::INFINITY,
    };

    pub fn contains(&self, score: f64) -> bool {
        score >= self.min && score <= self.max
    }
}

/// How many rows a range read may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// Every entry in the score range (export / server-to-server reads).
    Unlimited,
    /// A page of at most `limit` entries after skipping `offset`.
    Bounded { offset: usize, limit: usize },
}

impl Window {
    pub fn first_page(limit: usize) -> Self {
        Self::Bounded { offset: 0, limit }
    }
}

/// Where a member stands on a leaderboard.
///
/// Keeps "no usable score" distinct from a real rank until the view is
/// rendered, where it collapses to rank -1 / point 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MemberStanding {
    /// `rank` is 1-based from the top.
    Ranked { rank: u64, score: f64 },
    Unranked,
}

impl MemberStanding {
    pub const UNRANKED_RANK: i64 = -1;

    pub fn rank(&self) -> i64 {
        match self {
            Self::Ranked { rank, .. } => i64::try_from(*rank).unwrap_or(i64::MAX),
            Self::Unranked => Self::UNRANKED_RANK,
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            Self::Ranked { score, .. } => *score,
            Self::Unranked => 0.0,
        }
    }
}

/// One row of a ranking response as rendered for the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingRow {
    pub uid: String,
    pub rank: i64,
    pub point: u64,
}

impl RankingRow {
    pub fn new(uid: impl Into<String>, rank: i64, score: f64) -> Self {
        Self {
            uid: uid.into(),
            rank,
            point: score_to_point(score),
        }
    }
}

/// Scores are stored as floats; points are reported truncated and never negative.
fn score_to_point(score: f64) -> u64 {
    if score.is_nan() || score <= 0.0 {
        0
    } else {
        // `as` saturates at u64::MAX for out-of-range floats.
        score.trunc() as u64
    }
}
