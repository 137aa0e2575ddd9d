//! Ordered-score storage for leaderboards.
//!
//! [`ScoreStore`] is the typed surface the engine talks to: sorted-set style
//! reads and writes for leaderboards plus plain set operations for key groups.
//! [`MemoryStore`] implements it in-process.
//!
//! # Ordering
//!
//! Entries are ordered by score descending. Equal scores are ordered by member
//! identifier in descending byte order, matching the reverse range of a Redis
//! sorted set. `get_rank` and `range_descending` share this order.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{RankingError, Result};
use crate::model::{Entry, LeaderboardKey, ScoreRange, Window};

/// Typed operations over a sorted-set capable backing store.
///
/// Leaderboards and key groups share one keyspace: `delete_key` removes
/// whichever kind of value lives under the key, and using a key as the wrong
/// kind is a [`RankingError::WrongType`] failure.
#[async_trait]
pub trait ScoreStore: Send + Sync {
    /// Adds `delta` to the member's score, creating the leaderboard or member
    /// when absent, and returns the new score. Atomic per store instance.
    async fn increment_score(
        &self,
        key: &LeaderboardKey,
        member: &str,
        delta: f64,
    ) -> Result<f64>;

    /// Overwrites the member's score unconditionally.
    async fn set_score(&self, key: &LeaderboardKey, member: &str, score: f64) -> Result<()>;

    /// Removes the value stored under `key`, returning how many keys were removed.
    async fn delete_key(&self, key: &str) -> Result<u64>;

    async fn get_score(&self, key: &LeaderboardKey, member: &str) -> Result<Option<f64>>;

    /// Zero-based position from the top, or `None` when the member is absent.
    async fn get_rank(&self, key: &LeaderboardKey, member: &str) -> Result<Option<u64>>;

    /// Entries with a score inside `range`, highest first, cut to `window`.
    async fn range_descending(
        &self,
        key: &LeaderboardKey,
        range: ScoreRange,
        window: Window,
    ) -> Result<Vec<Entry>>;

    async fn add_to_group(&self, group: &str, member: &str) -> Result<()>;

    async fn group_members(&self, group: &str) -> Result<BTreeSet<String>>;
}

/// In-process [`ScoreStore`].
///
/// A single mutex guards the whole keyspace, so every operation (including
/// increments) is atomic with respect to every other call on the same store.
#[derive(Default)]
pub struct MemoryStore {
    keyspace: Mutex<Keyspace>,
}

#[derive(Default)]
struct Keyspace {
    sorted: HashMap<String, SortedSet>,
    sets: HashMap<String, BTreeSet<String>>,
}

impl Keyspace {
    fn sorted_mut(&mut self, key: &str) -> Result<&mut SortedSet> {
        if self.sets.contains_key(key) {
            return Err(wrong_type(key));
        }
        Ok(self.sorted.entry(key.to_string()).or_default())
    }

    fn sorted(&self, key: &str) -> Result<Option<&SortedSet>> {
        if self.sets.contains_key(key) {
            return Err(wrong_type(key));
        }
        Ok(self.sorted.get(key))
    }

    fn set_mut(&mut self, key: &str) -> Result<&mut BTreeSet<String>> {
        if self.sorted.contains_key(key) {
            return Err(wrong_type(key));
        }
        Ok(self.sets.entry(key.to_string()).or_default())
    }
}

fn wrong_type(key: &str) -> RankingError {
    RankingError::WrongType(key.to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Keyspace>> {
        self.keyspace
            .lock()
            .map_err(|_| RankingError::store("keyspace lock poisoned"))
    }
}

#[async_trait]
impl ScoreStore for MemoryStore {
    async fn increment_score(
        &self,
        key: &LeaderboardKey,
        member: &str,
        delta: f64,
    ) -> Result<f64> {
        let mut keyspace = self.lock()?;
        let set = keyspace.sorted_mut(key.as_str())?;
        let current = set.score(member).unwrap_or(0.0);
        let next = current + delta;
        if next.is_nan() {
            return Err(RankingError::store("resulting score is not a number"));
        }
        set.insert(member, next);
        Ok(next)
    }

    async fn set_score(&self, key: &LeaderboardKey, member: &str, score: f64) -> Result<()> {
        if score.is_nan() {
            return Err(RankingError::store("score is not a valid float"));
        }
        let mut keyspace = self.lock()?;
        keyspace.sorted_mut(key.as_str())?.insert(member, score);
        Ok(())
    }

    async fn delete_key(&self, key: &str) -> Result<u64> {
        let mut keyspace = self.lock()?;
        let removed = keyspace.sorted.remove(key).is_some() || keyspace.sets.remove(key).is_some();
        Ok(u64::from(removed))
    }

    async fn get_score(&self, key: &LeaderboardKey, member: &str) -> Result<Option<f64>> {
        let keyspace = self.lock()?;
        Ok(keyspace
            .sorted(key.as_str())?
            .and_then(|set| set.score(member)))
    }

    async fn get_rank(&self, key: &LeaderboardKey, member: &str) -> Result<Option<u64>> {
        let keyspace = self.lock()?;
        Ok(keyspace
            .sorted(key.as_str())?
            .and_then(|set| set.rank(member)))
    }

    async fn range_descending(
        &self,
        key: &LeaderboardKey,
        range: ScoreRange,
        window: Window,
    ) -> Result<Vec<Entry>> {
        let keyspace = self.lock()?;
        let Some(set) = keyspace.sorted(key.as_str())? else {
            return Ok(Vec::new());
        };

        let matching = set
            .ordered
            .iter()
            .filter(|position| range.contains(position.score))
            .map(|position| Entry::new(position.member.clone(), position.score));

        let entries = match window {
            Window::Unlimited => matching.collect(),
            Window::Bounded { offset, limit } => matching.skip(offset).take(limit).collect(),
        };
        Ok(entries)
    }

    async fn add_to_group(&self, group: &str, member: &str) -> Result<()> {
        let mut keyspace = self.lock()?;
        keyspace.set_mut(group)?.insert(member.to_string());
        Ok(())
    }

    async fn group_members(&self, group: &str) -> Result<BTreeSet<String>> {
        let keyspace = self.lock()?;
        if keyspace.sorted.contains_key(group) {
            return Err(wrong_type(group));
        }
        Ok(keyspace.sets.get(group).cloned().unwrap_or_default())
    }
}

/// Wraps another store so that no call can stall the caller for longer than
/// `budget`. An expired call surfaces as [`RankingError::StoreTimeout`].
pub struct TimeoutStore {
    inner: Arc<dyn ScoreStore>,
    budget: Duration,
}

impl TimeoutStore {
    pub fn new(inner: Arc<dyn ScoreStore>, budget: Duration) -> Self {
        Self { inner, budget }
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        tokio::time::timeout(self.budget, call)
            .await
            .map_err(|_| RankingError::StoreTimeout(self.budget))?
    }
}

#[async_trait]
impl ScoreStore for TimeoutStore {
    async fn increment_score(
        &self,
        key: &LeaderboardKey,
        member: &str,
        delta: f64,
    ) -> Result<f64> {
        self.bounded(self.inner.increment_score(key, member, delta))
            .await
    }

    async fn set_score(&self, key: &LeaderboardKey, member: &str, score: f64) -> Result<()> {
        self.bounded(self.inner.set_score(key, member, score)).await
    }

    async fn delete_key(&self, key: &str) -> Result<u64> {
        self.bounded(self.inner.delete_key(key)).await
    }

    async fn get_score(&self, key: &LeaderboardKey, member: &str) -> Result<Option<f64>> {
        self.bounded(self.inner.get_score(key, member)).await
    }

    async fn get_rank(&self, key: &LeaderboardKey, member: &str) -> Result<Option<u64>> {
        self.bounded(self.inner.get_rank(key, member)).await
    }

    async fn range_descending(
        &self,
        key: &LeaderboardKey,
        range: ScoreRange,
        window: Window,
    ) -> Result<Vec<Entry>> {
        self.bounded(self.inner.range_descending(key, range, window))
            .await
    }

    async fn add_to_group(&self, group: &str, member: &str) -> Result<()> {
        self.bounded(self.inner.add_to_group(group, member)).await
    }

    async fn group_members(&self, group: &str) -> Result<BTreeSet<String>> {
        self.bounded(self.inner.group_members(group)).await
    }
}

/// Members indexed both by identifier and by leaderboard position.
#[derive(Default)]
struct SortedSet {
    scores: HashMap<String, f64>,
    ordered: BTreeSet<Position>,
}

impl SortedSet {
    fn score(&self, member: &str) -> Option<f64> {
        self.scores.get(member).copied()
    }

    fn insert(&mut self, member: &str, score: f64) {
        if let Some(previous) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&Position {
                score: previous,
                member: member.to_string(),
            });
        }
        self.ordered.insert(Position {
            score,
            member: member.to_string(),
        });
    }

    fn rank(&self, member: &str) -> Option<u64> {
        let score = self.score(member)?;
        let probe = Position {
            score,
            member: member.to_string(),
        };
        let ahead = self.ordered.range(..probe).count();
        u64::try_from(ahead).ok()
    }
}

/// Sort key whose ascending order is the leaderboard's top-down order.
#[derive(Debug, Clone)]
struct Position {
    score: f64,
    member: String,
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| other.member.cmp(&self.member))
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Position {}
