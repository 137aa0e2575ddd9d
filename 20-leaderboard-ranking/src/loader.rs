//! Rebuilds event leaderboards from the system of record.
//!
//! A rebuild clears the event ranking group, reads every aggregated row and
//! replays it as an increment. Any failure aborts the rebuild; the caller is
//! expected to stop serving rather than expose a half-loaded leaderboard.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::error::{RankingError, Result};
use crate::groups::KeyGroupIndex;
use crate::model::{AggregatedRow, LeaderboardKey};

/// The authoritative data leaderboards are rebuilt from.
#[async_trait]
pub trait SourceOfRecord: Send + Sync {
    /// Returns every `(member, category, summed amount)` row. The loader reads
    /// the result fully; no pagination is assumed.
    async fn fetch_aggregates(&self) -> Result<Vec<AggregatedRow>>;
}

/// A fixed snapshot of aggregated rows.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    rows: Vec<AggregatedRow>,
}

impl StaticSource {
    pub fn new(rows: Vec<AggregatedRow>) -> Self {
        Self { rows }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SourceOfRecord for StaticSource {
    async fn fetch_aggregates(&self) -> Result<Vec<AggregatedRow>> {
        Ok(self.rows.clone())
    }
}

/// Reads a play-event export, one JSON object per line, and sums `value` per
/// `(uid, event_type)`.
///
/// ```text
/// {"uid": "u1", "event_type": "wins", "value": 3}
/// ```
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct PlayEvent {
    uid: String,
    event_type: String,
    value: f64,
}

impl JsonLinesSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SourceOfRecord for JsonLinesSource {
    async fn fetch_aggregates(&self) -> Result<Vec<AggregatedRow>> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|err| {
            RankingError::StartupLoad(format!("reading {}: {err}", self.path.display()))
        })?;

        let mut sums: BTreeMap<(String, String), f64> = BTreeMap::new();
        for (index, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let event: PlayEvent = serde_json::from_str(line).map_err(|err| {
                RankingError::StartupLoad(format!(
                    "{} line {}: {err}",
                    self.path.display(),
                    index + 1
                ))
            })?;
            *sums.entry((event.event_type, event.uid)).or_insert(0.0) += event.value;
        }

        Ok(sums
            .into_iter()
            .map(|((category, member), amount)| AggregatedRow {
                member,
                category,
                amount,
            })
            .collect())
    }
}

/// Outcome of a successful rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadReport {
    /// Leaderboards removed when the group was cleared.
    pub cleared: u64,
    /// Aggregated rows replayed.
    pub rows: usize,
    /// Distinct leaderboards written.
    pub leaderboards: usize,
}

pub struct BulkLoader {
    source: Arc<dyn SourceOfRecord>,
    group: String,
}

impl BulkLoader {
    pub fn new(source: Arc<dyn SourceOfRecord>, group: impl Into<String>) -> Self {
        Self {
            source,
            group: group.into(),
        }
    }

    /// Clears the group, then replays every aggregated row into it.
    ///
    /// Running this twice against the same snapshot leaves the same final state.
    pub async fn run(&self, groups: &KeyGroupIndex) -> Result<LoadReport> {
        let cleared = groups
            .clear_group(&self.group)
            .await
            .map_err(|err| startup_failure("clearing event rankings", err))?;
        info!(group = %self.group, cleared, "cleared event rankings before load");

        let rows = self
            .source
            .fetch_aggregates()
            .await
            .map_err(|err| startup_failure("fetching aggregated rows", err))?;

        let mut written = BTreeSet::new();
        for row in &rows {
            let key = LeaderboardKey::compose(&row.category, &self.group);
            groups
                .increment_in_group(&self.group, &key, &row.member, row.amount)
                .await
                .map_err(|err| {
                    startup_failure(&format!("replaying {} for {}", key, row.member), err)
                })?;
            written.insert(key);
        }

        let report = LoadReport {
            cleared,
            rows: rows.len(),
            leaderboards: written.len(),
        };
        info!(
            group = %self.group,
            rows = report.rows,
            leaderboards = report.leaderboards,
            "event rankings loaded"
        );
        Ok(report)
    }
}

fn startup_failure(stage: &str, err: RankingError) -> RankingError {
    match err {
        RankingError::StartupLoad(message) => RankingError::StartupLoad(message),
        other => RankingError::StartupLoad(format!("{stage}: {other}")),
    }
}
