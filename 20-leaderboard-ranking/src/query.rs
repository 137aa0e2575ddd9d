//! Builds the response view for a "get ranking" request.

use std::sync::Arc;

use tracing::warn;

use crate::error::{RankingError, Result};
use crate::model::{LeaderboardKey, MemberStanding, RankingRow, ScoreRange, Window};
use crate::store::ScoreStore;

/// Default number of rows returned to end-user ranking requests.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// A ranking request after transport-level validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingQuery {
    pub member: String,
    pub category: String,
    /// Suffix selecting one leaderboard of the category. `None` reads the
    /// active event ranking.
    pub scope: Option<String>,
    /// Server-to-server requests get the full board and no requester row.
    pub for_server: bool,
}

pub struct RankingQueryService {
    store: Arc<dyn ScoreStore>,
    page_size: usize,
    default_scope: String,
}

impl RankingQueryService {
    pub fn new(
        store: Arc<dyn ScoreStore>,
        page_size: usize,
        default_scope: impl Into<String>,
    ) -> Self {
        Self {
            store,
            page_size,
            default_scope: default_scope.into(),
        }
    }

    pub fn key_for(&self, query: &RankingQuery) -> LeaderboardKey {
        let scope = query.scope.as_deref().unwrap_or(&self.default_scope);
        LeaderboardKey::compose(&query.category, scope)
    }

    /// Returns the ranked rows for `query`.
    ///
    /// End-user requests always start with the requester's own row, followed
    /// by the public top-N. The requester may therefore appear twice. Ranked
    /// rows carry `1 + position` in the returned window.
    pub async fn execute(&self, query: &RankingQuery) -> Result<Vec<RankingRow>> {
        let key = self.key_for(query);
        let (range, window) = if query.for_server {
            (ScoreRange::NON_NEGATIVE, Window::Unlimited)
        } else {
            (ScoreRange::PUBLIC, Window::first_page(self.page_size))
        };
        let entries = self.store.range_descending(&key, range, window).await?;

        let mut rows = Vec::with_capacity(entries.len() + 1);
        if !query.for_server {
            let standing = self.standing(&key, &query.member).await;
            rows.push(RankingRow::new(
                query.member.clone(),
                standing.rank(),
                standing.score(),
            ));
        }

        rows.extend(entries.into_iter().enumerate().map(|(position, entry)| {
            let rank = i64::try_from(position + 1).unwrap_or(i64::MAX);
            RankingRow::new(entry.member, rank, entry.score)
        }));
        Ok(rows)
    }

    /// Looks up where `member` stands, independent of the ranged window.
    ///
    /// Missing members, non-positive scores and failed lookups all report as
    /// [`MemberStanding::Unranked`].
    pub async fn standing(&self, key: &LeaderboardKey, member: &str) -> MemberStanding {
        let lookup = async {
            let rank = self.store.get_rank(key, member).await?;
            let score = self.store.get_score(key, member).await?;
            Ok::<_, RankingError>(rank.zip(score))
        };

        match lookup.await {
            Ok(Some((rank, score))) if score > 0.0 => MemberStanding::Ranked {
                rank: rank + 1,
                score,
            },
            Ok(_) => MemberStanding::Unranked,
            Err(err) => {
                warn!(%key, member, error = %err, "member lookup failed; reporting unranked");
                MemberStanding::Unranked
            }
        }
    }
}
