//! End-to-end behaviour of the ranking dispatcher through its public handle.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use leaderboard_ranking::{
    config::EngineConfig,
    dispatcher::{self, DispatcherHandle, ScoreEvent},
    error::RankingError,
    groups::Cleared,
    loader::{SourceOfRecord, StaticSource},
    model::{AggregatedRow, Entry, LeaderboardKey, RankingRow, ScoreRange, Window},
    query::RankingQuery,
    store::{MemoryStore, ScoreStore},
};
use tokio::task::JoinHandle;

struct Harness {
    store: Arc<MemoryStore>,
    handle: DispatcherHandle,
    task: JoinHandle<Result<(), RankingError>>,
}

impl Harness {
    fn spawn(rows: Vec<AggregatedRow>) -> Self {
        Self::spawn_with(Arc::new(StaticSource::new(rows)), EngineConfig::default())
    }

    fn spawn_with(source: Arc<dyn SourceOfRecord>, config: EngineConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let (handle, task) = dispatcher::spawn(store.clone(), source, config);
        Self {
            store,
            handle,
            task,
        }
    }

    async fn record(&self, member: &str, category: &str, amount: f64) -> Result<f64> {
        let event = ScoreEvent::new(member, category, amount)?;
        Ok(self.handle.record_event(event).await?)
    }

    async fn ranking(
        &self,
        member: &str,
        category: &str,
        for_server: bool,
    ) -> Result<Vec<RankingRow>> {
        Ok(self
            .handle
            .query_ranking(RankingQuery {
                member: member.to_string(),
                category: category.to_string(),
                scope: None,
                for_server,
            })
            .await?)
    }

    async fn shutdown(self) -> Result<()> {
        self.handle.shutdown()?;
        self.task.await??;
        Ok(())
    }
}

fn row(member: &str, category: &str, amount: f64) -> AggregatedRow {
    AggregatedRow {
        member: member.to_string(),
        category: category.to_string(),
        amount,
    }
}

fn event_key(category: &str) -> LeaderboardKey {
    LeaderboardKey::compose(category, "ScoreKey")
}

#[tokio::test]
async fn increments_accumulate_into_one_entry() -> Result<()> {
    let harness = Harness::spawn(Vec::new());

    assert_eq!(harness.record("u1", "wins", 10.0).await?, 10.0);
    assert_eq!(harness.record("u1", "wins", 5.0).await?, 15.0);

    assert_eq!(harness.store.get_score(&event_key("wins"), "u1").await?, Some(15.0));
    let rows = harness.ranking("u1", "wins", false).await?;
    assert_eq!(
        rows,
        vec![RankingRow::new("u1", 1, 15.0), RankingRow::new("u1", 1, 15.0)]
    );

    harness.shutdown().await
}

#[tokio::test]
async fn record_then_query_sees_the_write_first() -> Result<()> {
    let harness = Harness::spawn(vec![row("u1", "wins", 20.0), row("u3", "wins", 1.0)]);
    harness.handle.rebuild().await?;

    harness.record("u2", "wins", 3.0).await?;
    let rows = harness.ranking("u2", "wins", false).await?;

    assert_eq!(rows[0], RankingRow::new("u2", 2, 3.0));
    assert_eq!(
        &rows[1..],
        &[
            RankingRow::new("u1", 1, 20.0),
            RankingRow::new("u2", 2, 3.0),
            RankingRow::new("u3", 3, 1.0),
        ]
    );

    harness.shutdown().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_never_lose_increments() -> Result<()> {
    let harness = Harness::spawn(Vec::new());

    let writers = (0..8).map(|writer| {
        let handle = harness.handle.clone();
        tokio::spawn(async move {
            for step in 0..25 {
                let amount = f64::from((writer + step) % 5 + 1);
                let event = ScoreEvent::new("u1", "wins", amount).expect("valid event");
                handle.record_event(event).await.expect("increment");
            }
        })
    });
    for joined in join_all(writers).await {
        joined?;
    }

    let expected: f64 = (0..8)
        .flat_map(|writer| (0..25).map(move |step| f64::from((writer + step) % 5 + 1)))
        .sum();
    assert_eq!(harness.store.get_score(&event_key("wins"), "u1").await?, Some(expected));

    harness.shutdown().await
}

#[tokio::test]
async fn server_requests_cover_the_whole_board_in_order() -> Result<()> {
    let rows: Vec<_> = (1..=150)
        .map(|n| row(&format!("m{n:03}"), "wins", f64::from(n % 40)))
        .collect();
    let harness = Harness::spawn(rows);
    harness.handle.rebuild().await?;

    let board = harness.ranking("", "wins", true).await?;
    let positive: BTreeSet<_> = (1..=150)
        .filter(|n| n % 40 >= 1)
        .map(|n| format!("m{n:03}"))
        .collect();
    let returned: BTreeSet<_> = board.iter().map(|row| row.uid.clone()).collect();
    assert!(positive.is_subset(&returned));

    for (index, pair) in board.windows(2).enumerate() {
        assert!(pair[0].point >= pair[1].point, "scores must not increase");
        assert_eq!(pair[0].rank, index as i64 + 1);
    }
    assert_eq!(board.last().map(|row| row.rank), Some(board.len() as i64));

    let page = harness.ranking("m001", "wins", false).await?;
    assert_eq!(page.len(), 1 + 100);
    assert!(page[1..].iter().all(|row| row.point >= 1));

    harness.shutdown().await
}

#[tokio::test]
async fn unranked_requesters_report_sentinel_values() -> Result<()> {
    let harness = Harness::spawn(Vec::new());
    harness.record("u1", "wins", 4.0).await?;
    harness.record("u2", "wins", 2.0).await?;
    harness.record("u2", "wins", -2.0).await?;

    for member in ["u2", "nobody"] {
        let rows = harness.ranking(member, "wins", false).await?;
        assert_eq!(rows[0], RankingRow::new(member, -1, 0.0));
        assert_eq!(&rows[1..], &[RankingRow::new("u1", 1, 4.0)]);
    }

    harness.shutdown().await
}

#[tokio::test]
async fn clearing_a_group_empties_every_registered_board() -> Result<()> {
    let harness = Harness::spawn(Vec::new());
    harness.record("u1", "wins", 4.0).await?;
    harness.record("u1", "kills", 9.0).await?;
    let world = ScoreEvent::new("u1", "wins", 30.0)?;
    harness.handle.record_world_event(world).await?;

    let cleared = harness.handle.clear_by_key("ScoreKey").await?;
    assert_eq!(cleared, Cleared::Group { leaderboards: 2 });

    for category in ["wins", "kills"] {
        let rows = harness.ranking("u1", category, false).await?;
        assert_eq!(rows, vec![RankingRow::new("u1", -1, 0.0)]);
    }

    let world_rows = harness
        .handle
        .query_ranking(RankingQuery {
            member: "u1".into(),
            category: "wins".into(),
            scope: Some("WorldRanking".into()),
            for_server: true,
        })
        .await?;
    assert_eq!(world_rows, vec![RankingRow::new("u1", 1, 30.0)]);

    harness.shutdown().await
}

#[tokio::test]
async fn clearing_a_plain_key_deletes_only_that_board() -> Result<()> {
    let harness = Harness::spawn(Vec::new());
    harness.record("u1", "wins", 4.0).await?;
    harness.record("u1", "kills", 9.0).await?;

    let cleared = harness.handle.clear_by_key("wins|ScoreKey").await?;
    assert_eq!(cleared, Cleared::Key { deleted: 1 });
    assert_eq!(harness.store.get_score(&event_key("wins"), "u1").await?, None);
    assert_eq!(harness.store.get_score(&event_key("kills"), "u1").await?, Some(9.0));

    harness.shutdown().await
}

#[tokio::test]
async fn rebuild_is_idempotent_for_the_same_snapshot() -> Result<()> {
    let harness = Harness::spawn(vec![
        row("u1", "wins", 12.0),
        row("u2", "wins", 7.0),
        row("u2", "kills", 3.0),
    ]);

    let first = harness.handle.rebuild().await?;
    harness.record("u9", "wins", 50.0).await?;
    let second = harness.handle.rebuild().await?;
    assert_eq!(first.rows, second.rows);
    assert_eq!(second.cleared, 2);

    let board = harness
        .store
        .range_descending(&event_key("wins"), ScoreRange::NON_NEGATIVE, Window::Unlimited)
        .await?;
    assert_eq!(board, vec![Entry::new("u1", 12.0), Entry::new("u2", 7.0)]);

    harness.shutdown().await
}

struct FailingSource;

#[async_trait]
impl SourceOfRecord for FailingSource {
    async fn fetch_aggregates(&self) -> Result<Vec<AggregatedRow>, RankingError> {
        Err(RankingError::StartupLoad("database unreachable".into()))
    }
}

#[tokio::test]
async fn failed_rebuild_stops_the_dispatcher() -> Result<()> {
    let harness = Harness::spawn_with(Arc::new(FailingSource), EngineConfig::default());

    let err = harness.handle.rebuild().await.unwrap_err();
    assert!(matches!(err, RankingError::StartupLoad(_)));

    let stopped = harness.task.await?;
    assert!(matches!(stopped, Err(RankingError::StartupLoad(_))));

    let event = ScoreEvent::new("u1", "wins", 1.0)?;
    assert_eq!(
        harness.handle.record_event(event).await,
        Err(RankingError::DispatcherClosed)
    );
    Ok(())
}

#[tokio::test]
async fn failed_background_initialize_stops_the_dispatcher() -> Result<()> {
    let harness = Harness::spawn_with(Arc::new(FailingSource), EngineConfig::default());
    harness.handle.initialize()?;

    let queued = harness.ranking("u1", "wins", false).await;
    let err = queued.unwrap_err().downcast::<RankingError>()?;
    assert_eq!(err, RankingError::DispatcherClosed);

    let stopped = harness.task.await?;
    assert!(matches!(stopped, Err(RankingError::StartupLoad(_))));
    Ok(())
}

#[tokio::test]
async fn fire_and_forget_initialize_is_ordered_before_later_queries() -> Result<()> {
    let harness = Harness::spawn(vec![row("u1", "wins", 8.0)]);
    harness.handle.initialize()?;

    let rows = harness.ranking("u1", "wins", false).await?;
    assert_eq!(rows[0], RankingRow::new("u1", 1, 8.0));

    harness.shutdown().await
}

/// Store whose reads hang forever while writes go to memory.
struct HangingReads {
    inner: MemoryStore,
}

#[async_trait]
impl ScoreStore for HangingReads {
    async fn increment_score(
        &self,
        key: &LeaderboardKey,
        member: &str,
        delta: f64,
    ) -> Result<f64, RankingError> {
        self.inner.increment_score(key, member, delta).await
    }
    async fn set_score(
        &self,
        key: &LeaderboardKey,
        member: &str,
        score: f64,
    ) -> Result<(), RankingError> {
        self.inner.set_score(key, member, score).await
    }
    async fn delete_key(&self, key: &str) -> Result<u64, RankingError> {
        self.inner.delete_key(key).await
    }
    async fn get_score(&self, _: &LeaderboardKey, _: &str) -> Result<Option<f64>, RankingError> {
        std::future::pending().await
    }
    async fn get_rank(&self, _: &LeaderboardKey, _: &str) -> Result<Option<u64>, RankingError> {
        std::future::pending().await
    }
    async fn range_descending(
        &self,
        _: &LeaderboardKey,
        _: ScoreRange,
        _: Window,
    ) -> Result<Vec<Entry>, RankingError> {
        std::future::pending().await
    }
    async fn add_to_group(&self, group: &str, member: &str) -> Result<(), RankingError> {
        self.inner.add_to_group(group, member).await
    }
    async fn group_members(&self, group: &str) -> Result<BTreeSet<String>, RankingError> {
        self.inner.group_members(group).await
    }
}

#[tokio::test]
async fn stalled_store_calls_become_failures_and_the_loop_keeps_going() -> Result<()> {
    let store = Arc::new(HangingReads {
        inner: MemoryStore::new(),
    });
    let config = EngineConfig {
        store_timeout: Duration::from_millis(50),
        ..EngineConfig::default()
    };
    let (handle, task) = dispatcher::spawn(store, Arc::new(StaticSource::empty()), config);

    let query = RankingQuery {
        member: "u1".into(),
        category: "wins".into(),
        scope: None,
        for_server: false,
    };
    assert_eq!(
        handle.query_ranking(query).await,
        Err(RankingError::StoreTimeout(Duration::from_millis(50)))
    );

    let event = ScoreEvent::new("u1", "wins", 2.0)?;
    assert_eq!(handle.record_event(event).await, Ok(2.0));

    handle.shutdown()?;
    task.await??;
    Ok(())
}
