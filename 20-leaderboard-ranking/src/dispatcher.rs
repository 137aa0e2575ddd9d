//! The serialized command processor that owns all leaderboard state.
//!
//! Callers hold a cloneable [`DispatcherHandle`]. Each call builds a
//! [`Command`] carrying a one-shot response channel, pushes it onto an
//! unbounded queue and awaits the reply. A single task drains the queue and
//! runs each command to completion before taking the next one, so:
//!
//! - commands observe a global FIFO order (read-your-writes for every caller)
//! - a group clear can never interleave with an in-flight increment
//! - no locking is needed above the store
//!
//! Every command receives exactly one response, including when the
//! dispatcher stops while commands are still queued.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{RankingError, Result};
use crate::groups::{Cleared, KeyGroupIndex};
use crate::loader::{BulkLoader, LoadReport, SourceOfRecord};
use crate::model::{LeaderboardKey, RankingRow};
use crate::query::{RankingQuery, RankingQueryService};
use crate::store::{ScoreStore, TimeoutStore};

/// A validated score increment for one member in one category.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreEvent {
    member: String,
    category: String,
    amount: f64,
}

impl ScoreEvent {
    pub fn new(
        member: impl Into<String>,
        category: impl Into<String>,
        amount: f64,
    ) -> Result<Self> {
        let member = member.into();
        let category = category.into();
        if member.trim().is_empty() {
            return Err(RankingError::validation("uid is required"));
        }
        if category.trim().is_empty() {
            return Err(RankingError::validation("event type is required"));
        }
        if !amount.is_finite() {
            return Err(RankingError::validation(format!(
                "amount must be a finite number, got {amount}"
            )));
        }
        Ok(Self {
            member,
            category,
            amount,
        })
    }

    pub fn member(&self) -> &str {
        &self.member
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }
}

type Responder<T> = oneshot::Sender<Result<T>>;

/// Work accepted by the dispatcher.
///
/// Every variant except `Shutdown` carries its own response channel;
/// `InitializeFromSourceOfRecord` may omit it to run fire-and-forget.
#[derive(Debug)]
pub enum Command {
    InitializeFromSourceOfRecord {
        respond_to: Option<Responder<LoadReport>>,
    },
    RecordEvent {
        event: ScoreEvent,
        respond_to: Responder<f64>,
    },
    RecordWorldEvent {
        event: ScoreEvent,
        respond_to: Responder<f64>,
    },
    QueryRanking {
        query: RankingQuery,
        respond_to: Responder<Vec<RankingRow>>,
    },
    ClearByKey {
        name: String,
        respond_to: Responder<Cleared>,
    },
    Shutdown,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::InitializeFromSourceOfRecord { .. } => "initialize",
            Self::RecordEvent { .. } => "record_event",
            Self::RecordWorldEvent { .. } => "record_world_event",
            Self::QueryRanking { .. } => "query_ranking",
            Self::ClearByKey { .. } => "clear_by_key",
            Self::Shutdown => "shutdown",
        }
    }

    /// Answers the command with `err` without executing it.
    fn reject(self, err: RankingError) {
        match self {
            Self::InitializeFromSourceOfRecord { respond_to } => {
                if let Some(respond_to) = respond_to {
                    let _ = respond_to.send(Err(err));
                }
            }
            Self::RecordEvent { respond_to, .. } | Self::RecordWorldEvent { respond_to, .. } => {
                let _ = respond_to.send(Err(err));
            }
            Self::QueryRanking { respond_to, .. } => {
                let _ = respond_to.send(Err(err));
            }
            Self::ClearByKey { respond_to, .. } => {
                let _ = respond_to.send(Err(err));
            }
            Self::Shutdown => {}
        }
    }
}

/// Cloneable entry point for submitting commands.
#[derive(Clone, Debug)]
pub struct DispatcherHandle {
    request_tx: mpsc::UnboundedSender<Command>,
}

impl DispatcherHandle {
    /// Enqueues a command without waiting for its response.
    pub fn submit(&self, command: Command) -> Result<()> {
        self.request_tx
            .send(command)
            .map_err(|_| RankingError::DispatcherClosed)
    }

    async fn request<T>(&self, build: impl FnOnce(Responder<T>) -> Command) -> Result<T> {
        let (respond_to, response) = oneshot::channel();
        self.submit(build(respond_to))?;
        response.await.map_err(|_| RankingError::DispatcherClosed)?
    }

    /// Starts a rebuild from the system of record and returns immediately.
    ///
    /// A failed rebuild stops the dispatcher; the error is reported through
    /// the dispatcher task's join handle.
    pub fn initialize(&self) -> Result<()> {
        self.submit(Command::InitializeFromSourceOfRecord { respond_to: None })
    }

    /// Rebuilds from the system of record and waits for the outcome.
    pub async fn rebuild(&self) -> Result<LoadReport> {
        self.request(|respond_to| Command::InitializeFromSourceOfRecord {
            respond_to: Some(respond_to),
        })
        .await
    }

    /// Adds the event's amount to the member's event ranking and returns the new score.
    pub async fn record_event(&self, event: ScoreEvent) -> Result<f64> {
        self.request(|respond_to| Command::RecordEvent { event, respond_to })
            .await
    }

    /// Adds the event's amount to the member's world ranking and returns the new score.
    pub async fn record_world_event(&self, event: ScoreEvent) -> Result<f64> {
        self.request(|respond_to| Command::RecordWorldEvent { event, respond_to })
            .await
    }

    pub async fn query_ranking(&self, query: RankingQuery) -> Result<Vec<RankingRow>> {
        validate_query(&query)?;
        self.request(|respond_to| Command::QueryRanking { query, respond_to })
            .await
    }

    /// Clears a key group, or a single leaderboard key when `name` is not a group.
    pub async fn clear_by_key(&self, name: impl Into<String>) -> Result<Cleared> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RankingError::validation("ranking key is required"));
        }
        self.request(|respond_to| Command::ClearByKey { name, respond_to })
            .await
    }

    /// Asks the dispatcher to stop after the commands already queued.
    pub fn shutdown(&self) -> Result<()> {
        self.submit(Command::Shutdown)
    }
}

fn validate_query(query: &RankingQuery) -> Result<()> {
    if query.category.trim().is_empty() {
        return Err(RankingError::validation("event type is required"));
    }
    if !query.for_server && query.member.trim().is_empty() {
        return Err(RankingError::validation(
            "uid is required for end-user ranking requests",
        ));
    }
    Ok(())
}

/// Builds the dispatcher over `store` and spawns its loop on the current runtime.
///
/// Every store call made by the dispatcher is bounded by
/// `config.store_timeout`. The returned join handle resolves with an error
/// when a rebuild fails, after which the handle only yields
/// [`RankingError::DispatcherClosed`].
pub fn spawn(
    store: Arc<dyn ScoreStore>,
    source: Arc<dyn SourceOfRecord>,
    config: EngineConfig,
) -> (DispatcherHandle, JoinHandle<Result<()>>) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let dispatcher = Dispatcher::new(store, source, config, request_rx);
    let task = tokio::spawn(dispatcher.run());
    (DispatcherHandle { request_tx }, task)
}

struct Dispatcher {
    groups: KeyGroupIndex,
    query: RankingQueryService,
    loader: BulkLoader,
    event_group: String,
    world_group: String,
    request_rx: mpsc::UnboundedReceiver<Command>,
}

impl Dispatcher {
    fn new(
        store: Arc<dyn ScoreStore>,
        source: Arc<dyn SourceOfRecord>,
        config: EngineConfig,
        request_rx: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let store: Arc<dyn ScoreStore> = Arc::new(TimeoutStore::new(store, config.store_timeout));
        Self {
            groups: KeyGroupIndex::new(Arc::clone(&store)),
            query: RankingQueryService::new(
                Arc::clone(&store),
                config.page_size,
                config.event_group.clone(),
            ),
            loader: BulkLoader::new(source, config.event_group.clone()),
            event_group: config.event_group,
            world_group: config.world_group,
            request_rx,
        }
    }

    /// Runs until shutdown, until every handle is dropped, or until a rebuild fails.
    async fn run(mut self) -> Result<()> {
        info!(
            event_group = %self.event_group,
            world_group = %self.world_group,
            "ranking dispatcher started"
        );

        let outcome = loop {
            let Some(command) = self.request_rx.recv().await else {
                break Ok(());
            };
            match self.execute(command).await {
                Ok(true) => {}
                Ok(false) => break Ok(()),
                Err(err) => break Err(err),
            }
        };

        self.reject_pending();
        info!("ranking dispatcher stopped");
        outcome
    }

    /// Executes one command to completion.
    ///
    /// Returns `Ok(false)` when the loop should stop. Only a failed rebuild is
    /// returned as an error; per-request failures go back to the caller.
    async fn execute(&mut self, command: Command) -> Result<bool> {
        debug!(command = command.name(), "executing command");
        match command {
            Command::InitializeFromSourceOfRecord { respond_to } => {
                let outcome = self.loader.run(&self.groups).await;
                let failure = outcome.as_ref().err().cloned();
                if let Some(respond_to) = respond_to {
                    let _ = respond_to.send(outcome);
                }
                if let Some(err) = failure {
                    error!(error = %err, "rebuild from system of record failed; refusing to serve");
                    return Err(err);
                }
            }
            Command::RecordEvent { event, respond_to } => {
                let result = self.record(&self.event_group, &event).await;
                let _ = respond_to.send(result);
            }
            Command::RecordWorldEvent { event, respond_to } => {
                let result = self.record(&self.world_group, &event).await;
                let _ = respond_to.send(result);
            }
            Command::QueryRanking { query, respond_to } => {
                let result = self.query.execute(&query).await;
                if let Err(err) = &result {
                    warn!(category = %query.category, error = %err, "ranking query failed");
                }
                let _ = respond_to.send(result);
            }
            Command::ClearByKey { name, respond_to } => {
                let result = self.groups.clear(&name).await;
                match &result {
                    Ok(cleared) => info!(name = %name, ?cleared, "cleared rankings"),
                    Err(err) => warn!(name = %name, error = %err, "clear failed"),
                }
                let _ = respond_to.send(result);
            }
            Command::Shutdown => return Ok(false),
        }
        Ok(true)
    }

    async fn record(&self, group: &str, event: &ScoreEvent) -> Result<f64> {
        let key = LeaderboardKey::compose(event.category(), group);
        let result = self
            .groups
            .increment_in_group(group, &key, event.member(), event.amount())
            .await;
        if let Err(err) = &result {
            warn!(%key, member = event.member(), error = %err, "score increment failed");
        }
        result
    }

    /// Answers everything still queued so no caller waits forever.
    fn reject_pending(&mut self) {
        self.request_rx.close();
        while let Ok(command) = self.request_rx.try_recv() {
            command.reject(RankingError::DispatcherClosed);
        }
    }
}
