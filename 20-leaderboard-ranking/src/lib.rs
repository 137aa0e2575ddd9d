//! Live per-category leaderboards for a game backend.
//!
//! Score increments, ranking queries and bulk invalidation all flow through a
//! single serialized command processor, so every caller observes one global
//! order of operations without fine-grained locking.
//!
//! # Architecture
//!
//! - **Request handlers** (the [`http`] layer, or any other caller) build a
//!   [`dispatcher::Command`], push it onto an unbounded queue and await a
//!   one-shot response.
//! - **The dispatcher task** owns the store and the key-group index and runs
//!   exactly one command at a time to completion.
//! - **The store** ([`store::ScoreStore`]) is a sorted-set capable backend with
//!   atomic increments; [`store::MemoryStore`] is the in-process implementation.
//!
//! # Modules
//!
//! - [`model`]: leaderboard keys, entries, range windows and view rows
//! - [`error`]: the [`error::RankingError`] taxonomy
//! - [`store`]: ordered-score store adapter
//! - [`groups`]: key-group index used for bulk invalidation
//! - [`query`]: builds the top-N view for a ranking request
//! - [`loader`]: rebuilds leaderboards from the system of record
//! - [`dispatcher`]: the event loop and the handle callers submit through
//! - [`http`]: axum routes translating requests into commands
//! - [`config`]: command-line and environment configuration

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod groups;
pub mod http;
pub mod loader;
pub mod model;
pub mod query;
pub mod store;
