use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};

use crate::query::DEFAULT_PAGE_SIZE;

pub const DEFAULT_EVENT_GROUP: &str = "ScoreKey";
pub const DEFAULT_WORLD_GROUP: &str = "WorldRanking";
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Socket address the HTTP server should bind to.
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8444")]
    pub listen: SocketAddr,

    /// Selects the log format: human-readable for development, JSON lines for production.
    #[arg(long, env = "SERVER_TYPE", value_enum, default_value_t = ServerType::Development)]
    pub server_type: ServerType,

    /// Maximum rows returned to end-user ranking requests.
    #[arg(long, env = "RANKING_PAGE_SIZE", default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: usize,

    /// Key group holding every event leaderboard; cleared and rebuilt on startup.
    #[arg(long, env = "EVENT_RANKING_KEY", default_value = DEFAULT_EVENT_GROUP)]
    pub event_group: String,

    /// Key group holding world (hall of fame) leaderboards.
    #[arg(long, env = "WORLD_RANKING_KEY", default_value = DEFAULT_WORLD_GROUP)]
    pub world_group: String,

    /// Upper bound for a single store call before it fails the command.
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value_t = 2000)]
    pub store_timeout_ms: u64,

    /// Play-event export (JSON lines) used to rebuild event rankings at startup.
    #[arg(long, env = "SOURCE_OF_RECORD")]
    pub source: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerType {
    Development,
    Production,
}

impl Cli {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            page_size: self.page_size,
            event_group: self.event_group.clone(),
            world_group: self.world_group.clone(),
            store_timeout: Duration::from_millis(self.store_timeout_ms),
        }
    }
}

/// Values injected into the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub page_size: usize,
    pub event_group: String,
    pub world_group: String,
    pub store_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            event_group: DEFAULT_EVENT_GROUP.to_string(),
            world_group: DEFAULT_WORLD_GROUP.to_string(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}
