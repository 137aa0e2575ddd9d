//! Named sets of leaderboard keys used for bulk invalidation.
//!
//! A clear enumerates the group's members and then deletes them one by one,
//! so it is only atomic relative to other writers that go through the
//! dispatcher.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::model::LeaderboardKey;
use crate::store::ScoreStore;

/// What a [`KeyGroupIndex::clear`] removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cleared {
    /// The name was a registered group; `leaderboards` keys were deleted.
    Group { leaderboards: u64 },
    /// The name was not a group and was deleted as a plain key.
    Key { deleted: u64 },
}

impl Cleared {
    pub fn deleted(&self) -> u64 {
        match self {
            Self::Group { leaderboards } => *leaderboards,
            Self::Key { deleted } => *deleted,
        }
    }
}

#[derive(Clone)]
pub struct KeyGroupIndex {
    store: Arc<dyn ScoreStore>,
}

impl KeyGroupIndex {
    pub fn new(store: Arc<dyn ScoreStore>) -> Self {
        Self { store }
    }

    /// Adds `key` to `group`. Registering the same key twice is a no-op.
    pub async fn register_key(&self, group: &str, key: &LeaderboardKey) -> Result<()> {
        self.store.add_to_group(group, key.as_str()).await
    }

    /// Registers `key` into `group`, then increments `member` on it.
    ///
    /// The key is registered first so that no score ever lands on a
    /// leaderboard a later clear of `group` cannot reach. A registered key
    /// without a leaderboard is skipped by [`Self::clear_group`].
    pub async fn increment_in_group(
        &self,
        group: &str,
        key: &LeaderboardKey,
        member: &str,
        delta: f64,
    ) -> Result<f64> {
        self.register_key(group, key).await?;
        self.store.increment_score(key, member, delta).await
    }

    pub async fn members(&self, group: &str) -> Result<BTreeSet<String>> {
        self.store.group_members(group).await
    }

    /// Deletes every leaderboard registered to `group`, then the group itself.
    ///
    /// Returns the number of leaderboard keys that existed and were removed.
    pub async fn clear_group(&self, group: &str) -> Result<u64> {
        let members = self.store.group_members(group).await?;
        let mut deleted = 0;
        for key in &members {
            deleted += self.store.delete_key(key).await?;
        }
        self.store.delete_key(group).await?;
        debug!(group, registered = members.len(), deleted, "cleared key group");
        Ok(deleted)
    }

    /// Clears `name` as a group when it has registered keys, otherwise deletes
    /// it as a single leaderboard key.
    ///
    /// Only an empty group or a key holding a leaderboard falls back to the
    /// plain delete. Any other failure to read the group is returned, leaving
    /// the group and its leaderboards untouched.
    pub async fn clear(&self, name: &str) -> Result<Cleared> {
        let is_group = match self.store.group_members(name).await {
            Ok(members) => !members.is_empty(),
            Err(err) if err.is_wrong_type() => false,
            Err(err) => return Err(err),
        };
        if is_group {
            let leaderboards = self.clear_group(name).await?;
            return Ok(Cleared::Group { leaderboards });
        }
        let deleted = self.store.delete_key(name).await?;
        Ok(Cleared::Key { deleted })
    }
}
