//! In-memory cache of the hot gate flags (active channels, ignored users).
//!
//! Read-through: warmed from the store at startup. Write-through: every
//! toggle updates the store first, then this cache, so a stale read can
//! only last until the toggle that caused it.

use crate::store::Store;
use arc_swap::ArcSwap;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct StateCache {
    active_channels: ArcSwap<HashSet<String>>,
    ignored_users: ArcSwap<HashSet<String>>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate both sets from the store.
    pub async fn warm(&self, store: &Store) -> crate::Result<()> {
        let active: HashSet<String> = store.active_channels().await?.into_iter().collect();
        let ignored: HashSet<String> = store.ignored_users().await?.into_iter().collect();
        self.active_channels.store(Arc::new(active));
        self.ignored_users.store(Arc::new(ignored));
        Ok(())
    }

    pub fn is_active(&self, channel_id: &str) -> bool {
        self.active_channels.load().contains(channel_id)
    }

    pub fn is_ignored(&self, user_id: &str) -> bool {
        self.ignored_users.load().contains(user_id)
    }

    pub fn set_active(&self, channel_id: &str, active: bool) {
        Self::toggle(&self.active_channels, channel_id, active);
    }

    pub fn set_ignored(&self, user_id: &str, ignored: bool) {
        Self::toggle(&self.ignored_users, user_id, ignored);
    }

    fn toggle(set: &ArcSwap<HashSet<String>>, id: &str, present: bool) {
        let current = set.load();
        if current.contains(id) == present {
            return;
        }
        let mut next: HashSet<String> = (**current).clone();
        if present {
            next.insert(id.to_string());
        } else {
            next.remove(id);
        }
        set.store(Arc::new(next));
    }
}
