//! Per-session state shared between the polling loops.
//!
//! Created when a session is bootstrapped and dropped on teardown, so nothing
//! leaks from one world instance into the next except what the embedder
//! explicitly carries over through [`GroupCache`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::info;

/// Entity id → group id.
pub type GroupMap = HashMap<i32, i32>;

/// Group assignments persisted by the embedder, keyed by raid id.
pub type GroupCache = HashMap<String, GroupMap>;

#[derive(Debug)]
pub struct SessionContext {
    raid_id: String,
    groups: RwLock<Arc<GroupMap>>,
    teammates: RwLock<HashSet<i32>>,
    focused: RwLock<HashSet<i32>>,
    wishlist: RwLock<HashSet<String>>,
    logged_quest_items: Mutex<HashSet<String>>,
}

impl SessionContext {
    pub fn new(raid_id: impl Into<String>) -> Self {
        Self {
            raid_id: raid_id.into(),
            groups: RwLock::new(Arc::new(GroupMap::new())),
            teammates: RwLock::new(HashSet::new()),
            focused: RwLock::new(HashSet::new()),
            wishlist: RwLock::new(HashSet::new()),
            logged_quest_items: Mutex::new(HashSet::new()),
        }
    }

    /// Seed group assignments from a cache carried across sessions.
    pub fn with_group_cache(raid_id: impl Into<String>, cache: &GroupCache) -> Self {
        let ctx = Self::new(raid_id);
        if let Some(groups) = cache.get(&ctx.raid_id) {
            info!(
                "Restored {} group assignments for raid {}",
                groups.len(),
                ctx.raid_id
            );
            ctx.replace_groups(groups.clone());
        }
        ctx
    }

    pub fn raid_id(&self) -> &str {
        &self.raid_id
    }

    pub fn group_of(&self, id: i32) -> Option<i32> {
        self.groups.read().get(&id).copied()
    }

    pub fn groups(&self) -> Arc<GroupMap> {
        Arc::clone(&self.groups.read())
    }

    /// Swap in a complete assignment; readers see the old map or the new one.
    pub fn replace_groups(&self, groups: GroupMap) {
        *self.groups.write() = Arc::new(groups);
    }

    /// Write the current assignment back into an embedder cache.
    pub fn export_groups(&self, cache: &mut GroupCache) {
        cache.insert(self.raid_id.clone(), (*self.groups()).clone());
    }

    pub fn is_teammate(&self, id: i32) -> bool {
        self.teammates.read().contains(&id)
    }

    pub fn set_teammate(&self, id: i32, teammate: bool) {
        let mut teammates = self.teammates.write();
        if teammate {
            teammates.insert(id);
        } else {
            teammates.remove(&id);
        }
    }

    pub fn is_focused(&self, id: i32) -> bool {
        self.focused.read().contains(&id)
    }

    pub fn set_focused(&self, id: i32, focused: bool) {
        let mut set = self.focused.write();
        if focused {
            set.insert(id);
        } else {
            set.remove(&id);
        }
    }

    pub fn is_wishlisted(&self, item_id: &str) -> bool {
        self.wishlist.read().contains(&item_id.to_ascii_lowercase())
    }

    pub fn set_wishlist<I, S>(&self, items: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        *self.wishlist.write() = items
            .into_iter()
            .map(|s| s.as_ref().to_ascii_lowercase())
            .collect();
    }

    /// Whether a quest item id was already recorded this session.
    pub fn quest_item_logged(&self, item_id: &str) -> bool {
        self.logged_quest_items.lock().contains(item_id)
    }

    /// Record a quest item id. Returns `true` the first time it is seen this
    /// session.
    pub fn first_quest_sighting(&self, item_id: &str) -> bool {
        self.logged_quest_items.lock().insert(item_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_are_replaced_wholesale() {
        let ctx = SessionContext::new("raid-1");
        ctx.replace_groups(HashMap::from([(1, 5), (2, 5)]));
        let before = ctx.groups();

        ctx.replace_groups(HashMap::from([(3, -1)]));
        assert_eq!(before.len(), 2);
        assert_eq!(ctx.group_of(1), None);
        assert_eq!(ctx.group_of(3), Some(-1));
    }

    #[test]
    fn test_group_cache_roundtrip() {
        let ctx = SessionContext::new("raid-7");
        ctx.replace_groups(HashMap::from([(10, 2)]));
        let mut cache = GroupCache::new();
        ctx.export_groups(&mut cache);

        let restored = SessionContext::with_group_cache("raid-7", &cache);
        assert_eq!(restored.group_of(10), Some(2));
        let other = SessionContext::with_group_cache("raid-8", &cache);
        assert_eq!(other.group_of(10), None);
    }

    #[test]
    fn test_quest_items_logged_once() {
        let ctx = SessionContext::new("raid");
        assert!(ctx.first_quest_sighting("abc"));
        assert!(!ctx.first_quest_sighting("abc"));
    }

    #[test]
    fn test_wishlist_is_case_insensitive() {
        let ctx = SessionContext::new("raid");
        ctx.set_wishlist(["ABCdef"]);
        assert!(ctx.is_wishlisted("abcDEF"));
        assert!(!ctx.is_wishlisted("other"));
    }
}
