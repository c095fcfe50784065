use std::cmp::Reverse;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{LootEntity, LootKind};
use crate::context::SessionContext;

/// Which loot is published, and in what order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LootFilter {
    /// Items worth at least this much are shown.
    pub min_value: i64,
    /// Comma-separated name terms. When set, only matching loot (and
    /// airdrops) is shown and value thresholds are ignored.
    pub search: String,
    pub show_quest: bool,
    pub show_corpses: bool,
    pub show_wishlist: bool,
}

impl Default for LootFilter {
    fn default() -> Self {
        Self {
            min_value: 50_000,
            search: String::new(),
            show_quest: true,
            show_corpses: true,
            show_wishlist: true,
        }
    }
}

impl LootFilter {
    fn terms(&self) -> Vec<String> {
        self.search
            .split(',')
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect()
    }

    pub fn matches(&self, loot: &LootEntity, ctx: &SessionContext) -> bool {
        self.matches_terms(loot, ctx, &self.terms())
    }

    fn matches_terms(&self, loot: &LootEntity, ctx: &SessionContext, terms: &[String]) -> bool {
        if matches!(loot.kind(), LootKind::Airdrop) {
            return true;
        }
        if !terms.is_empty() {
            let name = loot.name().to_lowercase();
            return terms.iter().any(|t| name.contains(t.as_str()));
        }
        match loot.kind() {
            LootKind::Corpse { .. } => self.show_corpses,
            LootKind::Container { .. } => false,
            LootKind::Item {
                id,
                value,
                important,
                quest,
                ..
            } => {
                if *quest {
                    return self.show_quest;
                }
                *important || *value >= self.min_value || (self.show_wishlist && ctx.is_wishlisted(id))
            }
            LootKind::Airdrop => true,
        }
    }

    /// Matching loot, important first, then by value descending.
    pub fn apply<I>(&self, loot: I, ctx: &SessionContext) -> Vec<Arc<LootEntity>>
    where
        I: IntoIterator<Item = Arc<LootEntity>>,
    {
        let terms = self.terms();
        let mut shown: Vec<_> = loot
            .into_iter()
            .filter(|l| self.matches_terms(l, ctx, &terms))
            .collect();
        shown.sort_by_key(|l| (Reverse(l.is_important()), Reverse(l.value()), l.base()));
        shown
    }
}
