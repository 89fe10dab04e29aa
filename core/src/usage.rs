use crate::ItemId;
use std::collections::BTreeMap;

/// Hit counters used to rank results. They never decide membership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageCounter {
    query: BTreeMap<String, BTreeMap<ItemId, u64>>,
    item: BTreeMap<ItemId, u64>,
}

impl UsageCounter {
    pub fn new() -> Self { Self::default() }

    pub fn is_empty(&self) -> bool { self.query.is_empty() && self.item.is_empty() }

    pub fn clear(&mut self) {
        self.query.clear();
        self.item.clear();
    }

    pub fn keyword_count(&self, keyword: &str, item: ItemId) -> u64 {
        self.query
            .get(keyword)
            .and_then(|counts| counts.get(&item))
            .copied()
            .unwrap_or(0)
    }

    pub fn item_count(&self, item: ItemId) -> u64 {
        self.item.get(&item).copied().unwrap_or(0)
    }

    /// Bump both counters once; returns `(keyword_count, item_count)` after
    /// the increment.
    pub fn record(&mut self, keyword: &str, item: ItemId) -> (u64, u64) {
        let per_keyword = self
            .query
            .entry(keyword.to_string())
            .or_default()
            .entry(item)
            .or_insert(0);
        *per_keyword = per_keyword.saturating_add(1);
        let per_keyword = *per_keyword;

        let per_item = self.item.entry(item).or_insert(0);
        *per_item = per_item.saturating_add(1);
        (per_keyword, *per_item)
    }

    pub fn set_keyword_count(&mut self, keyword: &str, item: ItemId, count: u64) {
        self.query.entry(keyword.to_string()).or_default().insert(item, count);
    }

    pub fn set_item_count(&mut self, item: ItemId, count: u64) {
        self.item.insert(item, count);
    }

    pub fn keyword_counts(&self) -> impl Iterator<Item = (&str, &BTreeMap<ItemId, u64>)> + '_ {
        self.query.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn item_counts(&self) -> impl Iterator<Item = (ItemId, u64)> + '_ {
        self.item.iter().map(|(&id, &n)| (id, n))
    }

    pub fn has_keyword_counts(&self) -> bool { !self.query.is_empty() }

    pub fn has_item_counts(&self) -> bool { !self.item.is_empty() }
}
