use crate::ItemId;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    /// Lowercased keyword, used for case-insensitive matching.
    folded: String,
    items: Vec<ItemId>, // unique, insertion order
}

/// Keyword -> items association table.
///
/// Keywords are stored case-preserved and iterate in byte order. An entry
/// exists only while it holds at least one item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordIndex {
    entries: BTreeMap<String, Entry>,
}

impl KeywordIndex {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn clear(&mut self) { self.entries.clear(); }

    /// Merge `items` into `keyword`, dropping duplicates. Returns the number of
    /// items actually added. Nothing is created for an empty keyword or list.
    pub fn extend<I>(&mut self, keyword: &str, items: I) -> usize
    where
        I: IntoIterator<Item = ItemId>,
    {
        if keyword.is_empty() {
            return 0;
        }
        let mut added = 0;
        for item in items {
            if self.add(keyword, item) {
                added += 1;
            }
        }
        added
    }

    /// Associate `item` with `keyword`. Returns false if it already was.
    pub fn add(&mut self, keyword: &str, item: ItemId) -> bool {
        if keyword.is_empty() {
            return false;
        }
        let entry = self.entries.entry(keyword.to_string()).or_insert_with(|| Entry {
            folded: keyword.to_lowercase(),
            items: Vec::new(),
        });
        if entry.items.contains(&item) {
            return false;
        }
        entry.items.push(item);
        true
    }

    /// Drop the `keyword` -> `item` association, deleting the entry once it
    /// has no items left. Returns false if there was nothing to remove.
    pub fn remove(&mut self, keyword: &str, item: ItemId) -> bool {
        let Some(entry) = self.entries.get_mut(keyword) else {
            return false;
        };
        let Some(pos) = entry.items.iter().position(|&id| id == item) else {
            return false;
        };
        entry.items.remove(pos);
        if entry.items.is_empty() {
            self.entries.remove(keyword);
        }
        true
    }

    pub fn items(&self, keyword: &str) -> Option<&[ItemId]> {
        self.entries.get(keyword).map(|e| e.items.as_slice())
    }

    pub fn contains(&self, keyword: &str, item: ItemId) -> bool {
        self.items(keyword).map(|items| items.contains(&item)).unwrap_or(false)
    }

    /// Keywords holding `item`, in keyword order.
    pub fn keywords_for(&self, item: ItemId) -> impl Iterator<Item = &str> + '_ {
        self.entries
            .iter()
            .filter(move |(_, e)| e.items.contains(&item))
            .map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ItemId])> + '_ {
        self.entries.iter().map(|(k, e)| (k.as_str(), e.items.as_slice()))
    }

    /// Entries whose keyword matches the already-lowercased `needle`.
    ///
    /// `exact` compares whole keywords; otherwise `needle` must occur as a
    /// substring, and `"!"` matches everything.
    pub fn matching<'a>(
        &'a self,
        needle: &'a str,
        exact: bool,
    ) -> impl Iterator<Item = (&'a str, &'a [ItemId])> + 'a {
        self.entries
            .iter()
            .filter(move |(_, e)| {
                if exact {
                    e.folded == needle
                } else {
                    needle == "!" || e.folded.contains(needle)
                }
            })
            .map(|(k, e)| (k.as_str(), e.items.as_slice()))
    }
}
