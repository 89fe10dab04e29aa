use crate::persist::{self, FormatVersion};
use crate::{ItemId, KeywordIndex, UsageCounter};
use anyhow::Result;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryHit {
    pub id: ItemId,
    /// Keyword (stored case) the item was first matched through.
    pub keyword: String,
    /// Hits recorded for this keyword/item pair.
    pub count: u64,
    /// Hits recorded for the item under any keyword.
    pub total: u64,
}

#[derive(Default)]
struct State {
    index: KeywordIndex,
    usage: UsageCounter,
}

impl State {
    fn keywords_for(&self, item: ItemId) -> Vec<String> {
        let mut ranked: Vec<(&str, u64)> = self
            .index
            .keywords_for(item)
            .map(|keyword| (keyword, self.usage.keyword_count(keyword, item)))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.into_iter().map(|(keyword, _)| keyword.to_string()).collect()
    }
}

/// Keyword index, usage counters and their backing file.
///
/// Reads share one lock; mutations take it exclusively and rewrite the file
/// before releasing it. Write failures are logged, never returned, so the
/// in-memory state stays authoritative until the next successful write.
pub struct KeywordStore {
    path: PathBuf,
    state: RwLock<State>,
}

impl KeywordStore {
    /// Empty store backed by `path`. Nothing is read until [`start`](Self::start)
    /// or [`load`](Self::load).
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf(), state: RwLock::new(State::default()) }
    }

    /// Store for `<working_dir>/tdata/sticker_keywords.json`, already started.
    pub fn open<P: AsRef<Path>>(working_dir: P) -> Self {
        let store = Self::new(persist::keywords_path(working_dir));
        store.start();
        store
    }

    pub fn path(&self) -> &Path { &self.path }

    /// One-time load at startup. Failures leave the store empty.
    pub fn start(&self) -> bool {
        match self.load() {
            Ok(found) => {
                tracing::info!(
                    path = %self.path.display(),
                    found,
                    keywords = self.keyword_len(),
                    "keywords loaded"
                );
                found
            }
            Err(err) => {
                let error = format!("{err:#}");
                tracing::warn!(
                    path = %self.path.display(),
                    %error,
                    "failed to load keywords, starting empty"
                );
                false
            }
        }
    }

    pub fn finish(&self) {
        tracing::debug!(path = %self.path.display(), "keywords store finished");
    }

    /// Replace the in-memory state with the file contents. Returns false when
    /// there is no file.
    pub fn load(&self) -> Result<bool> {
        Ok(self.load_version()?.is_some())
    }

    /// Like [`load`](Self::load), reporting the format the file was in.
    /// Legacy files are rewritten in the current format right away.
    pub fn load_version(&self) -> Result<Option<FormatVersion>> {
        let mut state = self.state.write();
        self.load_locked(&mut state)
    }

    /// Drop everything in memory and read the file again.
    pub fn reload(&self) -> Result<bool> {
        let mut state = self.state.write();
        *state = State::default();
        Ok(self.load_locked(&mut state)?.is_some())
    }

    pub fn save(&self) -> Result<()> {
        let state = self.state.read();
        persist::save_keywords(&self.path, &state.index, &state.usage)
    }

    /// Current state encoded as a v3 document.
    pub fn to_document(&self) -> Result<String> {
        let state = self.state.read();
        persist::encode(&state.index, &state.usage)
    }

    /// Items whose keywords match `text`, case-insensitively.
    ///
    /// With `exact` the whole keyword must match, otherwise `text` may occur
    /// anywhere in it and `"!"` matches every keyword. Each item is reported
    /// once, through the first keyword (in keyword order) that matched it.
    pub fn query(&self, text: &str, exact: bool) -> Vec<QueryHit> {
        if text.is_empty() {
            return Vec::new();
        }
        let needle = text.to_lowercase();
        let state = self.state.read();

        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        for (keyword, items) in state.index.matching(&needle, exact) {
            for &id in items {
                if seen.insert(id) {
                    hits.push(QueryHit {
                        id,
                        keyword: keyword.to_string(),
                        count: state.usage.keyword_count(keyword, id),
                        total: state.usage.item_count(id),
                    });
                }
            }
        }
        hits
    }

    /// Keywords of `item`, most used first.
    pub fn get_keywords(&self, item: ItemId) -> Vec<String> {
        self.state.read().keywords_for(item)
    }

    /// Make `keywords` the complete keyword set of `item`.
    pub fn set_keywords<I, S>(&self, item: ItemId, keywords: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut desired: Vec<String> = Vec::new();
        for keyword in keywords {
            let keyword = keyword.as_ref();
            if !keyword.is_empty() && !desired.iter().any(|d| d == keyword) {
                desired.push(keyword.to_string());
            }
        }

        let mut state = self.state.write();
        let current = state.keywords_for(item);
        for keyword in &desired {
            state.index.add(keyword, item);
        }
        for keyword in &current {
            if !desired.contains(keyword) {
                state.index.remove(keyword, item);
            }
        }
        tracing::debug!(item, added = desired.len(), previous = current.len(), "keywords updated");
        self.persist_state(&state);
    }

    /// Count one selection of `item` through `keyword`. Returns the item's
    /// total hit count after the increment.
    pub fn record_hit(&self, keyword: &str, item: ItemId) -> u64 {
        let mut state = self.state.write();
        let (_, total) = state.usage.record(keyword, item);
        self.persist_state(&state);
        total
    }

    pub fn keyword_count(&self, keyword: &str, item: ItemId) -> u64 {
        self.state.read().usage.keyword_count(keyword, item)
    }

    pub fn item_count(&self, item: ItemId) -> u64 {
        self.state.read().usage.item_count(item)
    }

    /// Number of distinct keywords.
    pub fn keyword_len(&self) -> usize { self.state.read().index.len() }

    pub fn is_empty(&self) -> bool { self.state.read().index.is_empty() }

    fn load_locked(&self, state: &mut State) -> Result<Option<FormatVersion>> {
        let Some(decoded) = persist::load_keywords(&self.path)? else {
            return Ok(None);
        };
        let version = decoded.version;
        if decoded.skipped > 0 {
            tracing::warn!(
                path = %self.path.display(),
                skipped = decoded.skipped,
                "ignored malformed keyword entries"
            );
        }
        state.index = decoded.index;
        state.usage = decoded.usage;

        if !version.is_current() {
            tracing::info!(
                path = %self.path.display(),
                %version,
                "migrating keywords file to {}",
                FormatVersion::CURRENT
            );
            self.persist_state(state);
        }
        Ok(Some(version))
    }

    fn persist_state(&self, state: &State) {
        if let Err(err) = persist::save_keywords(&self.path, &state.index, &state.usage) {
            let error = format!("{err:#}");
            tracing::warn!(path = %self.path.display(), %error, "failed to write keywords file");
        }
    }
}
