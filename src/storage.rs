//! Per-device key/value store: watched history, a cached copy of each view,
//! the free-text memo and the preferred view mode.
//!
//! Values are JSON strings. A store may carry a byte quota; cached views that
//! would exceed it are dropped with a warning since the backend stays the
//! source of truth.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ir::{Edge, LayoutNode, ResolvedNode, StoryRecord, StoryView, ViewKey};

pub const MEMO_KEY: &str = "user_story_memo";
pub const VIEW_MODE_KEY: &str = "view_mode";

pub fn watched_key(season: u32) -> String {
    format!("watched_history_s{season}")
}

pub fn nodes_key(season: u32) -> String {
    format!("stories_s{season}")
}

pub fn edges_key(season: u32) -> String {
    format!("edges_s{season}")
}

/// View type the season's cached snapshot was taken from.
pub fn cached_view_type_key(season: u32) -> String {
    format!("stories_view_s{season}")
}

/// Story nodes the viewer marked as seen, keyed by node id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatchedSet(BTreeMap<String, bool>);

impl WatchedSet {
    pub fn is_watched(&self, id: &str) -> bool {
        self.0.get(id).copied().unwrap_or(false)
    }

    pub fn set(&mut self, id: &str, watched: bool) {
        self.0.insert(id.to_string(), watched);
    }

    /// Flip the flag and return the new value.
    pub fn toggle(&mut self, id: &str) -> bool {
        let next = !self.is_watched(id);
        self.set(id, next);
        next
    }

    pub fn count(&self) -> usize {
        self.0.values().filter(|watched| **watched).count()
    }
}

/// Cached node: the placement with its story content inlined, so a cached
/// view renders without the master table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CachedNode {
    #[serde(flatten)]
    node: LayoutNode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    story: Option<StoryRecord>,
}

impl From<&ResolvedNode> for CachedNode {
    fn from(resolved: &ResolvedNode) -> Self {
        Self {
            node: resolved.layout().clone(),
            story: resolved.story().cloned(),
        }
    }
}

impl From<CachedNode> for ResolvedNode {
    fn from(cached: CachedNode) -> Self {
        match cached.story {
            Some(story) => ResolvedNode::Story {
                node: cached.node,
                story,
            },
            None => ResolvedNode::Missing { node: cached.node },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    Mobile,
    Pc,
}

impl ViewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mobile => "mobile",
            Self::Pc => "pc",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "mobile" => Some(Self::Mobile),
            "pc" => Some(Self::Pc),
            _ => None,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::Mobile => Self::Pc,
            Self::Pc => Self::Mobile,
        }
    }
}

pub const NARROW_SCREEN_WIDTH: f32 = 1024.0;

static MOBILE_UA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Android|webOS|iPhone|iPad|iPod|BlackBerry|IEMobile|Opera Mini")
        .expect("mobile user agent regex")
});

/// A stored preference wins; otherwise phones and narrow screens get the list.
pub fn detect_view_mode(stored: Option<ViewMode>, user_agent: &str, screen_width: f32) -> ViewMode {
    if let Some(mode) = stored {
        return mode;
    }
    if MOBILE_UA_RE.is_match(user_agent) || screen_width < NARROW_SCREEN_WIDTH {
        ViewMode::Mobile
    } else {
        ViewMode::Pc
    }
}

#[derive(Debug)]
enum Backing {
    Dir(PathBuf),
    Memory(HashMap<String, String>),
}

#[derive(Debug)]
pub struct LocalStore {
    backing: Backing,
    quota: Option<usize>,
}

impl LocalStore {
    /// Store backed by one `{key}.json` file per key under `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            backing: Backing::Dir(dir),
            quota: None,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            backing: Backing::Memory(HashMap::new()),
            quota: None,
        }
    }

    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota = Some(bytes);
        self
    }

    fn path_for(dir: &Path, key: &str) -> PathBuf {
        dir.join(format!("{key}.json"))
    }

    fn used_bytes_except(&self, key: &str) -> Result<usize> {
        match &self.backing {
            Backing::Memory(map) => Ok(map
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum()),
            Backing::Dir(dir) => {
                let skip = Self::path_for(dir, key);
                let mut total = 0;
                for entry in fs::read_dir(dir)? {
                    let entry = entry?;
                    if entry.path() == skip {
                        continue;
                    }
                    total += entry.metadata()?.len() as usize;
                }
                Ok(total)
            }
        }
    }

    pub fn get_raw(&self, key: &str) -> Result<Option<String>> {
        match &self.backing {
            Backing::Memory(map) => Ok(map.get(key).cloned()),
            Backing::Dir(dir) => match fs::read_to_string(Self::path_for(dir, key)) {
                Ok(value) => Ok(Some(value)),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(err) => Err(err.into()),
            },
        }
    }

    pub fn set_raw(&mut self, key: &str, value: &str) -> Result<()> {
        if let Some(quota) = self.quota {
            let needed = self.used_bytes_except(key)? + key.len() + value.len();
            if needed > quota {
                return Err(Error::Io(io::Error::other(format!(
                    "device store quota of {quota} bytes exceeded writing {key}"
                ))));
            }
        }
        match &mut self.backing {
            Backing::Memory(map) => {
                map.insert(key.to_string(), value.to_string());
            }
            Backing::Dir(dir) => fs::write(Self::path_for(dir, key), value)?,
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Result<()> {
        match &mut self.backing {
            Backing::Memory(map) => {
                map.remove(key);
            }
            Backing::Dir(dir) => match fs::remove_file(Self::path_for(dir, key)) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            },
        }
        Ok(())
    }

    /// Unreadable or corrupt values read as absent.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.get_raw(key) {
            Ok(raw) => raw?,
            Err(err) => {
                log::warn!("reading {key} failed: {err}");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                log::warn!("ignoring corrupt {key}: {err}");
                None
            }
        }
    }

    pub fn set_json<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set_raw(key, &raw)
    }

    pub fn watched(&self, season: u32) -> WatchedSet {
        self.get_json(&watched_key(season)).unwrap_or_default()
    }

    pub fn save_watched(&mut self, season: u32, watched: &WatchedSet) -> Result<()> {
        self.set_json(&watched_key(season), watched)
    }

    pub fn toggle_watched(&mut self, season: u32, id: &str) -> Result<bool> {
        let mut watched = self.watched(season);
        let now = watched.toggle(id);
        self.save_watched(season, &watched)?;
        Ok(now)
    }

    /// Best effort: returns whether the snapshot was kept. A season holds one
    /// snapshot, tagged with the view type it came from.
    pub fn cache_view(&mut self, key: &ViewKey, view: &StoryView) -> bool {
        let season = key.season;
        let nodes: Vec<CachedNode> = view.nodes.iter().map(CachedNode::from).collect();
        let result = self
            .set_json(&nodes_key(season), &nodes)
            .and_then(|_| self.set_json(&edges_key(season), &view.edges))
            .and_then(|_| self.set_raw(&cached_view_type_key(season), &key.view_type));
        match result {
            Ok(()) => true,
            Err(err) => {
                log::warn!("view cache for {key} dropped: {err}");
                let _ = self.remove(&nodes_key(season));
                let _ = self.remove(&edges_key(season));
                let _ = self.remove(&cached_view_type_key(season));
                false
            }
        }
    }

    /// Snapshots taken from another view type of the same season read as absent.
    pub fn cached_view(&self, key: &ViewKey) -> Option<StoryView> {
        let season = key.season;
        let view_type = self.get_raw(&cached_view_type_key(season)).ok().flatten()?;
        if view_type != key.view_type {
            log::debug!("cached season {season} snapshot belongs to {view_type}, not {key}");
            return None;
        }
        let nodes: Vec<CachedNode> = self.get_json(&nodes_key(season))?;
        let edges: Vec<Edge> = self.get_json(&edges_key(season)).unwrap_or_default();
        Some(StoryView {
            nodes: nodes.into_iter().map(ResolvedNode::from).collect(),
            edges,
        })
    }

    pub fn memo(&self) -> String {
        self.get_raw(MEMO_KEY).ok().flatten().unwrap_or_default()
    }

    pub fn set_memo(&mut self, text: &str) -> Result<()> {
        self.set_raw(MEMO_KEY, text)
    }

    pub fn view_mode(&self) -> Option<ViewMode> {
        self.get_raw(VIEW_MODE_KEY)
            .ok()
            .flatten()
            .and_then(|raw| ViewMode::parse(raw.trim()))
    }

    pub fn set_view_mode(&mut self, mode: ViewMode) -> Result<()> {
        self.set_raw(VIEW_MODE_KEY, mode.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watched_toggle_persists_per_season() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = LocalStore::open(dir.path()).unwrap();
        assert!(store.toggle_watched(1, "n1").unwrap());
        assert!(store.toggle_watched(1, "n2").unwrap());
        assert!(!store.toggle_watched(1, "n2").unwrap());

        let reopened = LocalStore::open(dir.path()).unwrap();
        let watched = reopened.watched(1);
        assert!(watched.is_watched("n1"));
        assert!(!watched.is_watched("n2"));
        assert_eq!(watched.count(), 1);
        assert!(!reopened.watched(2).is_watched("n1"));

        let raw = reopened.get_raw("watched_history_s1").unwrap().unwrap();
        assert_eq!(raw, r#"{"n1":true,"n2":false}"#);
    }

    fn missing(id: &str) -> ResolvedNode {
        ResolvedNode::Missing {
            node: LayoutNode::new(id, format!("story-{id}"), 0.0, 0.0),
        }
    }

    #[test]
    fn cache_is_dropped_over_quota() {
        let mut store = LocalStore::in_memory().with_quota(200);
        let big = StoryView {
            nodes: (0..20).map(|i| missing(&format!("node-{i}"))).collect(),
            edges: Vec::new(),
        };
        let key = ViewKey::season(1);
        assert!(!store.cache_view(&key, &big));
        assert!(store.cached_view(&key).is_none());

        let small = StoryView {
            nodes: vec![missing("a")],
            edges: Vec::new(),
        };
        assert!(store.cache_view(&key, &small));
        let cached = store.cached_view(&key).unwrap();
        assert_eq!(cached.nodes.len(), 1);
        assert!(cached.edges.is_empty());
    }

    #[test]
    fn cached_view_keeps_story_content() {
        use crate::ir::StoryCategory;

        let mut store = LocalStore::in_memory();
        let view = StoryView {
            nodes: vec![
                ResolvedNode::Story {
                    node: LayoutNode::new("n1", "s1", 0.0, 0.0),
                    story: StoryRecord::new("s1", "Prologue", StoryCategory::Main),
                },
                missing("n2"),
            ],
            edges: vec![Edge::new("e1", "n1", "n2")],
        };
        let key = ViewKey::season(4);
        assert!(store.cache_view(&key, &view));
        assert_eq!(store.cached_view(&key), Some(view));
    }

    #[test]
    fn cached_view_is_scoped_to_its_view_type() {
        let mut store = LocalStore::in_memory();
        let release = ViewKey::new(2, "release");
        let chronological = ViewKey::new(2, "chronological");
        let view = StoryView {
            nodes: vec![missing("a"), missing("b")],
            edges: Vec::new(),
        };
        assert!(store.cache_view(&release, &view));
        assert!(store.cached_view(&chronological).is_none());
        assert_eq!(store.cached_view(&release), Some(view.clone()));

        assert!(store.cache_view(&chronological, &StoryView::new()));
        assert!(store.cached_view(&release).is_none());
        assert_eq!(store.get_raw("stories_view_s2").unwrap().as_deref(), Some("chronological"));
    }

    #[test]
    fn corrupt_values_read_as_absent() {
        let mut store = LocalStore::in_memory();
        store.set_raw("stories_s3", "{not json").unwrap();
        store.set_raw("stories_view_s3", "release").unwrap();
        assert!(store.cached_view(&ViewKey::new(3, "release")).is_none());
    }

    #[test]
    fn memo_and_view_mode() {
        let mut store = LocalStore::in_memory();
        assert_eq!(store.memo(), "");
        store.set_memo("ep 12 next").unwrap();
        assert_eq!(store.memo(), "ep 12 next");

        assert_eq!(store.view_mode(), None);
        store.set_view_mode(ViewMode::Pc).unwrap();
        assert_eq!(store.view_mode(), Some(ViewMode::Pc));
    }

    #[test]
    fn view_mode_detection() {
        let desktop_ua = "Mozilla/5.0 (Windows NT 10.0; Win64; x64)";
        let phone_ua = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X)";
        assert_eq!(detect_view_mode(None, desktop_ua, 1440.0), ViewMode::Pc);
        assert_eq!(detect_view_mode(None, desktop_ua, 800.0), ViewMode::Mobile);
        assert_eq!(detect_view_mode(None, phone_ua, 1440.0), ViewMode::Mobile);
        assert_eq!(detect_view_mode(Some(ViewMode::Pc), phone_ua, 390.0), ViewMode::Pc);
    }
}
