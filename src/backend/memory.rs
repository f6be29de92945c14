use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ObjectEntry, ProjectMirror, StoryBackend, public_object_url};
use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::ir::{Edge, LayoutNode, StoryLayout, StoryRecord, ViewKey};
use crate::session::Credential;

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, Vec<Value>>,
    objects: BTreeMap<(String, String), Vec<u8>>,
    last_synced_at: Option<String>,
    failing: bool,
    saves: Vec<(ViewKey, Vec<LayoutNode>, Vec<Edge>)>,
}

/// Seed data for a [`MemoryBackend`], as stored in fixture files.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fixture {
    /// Admin password the backend accepts; empty rejects every login.
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub masters: Vec<StoryRecord>,
    #[serde(default)]
    pub layouts: Vec<StoryLayout>,
}

impl Fixture {
    pub fn from_json(input: &str) -> Result<Self> {
        Ok(serde_json::from_str(input)?)
    }
}

/// In-process backend holding rows as JSON, used for offline rendering from
/// fixture files and in tests.
#[derive(Debug)]
pub struct MemoryBackend {
    password: String,
    base_url: String,
    config: BackendConfig,
    state: Mutex<State>,
    calls: AtomicUsize,
}

/// Identity of a row for upserts: `id` when present, else the view key.
fn row_key(row: &Value) -> Option<String> {
    if let Some(id) = row.get("id") {
        return Some(id.to_string());
    }
    match (row.get("season"), row.get("view_type")) {
        (Some(season), Some(view)) => Some(format!("{season}/{view}")),
        _ => None,
    }
}

fn upsert_into(rows: &mut Vec<Value>, row: Value) {
    let key = row_key(&row);
    match key.and_then(|key| rows.iter().position(|r| row_key(r).as_ref() == Some(&key))) {
        Some(index) => rows[index] = row,
        None => rows.push(row),
    }
}

impl MemoryBackend {
    pub fn new(password: impl Into<String>) -> Self {
        Self::with_url(password, "https://local.invalid")
    }

    /// Backend whose public URLs (and project id) derive from `base_url`.
    pub fn with_url(password: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            base_url: base_url.into(),
            config: BackendConfig::default(),
            state: Mutex::new(State::default()),
            calls: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn check_write(&self, credential: Option<&Credential>) -> Result<()> {
        if self.state().failing {
            return Err(Error::Backend {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        match credential {
            Some(credential) if credential.expose() != self.password => Err(Error::AuthRejected),
            _ => Ok(()),
        }
    }

    /// Number of backend operations served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make every write fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.state().failing = failing;
    }

    /// Every `save_layout` payload accepted, oldest first.
    pub fn saves(&self) -> Vec<(ViewKey, Vec<LayoutNode>, Vec<Edge>)> {
        self.state().saves.clone()
    }

    pub fn insert_row(&self, table: &str, row: Value) {
        let mut state = self.state();
        upsert_into(state.tables.entry(table.to_string()).or_default(), row);
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.state().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn insert_layout(&self, layout: &StoryLayout) -> Result<()> {
        let row = serde_json::to_value(layout)?;
        self.insert_row(&self.config.layouts_table, row);
        Ok(())
    }

    pub fn insert_story(&self, story: &StoryRecord) -> Result<()> {
        let row = serde_json::to_value(story)?;
        self.insert_row(&self.config.masters_table, row);
        Ok(())
    }

    pub fn from_fixture(fixture: &Fixture) -> Result<Self> {
        let backend = Self::new(fixture.password.clone());
        for story in &fixture.masters {
            backend.insert_story(story)?;
        }
        for layout in &fixture.layouts {
            backend.insert_layout(layout)?;
        }
        Ok(backend)
    }

    pub fn put_object(&self, bucket: &str, path: &str, bytes: Vec<u8>) {
        self.state()
            .objects
            .insert((bucket.to_string(), path.to_string()), bytes);
    }

    pub fn object(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        self.state()
            .objects
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
    }

    fn layout_row(&self, key: &ViewKey) -> Option<Value> {
        let state = self.state();
        state
            .tables
            .get(&self.config.layouts_table)?
            .iter()
            .find(|row| {
                row.get("season").and_then(Value::as_u64) == Some(u64::from(key.season))
                    && row.get("view_type").and_then(Value::as_str) == Some(key.view_type.as_str())
            })
            .cloned()
    }
}

#[async_trait]
impl StoryBackend for MemoryBackend {
    async fn fetch_layout(&self, key: &ViewKey) -> Result<Option<StoryLayout>> {
        self.record_call();
        match self.layout_row(key) {
            Some(row) => Ok(Some(serde_json::from_value(row)?)),
            None => Ok(None),
        }
    }

    async fn fetch_masters(&self) -> Result<Vec<StoryRecord>> {
        self.record_call();
        let rows = self.rows(&self.config.masters_table);
        Ok(serde_json::from_value(Value::Array(rows))?)
    }

    async fn fetch_layout_edges(&self, key: &ViewKey) -> Result<Option<Vec<Edge>>> {
        self.record_call();
        match self.layout_row(key).and_then(|row| row.get("edges").cloned()) {
            Some(edges) => Ok(Some(serde_json::from_value(edges)?)),
            None => Ok(None),
        }
    }

    async fn verify_admin_password(&self, password: &str) -> Result<bool> {
        self.record_call();
        Ok(!self.password.is_empty() && password == self.password)
    }

    async fn save_layout(
        &self,
        key: &ViewKey,
        nodes: &[LayoutNode],
        edges: &[Edge],
        credential: &Credential,
    ) -> Result<()> {
        self.record_call();
        self.check_write(Some(credential))?;
        let row = json!({
            "season": key.season,
            "view_type": key.view_type,
            "nodes": nodes,
            "edges": edges,
            "updated_at": chrono::Utc::now().to_rfc3339(),
        });
        self.insert_row(&self.config.layouts_table, row);
        self.state()
            .saves
            .push((key.clone(), nodes.to_vec(), edges.to_vec()));
        Ok(())
    }

    async fn upsert_story(&self, story: &StoryRecord, credential: &Credential) -> Result<()> {
        self.record_call();
        self.check_write(Some(credential))?;
        let mut stamped = story.clone();
        stamped.updated_at = Some(chrono::Utc::now().to_rfc3339());
        let row = serde_json::to_value(&stamped)?;
        self.insert_row(&self.config.masters_table, row);
        Ok(())
    }

    async fn upload_image(&self, path: &str, bytes: Vec<u8>, _content_type: &str) -> Result<String> {
        self.record_call();
        self.check_write(None)?;
        self.put_object(&self.config.bucket, path, bytes);
        Ok(public_object_url(&self.base_url, &self.config.bucket, path))
    }
}

#[async_trait]
impl ProjectMirror for MemoryBackend {
    fn project_id(&self) -> Option<String> {
        super::project_id_from_url(&self.base_url)
    }

    async fn select_rows(&self, table: &str, updated_after: Option<&str>) -> Result<Vec<Value>> {
        self.record_call();
        let rows = self.rows(table);
        Ok(match updated_after {
            None => rows,
            Some(since) => rows
                .into_iter()
                .filter(|row| {
                    row.get("updated_at")
                        .and_then(Value::as_str)
                        .is_some_and(|at| at > since)
                })
                .collect(),
        })
    }

    async fn upsert_rows(&self, table: &str, rows: &[Value]) -> Result<()> {
        self.record_call();
        self.check_write(None)?;
        let mut state = self.state();
        let target = state.tables.entry(table.to_string()).or_default();
        for row in rows {
            upsert_into(target, row.clone());
        }
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectEntry>> {
        self.record_call();
        let prefix = prefix.trim_end_matches('/');
        let state = self.state();
        let mut folders = BTreeSet::new();
        let mut entries = Vec::new();
        for (obj_bucket, path) in state.objects.keys() {
            if obj_bucket != bucket {
                continue;
            }
            let rest = if prefix.is_empty() {
                path.as_str()
            } else {
                match path.strip_prefix(prefix).and_then(|r| r.strip_prefix('/')) {
                    Some(rest) => rest,
                    None => continue,
                }
            };
            match rest.split_once('/') {
                Some((folder, _)) => {
                    folders.insert(folder.to_string());
                }
                None => entries.push(ObjectEntry {
                    name: rest.to_string(),
                    id: Some(format!("{bucket}/{path}")),
                }),
            }
        }
        entries.extend(folders.into_iter().map(|name| ObjectEntry { name, id: None }));
        Ok(entries)
    }

    async fn download_object(&self, bucket: &str, path: &str) -> Result<Vec<u8>> {
        self.record_call();
        self.object(bucket, path).ok_or_else(|| Error::Backend {
            status: 404,
            message: format!("object {bucket}/{path} not found"),
        })
    }

    async fn upload_object(&self, bucket: &str, path: &str, bytes: Vec<u8>) -> Result<()> {
        self.record_call();
        self.check_write(None)?;
        self.put_object(bucket, path, bytes);
        Ok(())
    }

    async fn last_synced_at(&self) -> Result<Option<String>> {
        self.record_call();
        Ok(self.state().last_synced_at.clone())
    }

    async fn mark_synced(&self, at: &str) -> Result<()> {
        self.record_call();
        self.check_write(None)?;
        self.state().last_synced_at = Some(at.to_string());
        Ok(())
    }
}
