//! The story guide as a front end drives it.
//!
//! [`StoryCanvas`] owns the loaded view and applies every user action to it
//! first. Admin edits are then cached on the device and handed to the
//! [`SyncGate`]; viewer actions only touch the device store.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::backend::{StoryBackend, content_type_for, upload_path};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::ir::{
    AnchorSide, Edge, EdgeKind, LayoutNode, ResolvedNode, SplitMode, StoryCategory, StoryRecord,
    StoryView, ViewKey,
};
use crate::layout::{NodeOverlay, ViewLayout, compute_layout};
use crate::reorder::{DropOutcome, Point, Rect, Reorderer};
use crate::search::SearchState;
use crate::session::{AdminSession, Prompter};
use crate::storage::{LocalStore, WatchedSet};
use crate::sync::{LayoutSnapshot, SyncGate};
use crate::viewport::{Camera, CameraMove, Screen, Viewport};

static YOUTUBE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:https?://)?(?:www\.)?(?:youtube\.com/(?:[^/\n\s]+/\S+/|(?:v|e(?:mbed)?)/|\S*?[?&]v=)|youtu\.be/)([a-zA-Z0-9_-]{11})",
    )
    .expect("youtube regex")
});

/// Video id for the embedded player, or `None` for anything that is not a
/// recognisable YouTube link.
pub fn youtube_id(url: &str) -> Option<String> {
    YOUTUBE_RE
        .captures(url.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Where the current view came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadSource {
    Backend,
    Cache,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// Admins open the edit form for the node.
    Edit(String),
    /// Viewers flip the watched flag; carries the new value.
    Watched(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nudge {
    Up,
    Down,
    Left,
    Right,
}

/// Fields of the node form.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryForm {
    pub label: String,
    pub category: StoryCategory,
    pub image: String,
    pub youtube_url: Option<String>,
    pub video_urls: Vec<String>,
    pub protagonist: Option<String>,
    pub part_label: Option<String>,
    pub importance: u8,
    pub split_type: Option<SplitMode>,
    /// Natural size of the uploaded artwork, when known.
    pub image_size: Option<(f32, f32)>,
}

impl StoryForm {
    pub fn new(label: impl Into<String>, category: StoryCategory) -> Self {
        Self {
            label: label.into(),
            category,
            image: String::new(),
            youtube_url: None,
            video_urls: Vec::new(),
            protagonist: None,
            part_label: None,
            importance: 1,
            split_type: None,
            image_size: None,
        }
    }

    fn apply_to(&self, story: &mut StoryRecord) {
        story.label = self.label.trim().to_string();
        story.category = self.category;
        story.image = self.image.clone();
        story.youtube_url = self.youtube_url.clone().filter(|url| !url.trim().is_empty());
        story.video_urls = self.video_urls.clone();
        story.protagonist = self.protagonist.clone().filter(|name| !name.trim().is_empty());
        story.part_label = self.part_label.clone();
        story.importance = self.importance;
        story.split_type = self.split_type;
    }
}

/// Size for a new node: the category default, except that `etc` artwork keeps
/// its aspect ratio at a fixed width.
pub fn new_node_size(category: StoryCategory, image_size: Option<(f32, f32)>, etc_width: f32) -> (f32, f32) {
    match (category, image_size) {
        (StoryCategory::Etc, Some((w, h))) if w > 0.0 && h > 0.0 => (etc_width, h / w * etc_width),
        _ => category.default_size(),
    }
}

fn snap(value: f32, grid: f32) -> f32 {
    if grid <= 0.0 {
        return value;
    }
    (value / grid).round() * grid
}

pub struct StoryCanvas {
    config: Config,
    key: ViewKey,
    view: StoryView,
    store: LocalStore,
    session: AdminSession,
    gate: SyncGate,
    camera: Camera,
    search: SearchState,
    reorder: Reorderer,
    watched: WatchedSet,
    hidden: HashSet<String>,
    hide_watched: bool,
    edge_kind: EdgeKind,
    selection: BTreeSet<String>,
}

impl StoryCanvas {
    pub fn new(config: Config, key: ViewKey, backend: Arc<dyn StoryBackend>, store: LocalStore, screen: Screen) -> Self {
        let gate = SyncGate::new(backend, config.sync.quiet_period());
        let camera = Camera::new(config.viewport.clone(), screen);
        let reorder = Reorderer::new(config.layout.grid.clone());
        let watched = store.watched(key.season);
        Self {
            config,
            key,
            view: StoryView::new(),
            store,
            session: AdminSession::new(),
            gate,
            camera,
            search: SearchState::new(),
            reorder,
            watched,
            hidden: HashSet::new(),
            hide_watched: false,
            edge_kind: EdgeKind::default(),
            selection: BTreeSet::new(),
        }
    }

    pub fn key(&self) -> &ViewKey {
        &self.key
    }

    pub fn view(&self) -> &StoryView {
        &self.view
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &AdminSession {
        &self.session
    }

    pub fn is_admin(&self) -> bool {
        self.session.is_admin()
    }

    pub fn gate(&self) -> &SyncGate {
        &self.gate
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn search(&self) -> &SearchState {
        &self.search
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut LocalStore {
        &mut self.store
    }

    pub fn edge_kind(&self) -> EdgeKind {
        self.edge_kind
    }

    pub fn set_edge_kind(&mut self, kind: EdgeKind) {
        self.edge_kind = kind;
    }

    fn require_admin(&self) -> Result<()> {
        if self.session.is_admin() {
            Ok(())
        } else {
            Err(Error::NotAdmin)
        }
    }

    /// Edits queue a debounced save, so they also need a runtime to spawn on.
    /// Checked before anything changes locally.
    fn require_editor(&self) -> Result<()> {
        self.require_admin()?;
        SyncGate::runtime().map(|_| ())
    }

    /// Show the cached copy first, then replace it with the stored view.
    /// Read failures keep whatever is already shown.
    pub async fn load_view(&mut self) -> LoadSource {
        self.selection.clear();
        self.view = StoryView::new();
        self.watched = self.store.watched(self.key.season);
        let mut source = LoadSource::Empty;
        if let Some(cached) = self.store.cached_view(&self.key) {
            log::debug!("showing cached {} ({} nodes)", self.key, cached.nodes.len());
            self.view = cached;
            source = LoadSource::Cache;
        }

        let backend = Arc::clone(self.gate.backend());
        let fetched = async {
            let layout = backend.fetch_layout(&self.key).await?;
            let masters = match layout {
                Some(_) => backend.fetch_masters().await?,
                None => Vec::new(),
            };
            Ok::<_, Error>(layout.map(|layout| StoryView::from_layout(&layout, &masters)))
        }
        .await;

        match fetched {
            Ok(Some(view)) => {
                log::info!("loaded {} with {} nodes", self.key, view.nodes.len());
                self.view = view;
                self.store.cache_view(&self.key, &self.view);
                source = LoadSource::Backend;
            }
            Ok(None) => log::info!("no stored layout for {}", self.key),
            Err(err) => log::error!("loading {} failed: {err}", self.key),
        }
        self.search.refresh(&self.view.nodes);
        source
    }

    /// Switch season or view type and load it.
    pub async fn switch_view(&mut self, key: ViewKey) -> LoadSource {
        self.key = key;
        self.load_view().await
    }

    pub async fn login(&mut self, password: &str) -> Result<()> {
        let backend = Arc::clone(self.gate.backend());
        self.session.login(backend.as_ref(), password).await
    }

    /// Save and leave admin mode. When the save fails the prompter decides
    /// between discarding and staying; returns whether admin mode was left.
    pub async fn exit_admin(&mut self, prompter: &mut dyn Prompter) -> bool {
        if !self.session.is_admin() {
            return true;
        }
        match self.gate.save_now(&self.session, self.snapshot()).await {
            Ok(()) => {
                prompter.alert("Saved.");
                self.session.logout();
                true
            }
            Err(err) => {
                if prompter.confirm(&format!("Save failed ({err}). Leave without saving?")) {
                    self.session.logout();
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn snapshot(&self) -> LayoutSnapshot {
        LayoutSnapshot {
            key: self.key.clone(),
            nodes: self.view.layout_nodes(),
            edges: self.view.edges.clone(),
        }
    }

    /// Cache the view and queue a debounced save.
    fn commit(&mut self) -> Result<()> {
        self.store.cache_view(&self.key, &self.view);
        self.search.refresh(&self.view.nodes);
        self.gate.schedule(&self.session, self.snapshot())?;
        Ok(())
    }

    pub fn is_watched(&self, id: &str) -> bool {
        !self.session.is_admin() && self.watched.is_watched(id)
    }

    pub fn click_node(&mut self, id: &str) -> Result<ClickOutcome> {
        if !self.view.contains(id) {
            return Err(Error::UnknownNode(id.to_string()));
        }
        if self.session.is_admin() {
            return Ok(ClickOutcome::Edit(id.to_string()));
        }
        let now = self.watched.toggle(id);
        self.store.save_watched(self.key.season, &self.watched)?;
        Ok(ClickOutcome::Watched(now))
    }

    pub fn set_hidden(&mut self, id: &str, hidden: bool) {
        if hidden {
            self.hidden.insert(id.to_string());
        } else {
            self.hidden.remove(id);
        }
    }

    pub fn set_hide_watched(&mut self, hide: bool) {
        self.hide_watched = hide;
    }

    pub fn overlays(&self) -> HashMap<String, NodeOverlay> {
        self.view
            .nodes
            .iter()
            .map(|node| {
                let id = node.id();
                let watched = self.is_watched(id);
                let overlay = NodeOverlay {
                    watched,
                    highlighted: self.search.is_match(id),
                    hidden: self.hidden.contains(id) || (self.hide_watched && watched),
                };
                (id.to_string(), overlay)
            })
            .collect()
    }

    pub fn layout(&self) -> ViewLayout {
        compute_layout(&self.view, self.overlays(), &self.config.layout)
    }

    fn focus_on(&mut self, id: Option<String>) -> Option<CameraMove> {
        let id = id?;
        let node = self.view.node(&id)?;
        let camera_move = self.camera.focus(node.layout());
        self.camera.apply(&camera_move);
        Some(camera_move)
    }

    /// New query; the first match, if any, is focused.
    pub fn set_query(&mut self, query: &str) -> Option<CameraMove> {
        let first = self
            .search
            .set_query(query, &self.view.nodes)
            .map(str::to_string);
        self.focus_on(first)
    }

    pub fn next_match(&mut self) -> Option<CameraMove> {
        let id = self.search.next().map(str::to_string);
        self.focus_on(id)
    }

    pub fn prev_match(&mut self) -> Option<CameraMove> {
        let id = self.search.prev().map(str::to_string);
        self.focus_on(id)
    }

    pub fn clear_search(&mut self) {
        self.search.clear();
    }

    /// Mobile list scroll position for the selected match.
    pub fn match_scroll_offset(&self) -> Option<f32> {
        let id = self.search.current()?;
        self.layout().grid.scroll_offset(id, &self.config.layout.grid)
    }

    pub fn reset_view(&mut self) -> Option<CameraMove> {
        let camera_move = self.camera.reset_view(&self.view.nodes)?;
        self.camera.apply(&camera_move);
        Some(camera_move)
    }

    pub fn initial_focus(&mut self) -> Option<CameraMove> {
        let camera_move = self.camera.initial_focus(&self.view.nodes)?;
        self.camera.apply(&camera_move);
        Some(camera_move)
    }

    pub fn set_display_zoom(&mut self, display: f32) -> CameraMove {
        let camera_move = self.camera.set_display_zoom(display);
        self.camera.apply(&camera_move);
        camera_move
    }

    pub fn pan(&mut self, delta_x: f32, delta_y: f32) -> Viewport {
        let extent = self
            .camera
            .translate_extent(&self.view.nodes, self.session.is_admin());
        let next = self.camera.pan(delta_x, delta_y, extent.as_ref());
        self.camera.set_viewport(next);
        next
    }

    pub fn set_screen(&mut self, screen: Screen) {
        self.camera.set_screen(screen);
    }

    fn fresh_id(&self, prefix: &str) -> String {
        let mut millis = Utc::now().timestamp_millis();
        loop {
            let id = format!("{prefix}_{millis}");
            let taken = self.view.nodes.iter().any(|n| n.id() == id || n.layout().story_id == id)
                || self.view.edges.iter().any(|e| e.id == id);
            if !taken {
                return id;
            }
            millis += 1;
        }
    }

    /// Create a node (and its story) centred on `center`, or update the story
    /// behind `editing`. The story is written immediately; the placement
    /// follows through the debounced save. Returns the node id.
    pub async fn save_form(&mut self, editing: Option<&str>, form: StoryForm, center: Point) -> Result<String> {
        self.require_admin()?;
        let (node_id, story) = match editing {
            Some(id) => {
                let node = self
                    .view
                    .node_mut(id)
                    .ok_or_else(|| Error::UnknownNode(id.to_string()))?;
                let mut story = match node.story() {
                    Some(story) => story.clone(),
                    None => StoryRecord::new(node.layout().story_id.clone(), "", form.category),
                };
                form.apply_to(&mut story);
                story.validate()?;
                let layout = node.layout().clone();
                *node = ResolvedNode::Story {
                    node: layout,
                    story: story.clone(),
                };
                (id.to_string(), story)
            }
            None => {
                let node_id = self.fresh_id("n");
                let story_id = self.fresh_id("s");
                let mut story = StoryRecord::new(story_id.clone(), "", form.category);
                form.apply_to(&mut story);
                story.validate()?;
                let (w, h) = new_node_size(form.category, form.image_size, self.config.layout.etc_base_width);
                let mut node = LayoutNode::new(node_id.clone(), story_id, center.x - w / 2.0, center.y - h / 2.0);
                node.w = Some(w);
                node.h = Some(h);
                self.view.nodes.push(ResolvedNode::Story {
                    node,
                    story: story.clone(),
                });
                (node_id, story)
            }
        };
        self.commit()?;
        self.gate.save_story(&self.session, &story).await?;
        Ok(node_id)
    }

    /// Remove a node and every edge touching it.
    pub fn delete_node(&mut self, id: &str) -> Result<()> {
        self.require_editor()?;
        let before = self.view.nodes.len();
        self.view.nodes.retain(|node| node.id() != id);
        if self.view.nodes.len() == before {
            return Err(Error::UnknownNode(id.to_string()));
        }
        self.view.edges.retain(|edge| !edge.touches(id));
        self.selection.remove(id);
        self.commit()
    }

    pub fn connect(
        &mut self,
        source: &str,
        target: &str,
        source_handle: Option<AnchorSide>,
        target_handle: Option<AnchorSide>,
    ) -> Result<String> {
        self.require_editor()?;
        for id in [source, target] {
            if !self.view.contains(id) {
                return Err(Error::UnknownNode(id.to_string()));
            }
        }
        let id = self.fresh_id("e");
        let mut edge = Edge::new(id.clone(), source, target);
        edge.kind = self.edge_kind;
        edge.source_handle = source_handle;
        edge.target_handle = target_handle;
        self.view.edges.push(edge);
        self.commit()?;
        Ok(id)
    }

    /// Flip step/straight. Synthesized edges are not stored and are ignored.
    pub fn toggle_edge_kind(&mut self, id: &str) -> Result<Option<EdgeKind>> {
        self.require_editor()?;
        if id.starts_with("v_") {
            return Ok(None);
        }
        let Some(edge) = self.view.edges.iter_mut().find(|edge| edge.id == id) else {
            return Ok(None);
        };
        edge.kind = edge.kind.toggled();
        let kind = edge.kind;
        self.commit()?;
        Ok(Some(kind))
    }

    pub fn delete_edge(&mut self, id: &str) -> Result<bool> {
        self.require_editor()?;
        if id.starts_with("v_") {
            return Ok(false);
        }
        let before = self.view.edges.len();
        self.view.edges.retain(|edge| edge.id != id);
        if self.view.edges.len() == before {
            return Ok(false);
        }
        self.commit()?;
        Ok(true)
    }

    pub fn select(&mut self, ids: &[&str]) {
        self.selection = ids
            .iter()
            .filter(|id| self.view.contains(id))
            .map(|id| id.to_string())
            .collect();
    }

    pub fn selection(&self) -> impl Iterator<Item = &str> {
        self.selection.iter().map(String::as_str)
    }

    /// Arrow-key move of the selected nodes; returns how many moved.
    pub fn nudge(&mut self, direction: Nudge, large: bool) -> Result<usize> {
        self.require_editor()?;
        if self.selection.is_empty() {
            return Ok(0);
        }
        let step = if large {
            self.config.layout.nudge_step_large
        } else {
            self.config.layout.nudge_step
        };
        let (dx, dy) = match direction {
            Nudge::Up => (0.0, -step),
            Nudge::Down => (0.0, step),
            Nudge::Left => (-step, 0.0),
            Nudge::Right => (step, 0.0),
        };
        let mut moved = 0;
        for node in self.view.nodes.iter_mut() {
            if self.selection.contains(node.id()) {
                let layout = node.layout_mut();
                layout.x += dx;
                layout.y += dy;
                moved += 1;
            }
        }
        self.commit()?;
        Ok(moved)
    }

    /// Drag a node on the desktop canvas; positions snap to the grid.
    pub fn move_node(&mut self, id: &str, x: f32, y: f32) -> Result<()> {
        self.require_editor()?;
        let grid = self.config.layout.snap_grid;
        let node = self
            .view
            .node_mut(id)
            .ok_or_else(|| Error::UnknownNode(id.to_string()))?;
        let layout = node.layout_mut();
        layout.x = snap(x, grid);
        layout.y = snap(y, grid);
        self.commit()
    }

    pub fn resize(&mut self, id: &str, w: f32, h: f32) -> Result<()> {
        self.require_editor()?;
        let node = self
            .view
            .node_mut(id)
            .ok_or_else(|| Error::UnknownNode(id.to_string()))?;
        let layout = node.layout_mut();
        layout.w = Some(w.max(1.0));
        layout.h = Some(h.max(1.0));
        self.commit()
    }

    pub fn begin_drag(&mut self, id: &str, pointer: Point, node_rect: Rect) -> Result<()> {
        if !self.view.contains(id) {
            return Err(Error::UnknownNode(id.to_string()));
        }
        self.reorder.begin(&self.session, id, pointer, node_rect)
    }

    pub fn track_drag(&mut self, pointer: Point) {
        self.reorder.track(pointer);
    }

    pub fn drag_ghost(&self) -> Option<Point> {
        self.reorder.ghost_position()
    }

    /// Drop on the mobile list. The new order shows at once; the save keeps
    /// edges stored by other clients and adopts them locally.
    pub async fn end_drag(&mut self, container: Rect, scroll_top: f32) -> Result<Option<DropOutcome>> {
        let Some(outcome) = self.reorder.drop(&mut self.view.nodes, container, scroll_top) else {
            return Ok(None);
        };
        self.store.cache_view(&self.key, &self.view);
        let edges = self
            .gate
            .save_preserving_edges(&self.session, self.snapshot())
            .await?;
        self.view.edges = edges;
        self.store.cache_view(&self.key, &self.view);
        Ok(Some(outcome))
    }

    /// Upload artwork for the form; returns the URL to store on the story.
    pub async fn upload_image(&self, file_name: &str, bytes: Vec<u8>) -> Result<String> {
        self.require_admin()?;
        let path = upload_path(
            &self.config.backend.upload_folder,
            self.key.season,
            file_name,
            Utc::now().timestamp_millis(),
        );
        let url = self
            .gate
            .backend()
            .upload_image(&path, bytes, content_type_for(file_name))
            .await?;
        log::info!("uploaded {file_name} to {path}");
        Ok(url)
    }

    pub fn memo(&self) -> String {
        self.store.memo()
    }

    pub fn set_memo(&mut self, text: &str) {
        if let Err(err) = self.store.set_memo(text) {
            log::warn!("memo not saved: {err}");
        }
    }
}
