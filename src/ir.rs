use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_NODE_WIDTH: f32 = 256.0;
pub const DEFAULT_NODE_HEIGHT: f32 = 350.0;
pub const DEFAULT_VIEW_TYPE: &str = "release";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryCategory {
    Main,
    Theme,
    Etc,
    Eternal,
    Annotation,
    ThemeX,
    ThemeNow,
}

impl StoryCategory {
    pub const ALL: [StoryCategory; 7] = [
        Self::Main,
        Self::Theme,
        Self::Etc,
        Self::Eternal,
        Self::Annotation,
        Self::ThemeX,
        Self::ThemeNow,
    ];

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "main" => Some(Self::Main),
            "theme" => Some(Self::Theme),
            "etc" => Some(Self::Etc),
            "eternal" => Some(Self::Eternal),
            "annotation" => Some(Self::Annotation),
            "theme_x" => Some(Self::ThemeX),
            "theme_now" => Some(Self::ThemeNow),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Theme => "theme",
            Self::Etc => "etc",
            Self::Eternal => "eternal",
            Self::Annotation => "annotation",
            Self::ThemeX => "theme_x",
            Self::ThemeNow => "theme_now",
        }
    }

    /// Size given to a freshly created node of this category.
    pub fn default_size(&self) -> (f32, f32) {
        match self {
            Self::Main => (260.0, 380.0),
            Self::Theme | Self::ThemeX | Self::ThemeNow => (320.0, 200.0),
            Self::Etc | Self::Eternal => (300.0, 200.0),
            Self::Annotation => (96.0, 96.0),
        }
    }

    /// Main story titles are matched on their label only.
    pub fn searches_protagonist(&self) -> bool {
        match self {
            Self::Main => false,
            Self::Theme
            | Self::Etc
            | Self::Eternal
            | Self::Annotation
            | Self::ThemeX
            | Self::ThemeNow => true,
        }
    }

    pub fn supports_split(&self) -> bool {
        matches!(self, Self::Main)
    }
}

impl fmt::Display for StoryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMode {
    #[default]
    None,
    Part1,
    Part2,
}

impl SplitMode {
    /// Fraction of the artwork width shown and its horizontal offset.
    pub fn crop(&self) -> (f32, f32) {
        match self {
            Self::None => (1.0, 0.0),
            Self::Part1 => (0.5, 0.0),
            Self::Part2 => (0.5, 0.5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorSide {
    Top,
    Bottom,
    Left,
    Right,
}

impl AnchorSide {
    /// Order in which free sides are handed out.
    pub const ALL: [AnchorSide; 4] = [Self::Top, Self::Bottom, Self::Left, Self::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::Bottom => "bottom",
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    #[default]
    Step,
    Straight,
}

impl EdgeKind {
    pub fn toggled(self) -> Self {
        match self {
            Self::Step => Self::Straight,
            Self::Straight => Self::Step,
        }
    }
}

fn default_importance() -> u8 {
    1
}

/// Canonical content for one story, shared by every view that places it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryRecord {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub category: StoryCategory,
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub video_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protagonist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_label: Option<String>,
    #[serde(default = "default_importance")]
    pub importance: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_type: Option<SplitMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl StoryRecord {
    pub fn new(id: impl Into<String>, label: impl Into<String>, category: StoryCategory) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            category,
            image: String::new(),
            youtube_url: None,
            video_urls: Vec::new(),
            protagonist: None,
            part_label: None,
            importance: default_importance(),
            split_type: None,
            updated_at: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.label.trim().is_empty() {
            return Err(Error::InvalidStory("label is required".to_string()));
        }
        let split = self.split_type.unwrap_or_default();
        match self.category {
            StoryCategory::Main => Ok(()),
            StoryCategory::Theme
            | StoryCategory::Etc
            | StoryCategory::Eternal
            | StoryCategory::Annotation
            | StoryCategory::ThemeX
            | StoryCategory::ThemeNow => {
                if split != SplitMode::None {
                    return Err(Error::InvalidStory(format!(
                        "split display is only valid for main stories, not {}",
                        self.category
                    )));
                }
                Ok(())
            }
        }
    }

    pub fn videos(&self) -> impl Iterator<Item = &str> {
        self.youtube_url
            .iter()
            .map(String::as_str)
            .chain(self.video_urls.iter().map(String::as_str))
            .filter(|url| !url.trim().is_empty())
    }
}

/// Placement of one story inside one view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutNode {
    pub id: String,
    #[serde(default)]
    pub story_id: String,
    pub x: f32,
    pub y: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub m_x: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub m_y: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_type: Option<SplitMode>,
}

impl LayoutNode {
    pub fn new(id: impl Into<String>, story_id: impl Into<String>, x: f32, y: f32) -> Self {
        Self {
            id: id.into(),
            story_id: story_id.into(),
            x,
            y,
            w: None,
            h: None,
            m_x: None,
            m_y: None,
            split_type: None,
        }
    }

    pub fn width(&self) -> f32 {
        self.w.unwrap_or(DEFAULT_NODE_WIDTH)
    }

    pub fn height(&self) -> f32 {
        self.h.unwrap_or(DEFAULT_NODE_HEIGHT)
    }

    /// Position used by the mobile list: overrides first, desktop otherwise.
    pub fn effective_x(&self) -> f32 {
        self.m_x.unwrap_or(self.x)
    }

    pub fn effective_y(&self) -> f32 {
        self.m_y.unwrap_or(self.y)
    }
}

impl AsRef<LayoutNode> for LayoutNode {
    fn as_ref(&self) -> &LayoutNode {
        self
    }
}

impl AsMut<LayoutNode> for LayoutNode {
    fn as_mut(&mut self) -> &mut LayoutNode {
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type", default)]
    pub kind: EdgeKind,
    #[serde(
        rename = "sourceHandle",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_handle: Option<AnchorSide>,
    #[serde(
        rename = "targetHandle",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub target_handle: Option<AnchorSide>,
}

impl Edge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            kind: EdgeKind::Step,
            source_handle: None,
            target_handle: None,
        }
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.source == node_id || self.target == node_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewKey {
    pub season: u32,
    pub view_type: String,
}

impl ViewKey {
    pub fn new(season: u32, view_type: impl Into<String>) -> Self {
        Self {
            season,
            view_type: view_type.into(),
        }
    }

    pub fn season(season: u32) -> Self {
        Self::new(season, DEFAULT_VIEW_TYPE)
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}/{}", self.season, self.view_type)
    }
}

/// One row of the layouts table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryLayout {
    pub season: u32,
    pub view_type: String,
    #[serde(default)]
    pub nodes: Vec<LayoutNode>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl StoryLayout {
    pub fn key(&self) -> ViewKey {
        ViewKey::new(self.season, self.view_type.clone())
    }
}

/// A layout node joined with its master record.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedNode {
    Story { node: LayoutNode, story: StoryRecord },
    /// The referenced story does not exist; rendered as an empty placeholder.
    Missing { node: LayoutNode },
}

impl ResolvedNode {
    pub fn layout(&self) -> &LayoutNode {
        match self {
            Self::Story { node, .. } | Self::Missing { node } => node,
        }
    }

    pub fn layout_mut(&mut self) -> &mut LayoutNode {
        match self {
            Self::Story { node, .. } | Self::Missing { node } => node,
        }
    }

    pub fn id(&self) -> &str {
        &self.layout().id
    }

    pub fn story(&self) -> Option<&StoryRecord> {
        match self {
            Self::Story { story, .. } => Some(story),
            Self::Missing { .. } => None,
        }
    }

    pub fn story_mut(&mut self) -> Option<&mut StoryRecord> {
        match self {
            Self::Story { story, .. } => Some(story),
            Self::Missing { .. } => None,
        }
    }

    pub fn label(&self) -> &str {
        self.story().map(|story| story.label.as_str()).unwrap_or("")
    }

    pub fn category(&self) -> Option<StoryCategory> {
        self.story().map(|story| story.category)
    }

    pub fn protagonist(&self) -> Option<&str> {
        self.story().and_then(|story| story.protagonist.as_deref())
    }

    /// Split display applies to main stories only; the placement override wins.
    pub fn split_mode(&self) -> SplitMode {
        match self {
            Self::Story { node, story } if story.category.supports_split() => node
                .split_type
                .or(story.split_type)
                .unwrap_or_default(),
            _ => SplitMode::None,
        }
    }
}

impl AsRef<LayoutNode> for ResolvedNode {
    fn as_ref(&self) -> &LayoutNode {
        self.layout()
    }
}

impl AsMut<LayoutNode> for ResolvedNode {
    fn as_mut(&mut self) -> &mut LayoutNode {
        self.layout_mut()
    }
}

pub fn resolve_nodes(nodes: &[LayoutNode], masters: &HashMap<String, StoryRecord>) -> Vec<ResolvedNode> {
    nodes
        .iter()
        .map(|node| match masters.get(&node.story_id) {
            Some(story) => ResolvedNode::Story {
                node: node.clone(),
                story: story.clone(),
            },
            None => {
                log::debug!("node {} references missing story {:?}", node.id, node.story_id);
                ResolvedNode::Missing { node: node.clone() }
            }
        })
        .collect()
}

/// Everything loaded for one view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoryView {
    pub nodes: Vec<ResolvedNode>,
    pub edges: Vec<Edge>,
}

impl StoryView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_layout(layout: &StoryLayout, masters: &[StoryRecord]) -> Self {
        let index: HashMap<String, StoryRecord> = masters
            .iter()
            .map(|story| (story.id.clone(), story.clone()))
            .collect();
        Self {
            nodes: resolve_nodes(&layout.nodes, &index),
            edges: layout.edges.clone(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&ResolvedNode> {
        self.nodes.iter().find(|node| node.id() == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut ResolvedNode> {
        self.nodes.iter_mut().find(|node| node.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    pub fn layout_nodes(&self) -> Vec<LayoutNode> {
        self.nodes.iter().map(|node| node.layout().clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_story_resolves_to_placeholder() {
        let masters = vec![StoryRecord::new("s1", "Prologue", StoryCategory::Main)];
        let layout = StoryLayout {
            season: 1,
            view_type: DEFAULT_VIEW_TYPE.to_string(),
            nodes: vec![
                LayoutNode::new("n1", "s1", 0.0, 0.0),
                LayoutNode::new("n2", "gone", 400.0, 0.0),
            ],
            edges: Vec::new(),
            updated_at: None,
        };
        let view = StoryView::from_layout(&layout, &masters);
        assert_eq!(view.nodes[0].label(), "Prologue");
        assert!(matches!(view.nodes[1], ResolvedNode::Missing { .. }));
        assert_eq!(view.nodes[1].label(), "");
        assert_eq!(view.nodes[1].category(), None);
    }

    #[test]
    fn split_only_applies_to_main() {
        let mut story = StoryRecord::new("s1", "Arc", StoryCategory::Theme);
        story.split_type = Some(SplitMode::Part1);
        assert!(story.validate().is_err());

        let node = LayoutNode::new("n1", "s1", 0.0, 0.0);
        let resolved = ResolvedNode::Story { node, story };
        assert_eq!(resolved.split_mode(), SplitMode::None);
    }

    #[test]
    fn placement_split_overrides_story() {
        let mut story = StoryRecord::new("s1", "Chapter", StoryCategory::Main);
        story.split_type = Some(SplitMode::Part1);
        let mut node = LayoutNode::new("n1", "s1", 0.0, 0.0);
        node.split_type = Some(SplitMode::Part2);
        let resolved = ResolvedNode::Story { node, story };
        assert_eq!(resolved.split_mode(), SplitMode::Part2);
    }

    #[test]
    fn parses_stored_rows() {
        let raw = r#"{
            "season": 2,
            "view_type": "release",
            "nodes": [{"id": "n1", "story_id": "s1", "x": 10, "y": 20, "w": 260, "h": 380, "m_x": 400}],
            "edges": [{"id": "e1", "source": "n1", "target": "n2", "type": "straight", "sourceHandle": "right", "targetHandle": null}]
        }"#;
        let layout: StoryLayout = serde_json::from_str(raw).unwrap();
        assert_eq!(layout.key(), ViewKey::season(2));
        assert_eq!(layout.nodes[0].effective_x(), 400.0);
        assert_eq!(layout.nodes[0].effective_y(), 20.0);
        assert_eq!(layout.edges[0].kind, EdgeKind::Straight);
        assert_eq!(layout.edges[0].source_handle, Some(AnchorSide::Right));
        assert_eq!(layout.edges[0].target_handle, None);

        let story: StoryRecord =
            serde_json::from_str(r#"{"id": "s1", "label": "Theme", "type": "theme_now"}"#).unwrap();
        assert_eq!(story.category, StoryCategory::ThemeNow);
        assert_eq!(story.importance, 1);
    }
}
