use crate::ir::{StoryView, ViewKey};
use crate::layout::{Bounds, ViewLayout};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

#[derive(Debug, Serialize)]
pub struct LayoutDump {
    pub season: u32,
    pub view_type: String,
    pub bounds: Option<Bounds>,
    pub mobile_height: f32,
    pub max_row: u32,
    pub nodes: Vec<NodeDump>,
    pub edges: Vec<EdgeDump>,
}

#[derive(Debug, Serialize)]
pub struct NodeDump {
    pub id: String,
    pub story_id: String,
    pub label: String,
    pub category: Option<String>,
    pub missing: bool,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub row: u32,
    pub column: u8,
    pub top: f32,
    pub watched: bool,
    pub highlighted: bool,
    pub hidden: bool,
}

#[derive(Debug, Serialize)]
pub struct EdgeDump {
    pub id: String,
    pub source: String,
    pub target: String,
    pub source_anchor: String,
    pub target_anchor: String,
    pub kind: String,
    #[serde(rename = "virtual")]
    pub is_virtual: bool,
}

impl LayoutDump {
    pub fn from_layout(key: &ViewKey, view: &StoryView, layout: &ViewLayout) -> Self {
        let nodes = view
            .nodes
            .iter()
            .filter_map(|node| {
                let slotted = layout.grid.get(node.id())?;
                let placed = node.layout();
                let overlay = layout.overlay(node.id());
                Some(NodeDump {
                    id: placed.id.clone(),
                    story_id: placed.story_id.clone(),
                    label: node.label().to_string(),
                    category: node.category().map(|c| c.as_str().to_string()),
                    missing: node.story().is_none(),
                    x: placed.x,
                    y: placed.y,
                    width: placed.width(),
                    height: placed.height(),
                    row: slotted.slot.row,
                    column: slotted.slot.column,
                    top: slotted.top,
                    watched: overlay.watched,
                    highlighted: overlay.highlighted,
                    hidden: overlay.hidden,
                })
            })
            .collect();

        let edges = layout
            .edges
            .iter()
            .map(|edge| EdgeDump {
                id: edge.id.clone(),
                source: edge.source.clone(),
                target: edge.target.clone(),
                source_anchor: edge.source_anchor.as_str().to_string(),
                target_anchor: edge.target_anchor.as_str().to_string(),
                kind: format!("{:?}", edge.kind).to_lowercase(),
                is_virtual: edge.is_virtual,
            })
            .collect();

        LayoutDump {
            season: key.season,
            view_type: key.view_type.clone(),
            bounds: layout.bounds,
            mobile_height: layout.grid.total_height,
            max_row: layout.grid.max_row,
            nodes,
            edges,
        }
    }
}

pub fn write_layout_dump(path: &Path, key: &ViewKey, view: &StoryView, layout: &ViewLayout) -> anyhow::Result<()> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    let dump = LayoutDump::from_layout(key, view, layout);
    serde_json::to_writer_pretty(writer, &dump)?;
    Ok(())
}
