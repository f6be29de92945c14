use serde::Serialize;

use crate::ir::{AnchorSide, EdgeKind, LayoutNode};

/// Logical position in the two-column mobile list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct GridSlot {
    pub row: u32,
    pub column: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlottedNode {
    pub id: String,
    pub slot: GridSlot,
    pub top: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridLayout {
    pub nodes: Vec<SlottedNode>,
    pub total_height: f32,
    pub max_row: u32,
}

impl GridLayout {
    pub fn get(&self, id: &str) -> Option<&SlottedNode> {
        self.nodes.iter().find(|node| node.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub source_anchor: AnchorSide,
    pub target_anchor: AnchorSide,
    pub kind: EdgeKind,
    /// Synthesized around one or more hidden nodes.
    pub is_virtual: bool,
}

impl ResolvedEdge {
    pub fn dedup_key(&self) -> (&str, AnchorSide, &str, AnchorSide) {
        (&self.source, self.source_anchor, &self.target, self.target_anchor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl Bounds {
    /// Box around every node, unknown sizes taking the default node size.
    pub fn of_nodes<'a, I, N>(nodes: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a N>,
        N: AsRef<LayoutNode> + 'a,
    {
        let mut bounds: Option<Bounds> = None;
        for node in nodes {
            let node = node.as_ref();
            let right = node.x + node.width();
            let bottom = node.y + node.height();
            bounds = Some(match bounds {
                None => Bounds {
                    min_x: node.x,
                    min_y: node.y,
                    max_x: right,
                    max_y: bottom,
                },
                Some(b) => Bounds {
                    min_x: b.min_x.min(node.x),
                    min_y: b.min_y.min(node.y),
                    max_x: b.max_x.max(right),
                    max_y: b.max_y.max(bottom),
                },
            });
        }
        bounds
    }

    pub fn padded(&self, pad_x: f32, pad_y: f32) -> Self {
        Self {
            min_x: self.min_x - pad_x,
            min_y: self.min_y - pad_y,
            max_x: self.max_x + pad_x,
            max_y: self.max_y + pad_y,
        }
    }

    pub fn center_y(&self) -> f32 {
        (self.min_y + self.max_y) / 2.0
    }

    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }
}

/// Per-node presentation flags layered over the layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeOverlay {
    pub watched: bool,
    pub highlighted: bool,
    pub hidden: bool,
}
