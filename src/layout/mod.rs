mod edges;
mod grid;
mod types;

pub use edges::resolve_edges;
pub use grid::{compute_grid, mobile_coordinate, slot_coordinate, slot_for, slot_of, slot_top};
pub use types::*;

use std::collections::{HashMap, HashSet};

use crate::config::LayoutConfig;
use crate::ir::StoryView;

/// Everything the renderers need for one view.
#[derive(Debug, Clone)]
pub struct ViewLayout {
    pub grid: GridLayout,
    pub edges: Vec<ResolvedEdge>,
    pub bounds: Option<Bounds>,
    pub overlays: HashMap<String, NodeOverlay>,
}

impl ViewLayout {
    pub fn overlay(&self, id: &str) -> NodeOverlay {
        self.overlays.get(id).copied().unwrap_or_default()
    }
}

pub fn visible_ids(view: &StoryView, overlays: &HashMap<String, NodeOverlay>) -> HashSet<String> {
    view.nodes
        .iter()
        .filter(|node| !overlays.get(node.id()).is_some_and(|overlay| overlay.hidden))
        .map(|node| node.id().to_string())
        .collect()
}

pub fn compute_layout(
    view: &StoryView,
    overlays: HashMap<String, NodeOverlay>,
    config: &LayoutConfig,
) -> ViewLayout {
    // hidden nodes stay in the grid so the list keeps its scroll continuity
    let grid = compute_grid(&view.nodes, &config.grid);
    let visible = visible_ids(view, &overlays);
    let edges = resolve_edges(&view.edges, &visible);
    let bounds = Bounds::of_nodes(&view.nodes);
    ViewLayout {
        grid,
        edges,
        bounds,
        overlays,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Edge, LayoutNode, ResolvedNode};

    #[test]
    fn hiding_a_node_keeps_it_in_the_grid() {
        let view = StoryView {
            nodes: vec![
                ResolvedNode::Missing {
                    node: LayoutNode::new("A", "a", 0.0, 0.0),
                },
                ResolvedNode::Missing {
                    node: LayoutNode::new("B", "b", 400.0, 80.0),
                },
                ResolvedNode::Missing {
                    node: LayoutNode::new("C", "c", 0.0, 160.0),
                },
            ],
            edges: vec![Edge::new("e1", "A", "B"), Edge::new("e2", "B", "C")],
        };
        let mut overlays = HashMap::new();
        overlays.insert(
            "B".to_string(),
            NodeOverlay {
                hidden: true,
                ..Default::default()
            },
        );
        let layout = compute_layout(&view, overlays, &LayoutConfig::default());
        assert_eq!(layout.grid.nodes.len(), 3);
        assert_eq!(layout.edges.len(), 1);
        assert_eq!(layout.edges[0].source, "A");
        assert_eq!(layout.edges[0].target, "C");
        assert!(layout.overlay("B").hidden);
        assert!(!layout.overlay("A").hidden);
        let bounds = layout.bounds.unwrap();
        assert_eq!(bounds.max_x, 400.0 + 256.0);
    }
}
