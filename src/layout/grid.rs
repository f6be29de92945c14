use crate::config::GridConfig;
use crate::ir::LayoutNode;

use super::{GridLayout, GridSlot, SlottedNode};

pub fn slot_for(x: f32, y: f32, config: &GridConfig) -> GridSlot {
    let row = (y / config.slot_unit).round().max(0.0) as u32;
    let column = if x >= config.column_split { 1 } else { 0 };
    GridSlot { row, column }
}

pub fn slot_of(node: &LayoutNode, config: &GridConfig) -> GridSlot {
    slot_for(node.effective_x(), node.effective_y(), config)
}

pub fn slot_top(slot: GridSlot, config: &GridConfig) -> f32 {
    slot.row as f32 * config.row_pitch()
}

/// Mobile coordinate written for a node placed into `slot`.
pub fn slot_coordinate(slot: GridSlot, config: &GridConfig) -> (f32, f32) {
    let x = if slot.column == 1 {
        config.right_column_x
    } else {
        0.0
    };
    (x, slot.row as f32 * config.slot_unit)
}

/// Current mobile coordinate, normalising desktop positions onto the grid
/// when the node carries no override yet.
pub fn mobile_coordinate(node: &LayoutNode, config: &GridConfig) -> (f32, f32) {
    let x = node.m_x.unwrap_or(if node.x >= config.column_split {
        config.right_column_x
    } else {
        0.0
    });
    let y = node
        .m_y
        .unwrap_or((node.y / config.slot_unit).round() * config.slot_unit);
    (x, y)
}

pub fn compute_grid<N: AsRef<LayoutNode>>(nodes: &[N], config: &GridConfig) -> GridLayout {
    if nodes.is_empty() {
        return GridLayout {
            nodes: Vec::new(),
            total_height: config.empty_height,
            max_row: config.empty_max_row,
        };
    }

    let slotted: Vec<SlottedNode> = nodes
        .iter()
        .map(|node| {
            let node = node.as_ref();
            let slot = slot_of(node, config);
            SlottedNode {
                id: node.id.clone(),
                slot,
                top: slot_top(slot, config),
            }
        })
        .collect();

    let max_row = slotted.iter().map(|node| node.slot.row).max().unwrap_or(0);
    let total_height =
        (max_row + config.trailing_rows) as f32 * config.row_pitch() + config.trailing_padding;

    GridLayout {
        nodes: slotted,
        total_height,
        max_row,
    }
}

impl GridLayout {
    /// Scroll position that brings a node into view with a margin above it.
    pub fn scroll_offset(&self, id: &str, config: &GridConfig) -> Option<f32> {
        self.get(id)
            .map(|node| (node.top - config.scroll_margin).max(0.0))
    }

    /// Nodes sharing a slot, in list order.
    pub fn occupants(&self, slot: GridSlot) -> impl Iterator<Item = &SlottedNode> {
        self.nodes.iter().filter(move |node| node.slot == slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, x: f32, y: f32) -> LayoutNode {
        LayoutNode::new(id, id, x, y)
    }

    #[test]
    fn maps_rows_and_columns() {
        let config = GridConfig::default();
        let nodes = vec![
            node("a", 0.0, 0.0),
            node("b", 400.0, 80.0),
            node("c", 199.0, 119.0),
            node("d", 200.0, 121.0),
            node("e", 0.0, -300.0),
        ];
        let grid = compute_grid(&nodes, &config);
        let slots: Vec<(u32, u8)> = grid
            .nodes
            .iter()
            .map(|n| (n.slot.row, n.slot.column))
            .collect();
        assert_eq!(slots, vec![(0, 0), (1, 1), (1, 0), (2, 1), (0, 0)]);
        assert_eq!(grid.get("d").unwrap().top, 2.0 * 76.0);
        assert_eq!(grid.max_row, 2);
        assert_eq!(grid.total_height, 12.0 * 76.0 + 400.0);
    }

    #[test]
    fn mobile_override_wins() {
        let config = GridConfig::default();
        let mut n = node("a", 0.0, 0.0);
        n.m_x = Some(400.0);
        n.m_y = Some(800.0);
        assert_eq!(slot_of(&n, &config), GridSlot { row: 10, column: 1 });
        // only one axis overridden
        n.m_x = None;
        assert_eq!(slot_of(&n, &config), GridSlot { row: 10, column: 0 });
    }

    #[test]
    fn every_node_gets_one_slot_and_equal_positions_agree() {
        let config = GridConfig::default();
        let mut nodes = Vec::new();
        for i in 0..60 {
            let x = ((i * 37) % 700) as f32 - 100.0;
            let y = ((i * 53) % 1500) as f32 - 50.0;
            nodes.push(node(&format!("n{i}"), x, y));
            nodes.push(node(&format!("twin{i}"), x, y));
        }
        let grid = compute_grid(&nodes, &config);
        assert_eq!(grid.nodes.len(), nodes.len());
        for pair in grid.nodes.chunks(2) {
            assert_eq!(pair[0].slot, pair[1].slot);
            assert_eq!(pair[0].top, pair[1].top);
        }
    }

    #[test]
    fn empty_view_keeps_scroll_room() {
        let config = GridConfig::default();
        let grid = compute_grid::<LayoutNode>(&[], &config);
        assert_eq!(grid.total_height, 1000.0);
        assert_eq!(grid.max_row, 10);
    }

    #[test]
    fn scroll_offset_leaves_margin() {
        let config = GridConfig::default();
        let nodes = vec![node("a", 0.0, 0.0), node("b", 0.0, 800.0)];
        let grid = compute_grid(&nodes, &config);
        assert_eq!(grid.scroll_offset("a", &config), Some(0.0));
        assert_eq!(grid.scroll_offset("b", &config), Some(760.0 - 150.0));
        assert_eq!(grid.scroll_offset("zz", &config), None);
    }

    #[test]
    fn normalises_desktop_position() {
        let config = GridConfig::default();
        let n = node("a", 250.0, 130.0);
        assert_eq!(mobile_coordinate(&n, &config), (400.0, 160.0));
        assert_eq!(
            slot_coordinate(GridSlot { row: 3, column: 0 }, &config),
            (0.0, 240.0)
        );
    }
}
