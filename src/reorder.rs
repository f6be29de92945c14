//! Drag-and-drop reordering for the mobile list.
//!
//! Only the mobile overrides (`m_x`/`m_y`) are written; desktop positions are
//! left alone so the two layouts can diverge.

use serde::Serialize;

use crate::config::GridConfig;
use crate::error::{Error, Result};
use crate::ir::LayoutNode;
use crate::layout::{GridSlot, mobile_coordinate, slot_coordinate, slot_of};
use crate::session::AdminSession;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Screen rectangle, `left`/`top` in the same space as pointer positions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.left
            && point.x <= self.left + self.width
            && point.y >= self.top
            && point.y <= self.top + self.height
    }
}

#[derive(Debug, Clone, PartialEq)]
struct DragState {
    node_id: String,
    offset: Point,
    pointer: Point,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DropOutcome {
    Moved { node: String, to: GridSlot },
    Swapped { node: String, occupant: String },
}

#[derive(Debug, Clone)]
pub struct Reorderer {
    config: GridConfig,
    drag: Option<DragState>,
}

impl Reorderer {
    pub fn new(config: GridConfig) -> Self {
        Self { config, drag: None }
    }

    /// Start dragging `node_id`, remembering where inside the card it was
    /// grabbed so the ghost follows the finger.
    pub fn begin(
        &mut self,
        session: &AdminSession,
        node_id: &str,
        pointer: Point,
        node_rect: Rect,
    ) -> Result<()> {
        if !session.is_admin() {
            return Err(Error::NotAdmin);
        }
        self.drag = Some(DragState {
            node_id: node_id.to_string(),
            offset: Point::new(pointer.x - node_rect.left, pointer.y - node_rect.top),
            pointer,
        });
        Ok(())
    }

    pub fn track(&mut self, pointer: Point) {
        if let Some(drag) = self.drag.as_mut() {
            drag.pointer = pointer;
        }
    }

    pub fn dragged(&self) -> Option<&str> {
        self.drag.as_ref().map(|drag| drag.node_id.as_str())
    }

    /// Top-left corner of the floating card.
    pub fn ghost_position(&self) -> Option<Point> {
        self.drag.as_ref().map(|drag| {
            Point::new(drag.pointer.x - drag.offset.x, drag.pointer.y - drag.offset.y)
        })
    }

    pub fn cancel(&mut self) {
        self.drag = None;
    }

    /// Finish the drag at the last tracked pointer position. `None` when
    /// nothing was dragged, the pointer left the container or the node is
    /// gone; the drag ends either way.
    pub fn drop<N>(&mut self, nodes: &mut [N], container: Rect, scroll_top: f32) -> Option<DropOutcome>
    where
        N: AsRef<LayoutNode> + AsMut<LayoutNode>,
    {
        let drag = self.drag.take()?;
        if !container.contains(drag.pointer) {
            log::debug!("drop of {} outside the list ignored", drag.node_id);
            return None;
        }
        let drop_x = drag.pointer.x - container.left;
        let drop_y = drag.pointer.y - container.top + scroll_top;
        let slot = drop_slot(drop_x, drop_y, container.width, &self.config);
        place_in_slot(nodes, &drag.node_id, slot, &self.config)
    }
}

/// Slot under a point given relative to the scrolled list.
pub fn drop_slot(drop_x: f32, drop_y: f32, width: f32, config: &GridConfig) -> GridSlot {
    let column = if drop_x >= width * config.drop_column_ratio {
        1
    } else {
        0
    };
    let row = (drop_y / config.row_pitch()).floor().max(0.0) as u32;
    GridSlot { row, column }
}

/// Put `dragged_id` into `target`, swapping mobile coordinates with the first
/// other node already in that slot.
pub fn place_in_slot<N>(
    nodes: &mut [N],
    dragged_id: &str,
    target: GridSlot,
    config: &GridConfig,
) -> Option<DropOutcome>
where
    N: AsRef<LayoutNode> + AsMut<LayoutNode>,
{
    let dragged = nodes.iter().position(|n| n.as_ref().id == dragged_id)?;
    let occupant = nodes
        .iter()
        .enumerate()
        .find(|(i, n)| *i != dragged && slot_of(n.as_ref(), config) == target)
        .map(|(i, _)| i);

    match occupant {
        Some(other) => {
            let from = mobile_coordinate(nodes[dragged].as_ref(), config);
            let to = mobile_coordinate(nodes[other].as_ref(), config);
            set_mobile(nodes[dragged].as_mut(), to);
            set_mobile(nodes[other].as_mut(), from);
            let occupant = nodes[other].as_ref().id.clone();
            log::debug!("swapped {dragged_id} with {occupant}");
            Some(DropOutcome::Swapped {
                node: dragged_id.to_string(),
                occupant,
            })
        }
        None => {
            set_mobile(nodes[dragged].as_mut(), slot_coordinate(target, config));
            Some(DropOutcome::Moved {
                node: dragged_id.to_string(),
                to: target,
            })
        }
    }
}

fn set_mobile(node: &mut LayoutNode, (x, y): (f32, f32)) {
    node.m_x = Some(x);
    node.m_y = Some(y);
}
