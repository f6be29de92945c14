//! Camera state for the desktop canvas.
//!
//! The renderer works in an internal zoom space; viewers see a display zoom
//! where 1.0 means 100%. Every camera operation returns a [`CameraMove`]
//! describing the target transform and how long the front end should take to
//! animate to it.

use std::time::Duration;

use serde::Serialize;

use crate::config::ViewportConfig;
use crate::ir::LayoutNode;
use crate::layout::Bounds;

/// Screen-space translation plus internal zoom.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub zoom: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Screen {
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraMove {
    pub viewport: Viewport,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct Camera {
    config: ViewportConfig,
    screen: Screen,
    viewport: Viewport,
}

impl Camera {
    pub fn new(config: ViewportConfig, screen: Screen) -> Self {
        let zoom = config.zoom_scale;
        Self {
            config,
            screen,
            viewport: Viewport { x: 0.0, y: 0.0, zoom },
        }
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn set_screen(&mut self, screen: Screen) {
        self.screen = screen;
    }

    pub fn apply(&mut self, camera_move: &CameraMove) {
        self.viewport = camera_move.viewport;
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn to_display(&self, zoom: f32) -> f32 {
        zoom / self.config.zoom_scale
    }

    pub fn from_display(&self, display: f32) -> f32 {
        display * self.config.zoom_scale
    }

    pub fn display_zoom(&self) -> f32 {
        self.to_display(self.viewport.zoom)
    }

    pub fn zoom_range(&self) -> (f32, f32) {
        (
            self.from_display(self.config.min_display_zoom),
            self.from_display(self.config.max_display_zoom),
        )
    }

    fn world_center_x(&self) -> f32 {
        (self.screen.width / 2.0 - self.viewport.x) / self.viewport.zoom
    }

    fn world_center_y(&self) -> f32 {
        (self.screen.height / 2.0 - self.viewport.y) / self.viewport.zoom
    }

    fn vertical_center(&self, bounds: &Bounds) -> f32 {
        bounds.center_y() + self.config.vertical_bias
    }

    /// Centre `node` horizontally at 100%, keeping the vertical world centre.
    pub fn focus(&self, node: &LayoutNode) -> CameraMove {
        let zoom = self.from_display(1.0);
        let world_y = self.world_center_y();
        let x = self.screen.width / 2.0 - (node.x + node.width() / 2.0) * zoom;
        let y = self.screen.height / 2.0 - world_y * zoom;
        CameraMove {
            viewport: Viewport { x, y, zoom },
            duration: Duration::from_millis(self.config.focus_ms),
        }
    }

    /// Back to 100% around the vertical middle of the view.
    pub fn reset_view<N: AsRef<LayoutNode>>(&self, nodes: &[N]) -> Option<CameraMove> {
        let bounds = Bounds::of_nodes(nodes)?;
        let zoom = self.from_display(1.0);
        let world_x = self.world_center_x();
        let x = self.screen.width / 2.0 - world_x * zoom;
        let y = self.screen.height / 2.0 - self.vertical_center(&bounds) * zoom;
        Some(CameraMove {
            viewport: Viewport { x, y, zoom },
            duration: Duration::from_millis(self.config.reset_ms),
        })
    }

    /// First-load orientation: leftmost node at a third of the screen width.
    pub fn initial_focus<N: AsRef<LayoutNode>>(&self, nodes: &[N]) -> Option<CameraMove> {
        let leftmost = nodes
            .iter()
            .map(AsRef::as_ref)
            .min_by(|a, b| a.x.total_cmp(&b.x))?;
        let bounds = Bounds::of_nodes(nodes)?;
        let zoom = self.from_display(1.0);
        let x = self.screen.width * self.config.initial_anchor_ratio
            - (leftmost.x + leftmost.width() / 2.0) * zoom;
        let y = self.screen.height / 2.0 - self.vertical_center(&bounds) * zoom;
        Some(CameraMove {
            viewport: Viewport { x, y, zoom },
            duration: Duration::from_millis(self.config.initial_ms),
        })
    }

    /// Zoom around the screen centre; the display value is clamped to the
    /// configured range.
    pub fn set_display_zoom(&self, display: f32) -> CameraMove {
        let display = display.clamp(self.config.min_display_zoom, self.config.max_display_zoom);
        let zoom = self.from_display(display);
        let x = self.screen.width / 2.0 - self.world_center_x() * zoom;
        let y = self.screen.height / 2.0 - self.world_center_y() * zoom;
        CameraMove {
            viewport: Viewport { x, y, zoom },
            duration: Duration::ZERO,
        }
    }

    /// Region a viewer may scroll within; admins roam freely.
    pub fn translate_extent<N: AsRef<LayoutNode>>(&self, nodes: &[N], is_admin: bool) -> Option<Bounds> {
        if is_admin {
            return None;
        }
        Bounds::of_nodes(nodes).map(|bounds| bounds.padded(self.config.pad_x, self.config.pad_y))
    }

    /// Wheel or trackpad delta pans horizontally; native zoom gestures are
    /// never routed here.
    pub fn pan(&self, delta_x: f32, delta_y: f32, extent: Option<&Bounds>) -> Viewport {
        let Viewport { x, y, zoom } = self.viewport;
        if delta_x == 0.0 && delta_y == 0.0 {
            return self.viewport;
        }
        let delta = if delta_y != 0.0 { delta_y } else { delta_x };
        let mut next_x = x - delta * self.config.wheel_speed;
        let mut next_y = y;

        if let Some(extent) = extent {
            let x_min = self.screen.width - extent.max_x * zoom;
            let x_max = -extent.min_x * zoom;
            let y_min = self.screen.height - extent.max_y * zoom;
            let y_max = -extent.min_y * zoom;
            next_x = clamp_axis(next_x, x_min, x_max);
            next_y = clamp_axis(next_y, y_min, y_max);
        }

        Viewport {
            x: next_x,
            y: next_y,
            zoom,
        }
    }
}

/// Upper bound first, then lower, so an extent narrower than the screen pins
/// to the lower limit instead of panicking like `f32::clamp`.
fn clamp_axis(value: f32, min: f32, max: f32) -> f32 {
    min.max(max.min(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Camera {
        Camera::new(
            ViewportConfig::default(),
            Screen {
                width: 1200.0,
                height: 800.0,
            },
        )
    }

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn display_zoom_round_trips() {
        let cam = camera();
        let mut z = 0.6f32;
        while z <= 1.5 {
            let back = cam.to_display(cam.from_display(z));
            assert!((back - z).abs() <= z * 4.0 * f32::EPSILON, "{z} -> {back}");
            z += 0.01;
        }
        assert!(close(cam.display_zoom(), 1.0));
    }

    #[test]
    fn focus_centres_node_and_keeps_vertical_centre() {
        let mut cam = camera();
        cam.set_viewport(Viewport {
            x: 10.0,
            y: -200.0,
            zoom: 0.8,
        });
        let world_y_before = (400.0 - -200.0) / 0.8;
        let mut node = LayoutNode::new("n", "s", 1000.0, 50.0);
        node.w = Some(200.0);
        let m = cam.focus(&node);
        assert_eq!(m.duration, Duration::from_millis(700));
        assert!(close(m.viewport.zoom, 0.55));
        // node centre lands on the screen centre
        assert!(close(1100.0 * m.viewport.zoom + m.viewport.x, 600.0));
        let world_y_after = (400.0 - m.viewport.y) / m.viewport.zoom;
        assert!(close(world_y_before, world_y_after));
    }

    #[test]
    fn reset_keeps_horizontal_centre() {
        let mut cam = camera();
        cam.set_viewport(Viewport {
            x: -300.0,
            y: 0.0,
            zoom: 0.7,
        });
        let world_x_before = (600.0 - -300.0) / 0.7;
        let nodes = vec![
            LayoutNode::new("a", "a", 0.0, 0.0),
            LayoutNode::new("b", "b", 500.0, 450.0),
        ];
        let m = cam.reset_view(&nodes).unwrap();
        assert_eq!(m.duration, Duration::from_millis(800));
        let world_x_after = (600.0 - m.viewport.x) / m.viewport.zoom;
        assert!(close(world_x_before, world_x_after));
        // bounds 0..800, centre 400, biased by 60
        assert!(close(m.viewport.y, 400.0 - 460.0 * 0.55));
        assert!(cam.reset_view::<LayoutNode>(&[]).is_none());
    }

    #[test]
    fn initial_focus_uses_leftmost_node() {
        let cam = camera();
        let nodes = vec![
            LayoutNode::new("b", "b", 300.0, 0.0),
            LayoutNode::new("a", "a", -100.0, 0.0),
        ];
        let m = cam.initial_focus(&nodes).unwrap();
        assert_eq!(m.duration, Duration::from_millis(1000));
        let centre = (-100.0 + 128.0) * m.viewport.zoom + m.viewport.x;
        assert!(close(centre, 400.0));
        let reset = cam.reset_view(&nodes).unwrap();
        assert!(close(m.viewport.y, reset.viewport.y));
    }

    #[test]
    fn zoom_is_clamped_to_display_range() {
        let cam = camera();
        assert!(close(cam.set_display_zoom(3.0).viewport.zoom, 1.5 * 0.55));
        assert!(close(cam.set_display_zoom(0.1).viewport.zoom, 0.6 * 0.55));
        let (lo, hi) = cam.zoom_range();
        assert!(close(lo, 0.33) && close(hi, 0.825));
    }

    #[test]
    fn viewers_are_clamped_admins_are_not() {
        let cam = camera();
        let nodes = vec![LayoutNode::new("a", "a", 0.0, 0.0)];
        assert!(cam.translate_extent(&nodes, true).is_none());
        let extent = cam.translate_extent(&nodes, false).unwrap();
        assert_eq!(extent.min_x, -1500.0);
        assert_eq!(extent.max_y, 350.0 + 1000.0);

        let free = cam.pan(0.0, 100_000.0, None);
        assert!(close(free.x, -150_000.0));

        let clamped = cam.pan(0.0, 100_000.0, Some(&extent));
        let x_min = 1200.0 - extent.max_x * 0.55;
        assert!(close(clamped.x, x_min));
        let back = cam.pan(-100_000.0, 0.0, Some(&extent));
        assert!(close(back.x, 1500.0 * 0.55));
    }

    #[test]
    fn vertical_wheel_wins_over_horizontal() {
        let cam = camera();
        let v = cam.pan(30.0, 20.0, None);
        assert!(close(v.x, -30.0));
        assert_eq!(cam.pan(0.0, 0.0, None), cam.viewport());
    }
}
