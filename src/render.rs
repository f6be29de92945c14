use crate::config::{LayoutConfig, RenderConfig};
use crate::ir::{AnchorSide, EdgeKind, LayoutNode, ResolvedNode, StoryView};
use crate::layout::{Bounds, NodeOverlay, ResolvedEdge, ViewLayout};
use crate::theme::Theme;
use anyhow::Result;
use std::collections::HashMap;
use std::path::Path;

const CANVAS_PADDING: f32 = 40.0;
const MOBILE_WIDTH: f32 = 390.0;
const MOBILE_COLUMN_GAP: f32 = 10.0;

/// Desktop canvas: every visible node at its stored position.
pub fn render_canvas_svg(view: &StoryView, layout: &ViewLayout, theme: &Theme, config: &LayoutConfig) -> String {
    let bounds = layout
        .bounds
        .unwrap_or(Bounds {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 200.0,
            max_y: 200.0,
        })
        .padded(CANVAS_PADDING, CANVAS_PADDING);
    let width = bounds.width().max(200.0);
    let height = bounds.height().max(200.0);

    let mut svg = String::new();
    svg.push_str(&format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width:.2}\" height=\"{height:.2}\" viewBox=\"{:.2} {:.2} {width:.2} {height:.2}\">",
        bounds.min_x, bounds.min_y
    ));
    svg.push_str(&format!(
        "<rect x=\"{:.2}\" y=\"{:.2}\" width=\"100%\" height=\"100%\" fill=\"{}\"/>",
        bounds.min_x, bounds.min_y, theme.background
    ));
    push_defs(&mut svg, theme);

    let by_id: HashMap<&str, &LayoutNode> = view
        .nodes
        .iter()
        .map(|node| (node.id(), node.layout()))
        .collect();

    for edge in &layout.edges {
        let (Some(source), Some(target)) = (by_id.get(edge.source.as_str()), by_id.get(edge.target.as_str())) else {
            continue;
        };
        let from = anchor_point(source.x, source.y, source.width(), source.height(), edge.source_anchor);
        let to = anchor_point(target.x, target.y, target.width(), target.height(), edge.target_anchor);
        push_edge(&mut svg, edge, from, to, theme);
    }

    for node in &view.nodes {
        let overlay = layout.overlay(node.id());
        if overlay.hidden {
            continue;
        }
        let placed = node.layout();
        push_card(
            &mut svg,
            node,
            (placed.x, placed.y, placed.width(), placed.height()),
            overlay,
            theme,
            config,
        );
    }

    svg.push_str("</svg>");
    svg
}

/// Mobile list: two columns on the slot grid, no edges.
pub fn render_mobile_svg(view: &StoryView, layout: &ViewLayout, theme: &Theme, config: &LayoutConfig) -> String {
    let grid = &config.grid;
    let column_width = (MOBILE_WIDTH - MOBILE_COLUMN_GAP) / 2.0;
    let height = layout.grid.total_height;

    let mut svg = String::new();
    svg.push_str(&format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{MOBILE_WIDTH}\" height=\"{height:.2}\" viewBox=\"0 0 {MOBILE_WIDTH} {height:.2}\">",
    ));
    svg.push_str(&format!(
        "<rect width=\"100%\" height=\"100%\" fill=\"{}\"/>",
        theme.background
    ));
    svg.push_str(&format!(
        "<line x1=\"{x:.2}\" y1=\"0\" x2=\"{x:.2}\" y2=\"{height:.2}\" stroke=\"{}\" stroke-dasharray=\"4 4\"/>",
        theme.divider_color,
        x = MOBILE_WIDTH / 2.0
    ));

    for slotted in &layout.grid.nodes {
        let Some(node) = view.node(&slotted.id) else {
            continue;
        };
        let overlay = layout.overlay(&slotted.id);
        if overlay.hidden {
            continue;
        }
        let x = slotted.slot.column as f32 * (column_width + MOBILE_COLUMN_GAP);
        push_card(
            &mut svg,
            node,
            (x, slotted.top, column_width, grid.row_height),
            overlay,
            theme,
            config,
        );
    }

    svg.push_str("</svg>");
    svg
}

fn push_defs(svg: &mut String, theme: &Theme) {
    svg.push_str("<defs>");
    svg.push_str(&format!(
        "<marker id=\"arrow\" viewBox=\"0 0 10 10\" refX=\"10\" refY=\"5\" markerWidth=\"3\" markerHeight=\"3\" orient=\"auto-start-reverse\"><path d=\"M 0 0 L 10 5 L 0 10 z\" fill=\"{}\"/></marker>",
        theme.edge_color
    ));
    svg.push_str("</defs>");
}

fn push_edge(svg: &mut String, edge: &ResolvedEdge, from: (f32, f32), to: (f32, f32), theme: &Theme) {
    let points = match edge.kind {
        EdgeKind::Straight => vec![from, to],
        EdgeKind::Step => step_points(from, edge.source_anchor, to),
    };
    let dash = if edge.is_virtual {
        " stroke-dasharray=\"12 8\""
    } else {
        ""
    };
    svg.push_str(&format!(
        "<path data-edge=\"{}\" d=\"{}\" fill=\"none\" stroke=\"{}\" stroke-width=\"{}\"{dash} marker-end=\"url(#arrow)\"/>",
        escape_xml(&edge.id),
        points_to_path(&points),
        theme.edge_color,
        theme.edge_width,
    ));
}

fn push_card(
    svg: &mut String,
    node: &ResolvedNode,
    (x, y, w, h): (f32, f32, f32, f32),
    overlay: NodeOverlay,
    theme: &Theme,
    config: &LayoutConfig,
) {
    let (fill, border) = match node.category() {
        Some(category) => {
            let colors = theme.colors_for(category);
            (colors.fill.as_str(), colors.border.as_str())
        }
        None => (theme.placeholder_fill.as_str(), theme.divider_color.as_str()),
    };
    let (stroke, stroke_width) = if overlay.highlighted {
        (theme.highlight_color.as_str(), 4.0)
    } else {
        (border, 1.4)
    };
    let opacity = if overlay.watched { theme.watched_opacity } else { 1.0 };

    svg.push_str(&format!(
        "<g data-node=\"{}\" opacity=\"{opacity}\">",
        escape_xml(node.id())
    ));
    svg.push_str(&format!(
        "<rect x=\"{x:.2}\" y=\"{y:.2}\" width=\"{w:.2}\" height=\"{h:.2}\" rx=\"12\" ry=\"12\" fill=\"{fill}\" stroke=\"{stroke}\" stroke-width=\"{stroke_width}\"/>",
    ));
    if let Some(story) = node.story() {
        let lines = wrap_label(&story.label, config.max_label_width_chars);
        svg.push_str(&text_block_svg(x + w / 2.0, y + h / 2.0, &lines, theme, config));
        if let Some(name) = story.protagonist.as_deref().filter(|_| story.category.searches_protagonist()) {
            svg.push_str(&format!(
                "<text x=\"{:.2}\" y=\"{:.2}\" text-anchor=\"middle\" font-family=\"{}\" font-size=\"{}\" fill=\"{}\">{}</text>",
                x + w / 2.0,
                y + h - 10.0,
                theme.font_family,
                theme.font_size * 0.85,
                theme.muted_text_color,
                escape_xml(name)
            ));
        }
    }
    if overlay.watched {
        svg.push_str(&format!(
            "<circle cx=\"{:.2}\" cy=\"{:.2}\" r=\"10\" fill=\"{}\"/>",
            x + w - 14.0,
            y + 14.0,
            theme.watched_color
        ));
    }
    svg.push_str("</g>");
}

/// Connection point in the middle of the given side.
pub fn anchor_point(x: f32, y: f32, w: f32, h: f32, side: AnchorSide) -> (f32, f32) {
    match side {
        AnchorSide::Top => (x + w / 2.0, y),
        AnchorSide::Bottom => (x + w / 2.0, y + h),
        AnchorSide::Left => (x, y + h / 2.0),
        AnchorSide::Right => (x + w, y + h / 2.0),
    }
}

/// Orthogonal route leaving along the source side and turning halfway.
fn step_points(from: (f32, f32), side: AnchorSide, to: (f32, f32)) -> Vec<(f32, f32)> {
    match side {
        AnchorSide::Left | AnchorSide::Right => {
            let mid_x = (from.0 + to.0) / 2.0;
            vec![from, (mid_x, from.1), (mid_x, to.1), to]
        }
        AnchorSide::Top | AnchorSide::Bottom => {
            let mid_y = (from.1 + to.1) / 2.0;
            vec![from, (from.0, mid_y), (to.0, mid_y), to]
        }
    }
}

fn points_to_path(points: &[(f32, f32)]) -> String {
    if points.is_empty() {
        return String::new();
    }
    let mut d = String::new();
    d.push_str(&format!("M {:.2} {:.2}", points[0].0, points[0].1));
    for point in points.iter().skip(1) {
        d.push_str(&format!(" L {:.2} {:.2}", point.0, point.1));
    }
    d
}

fn wrap_label(label: &str, max_chars: usize) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    for word in label.split_whitespace() {
        let needed = current.chars().count() + word.chars().count() + usize::from(!current.is_empty());
        if !current.is_empty() && needed > max_chars {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn text_block_svg(x: f32, y: f32, lines: &[String], theme: &Theme, config: &LayoutConfig) -> String {
    let line_height = theme.font_size * config.label_line_height;
    let total_height = lines.len() as f32 * line_height;
    let start_y = y - total_height / 2.0 + theme.font_size;
    let mut text = String::new();

    text.push_str(&format!(
        "<text x=\"{x:.2}\" y=\"{start_y:.2}\" text-anchor=\"middle\" font-family=\"{}\" font-size=\"{}\" font-weight=\"700\" fill=\"{}\">",
        theme.font_family, theme.font_size, theme.text_color
    ));
    for (idx, line) in lines.iter().enumerate() {
        let dy = if idx == 0 { 0.0 } else { line_height };
        text.push_str(&format!(
            "<tspan x=\"{x:.2}\" dy=\"{dy:.2}\">{}</tspan>",
            escape_xml(line)
        ));
    }
    text.push_str("</text>");
    text
}

pub fn write_output_svg(svg: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, svg)?;
        }
        None => {
            print!("{}", svg);
        }
    }
    Ok(())
}

#[cfg(feature = "png")]
pub fn write_output_png(svg: &str, output: &Path, render_cfg: &RenderConfig) -> Result<()> {
    let mut opt = usvg::Options::default();
    opt.font_family = "Inter".to_string();
    let fallback = usvg::Size::from_wh(800.0, 600.0).ok_or_else(|| anyhow::anyhow!("invalid fallback size"))?;
    opt.default_size = usvg::Size::from_wh(render_cfg.width, render_cfg.height).unwrap_or(fallback);

    let tree = usvg::Tree::from_str(svg, &opt)?;
    let size = tree.size().to_int_size();
    let mut pixmap = resvg::tiny_skia::Pixmap::new(size.width(), size.height())
        .ok_or_else(|| anyhow::anyhow!("Failed to allocate pixmap"))?;

    let mut pixmap_mut = pixmap.as_mut();
    resvg::render(&tree, resvg::tiny_skia::Transform::default(), &mut pixmap_mut);
    pixmap.save_png(output)?;
    Ok(())
}

#[cfg(not(feature = "png"))]
pub fn write_output_png(_svg: &str, _output: &Path, _render_cfg: &RenderConfig) -> Result<()> {
    anyhow::bail!("PNG output requires the `png` feature")
}

pub fn escape_xml(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Edge, StoryCategory, StoryRecord};
    use crate::layout::compute_layout;

    fn view() -> StoryView {
        let mut side = StoryRecord::new("s2", "Tom & Jerry's Night Out", StoryCategory::Etc);
        side.protagonist = Some("Rinne".to_string());
        StoryView {
            nodes: vec![
                ResolvedNode::Story {
                    node: LayoutNode::new("A", "s1", 0.0, 0.0),
                    story: StoryRecord::new("s1", "Alpha", StoryCategory::Main),
                },
                ResolvedNode::Story {
                    node: LayoutNode::new("B", "s2", 400.0, 80.0),
                    story: side,
                },
                ResolvedNode::Missing {
                    node: LayoutNode::new("C", "gone", 0.0, 480.0),
                },
            ],
            edges: vec![Edge::new("e1", "A", "B"), Edge::new("e2", "B", "C")],
        }
    }

    #[test]
    fn canvas_svg_draws_cards_and_edges() {
        let view = view();
        let config = LayoutConfig::default();
        let layout = compute_layout(&view, HashMap::new(), &config);
        let svg = render_canvas_svg(&view, &layout, &Theme::night(), &config);
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("Alpha"));
        assert!(svg.contains("Tom &amp; Jerry&apos;s"));
        assert!(svg.contains("Rinne"));
        assert_eq!(svg.matches("data-edge=").count(), 2);
        assert_eq!(svg.matches("data-node=").count(), 3);
        assert!(svg.contains(&Theme::night().placeholder_fill));
    }

    #[test]
    fn hidden_nodes_are_bridged_by_dashed_edges() {
        let view = view();
        let config = LayoutConfig::default();
        let mut overlays = HashMap::new();
        overlays.insert(
            "B".to_string(),
            NodeOverlay {
                hidden: true,
                ..Default::default()
            },
        );
        overlays.insert(
            "A".to_string(),
            NodeOverlay {
                watched: true,
                highlighted: true,
                ..Default::default()
            },
        );
        let layout = compute_layout(&view, overlays, &config);
        let theme = Theme::night();
        let svg = render_canvas_svg(&view, &layout, &theme, &config);
        assert!(!svg.contains("data-node=\"B\""));
        assert!(svg.contains("stroke-dasharray=\"12 8\""));
        assert!(svg.contains(&format!("opacity=\"{}\"", theme.watched_opacity)));
        assert!(svg.contains(&theme.highlight_color));
    }

    #[test]
    fn mobile_svg_uses_slot_grid() {
        let view = view();
        let config = LayoutConfig::default();
        let layout = compute_layout(&view, HashMap::new(), &config);
        let svg = render_mobile_svg(&view, &layout, &Theme::paper(), &config);
        assert!(!svg.contains("data-edge="));
        assert!(svg.contains("y=\"76.00\""));
        assert!(svg.contains("x=\"200.00\""));
    }

    #[test]
    fn step_routes_turn_halfway() {
        let points = step_points((0.0, 0.0), AnchorSide::Right, (100.0, 50.0));
        assert_eq!(points, vec![(0.0, 0.0), (50.0, 0.0), (50.0, 50.0), (100.0, 50.0)]);
        let points = step_points((0.0, 0.0), AnchorSide::Bottom, (100.0, 50.0));
        assert_eq!(points[1], (0.0, 25.0));
    }

    #[test]
    fn wraps_labels_on_words() {
        assert_eq!(wrap_label("one two three", 7), vec!["one two", "three"]);
        assert_eq!(wrap_label("", 7), Vec::<String>::new());
    }
}
