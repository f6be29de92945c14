use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use story_guide::config::LayoutConfig;
use story_guide::ir::{Edge, LayoutNode, ResolvedNode, StoryCategory, StoryRecord, StoryView};
use story_guide::layout::{NodeOverlay, compute_layout, resolve_edges};
use story_guide::render::{render_canvas_svg, render_mobile_svg};
use story_guide::search::find_matches;
use story_guide::theme::Theme;
use std::collections::{HashMap, HashSet};
use std::hint::black_box;

/// A season-sized chain with side branches every few nodes.
fn synthetic_view(nodes: usize) -> StoryView {
    let mut view = StoryView::new();
    for i in 0..nodes {
        let category = match i % 4 {
            0 => StoryCategory::Main,
            1 => StoryCategory::Theme,
            2 => StoryCategory::Etc,
            _ => StoryCategory::Eternal,
        };
        let mut story = StoryRecord::new(format!("s{i}"), format!("Story number {i}"), category);
        story.protagonist = Some(format!("Hero {}", i % 7));
        let x = if i % 2 == 0 { 0.0 } else { 400.0 };
        view.nodes.push(ResolvedNode::Story {
            node: LayoutNode::new(format!("N{i}"), format!("s{i}"), x, i as f32 * 80.0),
            story,
        });
    }
    for i in 0..nodes.saturating_sub(1) {
        view.edges.push(Edge::new(format!("e{i}"), format!("N{i}"), format!("N{}", i + 1)));
        if i % 5 == 0 && i + 3 < nodes {
            view.edges.push(Edge::new(format!("b{i}"), format!("N{i}"), format!("N{}", i + 3)));
        }
    }
    view
}

/// Every third node hidden, which forces virtual edges through chains.
fn every_third_hidden(view: &StoryView) -> HashMap<String, NodeOverlay> {
    view.nodes
        .iter()
        .enumerate()
        .filter(|(i, _)| i % 3 == 1)
        .map(|(_, node)| {
            (
                node.id().to_string(),
                NodeOverlay {
                    hidden: true,
                    ..Default::default()
                },
            )
        })
        .collect()
}

const SIZES: [usize; 3] = [20, 120, 600];

fn bench_layout(c: &mut Criterion) {
    let mut group = c.benchmark_group("layout");
    let config = LayoutConfig::default();
    for size in SIZES {
        let view = synthetic_view(size);
        let overlays = every_third_hidden(&view);
        group.bench_with_input(BenchmarkId::from_parameter(size), &view, |b, data| {
            b.iter(|| {
                let layout = compute_layout(black_box(data), overlays.clone(), &config);
                black_box(layout.edges.len());
            })
        });
    }
    group.finish();
}

fn bench_virtual_edges(c: &mut Criterion) {
    let mut group = c.benchmark_group("virtual_edges");
    for size in SIZES {
        let view = synthetic_view(size);
        let visible: HashSet<String> = view
            .nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| i % 3 != 1)
            .map(|(_, node)| node.id().to_string())
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(size), &view, |b, data| {
            b.iter(|| black_box(resolve_edges(black_box(&data.edges), &visible)))
        });
    }
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");
    for size in SIZES {
        let view = synthetic_view(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &view, |b, data| {
            b.iter(|| black_box(find_matches(black_box(&data.nodes), "hero 3")))
        });
    }
    group.finish();
}

fn bench_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_svg");
    let config = LayoutConfig::default();
    let theme = Theme::night();
    for size in SIZES {
        let view = synthetic_view(size);
        let layout = compute_layout(&view, every_third_hidden(&view), &config);
        group.bench_with_input(BenchmarkId::new("canvas", size), &layout, |b, data| {
            b.iter(|| black_box(render_canvas_svg(&view, black_box(data), &theme, &config)))
        });
        group.bench_with_input(BenchmarkId::new("mobile", size), &layout, |b, data| {
            b.iter(|| black_box(render_mobile_svg(&view, black_box(data), &theme, &config)))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_layout,
    bench_virtual_edges,
    bench_search,
    bench_render
);
criterion_main!(benches);
