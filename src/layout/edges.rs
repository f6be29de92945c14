use std::collections::{HashMap, HashSet, VecDeque};

use crate::ir::{AnchorSide, Edge, EdgeKind};

use super::ResolvedEdge;

#[derive(Debug, Default)]
struct SideUsage {
    used: HashMap<String, HashSet<AnchorSide>>,
}

impl SideUsage {
    fn mark(&mut self, node: &str, side: Option<AnchorSide>) {
        if let Some(side) = side {
            self.used.entry(node.to_string()).or_default().insert(side);
        }
    }

    /// First side not yet used at `node`; `top` once all four are taken.
    fn claim(&mut self, node: &str) -> AnchorSide {
        let used = self.used.entry(node.to_string()).or_default();
        for side in AnchorSide::ALL {
            if used.insert(side) {
                return side;
            }
        }
        AnchorSide::Top
    }
}

/// Visible nodes reachable from `start` by walking forward through hidden ones.
fn next_visible<'a>(
    start: &'a str,
    outgoing: &HashMap<&'a str, Vec<&'a str>>,
    visible: &HashSet<String>,
) -> Vec<&'a str> {
    let mut found: Vec<&str> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = outgoing.get(start).into_iter().flatten().copied().collect();

    while let Some(current) = queue.pop_front() {
        if !seen.insert(current) {
            continue;
        }
        if visible.contains(current) {
            if !found.contains(&current) {
                found.push(current);
            }
        } else if let Some(next) = outgoing.get(current) {
            queue.extend(next.iter().copied());
        }
    }
    found
}

/// Edges to draw for the given visible node set.
///
/// Edges whose target is hidden are replaced by `step` edges to every visible
/// node reachable through the hidden chain. Edges from hidden sources are
/// dropped. The result holds at most one edge per
/// `(source, source anchor, target, target anchor)`.
pub fn resolve_edges(edges: &[Edge], visible: &HashSet<String>) -> Vec<ResolvedEdge> {
    let mut outgoing: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        outgoing
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }

    let mut sides = SideUsage::default();
    for edge in edges {
        if visible.contains(&edge.source) && visible.contains(&edge.target) {
            sides.mark(&edge.source, edge.source_handle);
            sides.mark(&edge.target, edge.target_handle);
        }
    }

    let mut resolved = Vec::new();
    for edge in edges {
        if !visible.contains(&edge.source) {
            continue;
        }
        if visible.contains(&edge.target) {
            resolved.push(ResolvedEdge {
                id: edge.id.clone(),
                source: edge.source.clone(),
                target: edge.target.clone(),
                source_anchor: edge.source_handle.unwrap_or(AnchorSide::Bottom),
                target_anchor: edge.target_handle.unwrap_or(AnchorSide::Top),
                kind: edge.kind,
                is_virtual: false,
            });
            continue;
        }
        for target in next_visible(&edge.target, &outgoing, visible) {
            let source_anchor = match edge.source_handle {
                Some(side) => side,
                None => sides.claim(&edge.source),
            };
            let target_anchor = sides.claim(target);
            resolved.push(ResolvedEdge {
                id: format!("v_{}_{}", edge.source, target),
                source: edge.source.clone(),
                target: target.to_string(),
                source_anchor,
                target_anchor,
                kind: EdgeKind::Step,
                is_virtual: true,
            });
        }
    }

    let mut keys = HashSet::new();
    resolved.retain(|edge| {
        keys.insert((
            edge.source.clone(),
            edge.source_anchor,
            edge.target.clone(),
            edge.target_anchor,
        ))
    });
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visible(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn edge(id: &str, source: &str, target: &str) -> Edge {
        Edge::new(id, source, target)
    }

    #[test]
    fn hidden_middle_node_becomes_virtual_edge() {
        let edges = vec![edge("e1", "A", "B"), edge("e2", "B", "C")];
        let out = resolve_edges(&edges, &visible(&["A", "C"]));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source, "A");
        assert_eq!(out[0].target, "C");
        assert_eq!(out[0].id, "v_A_C");
        assert!(out[0].is_virtual);
        assert!(out.iter().all(|e| e.source != "B" && e.target != "B"));
    }

    #[test]
    fn visible_edges_pass_through_with_default_anchors() {
        let mut e = edge("e1", "A", "B");
        e.kind = EdgeKind::Straight;
        e.target_handle = Some(AnchorSide::Left);
        let out = resolve_edges(&[e], &visible(&["A", "B"]));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "e1");
        assert_eq!(out[0].kind, EdgeKind::Straight);
        assert_eq!(out[0].source_anchor, AnchorSide::Bottom);
        assert_eq!(out[0].target_anchor, AnchorSide::Left);
        assert!(!out[0].is_virtual);
    }

    #[test]
    fn virtual_anchors_avoid_sides_in_use() {
        let mut direct = edge("e0", "A", "D");
        direct.source_handle = Some(AnchorSide::Top);
        direct.target_handle = Some(AnchorSide::Top);
        let edges = vec![direct, edge("e1", "A", "B"), edge("e2", "B", "C")];
        let out = resolve_edges(&edges, &visible(&["A", "C", "D"]));
        let v = out.iter().find(|e| e.is_virtual).unwrap();
        assert_eq!(v.source_anchor, AnchorSide::Bottom);
        assert_eq!(v.target_anchor, AnchorSide::Top);
    }

    #[test]
    fn sides_fall_back_to_top_when_exhausted() {
        let mut usage = SideUsage::default();
        let claimed: Vec<AnchorSide> = (0..5).map(|_| usage.claim("n")).collect();
        assert_eq!(
            claimed,
            vec![
                AnchorSide::Top,
                AnchorSide::Bottom,
                AnchorSide::Left,
                AnchorSide::Right,
                AnchorSide::Top
            ]
        );
    }

    #[test]
    fn fans_out_to_every_visible_descendant() {
        let edges = vec![
            edge("e1", "A", "H"),
            edge("e2", "H", "X"),
            edge("e3", "H", "Y"),
            edge("e4", "X", "Z"),
        ];
        let out = resolve_edges(&edges, &visible(&["A", "X", "Y", "Z"]));
        let targets: Vec<&str> = out
            .iter()
            .filter(|e| e.source == "A")
            .map(|e| e.target.as_str())
            .collect();
        assert_eq!(targets, vec!["X", "Y"]);
    }

    #[test]
    fn hidden_cycle_terminates() {
        let edges = vec![
            edge("e1", "A", "H1"),
            edge("e2", "H1", "H2"),
            edge("e3", "H2", "H1"),
            edge("e4", "H2", "B"),
        ];
        let out = resolve_edges(&edges, &visible(&["A", "B"]));
        assert_eq!(out.len(), 1);
        assert_eq!((out[0].source.as_str(), out[0].target.as_str()), ("A", "B"));

        let closed = vec![edge("e1", "A", "H1"), edge("e2", "H1", "H1")];
        assert!(resolve_edges(&closed, &visible(&["A"])).is_empty());
    }

    #[test]
    fn duplicate_routes_collapse() {
        let mut first = edge("e1", "A", "B");
        first.source_handle = Some(AnchorSide::Right);
        first.target_handle = Some(AnchorSide::Left);
        let second = Edge {
            id: "e2".to_string(),
            ..first.clone()
        };
        let out = resolve_edges(&[first, second], &visible(&["A", "B"]));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "e1");
    }

    #[test]
    fn dangling_edges_are_not_drawn() {
        let edges = vec![edge("e1", "A", "ghost"), edge("e2", "ghost", "A")];
        assert!(resolve_edges(&edges, &visible(&["A"])).is_empty());
    }

    #[test]
    fn random_graphs_never_touch_hidden_nodes() {
        let mut seed: u64 = 0x5eed;
        let mut next = move |bound: u64| {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) % bound
        };
        for _ in 0..200 {
            let count = 2 + next(10);
            let ids: Vec<String> = (0..count).map(|i| format!("n{i}")).collect();
            let mut edges = Vec::new();
            for i in 0..next(25) {
                let mut e = edge(
                    &format!("e{i}"),
                    &ids[next(count) as usize],
                    &ids[next(count) as usize],
                );
                if next(3) == 0 {
                    e.source_handle = Some(AnchorSide::ALL[next(4) as usize]);
                }
                edges.push(e);
            }
            let shown: HashSet<String> = ids.iter().filter(|_| next(2) == 0).cloned().collect();
            let out = resolve_edges(&edges, &shown);

            let mut keys = HashSet::new();
            for e in &out {
                assert!(shown.contains(&e.source), "source {} hidden", e.source);
                assert!(shown.contains(&e.target), "target {} hidden", e.target);
                assert!(keys.insert(e.dedup_key()), "duplicate key for {}", e.id);
            }
        }
    }
}
