use crate::ir::ResolvedNode;

pub const MIN_QUERY_CHARS: usize = 2;

/// Lower-cased, trimmed query, or `None` while it is too short to search.
pub fn normalize_query(query: &str) -> Option<String> {
    let needle = query.trim().to_lowercase();
    if needle.chars().count() < MIN_QUERY_CHARS {
        return None;
    }
    Some(needle)
}

pub fn node_matches(node: &ResolvedNode, needle: &str) -> bool {
    let Some(story) = node.story() else {
        return false;
    };
    if story.label.to_lowercase().contains(needle) {
        return true;
    }
    story.category.searches_protagonist()
        && story
            .protagonist
            .as_deref()
            .is_some_and(|name| name.to_lowercase().contains(needle))
}

/// Matching node ids in list order.
pub fn find_matches(nodes: &[ResolvedNode], query: &str) -> Vec<String> {
    let Some(needle) = normalize_query(query) else {
        return Vec::new();
    };
    nodes
        .iter()
        .filter(|node| node_matches(node, &needle))
        .map(|node| node.id().to_string())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Prev,
}

/// Query, its matches and the selected match.
#[derive(Debug, Clone, Default)]
pub struct SearchState {
    query: String,
    matches: Vec<String>,
    index: usize,
}

impl SearchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn matches(&self) -> &[String] {
        &self.matches
    }

    pub fn is_match(&self, id: &str) -> bool {
        self.matches.iter().any(|m| m == id)
    }

    /// Replace the query; returns the first match, which the caller focuses.
    pub fn set_query(&mut self, query: &str, nodes: &[ResolvedNode]) -> Option<&str> {
        self.query = query.to_string();
        self.matches = find_matches(nodes, &self.query);
        self.index = 0;
        self.current()
    }

    /// Recompute matches after the node list changed. The selected match stays
    /// selected while it still matches; otherwise selection falls back to the
    /// first match.
    pub fn refresh(&mut self, nodes: &[ResolvedNode]) -> Option<&str> {
        let selected = self.current().map(str::to_string);
        self.matches = find_matches(nodes, &self.query);
        self.index = selected
            .and_then(|id| self.matches.iter().position(|m| *m == id))
            .unwrap_or(0);
        self.current()
    }

    pub fn clear(&mut self) {
        self.query.clear();
        self.matches.clear();
        self.index = 0;
    }

    pub fn current(&self) -> Option<&str> {
        self.matches.get(self.index).map(String::as_str)
    }

    /// Step through matches, wrapping at either end.
    pub fn navigate(&mut self, direction: Direction) -> Option<&str> {
        let len = self.matches.len();
        if len == 0 {
            return None;
        }
        self.index = match direction {
            Direction::Next => (self.index + 1) % len,
            Direction::Prev => (self.index + len - 1) % len,
        };
        self.current()
    }

    pub fn next(&mut self) -> Option<&str> {
        self.navigate(Direction::Next)
    }

    pub fn prev(&mut self) -> Option<&str> {
        self.navigate(Direction::Prev)
    }

    /// One-based position and total, for the "3/7" counter.
    pub fn position(&self) -> Option<(usize, usize)> {
        if self.matches.is_empty() {
            None
        } else {
            Some((self.index + 1, self.matches.len()))
        }
    }
}
