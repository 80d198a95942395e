// Hierarchical persistence keys: "/todos/list-1/items/abc"

pub const SEPARATOR: char = '/';

/// Append one id or name to a parent path. An empty parent means root.
pub fn join(parent: &str, segment: &str) -> String {
    format!("{parent}{SEPARATOR}{segment}")
}

/// Split a path into its segments, ignoring empty ones.
pub fn segments(path: &str) -> Vec<&str> {
    path.split(SEPARATOR).filter(|s| !s.is_empty()).collect()
}
