/// Matches a declared API path pattern against a concrete request path.
///
/// Both sides are split on `/`. Segment counts must be equal; a pattern segment
/// starting with `:` matches any non-empty path segment, every other segment must
/// be byte-equal. There is no wildcard support, and a trailing slash changes the
/// segment count, so `/users/` never matches `/users`.
pub fn matches(pattern: &str, path: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let path_segments: Vec<&str> = path.split('/').collect();
    if pattern_segments.len() != path_segments.len() {
        return false;
    }
    pattern_segments
        .iter()
        .zip(path_segments.iter())
        .all(|(expected, actual)| {
            if expected.starts_with(':') {
                !actual.is_empty()
            } else {
                expected == actual
            }
        })
}

/// Rewrites `:param` segments into the `{param}` captures the HTTP router uses.
pub fn to_router_path(pattern: &str) -> String {
    pattern
        .split('/')
        .map(|segment| match segment.strip_prefix(':') {
            Some(name) => format!("{{{name}}}"),
            None => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Joins path fragments, collapsing the empty route path (`""`) onto its group.
pub fn join_paths(parts: &[&str]) -> String {
    let mut joined = String::new();
    for part in parts.iter().filter(|p| !p.is_empty()) {
        if !part.starts_with('/') {
            joined.push('/');
        }
        joined.push_str(part);
    }
    if joined.is_empty() {
        joined.push('/');
    }
    joined
}
