//! Repository-relative item paths. A normalized path starts with '/', has no empty segments and
//!  no trailing '/'; the root is "/".

pub const ROOT: &str = "/";

pub fn normalize(path: &str) -> String {
    let mut result = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty() && *s != ".") {
        result.push('/');
        result.push_str(segment);
    }
    if result.is_empty() {
        result.push('/');
    }
    result
}

pub fn is_root(path: &str) -> bool {
    normalize(path) == ROOT
}

/// `None` for the root
pub fn parent(path: &str) -> Option<String> {
    let path = normalize(path);
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) | None => Some(ROOT.to_string()),
        Some(idx) => Some(path[..idx].to_string()),
    }
}

/// the last segment, "" for the root
pub fn name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

pub fn join(parent: &str, child: &str) -> String {
    normalize(&format!("{}/{}", parent, child))
}

pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// `/a/b/c` with prefix `/a` -> `Some("/b/c")`
pub fn strip_prefix(path: &str, prefix: &str) -> Option<String> {
    let path = normalize(path);
    let prefix = normalize(prefix);
    if prefix == ROOT {
        return Some(path);
    }
    if path == prefix {
        return Some(ROOT.to_string());
    }
    path.strip_prefix(&prefix)
        .filter(|rest| rest.starts_with('/'))
        .map(|rest| rest.to_string())
}

/// true if `path` is `ancestor` or lies below it
pub fn is_below(path: &str, ancestor: &str) -> bool {
    strip_prefix(path, ancestor).is_some()
}

/// Paths with a segment starting with '.' (e.g. `/.index/...`, `/.meta/...`) belong to the
///  repository itself and are never fetched from a remote.
pub fn is_local_only(path: &str) -> bool {
    segments(path).any(|s| s.starts_with('.'))
}

#[cfg(test)]
mod test {
    use rstest::*;
    use super::*;

    #[rstest]
    #[case("", "/")]
    #[case("/", "/")]
    #[case("a/b", "/a/b")]
    #[case("//a//b/", "/a/b")]
    #[case("/a/./b", "/a/b")]
    fn test_normalize(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(normalize(path), expected);
    }

    #[rstest]
    #[case("/", None)]
    #[case("/a", Some("/"))]
    #[case("/a/b/", Some("/a"))]
    fn test_parent(#[case] path: &str, #[case] expected: Option<&str>) {
        assert_eq!(parent(path).as_deref(), expected);
    }

    #[rstest]
    #[case("/a/b/c", "/a", Some("/b/c"))]
    #[case("/a/b", "/a/b", Some("/"))]
    #[case("/ab/c", "/a", None)]
    #[case("/a/b", "/", Some("/a/b"))]
    fn test_strip_prefix(#[case] path: &str, #[case] prefix: &str, #[case] expected: Option<&str>) {
        assert_eq!(strip_prefix(path, prefix).as_deref(), expected);
    }

    #[rstest]
    #[case("/.index/main.gz", true)]
    #[case("/org/.meta/prefixes.txt", true)]
    #[case("/org/x/a/1.0/a-1.0.jar", false)]
    fn test_is_local_only(#[case] path: &str, #[case] expected: bool) {
        assert_eq!(is_local_only(path), expected);
    }

    #[test]
    fn test_name_and_join() {
        assert_eq!(name("/a/b.jar"), "b.jar");
        assert_eq!(name("/"), "");
        assert_eq!(join("/a/", "/b"), "/a/b");
    }
}
