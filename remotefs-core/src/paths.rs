use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("invalid entry name: {0:?}")]
    InvalidName(String),
}

/// Canonical form of a remote path: leading `/`, no empty segments, no
/// trailing slash. The namespace root is `/`.
pub fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for part in segments(path) {
        out.push('/');
        out.push_str(part);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty())
}

pub fn join(parent: &str, name: &str) -> String {
    let parent = parent.trim_end_matches('/');
    format!("{parent}/{name}")
}

/// Parent of a normalized path; `None` for `/`.
pub fn parent(path: &str) -> Option<String> {
    let path = normalize(path);
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(path[..idx].to_string()),
        None => None,
    }
}

pub fn file_name(path: &str) -> Option<&str> {
    segments(path).last()
}

pub fn validate_name(name: &str) -> Result<(), PathError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(PathError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_slashes() {
        assert_eq!(normalize("alice//docs/"), "/alice/docs");
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("///"), "/");
    }

    #[test]
    fn joins_under_root_and_nested() {
        assert_eq!(join("/", "alice"), "/alice");
        assert_eq!(join("/alice", "a.txt"), "/alice/a.txt");
    }

    #[test]
    fn parent_of_top_level_is_root() {
        assert_eq!(parent("/alice").as_deref(), Some("/"));
        assert_eq!(parent("/alice/a/b").as_deref(), Some("/alice/a"));
        assert_eq!(parent("/"), None);
    }

    #[test]
    fn rejects_names_with_separators() {
        assert!(validate_name("ok.txt").is_ok());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("").is_err());
    }
}
