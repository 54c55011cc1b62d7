use std::fmt;

/// One step of a store path: a struct field name or a list index.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Named field of a struct node
    Field(String),
    /// Position in a list node
    Index(usize),
}

impl From<&str> for PathSegment {
    fn from(name: &str) -> Self {
        PathSegment::Field(name.to_owned())
    }
}

impl From<String> for PathSegment {
    fn from(name: String) -> Self {
        PathSegment::Field(name)
    }
}

impl From<&String> for PathSegment {
    fn from(name: &String) -> Self {
        PathSegment::Field(name.clone())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Field(name) => f.write_str(name),
            PathSegment::Index(index) => write!(f, "{index}"),
        }
    }
}

/// Render a path as `$.todos[0].title`.
pub(crate) fn display_path(path: &[PathSegment]) -> String {
    let mut rendered = String::from("$");
    for segment in path {
        match segment {
            PathSegment::Field(name) => {
                rendered.push('.');
                rendered.push_str(name);
            }
            PathSegment::Index(index) => {
                rendered.push('[');
                rendered.push_str(&index.to_string());
                rendered.push(']');
            }
        }
    }
    rendered
}

/// Build a store path from field names and indices.
///
/// ```
/// use filament::{PathSegment, path};
///
/// let p = path!["todos", 0usize, "completed"];
/// assert_eq!(p[1], PathSegment::Index(0));
/// let root: [PathSegment; 0] = path![];
/// assert!(root.is_empty());
/// ```
#[macro_export]
macro_rules! path {
    () => {
        [] as [$crate::PathSegment; 0]
    };
    ($($segment:expr),+ $(,)?) => {
        [$($crate::PathSegment::from($segment)),+]
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_mixed_path() {
        let path = crate::path!["todos", 3usize, "title"];
        assert_eq!(display_path(&path), "$.todos[3].title");
        assert_eq!(display_path(&crate::path![]), "$");
    }
}
