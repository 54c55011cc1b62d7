use thiserror::Error;

use crate::store::{NodeKind, PathSegment};

/// Errors at the [`Store`](crate::Store) boundary.
///
/// A path/shape mismatch always means the path literal does not fit the
/// data's shape. It is a programming error, never a data error, and retrying
/// will not help.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A segment cannot address the node it was applied to: a field name on
    /// a list, an index on a struct, or anything on a scalar leaf.
    #[error("store path {path}: segment `{segment}` cannot address a {found} node")]
    PathMismatch {
        /// Path up to and including the offending segment
        path: String,
        /// The offending segment
        segment: PathSegment,
        /// What the segment ran into
        found: NodeKind,
    },

    /// `select_len` resolved to something other than a list.
    #[error("store path {path} addresses a {found} node, not a list")]
    NotAList {
        /// The full path
        path: String,
        /// What the path resolved to
        found: NodeKind,
    },

    /// Converting between the typed state and its store representation failed.
    #[error("store value conversion failed")]
    Serde(#[from] serde_json::Error),
}
