use std::path::PathBuf;

use thiserror::Error;

/// Conditions the loader and the joiner report as distinct failures.
#[derive(Debug, Error)]
pub enum AnnotateError {
    /// Input file could not be opened or read.
    #[error("cannot read {kind} file {}: {source}", .path.display())]
    MissingInput {
        kind: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed tree topology: {0}")]
    MalformedTree(String),

    #[error("tree file did not contain any trees")]
    EmptyTreeFile,

    #[error("tree {requested} requested but the file holds {available} tree(s)")]
    TreeIndexOutOfRange { requested: usize, available: usize },

    /// Structural problem in the metadata table. `line` is 1-based.
    #[error("metadata line {line}: {message}")]
    Metadata { line: usize, message: String },

    #[error("join column `{key}` not found in metadata (columns: {})", .available.join(", "))]
    MissingKeyColumn { key: String, available: Vec<String> },

    #[error("{count} tip(s) have no metadata record, e.g. {}", .sample.join(", "))]
    UnmatchedTips { count: usize, sample: Vec<String> },
}
