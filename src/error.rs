use std::path::PathBuf;

/// Hard failures: input that is not text at all, or file access in the loaders.
///
/// Malformed BVH content is never reported here; see [`crate::diagnostics::Diagnostic`].
#[derive(Debug, thiserror::Error)]
pub enum BvhError {
    #[error("BVH input is not valid UTF-8 text: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, BvhError>;
