//! Error types for bokpub operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while building or repairing a package.
///
/// Cell decode failures and unresolvable manifest/spine references are
/// recovered where they occur and never surface here. XML reader errors
/// are reported as [`Error::MalformedDocument`] with their byte offset.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[cfg(feature = "json")]
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    #[error("unusable legacy source: {0}")]
    SourceStructure(String),

    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("could not replace {}: {source}", path.display())]
    AtomicWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Short, stable name of the root cause class.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Zip(_) => "zip",
            #[cfg(feature = "json")]
            Error::Json(_) => "json",
            Error::InvalidArchive(_) => "invalid-archive",
            Error::SourceStructure(_) => "source-structure",
            Error::MalformedDocument(_) => "malformed-document",
            Error::AtomicWrite { .. } => "atomic-write",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(
            Error::SourceStructure("no content table".into()).kind(),
            "source-structure"
        );
        let err = Error::AtomicWrite {
            path: PathBuf::from("book.epub"),
            source: std::io::Error::other("disk full"),
        };
        assert_eq!(err.kind(), "atomic-write");
        assert!(err.to_string().contains("book.epub"));
    }
}
