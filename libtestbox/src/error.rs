//! Request compilation error types.
//!
//! Every failure the validator or the compilers can surface to a caller is a
//! [`RequestError`], derived with [`thiserror::Error`]. Messages always embed
//! the offending value (path, bind string, pattern) so the caller can act on
//! them without reading logs.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for request validation and plan compilation.
#[derive(Debug, Error)]
pub enum RequestError {
    /// A build context and a pre-built image were both requested.
    #[error("you cannot specify both an Image and Context in a ContainerRequest")]
    ContextAndImage,

    /// Neither a build context, an in-memory archive nor an image was given.
    #[error("you must specify either a build context or an image")]
    MissingSource,

    /// Two mounts or binds claim the same in-container path.
    #[error("duplicate mount target detected: {0}")]
    DuplicateMountTarget(String),

    /// A raw bind string is not of the form `host:container`.
    #[error("invalid bind mount: {0}")]
    InvalidBindMount(String),

    /// The build context path could not be made absolute.
    #[error("error getting absolute path of build context {path}: {source}")]
    AbsolutePath {
        /// Path as supplied by the caller.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// The ignore file exists but could not be read.
    #[error("error reading {path}: {source}")]
    IgnoreFile {
        /// Location of the ignore file.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// A line of the ignore file is not a valid pattern.
    #[error("error reading {path}: invalid pattern `{pattern}`: {reason}")]
    IgnorePattern {
        /// Location of the ignore file.
        path: PathBuf,
        /// The pattern as written in the file.
        pattern: String,
        /// Why the pattern was rejected.
        reason: String,
    },

    /// Walking the context directory or writing the archive failed.
    #[error("error archiving build context {path}: {source}")]
    Archive {
        /// Entry being archived when the failure happened.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// An exposed port declaration could not be parsed.
    #[error("invalid port spec: {0}")]
    InvalidPortSpec(String),
}

impl RequestError {
    /// Create a [`RequestError::Archive`] for `path` from anything convertible
    /// into an [`io::Error`].
    pub fn archive<E: Into<io::Error>>(path: impl Into<PathBuf>, e: E) -> Self {
        Self::Archive {
            path: path.into(),
            source: e.into(),
        }
    }
}
