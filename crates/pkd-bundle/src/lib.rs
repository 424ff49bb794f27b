//! Air-gap bundle archives
//!
//! A bundle is a gzip-compressed tar of one directory tree. [`pack`] writes
//! the tree with the directory itself as the first path component, and
//! [`unpack`] restores it under a destination directory, overwriting files
//! that already exist.

#![deny(missing_docs)]

mod archive;

use std::path::PathBuf;

use thiserror::Error;

pub use archive::{extract_file, pack, pack_to_file, unpack, unpack_file, ArchiveFormat};

/// Errors from packing or unpacking a bundle
#[derive(Debug, Error)]
pub enum Error {
    /// Filesystem or stream failure
    #[error("io error on {}: {source}", path.display())]
    Io {
        /// Path being read or written
        path: PathBuf,
        /// The underlying error
        #[source]
        source: std::io::Error,
    },

    /// An archive entry that can't be restored safely
    #[error("invalid archive entry {entry:?}: {message}")]
    Format {
        /// Entry path as recorded in the archive
        entry: String,
        /// What is wrong with it
        message: String,
    },

    /// The file name does not identify a supported archive type
    #[error("unsupported archive format for {}: expected .tar, .tar.gz or .tgz", path.display())]
    UnsupportedFormat {
        /// The offending path
        path: PathBuf,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn format(entry: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Format {
            entry: entry.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for bundle operations
pub type Result<T> = std::result::Result<T, Error>;
