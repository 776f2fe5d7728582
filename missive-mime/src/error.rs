//! Error types for message construction and serialisation.

use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MimeError {
    /// The message or one of its fields is unusable as given.
    #[error("Invalid message: {0}")]
    Validation(String),

    /// An attachment path does not exist.
    #[error("Attachment {} does not exist", .0.display())]
    NotFound(PathBuf),

    /// An attachment path exists but is not a regular file.
    #[error("{} is not a file", .0.display())]
    NotAFile(PathBuf),

    /// An attachment could not be read.
    #[error("Failed to read attachment {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Formatting error while writing the envelope.
    #[error("Envelope formatting error: {0}")]
    Format(#[from] std::fmt::Error),
}

impl MimeError {
    /// Classifies a filesystem error against `path`.
    pub(crate) fn from_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound(path)
        } else {
            Self::Io { path, source }
        }
    }

    /// Returns `true` for errors caused by what the caller supplied, as
    /// opposed to a failure reading from disk.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotFound(_) | Self::NotAFile(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MimeError>;
