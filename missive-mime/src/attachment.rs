use std::{
    fs,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use crate::error::{MimeError, Result};

/// Content type used when the extension is missing or unknown.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A file carried by a message.
///
/// The bytes are either supplied up front or loaded from `path` the first
/// time the attachment is serialised, after which they are cached on the
/// attachment itself.
#[derive(Debug, Clone)]
pub struct Attachment {
    content_type: String,
    file_name: String,
    path: Option<PathBuf>,
    content: OnceLock<Vec<u8>>,
}

impl Attachment {
    /// An attachment whose bytes are already in memory.
    #[must_use]
    pub fn from_bytes(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            content_type: content_type.into(),
            file_name: file_name.into(),
            path: None,
            content: OnceLock::from(content.into()),
        }
    }

    /// An attachment backed by a file on disk. The file must exist and must
    /// not be a directory; its bytes are read lazily.
    ///
    /// Windows-style separators are accepted and normalised to `/`.
    ///
    /// # Errors
    ///
    /// [`MimeError::NotFound`] if the path does not exist,
    /// [`MimeError::NotAFile`] if it is a directory, and
    /// [`MimeError::Validation`] if it has no final file name component.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = PathBuf::from(path.as_ref().to_string_lossy().replace('\\', "/"));

        let metadata = fs::metadata(&path).map_err(|e| MimeError::from_io(&path, e))?;
        if metadata.is_dir() {
            return Err(MimeError::NotAFile(path));
        }

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                MimeError::Validation(format!("{} has no file name", path.display()))
            })?;

        Ok(Self {
            content_type: AttachmentResolver::content_type_for(&path),
            file_name,
            path: Some(path),
            content: OnceLock::new(),
        })
    }

    /// Overrides the content type inferred from the extension.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// The base name used for both the `filename` parameter and `Content-Id`.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The bytes, if they have been supplied or resolved already.
    #[must_use]
    pub fn content(&self) -> Option<&[u8]> {
        self.content.get().map(Vec::as_slice)
    }
}

/// Loads attachment bytes from disk and infers content types.
#[derive(Debug, Default, Clone, Copy)]
pub struct AttachmentResolver;

impl AttachmentResolver {
    /// Returns the attachment's bytes, reading `path` into memory on first
    /// use. Populated content is returned as-is without touching the disk.
    ///
    /// # Errors
    ///
    /// [`MimeError::NotFound`] or [`MimeError::NotAFile`] if the source path
    /// no longer refers to a file, [`MimeError::Io`] if it cannot be read.
    pub fn resolve<'a>(&self, attachment: &'a Attachment) -> Result<&'a [u8]> {
        if let Some(content) = attachment.content.get() {
            return Ok(content);
        }

        let path = attachment.path.as_deref().ok_or_else(|| {
            MimeError::Validation(format!(
                "attachment {} has neither content nor a source path",
                attachment.file_name
            ))
        })?;

        let metadata = fs::metadata(path).map_err(|e| MimeError::from_io(path, e))?;
        if metadata.is_dir() {
            return Err(MimeError::NotAFile(path.to_path_buf()));
        }

        let bytes = fs::read(path).map_err(|e| MimeError::from_io(path, e))?;
        tracing::debug!(path = %path.display(), size = bytes.len(), "Loaded attachment");

        Ok(attachment.content.get_or_init(|| bytes))
    }

    /// Looks the extension up in the platform content-type table, falling
    /// back to [`DEFAULT_CONTENT_TYPE`].
    #[must_use]
    pub fn content_type_for(path: &Path) -> String {
        mime_guess::from_path(path)
            .first_raw()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string()
    }
}
