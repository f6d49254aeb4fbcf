//! Attachments and the ordered store that owns them.

use std::path::Path;

use sha2::{Digest, Sha256};

use super::push_unique;
use crate::error::{Error, Result};

/// Content-type token used when the kind cannot be inferred.
pub const DEFAULT_KIND: &str = "application/octet-stream";

/// A named blob of evidence attached to a test or an achievement.
///
/// The `kind` is a content-type token: either a MIME type such as
/// `image/png` or a service-specific snippet identifier such as
/// `x-snippet-python3-matplot-png`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Name of the attachment, usually the source file name.
    pub name: String,

    /// Raw content, read into memory when the attachment was added.
    pub content: Vec<u8>,

    /// Declared content-type token.
    pub kind: String,

    /// Ordered set of tags.
    pub tags: Vec<String>,
}

impl Attachment {
    /// Creates an attachment from in-memory content.
    ///
    /// # Example
    ///
    /// ```
    /// use hippod_client::model::Attachment;
    ///
    /// let a = Attachment::new("log.txt", b"ok".to_vec(), "text/plain").with_tag("ci");
    /// assert_eq!(a.kind, "text/plain");
    /// assert_eq!(a.tags, vec!["ci".to_string()]);
    /// ```
    pub fn new(name: impl Into<String>, content: Vec<u8>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content,
            kind: kind.into(),
            tags: Vec::new(),
        }
    }

    /// Adds a tag, ignoring duplicates.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        push_unique(&mut self.tags, tag);
        self
    }

    /// Returns the content length in bytes.
    pub fn size(&self) -> usize {
        self.content.len()
    }

    /// Returns the hex-encoded SHA-256 digest of the content.
    ///
    /// Sent alongside the attachment so the service can verify the part
    /// it received. Not used for deduplication.
    pub fn sha256(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.content);
        format!("{:x}", hasher.finalize())
    }
}

/// Ordered sequence of [`Attachment`]s plus store-level tags.
///
/// Adding never replaces: two attachments with the same name or kind are
/// both kept, in the order they were added. That order is the order in
/// which they are encoded and rendered by the service.
///
/// # Example
///
/// ```
/// use hippod_client::model::AttachmentStore;
///
/// let mut store = AttachmentStore::default();
/// store.tags_add(["foo", "bar", "foo"]);
/// store.data_add("a.txt", b"one".to_vec(), "text/plain");
/// store.data_add("a.txt", b"two".to_vec(), "text/plain");
///
/// assert_eq!(store.tags(), ["foo", "bar"]);
/// assert_eq!(store.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentStore {
    items: Vec<Attachment>,
    tags: Vec<String>,
}

impl AttachmentStore {
    /// Adds store-level tags with ordered-set semantics.
    pub fn tags_add<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            push_unique(&mut self.tags, tag);
        }
    }

    /// Returns the store-level tags in insertion order.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Appends an attachment and returns a handle to it.
    pub fn push(&mut self, attachment: Attachment) -> &mut Attachment {
        self.items.push(attachment);
        let last = self.items.len() - 1;
        &mut self.items[last]
    }

    /// Appends in-memory content.
    pub fn data_add(
        &mut self,
        name: impl Into<String>,
        content: Vec<u8>,
        kind: impl Into<String>,
    ) -> &mut Attachment {
        self.push(Attachment::new(name, content, kind))
    }

    /// Reads a file and appends it, inferring the kind from its extension.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read. The store is left
    /// unchanged.
    pub fn file_add(&mut self, path: impl AsRef<Path>) -> Result<&mut Attachment> {
        let path = path.as_ref();
        let kind = kind_for_path(path);
        self.read_and_push(path, kind.to_string())
    }

    /// Reads a snippet file and appends it with an explicit kind.
    ///
    /// Snippets are source files the service executes to render evidence,
    /// so the kind names the interpreter and output format, e.g.
    /// `x-snippet-python3-matplot-png`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read. The store is left
    /// unchanged.
    pub fn snippet_file_add(
        &mut self,
        path: impl AsRef<Path>,
        kind: impl Into<String>,
    ) -> Result<&mut Attachment> {
        self.read_and_push(path.as_ref(), kind.into())
    }

    fn read_and_push(&mut self, path: &Path, kind: String) -> Result<&mut Attachment> {
        let content = std::fs::read(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        Ok(self.push(Attachment::new(name, content, kind)))
    }

    /// Iterates attachments in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Attachment> {
        self.items.iter()
    }

    /// Returns the attachment at `index`.
    pub fn get(&self, index: usize) -> Option<&Attachment> {
        self.items.get(index)
    }

    /// Number of attachments.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the store holds no attachments.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<'a> IntoIterator for &'a AttachmentStore {
    type Item = &'a Attachment;
    type IntoIter = std::slice::Iter<'a, Attachment>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Infers a content-type token from a file extension.
pub fn kind_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" | "log" => "text/plain",
        "json" => "application/json",
        "md" => "text/markdown",
        _ => DEFAULT_KIND,
    }
}
