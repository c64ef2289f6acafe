//! Document model
//!
//! Documents are owned by the store; indexes only ever hold a `DocumentId`.
//! Input types (`NewDocument`, `DocumentPatch`) carry their own validation so
//! the engine can reject bad input before anything reaches the WAL.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// Longest accepted path (in bytes)
pub const MAX_PATH_LENGTH: usize = 4096;

/// Longest accepted title (in chars)
pub const MAX_TITLE_LENGTH: usize = 1024;

/// Longest accepted tag (in chars)
pub const MAX_TAG_LENGTH: usize = 128;

// =============================================================================
// Identifiers
// =============================================================================

/// Unique, immutable document identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| EngineError::validation("id", e.to_string()))
    }
}

// =============================================================================
// Document
// =============================================================================

/// A stored document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub path: String,
    pub title: String,
    pub content: Vec<u8>,
    pub tags: BTreeSet<String>,
    /// Unix millis, issued by the engine clock
    pub created_at: u64,
    /// Unix millis, always >= created_at
    pub updated_at: u64,
    /// Always equal to `content.len()`
    pub size: usize,
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    /// Build a document from validated input
    pub fn from_new(id: DocumentId, input: NewDocument, timestamp: u64) -> Self {
        let size = input.content.len();
        Self {
            id,
            path: input.path,
            title: input.title,
            content: input.content,
            tags: input.tags,
            created_at: timestamp,
            updated_at: timestamp,
            size,
            metadata: input.metadata,
        }
    }

    /// Produce the next version of this document with `patch` applied
    pub fn patched(&self, patch: DocumentPatch, timestamp: u64) -> Self {
        let mut next = self.clone();
        if let Some(path) = patch.path {
            next.path = path;
        }
        if let Some(title) = patch.title {
            next.title = title;
        }
        if let Some(content) = patch.content {
            next.content = content;
        }
        if let Some(tags) = patch.tags {
            next.tags = tags;
        }
        if let Some(metadata) = patch.metadata {
            next.metadata = metadata;
        }
        next.size = next.content.len();
        next.updated_at = timestamp.max(next.created_at);
        next
    }

    /// Content decoded as text (invalid UTF-8 is replaced)
    pub fn content_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    /// True if the document carries every tag in `tags`
    pub fn has_all_tags(&self, tags: &[String]) -> bool {
        tags.iter().all(|t| self.tags.contains(t))
    }
}

// =============================================================================
// Input Types
// =============================================================================

/// Fields for a document insert
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewDocument {
    pub path: String,
    pub title: String,
    pub content: Vec<u8>,
    pub tags: BTreeSet<String>,
    pub metadata: BTreeMap<String, String>,
}

impl NewDocument {
    pub fn new(path: impl Into<String>, title: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            title: title.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Check required fields in order path, title, content, then the rest
    pub fn validate(&self, max_document_size: usize) -> Result<()> {
        if self.path.is_empty() {
            return Err(EngineError::validation("path", "required field is missing"));
        }
        if self.title.trim().is_empty() {
            return Err(EngineError::validation("title", "required field is missing"));
        }
        if self.content.is_empty() {
            return Err(EngineError::validation("content", "required field is missing"));
        }
        validate_path(&self.path)?;
        validate_title(&self.title)?;
        validate_content(&self.content, max_document_size)?;
        validate_tags(&self.tags)?;
        validate_metadata(&self.metadata)
    }
}

/// Partial update; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentPatch {
    pub path: Option<String>,
    pub title: Option<String>,
    pub content: Option<Vec<u8>>,
    pub tags: Option<BTreeSet<String>>,
    pub metadata: Option<BTreeMap<String, String>>,
}

impl DocumentPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn content(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_none()
            && self.title.is_none()
            && self.content.is_none()
            && self.tags.is_none()
            && self.metadata.is_none()
    }

    /// Present fields obey the same rules as on insert
    pub fn validate(&self, max_document_size: usize) -> Result<()> {
        if let Some(path) = &self.path {
            if path.is_empty() {
                return Err(EngineError::validation("path", "must not be empty"));
            }
            validate_path(path)?;
        }
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err(EngineError::validation("title", "must not be empty"));
            }
            validate_title(title)?;
        }
        if let Some(content) = &self.content {
            if content.is_empty() {
                return Err(EngineError::validation("content", "must not be empty"));
            }
            validate_content(content, max_document_size)?;
        }
        if let Some(tags) = &self.tags {
            validate_tags(tags)?;
        }
        if let Some(metadata) = &self.metadata {
            validate_metadata(metadata)?;
        }
        Ok(())
    }
}

// =============================================================================
// Field Validation
// =============================================================================

/// Reject over-long paths, control characters and `..` traversal
pub fn validate_path(path: &str) -> Result<()> {
    if path.len() > MAX_PATH_LENGTH {
        return Err(EngineError::validation(
            "path",
            format!("length {} exceeds {} bytes", path.len(), MAX_PATH_LENGTH),
        ));
    }
    if path.chars().any(char::is_control) {
        return Err(EngineError::validation("path", "contains control characters"));
    }
    if path.split(['/', '\\']).any(|component| component == "..") {
        return Err(EngineError::validation("path", "contains '..' component"));
    }
    Ok(())
}

fn validate_title(title: &str) -> Result<()> {
    let len = title.chars().count();
    if len > MAX_TITLE_LENGTH {
        return Err(EngineError::validation(
            "title",
            format!("length {} exceeds {} characters", len, MAX_TITLE_LENGTH),
        ));
    }
    Ok(())
}

fn validate_content(content: &[u8], max_document_size: usize) -> Result<()> {
    if content.len() > max_document_size {
        return Err(EngineError::validation(
            "content",
            format!("size {} exceeds limit of {} bytes", content.len(), max_document_size),
        ));
    }
    Ok(())
}

fn validate_tags(tags: &BTreeSet<String>) -> Result<()> {
    for tag in tags {
        if tag.is_empty() {
            return Err(EngineError::validation("tags", "tag must not be empty"));
        }
        if tag.chars().count() > MAX_TAG_LENGTH {
            return Err(EngineError::validation(
                "tags",
                format!("tag '{}' exceeds {} characters", tag, MAX_TAG_LENGTH),
            ));
        }
        if tag.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(EngineError::validation(
                "tags",
                format!("tag '{}' contains whitespace or control characters", tag),
            ));
        }
    }
    Ok(())
}

fn validate_metadata(metadata: &BTreeMap<String, String>) -> Result<()> {
    if metadata.keys().any(String::is_empty) {
        return Err(EngineError::validation("metadata", "keys must not be empty"));
    }
    Ok(())
}
