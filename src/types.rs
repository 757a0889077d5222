//! Core types for rotapost.
//!
//! This module contains the rotation data model (scopes, content items and
//! the persisted rotation cursor) together with the error types shared
//! throughout the crate.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::traits::{PublishError, SourceError, StoreError};

/// Maximum length of a [`ScopeKey`] in bytes.
pub const MAX_SCOPE_LEN: usize = 64;

/// Identifies an independent rotation sequence.
///
/// A scope is typically one managed account. The key doubles as a file stem
/// for the file-backed store, so it is restricted to ASCII alphanumerics,
/// `-`, `_` and `.`, and may not start with a dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScopeKey(String);

impl ScopeKey {
    /// Creates a validated scope key.
    pub fn new(key: impl Into<String>) -> Result<Self, ValidationError> {
        let key = key.into();
        if key.is_empty() {
            return Err(ValidationError::EmptyScope);
        }
        if key.len() > MAX_SCOPE_LEN {
            return Err(ValidationError::ScopeTooLong { len: key.len() });
        }
        if key.starts_with('.')
            || !key.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(ValidationError::InvalidScope(key));
        }
        Ok(Self(key))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ScopeKey {
    fn default() -> Self {
        Self("default".to_string())
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ScopeKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ScopeKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ScopeKey> for String {
    fn from(key: ScopeKey) -> Self {
        key.0
    }
}

/// Stable identifier of a content item within a scope.
///
/// Derived from a source filename or a remote file id. Ordering is plain
/// lexicographic order and is used to break creation-time ties.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemId(String);

impl ItemId {
    /// Creates a validated item id.
    ///
    /// Surrounding whitespace is trimmed; the remainder must be non-empty
    /// and free of control characters.
    pub fn new(id: impl AsRef<str>) -> Result<Self, ValidationError> {
        let id = id.as_ref().trim();
        if id.is_empty() {
            return Err(ValidationError::EmptyId);
        }
        if id.chars().any(char::is_control) {
            return Err(ValidationError::InvalidId(id.to_string()));
        }
        Ok(Self(id.to_string()))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ItemId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ItemId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ItemId> for String {
    fn from(id: ItemId) -> Self {
        id.0
    }
}

/// A pre-authored post available for rotation.
///
/// Items are immutable from the engine's point of view. The body is opaque
/// text handed to the publisher verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Stable identifier.
    pub id: ItemId,
    /// Creation time, used only for ordering.
    pub created_at: DateTime<Utc>,
    /// Text payload to publish.
    pub body: String,
    /// Human readable label (usually the source filename).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ContentItem {
    /// Creates a content item, rejecting a blank body.
    pub fn new(
        id: ItemId,
        created_at: DateTime<Utc>,
        body: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let body = body.into();
        if body.trim().is_empty() {
            return Err(ValidationError::EmptyBody(id));
        }
        Ok(Self { id, created_at, body, name: None })
    }

    /// Sets the display label.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns the display label, falling back to the id.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.id.as_str())
    }
}

/// A loosely typed listing record as produced by a content source.
///
/// Sources build these from whatever metadata they receive and convert them
/// with [`ContentItem::try_from`], skipping records that fail validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawContentItem {
    /// Identifier, if the listing carried one.
    pub id: Option<String>,
    /// Display label.
    pub name: Option<String>,
    /// Creation time, if known.
    pub created_at: Option<DateTime<Utc>>,
    /// Body text, if already fetched.
    pub body: Option<String>,
}

impl TryFrom<RawContentItem> for ContentItem {
    type Error = ValidationError;

    fn try_from(raw: RawContentItem) -> Result<Self, Self::Error> {
        let id = ItemId::new(raw.id.ok_or(ValidationError::EmptyId)?)?;
        let created_at =
            raw.created_at.ok_or_else(|| ValidationError::MissingCreatedAt(id.clone()))?;
        let body = raw.body.ok_or_else(|| ValidationError::EmptyBody(id.clone()))?;
        let item = Self::new(id, created_at, body)?;
        Ok(match raw.name {
            Some(name) => item.with_name(name),
            None => item,
        })
    }
}

/// Persisted rotation cursor for one scope.
///
/// `last_used_id == None` is the "never run" sentinel. Unknown fields are
/// ignored on load; missing fields default to the sentinel values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationState {
    /// Scope this state belongs to.
    pub scope_key: ScopeKey,
    /// Most recently published item.
    #[serde(default)]
    pub last_used_id: Option<ItemId>,
    /// Number of started passes through the content list.
    #[serde(default)]
    pub cycle_count: u64,
    /// Time of the last successful commit.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RotationState {
    /// Returns the "never run" state for a scope.
    pub const fn never_run(scope_key: ScopeKey) -> Self {
        Self { scope_key, last_used_id: None, cycle_count: 0, updated_at: None }
    }

    /// Returns true if this state carries the sentinel cursor.
    pub const fn is_never_run(&self) -> bool {
        self.last_used_id.is_none() && self.cycle_count == 0
    }
}

impl fmt::Display for RotationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self.last_used_id.as_ref().map_or("<never run>", ItemId::as_str);
        write!(f, "scope={} last_used={} cycle={}", self.scope_key, last, self.cycle_count)?;
        if let Some(at) = self.updated_at {
            write!(f, " updated_at={}", at.to_rfc3339())?;
        }
        Ok(())
    }
}

/// Errors raised while validating model values at the source boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Scope key was empty.
    #[error("scope key must not be empty")]
    EmptyScope,

    /// Scope key exceeded [`MAX_SCOPE_LEN`].
    #[error("scope key too long: {len} bytes")]
    ScopeTooLong {
        /// Observed length.
        len: usize,
    },

    /// Scope key contained a forbidden character.
    #[error("invalid scope key: {0:?}")]
    InvalidScope(String),

    /// Item id was missing or blank.
    #[error("item id must not be empty")]
    EmptyId,

    /// Item id contained control characters.
    #[error("invalid item id: {0:?}")]
    InvalidId(String),

    /// Item had no creation timestamp.
    #[error("item {0} has no creation time")]
    MissingCreatedAt(ItemId),

    /// Item body was missing or blank.
    #[error("item {0} has an empty body")]
    EmptyBody(ItemId),
}

/// Errors that can occur during a rotation run.
#[derive(Debug, thiserror::Error)]
pub enum RotationError {
    /// The content listing was empty.
    #[error("no content available for scope {scope}")]
    NoContent {
        /// Scope that had nothing to publish.
        scope: ScopeKey,
    },

    /// The content source could not produce a listing.
    #[error("content source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),

    /// The publisher did not confirm the post.
    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),

    /// The state store could not be written.
    #[error("persistence failed: {0}")]
    Persistence(StoreError),

    /// Another run holds the scope.
    #[error("another run is in progress for scope {scope}")]
    ConcurrentRun {
        /// Contended scope.
        scope: ScopeKey,
    },

    /// A state value for a different scope was handed to the store.
    #[error("state scope mismatch: expected {expected}, got {got}")]
    ScopeMismatch {
        /// The scope the run was configured for.
        expected: ScopeKey,
        /// The scope carried by the state.
        got: ScopeKey,
    },
}

impl RotationError {
    /// Process exit code for this error. Always non-zero.
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::NoContent { .. } => 2,
            Self::SourceUnavailable(_) => 3,
            Self::Publish(_) => 4,
            Self::Persistence(_) | Self::ScopeMismatch { .. } => 5,
            Self::ConcurrentRun { .. } => 6,
        }
    }
}

impl From<StoreError> for RotationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Locked { scope } => Self::ConcurrentRun { scope },
            other => Self::Persistence(other),
        }
    }
}
