//! Content sources that live in the library.
//!
//! - [`LocalDirSource`]: `*.txt` files in a local directory
//! - [`FallbackSource`]: a primary source backed by a secondary one

use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    traits::{ContentSource, SourceError},
    types::{ContentItem, RawContentItem, ScopeKey},
};

/// File extension of post files.
pub const POST_EXTENSION: &str = "txt";

/// Reads posts from a local directory.
///
/// Every `*.txt` file is one item: the file name is the id, the creation
/// time (or modification time where the platform lacks it) orders the
/// rotation, and the trimmed contents are the body. Blank files are skipped.
#[derive(Debug, Clone)]
pub struct LocalDirSource {
    dir: PathBuf,
}

impl LocalDirSource {
    /// Creates a source reading from `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the directory this source reads.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read_item(path: &Path) -> Result<RawContentItem, std::io::Error> {
        let metadata = tokio::fs::metadata(path).await?;
        let created: SystemTime = metadata.created().or_else(|_| metadata.modified())?;
        let body = tokio::fs::read_to_string(path).await?;
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned());

        Ok(RawContentItem {
            id: name.clone(),
            name,
            created_at: Some(DateTime::<Utc>::from(created)),
            body: Some(body.trim().to_string()),
        })
    }
}

impl ContentSource for LocalDirSource {
    async fn list_items(&self, scope: &ScopeKey) -> Result<Vec<ContentItem>, SourceError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            SourceError::Unavailable(format!("cannot read {}: {e}", self.dir.display()))
        })?;

        let mut items = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    return Err(SourceError::Unavailable(format!(
                        "cannot list {}: {e}",
                        self.dir.display()
                    )));
                }
            };

            let path = entry.path();
            let is_post = path.extension().is_some_and(|ext| ext == POST_EXTENSION);
            if !is_post || !entry.file_type().await.is_ok_and(|t| t.is_file()) {
                continue;
            }

            let raw = match Self::read_item(&path).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable post file");
                    continue;
                }
            };

            match ContentItem::try_from(raw) {
                Ok(item) => items.push(item),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping invalid post file"),
            }
        }

        debug!(
            scope = %scope,
            dir = %self.dir.display(),
            count = items.len(),
            "listed local posts"
        );
        Ok(items)
    }

    fn describe(&self) -> String {
        format!("local:{}", self.dir.display())
    }
}

/// Tries `primary` first and falls back to `secondary` when the primary
/// fails or lists nothing.
///
/// Both sources feed one rotation cursor, so they must identify the same
/// post by the same id. Ids unknown to the serving source restart the
/// rotation at its newest item.
#[derive(Debug, Clone)]
pub struct FallbackSource<A, B> {
    primary: A,
    secondary: B,
}

impl<A, B> FallbackSource<A, B> {
    /// Creates a fallback chain.
    pub const fn new(primary: A, secondary: B) -> Self {
        Self { primary, secondary }
    }
}

impl<A, B> ContentSource for FallbackSource<A, B>
where
    A: ContentSource,
    B: ContentSource,
{
    async fn list_items(&self, scope: &ScopeKey) -> Result<Vec<ContentItem>, SourceError> {
        match self.primary.list_items(scope).await {
            Ok(items) if !items.is_empty() => return Ok(items),
            Ok(_) => info!(
                primary = %self.primary.describe(),
                fallback = %self.secondary.describe(),
                "primary source is empty, using fallback"
            ),
            Err(e) => warn!(
                primary = %self.primary.describe(),
                fallback = %self.secondary.describe(),
                error = %e,
                "primary source failed, using fallback"
            ),
        }
        self.secondary.list_items(scope).await
    }

    fn describe(&self) -> String {
        format!("{} (fallback {})", self.primary.describe(), self.secondary.describe())
    }
}
