//! Collaborator abstractions for the rotation core.
//!
//! This module defines the seams between the pure rotation engine and the
//! outside world:
//!
//! - [`ContentSource`]: lists the posts available for a scope
//! - [`Publisher`]: delivers a chosen post body
//! - [`StateStore`]: owns the persisted [`RotationState`] of each scope

use std::future::Future;

use thiserror::Error;

use crate::types::{ContentItem, RotationState, ScopeKey};

/// Source of content items.
///
/// Implementations validate records at their own boundary and drop anything
/// that cannot become a [`ContentItem`]. The order of the returned items is
/// irrelevant; the engine sorts them.
///
/// # Example
///
/// ```ignore
/// use rotapost::{ContentItem, ContentSource, ScopeKey, SourceError};
///
/// #[derive(Clone)]
/// struct Fixed(Vec<ContentItem>);
///
/// impl ContentSource for Fixed {
///     async fn list_items(&self, _: &ScopeKey) -> Result<Vec<ContentItem>, SourceError> {
///         Ok(self.0.clone())
///     }
///
///     fn describe(&self) -> String {
///         "fixed".to_string()
///     }
/// }
/// ```
pub trait ContentSource: Send + Sync {
    /// Lists the items currently available for `scope`.
    ///
    /// Returns [`SourceError`] if the listing cannot be retrieved at all.
    fn list_items(
        &self,
        scope: &ScopeKey,
    ) -> impl Future<Output = Result<Vec<ContentItem>, SourceError>> + Send;

    /// Short human readable description used in logs.
    fn describe(&self) -> String;
}

/// Delivery of a post body to the publishing surface.
///
/// Any retry or pacing policy belongs to the implementation; the core only
/// sees the final outcome.
pub trait Publisher: Send + Sync {
    /// Checks that the publisher is usable (credentials, reachability).
    ///
    /// Called once before a normal run selects anything. The default accepts.
    fn validate(&self) -> impl Future<Output = Result<(), PublishError>> + Send {
        async { Ok(()) }
    }

    /// Publishes `body` and reports the outcome.
    fn publish(
        &self,
        body: &str,
    ) -> impl Future<Output = Result<PublishReceipt, PublishError>> + Send;
}

/// Confirmation returned by a successful publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Identifier assigned by the publishing surface, if it returned one.
    pub post_id: Option<String>,
}

/// Durable storage for rotation state.
///
/// `load` never fails: a missing or malformed record degrades to the
/// "never run" state and is reported through [`LoadedState`]. Only `commit`
/// and `lock` surface storage errors.
pub trait StateStore: Send + Sync {
    /// Guard that keeps a scope reserved until dropped.
    type Guard: Send;

    /// Reserves `scope` for a run that will commit.
    ///
    /// Returns [`StoreError::Locked`] if another run holds the scope.
    fn lock(&self, scope: &ScopeKey) -> Result<Self::Guard, StoreError>;

    /// Loads the state for `scope`.
    fn load(&self, scope: &ScopeKey) -> LoadedState;

    /// Atomically replaces the state stored for `state.scope_key`.
    fn commit(&self, state: &RotationState) -> Result<(), StoreError>;
}

/// Result of [`StateStore::load`].
///
/// Every variant carries a state that is safe to feed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadedState {
    /// Nothing was stored yet.
    Missing(RotationState),
    /// A valid record was read.
    Existing(RotationState),
    /// The stored record was unreadable and was replaced by the sentinel.
    Recovered {
        /// The sentinel state handed out instead.
        state: RotationState,
        /// Why the stored record was rejected.
        reason: String,
    },
}

impl LoadedState {
    /// Returns the usable state.
    pub const fn state(&self) -> &RotationState {
        match self {
            Self::Missing(state) | Self::Existing(state) | Self::Recovered { state, .. } => state,
        }
    }

    /// Consumes the value and returns the usable state.
    pub fn into_state(self) -> RotationState {
        match self {
            Self::Missing(state) | Self::Existing(state) | Self::Recovered { state, .. } => state,
        }
    }

    /// Returns the recovery reason if the stored record was discarded.
    pub fn recovery_reason(&self) -> Option<&str> {
        match self {
            Self::Recovered { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Errors that can occur while listing content.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The remote listing could not be retrieved.
    #[error("listing unavailable: {0}")]
    Unavailable(String),

    /// The source is misconfigured (missing folder, bad credentials).
    #[error("source misconfigured: {0}")]
    Config(String),
}

/// Errors that can occur while publishing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// Credentials were rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The publishing surface rejected the post.
    #[error("rejected with status {status}: {detail}")]
    Rejected {
        /// Status reported by the surface.
        status: u16,
        /// Response detail.
        detail: String,
    },

    /// Transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors that can occur during storage operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Another holder has the scope locked.
    #[error("scope {scope} is locked by another run")]
    Locked {
        /// The contended scope.
        scope: ScopeKey,
    },

    /// Storage backend error.
    #[error("storage error: {0}")]
    Backend(String),
}
