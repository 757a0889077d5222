//! Run orchestration.
//!
//! The [`Orchestrator`] is the main entry point for a scheduled run. It
//! wires a [`ContentSource`], a [`Publisher`] and a [`StateStore`] around
//! the pure [`RotationEngine`] and enforces the commit ordering: state is
//! written only after the publisher confirms the post.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::{
    engine::{RotationEngine, Selection, SelectionAdvance},
    traits::{ContentSource, LoadedState, PublishReceipt, Publisher, StateStore},
    types::{RotationError, RotationState, ScopeKey},
};

/// Configuration for the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    /// Scope whose rotation this orchestrator advances.
    pub scope: ScopeKey,
}

/// What a run should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Select, publish, then commit.
    #[default]
    Publish,
    /// Select only. Nothing is published or committed.
    DryRun,
    /// Commit the "never run" state.
    Reset,
    /// Report the stored state.
    Status,
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// An item was published and the cursor advanced.
    Published {
        /// The selection that was published and committed.
        selection: Selection,
        /// Publisher confirmation.
        receipt: PublishReceipt,
    },
    /// Dry run: the item that a normal run would publish.
    Previewed {
        /// The selection that was not committed.
        selection: Selection,
    },
    /// The scope was reset.
    Reset {
        /// The committed sentinel state.
        state: RotationState,
    },
    /// Stored state report.
    Status {
        /// The state as loaded.
        loaded: LoadedState,
    },
}

/// Drives one rotation run for a single scope.
///
/// # Type Parameters
///
/// * `C` - The content source, must implement [`ContentSource`]
/// * `P` - The publisher, must implement [`Publisher`]
/// * `S` - The state store, must implement [`StateStore`]
///
/// # Example
///
/// ```ignore
/// use rotapost::{FileStateStore, LocalDirSource, Orchestrator, OrchestratorConfig, RunMode};
///
/// let orchestrator = Orchestrator::new(
///     OrchestratorConfig::default(),
///     LocalDirSource::new("posts"),
///     my_publisher,
///     FileStateStore::new("state"),
/// );
/// let outcome = orchestrator.run(RunMode::Publish).await?;
/// ```
#[derive(Debug)]
pub struct Orchestrator<C, P, S> {
    config: OrchestratorConfig,
    source: C,
    publisher: P,
    store: S,
}

impl<C, P, S> Orchestrator<C, P, S>
where
    C: ContentSource,
    P: Publisher,
    S: StateStore,
{
    /// Creates a new orchestrator.
    pub const fn new(config: OrchestratorConfig, source: C, publisher: P, store: S) -> Self {
        Self { config, source, publisher, store }
    }

    /// Returns the configured scope.
    pub const fn scope(&self) -> &ScopeKey {
        &self.config.scope
    }

    /// Returns a reference to the state store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Executes a run in the given mode.
    pub async fn run(&self, mode: RunMode) -> Result<RunOutcome, RotationError> {
        match mode {
            RunMode::Publish => self.publish_next().await,
            RunMode::DryRun => {
                self.preview().await.map(|selection| RunOutcome::Previewed { selection })
            }
            RunMode::Reset => self.reset().map(|state| RunOutcome::Reset { state }),
            RunMode::Status => Ok(RunOutcome::Status { loaded: self.status() }),
        }
    }

    /// Publishes the next item and advances the cursor.
    ///
    /// The scope is locked for the whole run. The cursor is committed only
    /// after the publisher confirms; any earlier failure leaves the stored
    /// state untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another run holds the scope
    /// - The publisher fails validation or rejects the post
    /// - The content source is unavailable or empty
    /// - The new state cannot be written
    pub async fn publish_next(&self) -> Result<RunOutcome, RotationError> {
        let _guard = self.store.lock(self.scope())?;

        self.publisher.validate().await?;

        let selection = self.select().await?;
        info!(
            scope = %self.scope(),
            item = %selection.item.label(),
            position = selection.position,
            total = selection.total,
            "publishing post"
        );

        let receipt = self.publisher.publish(&selection.item.body).await.inspect_err(|e| {
            warn!(scope = %self.scope(), item = %selection.item.id, error = %e, "publish failed");
        })?;
        info!(scope = %self.scope(), post_id = ?receipt.post_id, "post published");

        self.commit(&selection.next_state).inspect_err(|e| {
            warn!(
                scope = %self.scope(),
                item = %selection.item.id,
                error = %e,
                "post published but rotation state was not saved; it will be selected again"
            );
        })?;
        info!(
            scope = %self.scope(),
            last_used = %selection.item.id,
            cycle = selection.next_state.cycle_count,
            "rotation advanced"
        );

        Ok(RunOutcome::Published { selection, receipt })
    }

    /// Returns the item a normal run would publish, without side effects.
    pub async fn preview(&self) -> Result<Selection, RotationError> {
        let selection = self.select().await?;
        info!(
            scope = %self.scope(),
            item = %selection.item.label(),
            position = selection.position,
            total = selection.total,
            "dry run selected post"
        );
        Ok(selection)
    }

    /// Commits the "never run" state for the scope.
    pub fn reset(&self) -> Result<RotationState, RotationError> {
        let _guard = self.store.lock(self.scope())?;
        let state = RotationEngine::reset(self.scope().clone(), Utc::now());
        self.commit(&state)?;
        info!(scope = %self.scope(), "rotation state reset");
        Ok(state)
    }

    /// Loads the stored state for the scope.
    pub fn status(&self) -> LoadedState {
        self.load()
    }

    fn load(&self) -> LoadedState {
        let loaded = self.store.load(self.scope());
        match &loaded {
            LoadedState::Recovered { reason, .. } => {
                warn!(scope = %self.scope(), %reason, "discarding unreadable rotation state");
            }
            LoadedState::Missing(_) => debug!(scope = %self.scope(), "no rotation state yet"),
            LoadedState::Existing(state) => debug!(%state, "loaded rotation state"),
        }
        loaded
    }

    async fn select(&self) -> Result<Selection, RotationError> {
        let state = self.load().into_state();

        let items = self.source.list_items(self.scope()).await?;
        debug!(
            scope = %self.scope(),
            source = %self.source.describe(),
            count = items.len(),
            "listed content"
        );

        let selection = RotationEngine::select(&items, &state, Utc::now())?;
        match selection.advance {
            SelectionAdvance::Wrapped => {
                info!(
                    scope = %self.scope(),
                    cycle = selection.next_state.cycle_count,
                    "all posts used, starting a new cycle"
                );
            }
            SelectionAdvance::Recovered => {
                info!(
                    scope = %self.scope(),
                    missing = ?state.last_used_id,
                    "last used post no longer listed, restarting from newest"
                );
            }
            SelectionAdvance::FirstRun | SelectionAdvance::Next => {}
        }
        Ok(selection)
    }

    fn commit(&self, state: &RotationState) -> Result<(), RotationError> {
        if &state.scope_key != self.scope() {
            return Err(RotationError::ScopeMismatch {
                expected: self.scope().clone(),
                got: state.scope_key.clone(),
            });
        }
        self.store.commit(state).map_err(RotationError::from)
    }
}
