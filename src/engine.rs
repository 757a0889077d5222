//! The rotation decision function.
//!
//! [`RotationEngine`] is pure: given the current listing and a state value it
//! computes which item to publish next and the state to commit afterwards.
//! It never touches storage; the caller decides whether to commit.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::types::{ContentItem, RotationError, RotationState, ScopeKey};

/// How the cursor moved to reach the selected item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionAdvance {
    /// No prior state; started at the newest item.
    FirstRun,
    /// Moved to the next-oldest item.
    Next,
    /// The previous item was the oldest; wrapped to the newest.
    Wrapped,
    /// The previous item is gone from the listing; restarted at the newest.
    Recovered,
}

/// Outcome of a successful selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// The item to publish.
    pub item: ContentItem,
    /// The state to commit once the item has been published.
    pub next_state: RotationState,
    /// Position of the item in rotation order (0 = newest).
    pub position: usize,
    /// Number of items in the rotation.
    pub total: usize,
    /// How the cursor moved.
    pub advance: SelectionAdvance,
}

/// Stateless rotation engine.
///
/// Rotation order is newest first by `created_at`, ties broken by id in
/// descending order. Each selection moves one step towards the oldest item
/// and wraps back to the newest after it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RotationEngine;

impl RotationEngine {
    /// Returns `items` in rotation order.
    pub fn order(items: &[ContentItem]) -> Vec<&ContentItem> {
        let mut ordered: Vec<&ContentItem> = items.iter().collect();
        ordered.sort_by(|a, b| rotation_cmp(a, b));
        ordered
    }

    /// Selects the next item for `state`.
    ///
    /// `now` stamps `updated_at` on the returned state and is otherwise
    /// ignored, so the same inputs always produce the same selection.
    ///
    /// # Errors
    ///
    /// Returns [`RotationError::NoContent`] if `items` is empty.
    pub fn select(
        items: &[ContentItem],
        state: &RotationState,
        now: DateTime<Utc>,
    ) -> Result<Selection, RotationError> {
        let ordered = Self::order(items);
        if ordered.is_empty() {
            return Err(RotationError::NoContent { scope: state.scope_key.clone() });
        }

        let (position, cycle_count, advance) = match &state.last_used_id {
            None => (0, 1, SelectionAdvance::FirstRun),
            Some(last) => match ordered.iter().position(|item| &item.id == last) {
                Some(i) if i + 1 < ordered.len() => {
                    (i + 1, state.cycle_count, SelectionAdvance::Next)
                }
                Some(_) => (0, state.cycle_count.saturating_add(1), SelectionAdvance::Wrapped),
                None => (0, state.cycle_count.saturating_add(1), SelectionAdvance::Recovered),
            },
        };

        let item = ordered[position].clone();
        let next_state = RotationState {
            scope_key: state.scope_key.clone(),
            last_used_id: Some(item.id.clone()),
            cycle_count,
            updated_at: Some(now),
        };

        Ok(Selection { item, next_state, position, total: ordered.len(), advance })
    }

    /// Returns the "never run" state for `scope`, stamped with `now`.
    ///
    /// The listing is not consulted. The caller commits the result like any
    /// other state.
    pub const fn reset(scope: ScopeKey, now: DateTime<Utc>) -> RotationState {
        RotationState {
            scope_key: scope,
            last_used_id: None,
            cycle_count: 0,
            updated_at: Some(now),
        }
    }
}

fn rotation_cmp(a: &ContentItem, b: &ContentItem) -> Ordering {
    b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id))
}
