//! Normalization of coordinator output into canonical [`Action`] records.
//!
//! One bad item must never take down the merge: anything that cannot be
//! turned into a valid action becomes [`Action::fallback_noop`] (a no-op
//! at the lowest priority) and a warning is logged.

use serde_json::Value;
use tracing::warn;

use crate::actions::{Action, ActionError, ActionLike, ActionPayload};

/// Convert one coordinator item into a canonical action.
///
/// # Errors
///
/// Returns [`ActionError`] if the kind is unknown, a required field is
/// missing, or an untyped map does not have the expected shape.
pub fn try_normalize(item: ActionLike) -> Result<Action, ActionError> {
    match item {
        ActionLike::Action(action) => Ok(action),
        ActionLike::Payload(payload) => Action::try_from(payload),
        ActionLike::Map(map) => {
            let payload: ActionPayload =
                serde_json::from_value(Value::Object(map)).map_err(|e| {
                    ActionError::Malformed {
                        message: e.to_string(),
                    }
                })?;
            Action::try_from(payload)
        }
    }
}

/// Where an item came from. Only used to label the warning logged when
/// the item is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemOrigin<'a> {
    /// Tick being decided.
    pub tick: u64,
    /// Name of the coordinator that emitted the item.
    pub source: &'a str,
    /// Position of the item in that coordinator's output.
    pub index: usize,
}

/// Convert one coordinator item, degrading to a lowest-priority no-op.
pub fn normalize(item: ActionLike, origin: ItemOrigin<'_>) -> Action {
    try_normalize(item).unwrap_or_else(|e| {
        warn!(
            tick = origin.tick,
            coordinator = origin.source,
            index = origin.index,
            error = %e,
            "unusable action replaced with no-op"
        );
        Action::fallback_noop()
    })
}
