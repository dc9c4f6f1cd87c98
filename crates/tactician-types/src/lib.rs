//! Shared type definitions for the Tactician decision core.
//!
//! Everything that crosses a boundary lives here: the actions coordinators
//! propose, the decision the core hands back, the world-state snapshot the
//! host sends, and the JSON envelopes around them.
//!
//! # Modules
//!
//! - [`actions`] -- Canonical [`Action`] record, [`Priority`], and the
//!   loose [`ActionPayload`] / [`ActionLike`] inputs
//! - [`normalize`] -- Fold any [`ActionLike`] into an [`Action`], with a
//!   safe no-op fallback
//! - [`decision`] -- [`DecisionResult`] and [`FallbackMode`]
//! - [`state`] -- [`WorldStateSnapshot`] and its frame parser
//! - [`envelope`] -- Inbound classification and outbound frame shapes

pub mod actions;
pub mod decision;
pub mod envelope;
pub mod normalize;
pub mod state;

// Re-export all public types at crate root for convenience.
pub use actions::{Action, ActionError, ActionKind, ActionLike, ActionPayload, Priority};
pub use decision::{
    CONFIDENCE_ACTIVE, CONFIDENCE_FAILED, CONFIDENCE_IDLE, DecisionResult, FallbackMode,
    UnknownFallbackMode,
};
pub use envelope::{
    EnvelopeError, ErrorBody, ErrorKind, HealthStatus, InboundMessage, OutboundMessage,
    now_epoch_ms,
};
pub use normalize::{ItemOrigin, normalize, try_normalize};
pub use state::{
    ActorKind, ActorState, CharacterState, InventoryItem, MapInfo, Position, SkillInfo,
    StateParseError, WorldStateSnapshot,
};
