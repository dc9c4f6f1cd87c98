//! The coordinator contract and the catalog of coordinator factories.
//!
//! A [`Coordinator`] is one pluggable decision subsystem (combat, social,
//! economy, NPC interaction, progression). Each tick the engine calls
//! [`Coordinator::tick`] on every enabled coordinator, in
//! [`CoordinatorSlot::ALL`] order, and merges what they propose.
//!
//! Coordinators are never built directly by the engine. An embedding
//! application binds a [`CoordinatorFactory`] per slot in a
//! [`CoordinatorCatalog`]; the registry calls the factory the first time
//! the slot is needed.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use tactician_types::{ActionLike, WorldStateSnapshot};

/// Errors a coordinator can report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    /// The coordinator could not be constructed.
    #[error("construction failed: {message}")]
    Construction {
        /// Why construction failed.
        message: String,
    },

    /// No factory is bound for the slot.
    #[error("no implementation bound for {slot}")]
    NotBound {
        /// The unbound slot.
        slot: CoordinatorSlot,
    },

    /// The coordinator failed while deciding a tick.
    #[error("tick failed: {message}")]
    Tick {
        /// Why the tick failed.
        message: String,
    },
}

impl CoordinatorError {
    /// Shorthand for a [`CoordinatorError::Tick`].
    pub fn tick(message: impl Into<String>) -> Self {
        Self::Tick {
            message: message.into(),
        }
    }

    /// Shorthand for a [`CoordinatorError::Construction`].
    pub fn construction(message: impl Into<String>) -> Self {
        Self::Construction {
            message: message.into(),
        }
    }
}

/// A coordinator failed catastrophically during a tick, abandoning the
/// tick's fan-out.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("coordinator {coordinator} failed on tick {tick}: {reason}")]
pub struct CoordinatorFailure {
    /// Which coordinator failed.
    pub coordinator: CoordinatorSlot,
    /// The tick being decided.
    pub tick: u64,
    /// Error message or panic payload.
    pub reason: String,
}

/// A pluggable per-tick decision subsystem.
///
/// Implementations may keep private state between ticks (cooldowns,
/// multi-tick plans) but must not hold on to `state` past the call. A
/// coordinator with nothing to do returns an empty list.
#[async_trait]
pub trait Coordinator: Send {
    /// Propose actions for this tick.
    ///
    /// # Errors
    ///
    /// Returning [`CoordinatorError`] abandons the whole tick; the engine
    /// answers with a defensive decision. Output that is merely malformed
    /// should be returned as-is and left to normalization instead.
    async fn tick(
        &mut self,
        state: &WorldStateSnapshot,
    ) -> Result<Vec<ActionLike>, CoordinatorError>;
}

/// The fixed set of coordinator positions, in invocation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorSlot {
    /// Targeting, skills and survival.
    Combat,
    /// Party and guild coordination.
    Social,
    /// Trading, looting and selling.
    Economy,
    /// NPC dialogue and quests.
    Npc,
    /// Stat and skill point allocation.
    Progression,
}

impl CoordinatorSlot {
    /// All slots in invocation order. Equal-priority actions resolve in
    /// this order.
    pub const ALL: [Self; 5] = [
        Self::Combat,
        Self::Social,
        Self::Economy,
        Self::Npc,
        Self::Progression,
    ];

    /// Name used in configuration and logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Combat => "combat",
            Self::Social => "social",
            Self::Economy => "economy",
            Self::Npc => "npc",
            Self::Progression => "progression",
        }
    }
}

impl fmt::Display for CoordinatorSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Builds a coordinator on first use.
pub type CoordinatorFactory =
    Box<dyn Fn() -> Result<Box<dyn Coordinator>, CoordinatorError> + Send + Sync>;

/// Factories bound to coordinator slots.
///
/// A slot without a factory is reported as unavailable when enabled.
#[derive(Default)]
pub struct CoordinatorCatalog {
    factories: BTreeMap<CoordinatorSlot, CoordinatorFactory>,
}

impl CoordinatorCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a factory to `slot`, replacing any previous binding.
    #[must_use]
    pub fn bind<F>(mut self, slot: CoordinatorSlot, factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn Coordinator>, CoordinatorError> + Send + Sync + 'static,
    {
        self.factories.insert(slot, Box::new(factory));
        self
    }

    /// Whether `slot` has a factory.
    pub fn is_bound(&self, slot: CoordinatorSlot) -> bool {
        self.factories.contains_key(&slot)
    }

    /// Remove and return the factory for `slot`.
    pub(crate) fn take(&mut self, slot: CoordinatorSlot) -> Option<CoordinatorFactory> {
        self.factories.remove(&slot)
    }
}

impl fmt::Debug for CoordinatorCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorCatalog")
            .field("bound", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
