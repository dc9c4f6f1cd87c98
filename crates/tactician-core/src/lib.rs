//! Coordinator arbitration and tick orchestration for the Tactician
//! decision core.
//!
//! One inbound frame at a time flows through the [`TickProcessor`], which
//! parses the world state, keeps a bounded history, asks a
//! [`DecisionEngine`] for a plan and times the whole thing against a soft
//! budget. The coordinator-backed engine fans out to each enabled
//! [`Coordinator`] in a fixed order and merges their proposals by
//! priority.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `tactician-config.yaml` into
//!   strongly-typed structs.
//! - [`coordinator`] -- [`Coordinator`] trait, slots, and the factory
//!   catalog.
//! - [`registry`] -- Lazy construction and status of coordinator
//!   instances.
//! - [`engine`] -- [`DecisionEngine`] trait, [`CoordinatorEngine`] and
//!   [`StubDecisionEngine`].
//! - [`processor`] -- [`TickProcessor`] and its statistics.
//!
//! [`Coordinator`]: coordinator::Coordinator
//! [`DecisionEngine`]: engine::DecisionEngine
//! [`CoordinatorEngine`]: engine::CoordinatorEngine
//! [`StubDecisionEngine`]: engine::StubDecisionEngine
//! [`TickProcessor`]: processor::TickProcessor

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod processor;
pub mod registry;

pub use config::{AgentConfig, ConfigError, EngineKind};
pub use coordinator::{
    Coordinator, CoordinatorCatalog, CoordinatorError, CoordinatorFactory, CoordinatorFailure,
    CoordinatorSlot,
};
pub use engine::{CoordinatorEngine, DecisionEngine, StubDecisionEngine, build_engine};
pub use processor::{ProcessError, StatsSnapshot, TickProcessor, TickStats};
pub use registry::{CoordinatorCounters, CoordinatorReport, CoordinatorRegistry, CoordinatorStatus};
