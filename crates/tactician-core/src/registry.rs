//! Lazy, per-session registry of coordinator instances.
//!
//! The registry holds one entry per [`CoordinatorSlot`], always in
//! [`CoordinatorSlot::ALL`] order. Each entry is the product of two
//! independent facts: whether configuration enables it and whether it can
//! be built. A disabled entry is never constructed or invoked. An entry
//! whose construction fails is logged once and marked unavailable for the
//! rest of the session; only [`CoordinatorRegistry::initialize`] retries
//! it. After [`CoordinatorRegistry::shutdown`] nothing is built again until
//! the next `initialize`.

use std::panic::{AssertUnwindSafe, catch_unwind};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::CoordinatorToggles;
use crate::coordinator::{
    Coordinator, CoordinatorCatalog, CoordinatorError, CoordinatorFactory, CoordinatorSlot,
};

/// Lifecycle state of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorStatus {
    /// Turned off by configuration.
    Disabled,
    /// Enabled, not yet constructed.
    Pending,
    /// Constructed and invoked every tick.
    Active,
    /// Construction failed; skipped for the session.
    Unavailable,
    /// Dropped by shutdown; stays empty until the next initialize.
    ShutDown,
}

/// Per-coordinator counters, kept across ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorCounters {
    /// Calls to `tick`.
    pub invocations: u64,
    /// Raw items returned, before normalization.
    pub actions_emitted: u64,
    /// Calls that returned an error or panicked.
    pub failures: u64,
}

impl CoordinatorCounters {
    pub(crate) const fn record_success(&mut self, emitted: usize) {
        self.invocations = self.invocations.saturating_add(1);
        self.actions_emitted = self.actions_emitted.saturating_add(emitted as u64);
    }

    pub(crate) const fn record_failure(&mut self) {
        self.invocations = self.invocations.saturating_add(1);
        self.failures = self.failures.saturating_add(1);
    }
}

/// Status line for one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoordinatorReport {
    /// Slot name.
    pub coordinator: CoordinatorSlot,
    /// Current state.
    pub status: CoordinatorStatus,
    /// Counters so far.
    pub counters: CoordinatorCounters,
    /// Why the entry is unavailable, if it is.
    pub unavailable_reason: Option<String>,
}

enum EntryState {
    Disabled,
    Pending,
    Active(Box<dyn Coordinator>),
    Unavailable(String),
    ShutDown,
}

struct Entry {
    slot: CoordinatorSlot,
    factory: Option<CoordinatorFactory>,
    state: EntryState,
    counters: CoordinatorCounters,
}

impl Entry {
    const fn status(&self) -> CoordinatorStatus {
        match self.state {
            EntryState::Disabled => CoordinatorStatus::Disabled,
            EntryState::Pending => CoordinatorStatus::Pending,
            EntryState::Active(_) => CoordinatorStatus::Active,
            EntryState::Unavailable(_) => CoordinatorStatus::Unavailable,
            EntryState::ShutDown => CoordinatorStatus::ShutDown,
        }
    }

    /// Build the coordinator if the entry is pending. Failures are logged
    /// here, once, and the entry becomes unavailable.
    fn activate(&mut self) {
        if !matches!(self.state, EntryState::Pending) {
            return;
        }
        match construct(self.slot, self.factory.as_ref()) {
            Ok(coordinator) => {
                info!(coordinator = %self.slot, "coordinator constructed");
                self.state = EntryState::Active(coordinator);
            }
            Err(e) => {
                warn!(
                    coordinator = %self.slot,
                    error = %e,
                    "coordinator unavailable for this session"
                );
                self.state = EntryState::Unavailable(e.to_string());
            }
        }
    }
}

fn construct(
    slot: CoordinatorSlot,
    factory: Option<&CoordinatorFactory>,
) -> Result<Box<dyn Coordinator>, CoordinatorError> {
    let factory = factory.ok_or(CoordinatorError::NotBound { slot })?;
    catch_unwind(AssertUnwindSafe(factory)).unwrap_or_else(|payload| {
        Err(CoordinatorError::construction(panic_message(payload.as_ref())))
    })
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_owned()
    }
}

/// A constructed coordinator ready to be invoked, with its counters.
pub(crate) struct ActiveCoordinator<'a> {
    pub(crate) slot: CoordinatorSlot,
    pub(crate) coordinator: &'a mut dyn Coordinator,
    pub(crate) counters: &'a mut CoordinatorCounters,
}

/// The `enabled x available` matrix of coordinators.
pub struct CoordinatorRegistry {
    entries: Vec<Entry>,
}

impl CoordinatorRegistry {
    /// Build the registry from bound factories and enable flags. Nothing
    /// is constructed yet.
    pub fn new(mut catalog: CoordinatorCatalog, toggles: CoordinatorToggles) -> Self {
        let entries = CoordinatorSlot::ALL
            .into_iter()
            .map(|slot| {
                let state = if toggles.is_enabled(slot) {
                    EntryState::Pending
                } else {
                    EntryState::Disabled
                };
                Entry {
                    slot,
                    factory: catalog.take(slot),
                    state,
                    counters: CoordinatorCounters::default(),
                }
            })
            .collect();
        Self { entries }
    }

    /// Construct every enabled entry now, retrying ones previously marked
    /// unavailable and rebuilding ones dropped by [`Self::shutdown`].
    pub fn initialize(&mut self) {
        for entry in &mut self.entries {
            if matches!(entry.state, EntryState::Unavailable(_) | EntryState::ShutDown) {
                entry.state = EntryState::Pending;
            }
            entry.activate();
        }
    }

    /// Drop every constructed coordinator. Enabled entries are not rebuilt
    /// on use; only [`Self::initialize`] brings them back.
    pub fn shutdown(&mut self) {
        for entry in &mut self.entries {
            if matches!(entry.state, EntryState::Active(_) | EntryState::Pending) {
                entry.state = EntryState::ShutDown;
            }
        }
    }

    /// Constructed coordinators in invocation order, building pending
    /// entries first.
    pub(crate) fn ready(&mut self) -> impl Iterator<Item = ActiveCoordinator<'_>> {
        self.entries.iter_mut().filter_map(|entry| {
            entry.activate();
            match &mut entry.state {
                EntryState::Active(coordinator) => Some(ActiveCoordinator {
                    slot: entry.slot,
                    coordinator: coordinator.as_mut(),
                    counters: &mut entry.counters,
                }),
                _ => None,
            }
        })
    }

    /// Status of one slot.
    pub fn status(&self, slot: CoordinatorSlot) -> CoordinatorStatus {
        self.entries
            .iter()
            .find(|e| e.slot == slot)
            .map_or(CoordinatorStatus::Disabled, Entry::status)
    }

    /// Status lines for every slot, in invocation order.
    pub fn report(&self) -> Vec<CoordinatorReport> {
        self.entries
            .iter()
            .map(|entry| CoordinatorReport {
                coordinator: entry.slot,
                status: entry.status(),
                counters: entry.counters,
                unavailable_reason: match &entry.state {
                    EntryState::Unavailable(reason) => Some(reason.clone()),
                    _ => None,
                },
            })
            .collect()
    }
}

impl std::fmt::Debug for CoordinatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| (e.slot, e.status())))
            .finish()
    }
}
