//! Decision engines: turn one world-state snapshot into one decision.
//!
//! [`CoordinatorEngine`] is the real arbiter. Every call to
//! [`DecisionEngine::decide`] is self-contained:
//!
//! 1. **Start** -- stamp the start time, bump the decision counter
//! 2. **Fan-out** -- await each ready coordinator in slot order, one at a
//!    time
//! 3. **Normalize** -- fold every raw item into an [`Action`]; bad items
//!    become low-priority no-ops
//! 4. **Merge** -- concatenate in emission order, stable-sort by priority
//! 5. **Finish** -- build the [`DecisionResult`]; if any coordinator
//!    failed, drop everything gathered so far and answer defensively
//!
//! [`StubDecisionEngine`] skips steps 2-4 and always answers with an empty
//! plan, which lets the processor and bridge run without any coordinators.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tactician_types::{
    Action, DecisionResult, FallbackMode, ItemOrigin, WorldStateSnapshot, normalize,
};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{DecisionConfig, EngineKind};
use crate::coordinator::{CoordinatorCatalog, CoordinatorFailure};
use crate::registry::{CoordinatorRegistry, CoordinatorReport, panic_message};

/// Produces one decision per world-state snapshot.
#[async_trait]
pub trait DecisionEngine: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Decide the tick described by `state`. Never fails; failures are
    /// reported through the result's fallback mode and confidence.
    async fn decide(&mut self, state: &WorldStateSnapshot) -> DecisionResult;

    /// Construct everything that would otherwise be built lazily.
    fn initialize(&mut self) {}

    /// Release coordinator instances.
    fn shutdown(&mut self) {}

    /// Calls to `decide` so far.
    fn decisions_made(&self) -> u64;

    /// Per-coordinator status, empty for engines without coordinators.
    fn coordinator_status(&self) -> Vec<CoordinatorReport> {
        Vec::new()
    }
}

/// Build the engine selected by configuration.
pub fn build_engine(
    config: &DecisionConfig,
    catalog: CoordinatorCatalog,
) -> Box<dyn DecisionEngine> {
    match config.engine {
        EngineKind::Stub => Box::new(StubDecisionEngine::new(config.fallback_mode)),
        EngineKind::Full => Box::new(CoordinatorEngine::new(config, catalog)),
    }
}

/// `mode` as a success-path fallback. `Defensive` is reserved for failed
/// ticks, so it is replaced by the default mode with a warning.
pub(crate) fn routine_fallback(mode: FallbackMode) -> FallbackMode {
    if mode == FallbackMode::Defensive {
        warn!(
            requested = %mode,
            using = %FallbackMode::default(),
            "defensive is reserved for failed ticks"
        );
        FallbackMode::default()
    } else {
        mode
    }
}

/// An engine that never proposes anything.
#[derive(Debug, Clone, Default)]
pub struct StubDecisionEngine {
    fallback_mode: FallbackMode,
    decisions: u64,
}

impl StubDecisionEngine {
    /// Create a stub engine answering with `fallback_mode`. `Defensive` is
    /// replaced by the default mode.
    pub fn new(fallback_mode: FallbackMode) -> Self {
        Self {
            fallback_mode: routine_fallback(fallback_mode),
            decisions: 0,
        }
    }
}

#[async_trait]
impl DecisionEngine for StubDecisionEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn decide(&mut self, state: &WorldStateSnapshot) -> DecisionResult {
        self.decisions = self.decisions.saturating_add(1);
        DecisionResult::success(state.tick, Vec::new(), self.fallback_mode, 0.0)
    }

    fn decisions_made(&self) -> u64 {
        self.decisions
    }
}

/// The coordinator-backed engine.
#[derive(Debug)]
pub struct CoordinatorEngine {
    registry: CoordinatorRegistry,
    fallback_mode: FallbackMode,
    slice: Duration,
    decisions: u64,
}

impl CoordinatorEngine {
    /// Create an engine over the coordinators bound in `catalog`, filtered
    /// by the enable flags in `config`. Coordinators are built on first use.
    /// A `Defensive` fallback mode is replaced by the default mode.
    pub fn new(config: &DecisionConfig, catalog: CoordinatorCatalog) -> Self {
        Self {
            registry: CoordinatorRegistry::new(catalog, config.coordinators),
            fallback_mode: routine_fallback(config.fallback_mode),
            slice: config.coordinator_slice(),
            decisions: 0,
        }
    }

    /// The underlying registry.
    pub const fn registry(&self) -> &CoordinatorRegistry {
        &self.registry
    }

    /// Steps 2-4: invoke, normalize and concatenate. Stops at the first
    /// coordinator failure.
    async fn fan_out(
        &mut self,
        state: &WorldStateSnapshot,
    ) -> Result<Vec<Action>, CoordinatorFailure> {
        let tick = state.tick;
        let slice = self.slice;
        let mut merged = Vec::new();

        for active in self.registry.ready() {
            let started = Instant::now();
            let outcome = AssertUnwindSafe(active.coordinator.tick(state))
                .catch_unwind()
                .await;
            let elapsed = started.elapsed();
            if elapsed > slice {
                warn!(
                    tick,
                    coordinator = %active.slot,
                    elapsed_ms = millis(elapsed),
                    slice_ms = millis(slice),
                    "slow coordinator"
                );
            }

            let raw = match outcome {
                Ok(Ok(raw)) => raw,
                Ok(Err(e)) => {
                    active.counters.record_failure();
                    return Err(CoordinatorFailure {
                        coordinator: active.slot,
                        tick,
                        reason: e.to_string(),
                    });
                }
                Err(payload) => {
                    active.counters.record_failure();
                    return Err(CoordinatorFailure {
                        coordinator: active.slot,
                        tick,
                        reason: format!("panicked: {}", panic_message(payload.as_ref())),
                    });
                }
            };

            active.counters.record_success(raw.len());
            let source = active.slot.name();
            merged.extend(raw.into_iter().enumerate().map(|(index, item)| {
                normalize(item, ItemOrigin { tick, source, index })
            }));
        }

        Ok(merged)
    }
}

#[async_trait]
impl DecisionEngine for CoordinatorEngine {
    fn name(&self) -> &'static str {
        "coordinator"
    }

    async fn decide(&mut self, state: &WorldStateSnapshot) -> DecisionResult {
        let started = Instant::now();
        self.decisions = self.decisions.saturating_add(1);

        match self.fan_out(state).await {
            Ok(actions) => {
                let result = DecisionResult::success(
                    state.tick,
                    actions,
                    self.fallback_mode,
                    millis(started.elapsed()),
                );
                debug!(
                    tick = result.tick(),
                    actions = result.actions().len(),
                    confidence = result.confidence(),
                    "decision merged"
                );
                result
            }
            Err(failure) => {
                error!(
                    tick = failure.tick,
                    coordinator = %failure.coordinator,
                    reason = %failure.reason,
                    "coordinator failed, answering defensively"
                );
                DecisionResult::defensive(state.tick, millis(started.elapsed()))
            }
        }
    }

    fn initialize(&mut self) {
        self.registry.initialize();
        info!(coordinators = ?self.registry, "decision engine initialized");
    }

    fn shutdown(&mut self) {
        self.registry.shutdown();
        info!(decisions = self.decisions, "decision engine shut down");
    }

    fn decisions_made(&self) -> u64 {
        self.decisions
    }

    fn coordinator_status(&self) -> Vec<CoordinatorReport> {
        self.registry.report()
    }
}

/// Duration as fractional milliseconds.
pub(crate) fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic, clippy::float_cmp)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;
    use tactician_types::{
        ActionKind, ActionLike, ActionPayload, CONFIDENCE_ACTIVE, CONFIDENCE_FAILED,
        CONFIDENCE_IDLE, Priority,
    };

    use super::*;
    use crate::config::CoordinatorToggles;
    use crate::coordinator::{Coordinator, CoordinatorError, CoordinatorSlot};
    use crate::registry::CoordinatorStatus;

    type CallLog = Arc<Mutex<Vec<CoordinatorSlot>>>;

    enum Behavior {
        Emit(Vec<Action>),
        Raw(Vec<ActionLike>),
        Fail,
        Panic,
        Sleep(Duration),
    }

    struct Scripted {
        slot: CoordinatorSlot,
        behavior: Behavior,
        log: CallLog,
    }

    #[async_trait]
    impl Coordinator for Scripted {
        async fn tick(
            &mut self,
            _state: &WorldStateSnapshot,
        ) -> Result<Vec<ActionLike>, CoordinatorError> {
            self.log.lock().unwrap().push(self.slot);
            match &self.behavior {
                Behavior::Emit(actions) => {
                    Ok(actions.iter().cloned().map(ActionLike::from).collect())
                }
                Behavior::Raw(items) => Ok(items.clone()),
                Behavior::Fail => Err(CoordinatorError::tick("lost target")),
                Behavior::Panic => panic!("coordinator bug"),
                Behavior::Sleep(d) => {
                    tokio::time::sleep(*d).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    fn engine(scripts: &[(CoordinatorSlot, fn() -> Behavior)]) -> (CoordinatorEngine, CallLog) {
        let log: CallLog = Arc::default();
        let mut catalog = CoordinatorCatalog::new();
        let mut toggles = CoordinatorToggles::none();
        for &(slot, behavior) in scripts {
            let log = Arc::clone(&log);
            toggles = toggles.with(slot, true);
            catalog = catalog.bind(slot, move || {
                Ok(Box::new(Scripted {
                    slot,
                    behavior: behavior(),
                    log: Arc::clone(&log),
                }) as Box<dyn Coordinator>)
            });
        }
        let config = DecisionConfig {
            coordinators: toggles,
            ..DecisionConfig::default()
        };
        (CoordinatorEngine::new(&config, catalog), log)
    }

    fn state(tick: u64) -> WorldStateSnapshot {
        WorldStateSnapshot {
            tick,
            ..WorldStateSnapshot::default()
        }
    }

    fn at(action: Action, priority: u8) -> Action {
        action.with_priority(Priority::new(priority).unwrap())
    }

    #[tokio::test]
    async fn merges_by_priority_across_coordinators() {
        let (mut engine, _) = engine(&[
            (CoordinatorSlot::Combat, || Behavior::Emit(vec![at(Action::attack(7), 3)])),
            (CoordinatorSlot::Economy, || Behavior::Emit(vec![at(Action::pickup(9), 1)])),
        ]);
        let result = engine.decide(&state(10)).await;

        let priorities: Vec<_> = result.actions().iter().map(|a| a.priority().get()).collect();
        assert_eq!(priorities, vec![1, 3]);
        assert_eq!(result.confidence(), CONFIDENCE_ACTIVE);
        assert_eq!(result.fallback_mode(), FallbackMode::Cpu);
        assert_eq!(engine.decisions_made(), 1);
    }

    #[tokio::test]
    async fn equal_priorities_keep_coordinator_order() {
        let (mut engine, _) = engine(&[
            (CoordinatorSlot::Progression, || Behavior::Emit(vec![at(Action::sit(), 4)])),
            (CoordinatorSlot::Combat, || {
                Behavior::Emit(vec![at(Action::attack(1), 4), at(Action::attack(2), 4)])
            }),
        ]);
        let result = engine.decide(&state(1)).await;
        let kinds: Vec<_> = result.actions().iter().map(|a| (a.kind(), a.target())).collect();
        assert_eq!(
            kinds,
            vec![
                (ActionKind::Attack, Some(1)),
                (ActionKind::Attack, Some(2)),
                (ActionKind::Sit, None),
            ]
        );
    }

    #[tokio::test]
    async fn invocation_order_is_fixed() {
        let (mut engine, log) = engine(&[
            (CoordinatorSlot::Npc, || Behavior::Emit(Vec::new())),
            (CoordinatorSlot::Combat, || Behavior::Emit(Vec::new())),
            (CoordinatorSlot::Social, || Behavior::Emit(Vec::new())),
        ]);
        engine.decide(&state(1)).await;
        engine.decide(&state(2)).await;
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                CoordinatorSlot::Combat,
                CoordinatorSlot::Social,
                CoordinatorSlot::Npc,
                CoordinatorSlot::Combat,
                CoordinatorSlot::Social,
                CoordinatorSlot::Npc,
            ]
        );
    }

    #[tokio::test]
    async fn nothing_to_do_is_idle_confidence() {
        let (mut engine, _) = engine(&[
            (CoordinatorSlot::Combat, || Behavior::Emit(Vec::new())),
            (CoordinatorSlot::Social, || Behavior::Emit(Vec::new())),
        ]);
        let result = engine.decide(&state(3)).await;
        assert!(result.actions().is_empty());
        assert_eq!(result.confidence(), CONFIDENCE_IDLE);
    }

    #[tokio::test]
    async fn failure_discards_earlier_actions_and_skips_later_coordinators() {
        let (mut engine, log) = engine(&[
            (CoordinatorSlot::Combat, || Behavior::Emit(vec![Action::attack(5)])),
            (CoordinatorSlot::Social, || Behavior::Fail),
            (CoordinatorSlot::Economy, || Behavior::Emit(vec![Action::pickup(6)])),
        ]);
        let result = engine.decide(&state(4)).await;

        assert!(result.is_defensive());
        assert_eq!(result.confidence(), CONFIDENCE_FAILED);
        assert_eq!(result.tick(), 4);
        assert_eq!(
            *log.lock().unwrap(),
            vec![CoordinatorSlot::Combat, CoordinatorSlot::Social]
        );

        let social = engine
            .coordinator_status()
            .into_iter()
            .find(|r| r.coordinator == CoordinatorSlot::Social)
            .unwrap();
        assert_eq!(social.counters.failures, 1);
        assert_eq!(social.status, CoordinatorStatus::Active);
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let (mut engine, _) = engine(&[(CoordinatorSlot::Combat, || Behavior::Panic)]);
        let result = engine.decide(&state(8)).await;
        assert!(result.is_defensive());

        // The engine keeps answering after a panic.
        let result = engine.decide(&state(9)).await;
        assert!(result.is_defensive());
        assert_eq!(engine.decisions_made(), 2);
    }

    #[tokio::test]
    async fn malformed_items_become_noops() {
        let (mut engine, _) = engine(&[(CoordinatorSlot::Combat, || {
            let Some(map) = json!({"type": "dance", "priority": 1}).as_object().cloned() else {
                return Behavior::Raw(Vec::new());
            };
            Behavior::Raw(vec![
                ActionLike::from(map),
                ActionLike::from(ActionPayload::new("attack")),
                ActionLike::from(at(Action::sit(), 2)),
            ])
        })]);
        let result = engine.decide(&state(5)).await;

        let shape: Vec<_> = result
            .actions()
            .iter()
            .map(|a| (a.kind(), a.priority().get()))
            .collect();
        assert_eq!(
            shape,
            vec![
                (ActionKind::Sit, 2),
                (ActionKind::NoOp, 10),
                (ActionKind::NoOp, 10),
            ]
        );
        assert_eq!(result.confidence(), CONFIDENCE_ACTIVE);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_coordinator_is_not_interrupted() {
        let (mut engine, log) = engine(&[
            (CoordinatorSlot::Combat, || Behavior::Sleep(Duration::from_millis(200))),
            (CoordinatorSlot::Npc, || Behavior::Emit(vec![Action::talk_npc(3)])),
        ]);
        let result = engine.decide(&state(6)).await;
        assert_eq!(result.actions().len(), 1);
        assert_eq!(log.lock().unwrap().len(), 2);
        assert!(result.processing_time_ms() >= 200.0);
    }

    #[tokio::test]
    async fn unavailable_coordinators_are_skipped() {
        let config = DecisionConfig {
            coordinators: CoordinatorToggles::none().with(CoordinatorSlot::Social, true),
            ..DecisionConfig::default()
        };
        let mut engine = CoordinatorEngine::new(&config, CoordinatorCatalog::new());
        let result = engine.decide(&state(1)).await;
        assert!(result.actions().is_empty());
        assert!(!result.is_defensive());
        assert_eq!(
            engine.registry().status(CoordinatorSlot::Social),
            CoordinatorStatus::Unavailable
        );
    }

    #[tokio::test]
    async fn decide_after_shutdown_invokes_nothing() {
        let (mut engine, log) =
            engine(&[(CoordinatorSlot::Combat, || Behavior::Emit(vec![Action::attack(5)]))]);
        engine.initialize();
        assert_eq!(engine.decide(&state(1)).await.actions().len(), 1);

        engine.shutdown();
        let result = engine.decide(&state(2)).await;
        assert!(result.actions().is_empty());
        assert!(!result.is_defensive());
        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(
            engine.registry().status(CoordinatorSlot::Combat),
            CoordinatorStatus::ShutDown
        );

        engine.initialize();
        assert_eq!(engine.decide(&state(3)).await.actions().len(), 1);
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stub_engine_answers_empty() {
        let mut stub = StubDecisionEngine::new(FallbackMode::Idle);
        let result = stub.decide(&state(2)).await;
        assert!(result.actions().is_empty());
        assert_eq!(result.fallback_mode(), FallbackMode::Idle);
        assert_eq!(result.confidence(), CONFIDENCE_IDLE);
        assert_eq!(stub.decisions_made(), 1);
        assert!(stub.coordinator_status().is_empty());
    }

    #[tokio::test]
    async fn defensive_mode_is_never_used_for_success() {
        let mut stub = StubDecisionEngine::new(FallbackMode::Defensive);
        let result = stub.decide(&state(1)).await;
        assert_eq!(result.fallback_mode(), FallbackMode::Cpu);
        assert_eq!(result.confidence(), CONFIDENCE_IDLE);

        let config = DecisionConfig {
            fallback_mode: FallbackMode::Defensive,
            coordinators: CoordinatorToggles::none(),
            ..DecisionConfig::default()
        };
        let mut engine = CoordinatorEngine::new(&config, CoordinatorCatalog::new());
        let result = engine.decide(&state(2)).await;
        assert!(!result.is_defensive());
        assert_eq!(result.fallback_mode(), FallbackMode::Cpu);
    }

    #[test]
    fn build_engine_honors_kind() {
        let config = DecisionConfig {
            engine: EngineKind::Stub,
            ..DecisionConfig::default()
        };
        assert_eq!(build_engine(&config, CoordinatorCatalog::new()).name(), "stub");
        assert_eq!(
            build_engine(&DecisionConfig::default(), CoordinatorCatalog::new()).name(),
            "coordinator"
        );
    }
}
