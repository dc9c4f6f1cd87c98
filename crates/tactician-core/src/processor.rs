//! The tick processor: one inbound frame in, one outbound frame out.
//!
//! The processor owns the decision engine, the bounded snapshot history
//! and every running counter. It is driven by a single sequential message
//! loop, so none of that state is shared or locked.
//!
//! Whatever happens inside, [`TickProcessor::process_message`] always
//! answers with one of the three outbound shapes (`decision`,
//! `heartbeat_ack` or `error`).

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};
use tactician_types::{
    EnvelopeError, ErrorKind, FallbackMode, InboundMessage, OutboundMessage, StateParseError,
    WorldStateSnapshot,
};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::config::AgentConfig;
use crate::coordinator::CoordinatorCatalog;
use crate::engine::{DecisionEngine, build_engine, millis, routine_fallback};
use crate::registry::panic_message;

/// Why an inbound frame produced an `error` envelope.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The frame could not be classified.
    #[error("invalid message: {source}")]
    Envelope {
        /// The underlying classification error.
        #[from]
        source: EnvelopeError,
    },

    /// The frame's `type` is not handled.
    #[error("unknown message type: {message_type}")]
    UnknownType {
        /// The type as sent.
        message_type: String,
    },

    /// The frame exceeded the size limit.
    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge {
        /// Frame size in bytes.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// The state payload could not be parsed.
    #[error("state parse failed: {source}")]
    State {
        /// The underlying parse error.
        #[from]
        source: StateParseError,
    },

    /// The engine panicked while deciding.
    #[error("decision engine panicked: {message}")]
    EnginePanic {
        /// Panic payload text.
        message: String,
    },
}

impl ProcessError {
    /// The `error.type` reported to the host.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Envelope { .. } => ErrorKind::InvalidMessage,
            Self::UnknownType { .. } => ErrorKind::UnknownMessageType,
            Self::FrameTooLarge { .. } => ErrorKind::FrameTooLarge,
            Self::State { .. } | Self::EnginePanic { .. } => ErrorKind::ProcessingError,
        }
    }
}

/// Running totals kept by the processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TickStats {
    /// State updates that produced a decision.
    pub ticks_processed: u64,
    /// Sum of end-to-end processing times.
    pub total_processing_ms: f64,
    /// Slowest tick so far.
    pub max_processing_ms: f64,
    /// Ticks that overran the soft budget.
    pub budget_exceeded: u64,
    /// Ticks that arrived with a lower number than the previous one.
    pub tick_regressions: u64,
    /// State updates answered with `processing_error`.
    pub processing_errors: u64,
    /// Most recent tick seen.
    pub last_tick: Option<u64>,
}

impl TickStats {
    /// Mean processing time, `0.0` before the first tick.
    #[allow(clippy::cast_precision_loss)]
    pub fn average_processing_ms(&self) -> f64 {
        if self.ticks_processed == 0 {
            return 0.0;
        }
        self.total_processing_ms / self.ticks_processed as f64
    }
}

/// A point-in-time view of the processor's counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Running totals.
    #[serde(flatten)]
    pub stats: TickStats,
    /// Mean processing time.
    pub average_processing_ms: f64,
    /// Snapshots currently retained.
    pub history_len: usize,
    /// Calls the engine has answered.
    pub decisions_made: u64,
}

/// Ingests inbound frames and answers each with one outbound frame.
pub struct TickProcessor {
    engine: Box<dyn DecisionEngine>,
    fallback_mode: FallbackMode,
    budget: Duration,
    history: VecDeque<Arc<WorldStateSnapshot>>,
    history_size: usize,
    stats: TickStats,
}

impl TickProcessor {
    /// Create a processor around `engine`.
    ///
    /// `history_size` is raised to 1 if zero. A `Defensive` fallback mode
    /// is replaced by the default mode.
    pub fn new(
        engine: Box<dyn DecisionEngine>,
        fallback_mode: FallbackMode,
        budget: Duration,
        history_size: usize,
    ) -> Self {
        let history_size = history_size.max(1);
        Self {
            engine,
            fallback_mode: routine_fallback(fallback_mode),
            budget,
            history: VecDeque::with_capacity(history_size),
            history_size,
            stats: TickStats::default(),
        }
    }

    /// Build the configured engine over `catalog` and wrap it.
    pub fn from_config(config: &AgentConfig, catalog: CoordinatorCatalog) -> Self {
        Self::new(
            build_engine(&config.decision, catalog),
            config.decision.fallback_mode,
            config.tick.budget(),
            config.tick.history_size,
        )
    }

    /// Construct the engine's coordinators eagerly.
    pub fn initialize(&mut self) {
        self.engine.initialize();
    }

    /// Release the engine's coordinators.
    pub fn shutdown(&mut self) {
        self.engine.shutdown();
    }

    /// The engine.
    pub fn engine(&self) -> &dyn DecisionEngine {
        self.engine.as_ref()
    }

    /// Handle one raw frame.
    pub async fn process_message(&mut self, raw: &str) -> OutboundMessage {
        match InboundMessage::decode(raw) {
            Ok(message) => self.dispatch(message).await,
            Err(e) => {
                warn!(error = %e, "rejecting unclassifiable frame");
                self.reject(&ProcessError::from(e))
            }
        }
    }

    /// Handle one already-parsed frame.
    pub async fn process_frame(&mut self, frame: Map<String, Value>) -> OutboundMessage {
        match InboundMessage::classify(frame) {
            Ok(message) => self.dispatch(message).await,
            Err(e) => {
                warn!(error = %e, "rejecting unclassifiable frame");
                self.reject(&ProcessError::from(e))
            }
        }
    }

    async fn dispatch(&mut self, message: InboundMessage) -> OutboundMessage {
        match message {
            InboundMessage::StateUpdate(frame) => self.process_state_update(&frame).await,
            InboundMessage::Heartbeat { tick } => self.process_heartbeat(tick),
            InboundMessage::Unknown { message_type } => {
                warn!(message_type = %message_type, "unknown message type");
                self.reject(&ProcessError::UnknownType { message_type })
            }
        }
    }

    /// Parse, record, decide, time. Errors never escape; they come back as
    /// `processing_error` envelopes and leave tick statistics untouched.
    pub async fn process_state_update(&mut self, frame: &Map<String, Value>) -> OutboundMessage {
        let started = Instant::now();

        let snapshot = match WorldStateSnapshot::from_frame(frame) {
            Ok(snapshot) => Arc::new(snapshot),
            Err(e) => {
                let e = ProcessError::from(e);
                warn!(error = %e, "state update rejected");
                self.stats.processing_errors = self.stats.processing_errors.saturating_add(1);
                return self.reject(&e);
            }
        };
        let tick = snapshot.tick;
        self.record(Arc::clone(&snapshot));

        let outcome = AssertUnwindSafe(self.engine.decide(&snapshot))
            .catch_unwind()
            .await;
        let mut result = match outcome {
            Ok(result) => result,
            Err(payload) => {
                let e = ProcessError::EnginePanic {
                    message: panic_message(payload.as_ref()),
                };
                error!(tick, engine = self.engine.name(), error = %e, "tick processing failed");
                self.stats.processing_errors = self.stats.processing_errors.saturating_add(1);
                return self.reject(&e);
            }
        };

        let elapsed = started.elapsed();
        let elapsed_ms = millis(elapsed);
        result.set_processing_time_ms(elapsed_ms);

        self.stats.ticks_processed = self.stats.ticks_processed.saturating_add(1);
        self.stats.total_processing_ms += elapsed_ms;
        self.stats.max_processing_ms = self.stats.max_processing_ms.max(elapsed_ms);

        if elapsed > self.budget {
            self.stats.budget_exceeded = self.stats.budget_exceeded.saturating_add(1);
            warn!(
                tick,
                elapsed_ms,
                budget_ms = millis(self.budget),
                "tick exceeded processing budget"
            );
        }

        debug!(
            tick,
            elapsed_ms,
            actions = result.actions().len(),
            fallback_mode = %result.fallback_mode(),
            "tick processed"
        );
        result.into_envelope()
    }

    /// Acknowledge a heartbeat. Does not touch the engine.
    pub fn process_heartbeat(&self, client_tick: Option<i64>) -> OutboundMessage {
        debug!(?client_tick, ticks_processed = self.stats.ticks_processed, "heartbeat");
        OutboundMessage::heartbeat_ack(client_tick, self.stats.ticks_processed)
    }

    /// Answer with an `error` envelope for `error`.
    pub fn reject(&self, error: &ProcessError) -> OutboundMessage {
        OutboundMessage::error(error.kind(), error.to_string(), self.fallback_mode)
    }

    /// Append to history, evicting the oldest at capacity, and track the
    /// last tick. A regression is logged and counted, never refused.
    fn record(&mut self, snapshot: Arc<WorldStateSnapshot>) {
        let tick = snapshot.tick;
        if let Some(last) = self.stats.last_tick.filter(|last| tick < *last) {
            self.stats.tick_regressions = self.stats.tick_regressions.saturating_add(1);
            warn!(tick, last_tick = last, "tick regression, upstream may have restarted");
        }
        self.stats.last_tick = Some(tick);

        while self.history.len() >= self.history_size {
            self.history.pop_front();
        }
        self.history.push_back(snapshot);
    }

    /// Retained snapshots, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &WorldStateSnapshot> {
        self.history.iter().map(Arc::as_ref)
    }

    /// The most recent snapshot.
    pub fn latest(&self) -> Option<Arc<WorldStateSnapshot>> {
        self.history.back().cloned()
    }

    /// The most recent tick seen.
    pub const fn last_tick(&self) -> Option<u64> {
        self.stats.last_tick
    }

    /// State updates that produced a decision.
    pub const fn ticks_processed(&self) -> u64 {
        self.stats.ticks_processed
    }

    /// Running totals.
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Counters plus derived values.
    pub fn snapshot_stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            stats: self.stats,
            average_processing_ms: self.stats.average_processing_ms(),
            history_len: self.history.len(),
            decisions_made: self.engine.decisions_made(),
        }
    }
}

impl std::fmt::Debug for TickProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickProcessor")
            .field("engine", &self.engine.name())
            .field("fallback_mode", &self.fallback_mode)
            .field("budget", &self.budget)
            .field("history_len", &self.history.len())
            .field("history_size", &self.history_size)
            .field("stats", &self.stats)
            .finish()
    }
}
