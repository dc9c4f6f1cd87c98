//! The per-tick answer of the decision layer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::actions::Action;
use crate::envelope::OutboundMessage;

/// Confidence of a tick that produced at least one action.
pub const CONFIDENCE_ACTIVE: f64 = 1.0;
/// Confidence of a tick where nothing needed doing.
pub const CONFIDENCE_IDLE: f64 = 0.5;
/// Confidence of a tick abandoned because a coordinator failed.
pub const CONFIDENCE_FAILED: f64 = 0.0;

/// How much autonomy the decision layer claims for a tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMode {
    /// The host's built-in logic may supplement the plan.
    #[default]
    Cpu,
    /// The host should do nothing beyond the plan.
    Idle,
    /// The plan is untrustworthy this tick.
    Defensive,
}

impl FallbackMode {
    /// Wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Idle => "idle",
            Self::Defensive => "defensive",
        }
    }
}

impl fmt::Display for FallbackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognized fallback mode name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown fallback mode: {0}")]
pub struct UnknownFallbackMode(pub String);

impl FromStr for FallbackMode {
    type Err = UnknownFallbackMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "idle" => Ok(Self::Idle),
            "defensive" => Ok(Self::Defensive),
            other => Err(UnknownFallbackMode(other.to_owned())),
        }
    }
}

/// The decision for one tick.
///
/// Built only through [`DecisionResult::success`] and
/// [`DecisionResult::defensive`], which keep the invariants: actions are
/// stable-sorted by ascending priority, and `confidence == 0.0` with
/// `fallback_mode == Defensive` exactly on the failure path.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionResult {
    tick: u64,
    actions: Vec<Action>,
    fallback_mode: FallbackMode,
    processing_time_ms: f64,
    confidence: f64,
}

impl DecisionResult {
    /// A completed decision.
    ///
    /// `actions` must be in emission order; they are stable-sorted here so
    /// equal priorities keep that order.
    pub fn success(
        tick: u64,
        mut actions: Vec<Action>,
        fallback_mode: FallbackMode,
        processing_time_ms: f64,
    ) -> Self {
        actions.sort_by_key(Action::priority);
        let confidence = if actions.is_empty() {
            CONFIDENCE_IDLE
        } else {
            CONFIDENCE_ACTIVE
        };
        Self {
            tick,
            actions,
            fallback_mode,
            processing_time_ms,
            confidence,
        }
    }

    /// The decision returned when a coordinator failed during the tick.
    pub const fn defensive(tick: u64, processing_time_ms: f64) -> Self {
        Self {
            tick,
            actions: Vec::new(),
            fallback_mode: FallbackMode::Defensive,
            processing_time_ms,
            confidence: CONFIDENCE_FAILED,
        }
    }

    /// The tick this decision answers.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Actions in execution order.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// The fallback mode.
    pub const fn fallback_mode(&self) -> FallbackMode {
        self.fallback_mode
    }

    /// Processing latency in milliseconds.
    pub const fn processing_time_ms(&self) -> f64 {
        self.processing_time_ms
    }

    /// Confidence in `[0, 1]`.
    pub const fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Whether this is the failure-path decision.
    pub fn is_defensive(&self) -> bool {
        self.fallback_mode == FallbackMode::Defensive && self.actions.is_empty()
    }

    /// Replace the processing time with an end-to-end measurement.
    pub const fn set_processing_time_ms(&mut self, processing_time_ms: f64) {
        self.processing_time_ms = processing_time_ms;
    }

    /// Flatten into the outbound `decision` envelope.
    pub fn into_envelope(self) -> OutboundMessage {
        OutboundMessage::Decision {
            tick: self.tick,
            actions: self.actions,
            fallback_mode: self.fallback_mode,
            processing_time_ms: self.processing_time_ms,
            confidence: self.confidence,
        }
    }
}
