//! Inbound and outbound message envelopes exchanged with the host.
//!
//! Inbound frames are JSON objects discriminated by a string `type`:
//! `state_update` and `heartbeat` are understood, anything else is
//! answered with an `unknown_message_type` error. Outbound frames are one
//! of three shapes: `decision`, `heartbeat_ack` or `error`.

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::actions::Action;
use crate::decision::FallbackMode;

/// Errors that prevent an inbound frame from being classified at all.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The frame is not valid JSON.
    #[error("frame is not valid JSON: {source}")]
    Json {
        /// The underlying parse error.
        #[from]
        source: serde_json::Error,
    },

    /// The frame is JSON but not an object.
    #[error("frame must be a JSON object")]
    NotAnObject,

    /// The object has no string `type` field.
    #[error("frame has no string \"type\" field")]
    MissingType,
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// A world-state update; the full frame is kept for parsing.
    StateUpdate(Map<String, Value>),
    /// A liveness check.
    Heartbeat {
        /// The host's tick, echoed back if it is a JSON integer that fits
        /// in an `i64`. Negative values are echoed as sent.
        tick: Option<i64>,
    },
    /// Any other message type.
    Unknown {
        /// The type as sent.
        message_type: String,
    },
}

impl InboundMessage {
    /// Wire name of a state update.
    pub const STATE_UPDATE: &'static str = "state_update";
    /// Wire name of a heartbeat.
    pub const HEARTBEAT: &'static str = "heartbeat";

    /// Classify a raw frame.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError`] if the frame is not a JSON object with a
    /// string `type`.
    pub fn decode(raw: &str) -> Result<Self, EnvelopeError> {
        let Value::Object(frame) = serde_json::from_str::<Value>(raw)? else {
            return Err(EnvelopeError::NotAnObject);
        };
        Self::classify(frame)
    }

    /// Classify an already-parsed frame.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::MissingType`] if there is no string `type`.
    pub fn classify(frame: Map<String, Value>) -> Result<Self, EnvelopeError> {
        let message_type = frame
            .get("type")
            .and_then(Value::as_str)
            .ok_or(EnvelopeError::MissingType)?;

        match message_type {
            Self::STATE_UPDATE => Ok(Self::StateUpdate(frame)),
            Self::HEARTBEAT => Ok(Self::Heartbeat {
                tick: frame.get("tick").and_then(Value::as_i64),
            }),
            other => Ok(Self::Unknown {
                message_type: other.to_owned(),
            }),
        }
    }
}

/// Category of an `error` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The `type` field named no known message.
    UnknownMessageType,
    /// A state update could not be processed.
    ProcessingError,
    /// The frame could not be classified.
    InvalidMessage,
    /// The frame exceeded the configured size limit.
    FrameTooLarge,
}

/// Body of an `error` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// Error category.
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
}

/// Health reported in heartbeat acknowledgements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// The processor is accepting ticks.
    Healthy,
}

/// An outbound frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// The plan for one tick.
    Decision {
        /// Tick answered.
        tick: u64,
        /// Actions by ascending priority.
        actions: Vec<Action>,
        /// Fallback mode for the host.
        fallback_mode: FallbackMode,
        /// End-to-end processing latency.
        processing_time_ms: f64,
        /// Confidence in `[0, 1]`.
        confidence: f64,
    },
    /// Answer to a heartbeat.
    HeartbeatAck {
        /// Epoch milliseconds when the ack was built.
        timestamp: i64,
        /// The heartbeat's tick, if it carried one.
        client_tick: Option<i64>,
        /// State updates processed so far.
        ticks_processed: u64,
        /// Processor health.
        status: HealthStatus,
    },
    /// A structured failure.
    Error {
        /// Epoch milliseconds when the error was built.
        timestamp: i64,
        /// What went wrong.
        error: ErrorBody,
        /// Fallback mode the host should apply.
        fallback_mode: FallbackMode,
    },
}

impl OutboundMessage {
    /// Build a heartbeat acknowledgement stamped now.
    pub fn heartbeat_ack(client_tick: Option<i64>, ticks_processed: u64) -> Self {
        Self::HeartbeatAck {
            timestamp: now_epoch_ms(),
            client_tick,
            ticks_processed,
            status: HealthStatus::Healthy,
        }
    }

    /// Build an error envelope stamped now.
    pub fn error(kind: ErrorKind, message: impl Into<String>, fallback_mode: FallbackMode) -> Self {
        Self::Error {
            timestamp: now_epoch_ms(),
            error: ErrorBody {
                kind,
                message: message.into(),
            },
            fallback_mode,
        }
    }

    /// The wire `type` of this frame.
    pub const fn message_type(&self) -> &'static str {
        match self {
            Self::Decision { .. } => "decision",
            Self::HeartbeatAck { .. } => "heartbeat_ack",
            Self::Error { .. } => "error",
        }
    }

    /// Encode as a single-line JSON string.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if an auxiliary value cannot be
    /// encoded.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}
