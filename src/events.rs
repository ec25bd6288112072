//! Protocol event types consumed from the agent transport.
//!
//! This module defines the contract for events delivered during a streaming
//! run. Events are serializable so transports can decode them straight from
//! a wire format (SSE, websocket frames) into the tagged shapes below.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::progress::ProgressStep;

/// Events emitted by the agent transport during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Run accepted by the agent. Carries no state change for the session.
    RunStarted,

    /// A new assistant message is about to stream.
    TextMessageStart { message_id: String },

    /// Incremental text chunk for the in-flight assistant message.
    TextMessageContent { message_id: String, delta: String },

    /// The in-flight assistant message is complete.
    TextMessageEnd { message_id: String },

    /// Model has decided to call a tool (arguments may still be streaming).
    ToolCallStart {
        tool_call_id: String,
        tool_call_name: String,
    },

    /// Tool call arguments are fully received.
    ToolCallEnd {
        tool_call_id: String,
        tool_call_name: String,
        #[serde(default)]
        args: Value,
    },

    /// Full replacement of the session's free-form state object.
    StateSnapshot { snapshot: Value },

    /// State object changed out-of-band; replaces wholesale, no merge.
    StateChanged { state: Value },

    /// A named execution step has started.
    StepStarted { step_name: String },

    /// A named execution step has finished.
    StepFinished { step_name: String },

    /// Run completed successfully. Terminal.
    RunFinished,

    /// Run failed. Terminal.
    RunError {
        message: String,
        #[serde(default)]
        kind: ErrorKind,
    },

    /// Application-defined event (progress reporting and friends).
    Custom {
        name: String,
        #[serde(default)]
        value: Value,
    },
}

impl AgentEvent {
    /// Returns true for events that end the run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::RunFinished | AgentEvent::RunError { .. })
    }
}

/// Error categories for `AgentEvent::RunError`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// HTTP status error (4xx, 5xx)
    HttpStatus,
    /// Connection/request timeout
    Timeout,
    /// Response parsing failed
    Parse,
    /// API-level error from the agent
    ApiError,
    /// Run was cancelled (session switch, teardown)
    Cancelled,
    /// Internal/unknown error
    #[default]
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::HttpStatus => write!(f, "http_status"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Parse => write!(f, "parse"),
            ErrorKind::ApiError => write!(f, "api_error"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

/// Custom event name for creating a progress group.
pub const PROGRESS_START: &str = "progress-start";
/// Custom event name for marking a progress step done.
pub const PROGRESS_DONE: &str = "progress-done";
/// Custom event name for marking a progress step errored.
pub const PROGRESS_ERROR: &str = "progress-error";

/// Typed view over the progress family of custom events.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Create a group atomically with its full step list.
    Start { id: String, steps: Vec<ProgressStep> },
    /// Mark the step at `step` done.
    Done { id: String, step: usize },
    /// Mark the step at `step` errored. Terminal for that step only.
    Error {
        id: String,
        step: usize,
        message: String,
    },
}

impl ProgressEvent {
    /// Decodes a custom event payload into a progress event.
    ///
    /// Returns `None` for unrelated custom names and for malformed payloads;
    /// callers treat both as ignorable.
    pub fn from_custom(name: &str, value: &Value) -> Option<Self> {
        #[derive(Deserialize)]
        struct StartPayload {
            id: String,
            steps: Vec<ProgressStep>,
        }

        #[derive(Deserialize)]
        struct StepPayload {
            id: String,
            step: usize,
            #[serde(default)]
            message: Option<String>,
        }

        match name {
            PROGRESS_START => {
                let payload: StartPayload = serde_json::from_value(value.clone()).ok()?;
                Some(ProgressEvent::Start {
                    id: payload.id,
                    steps: payload.steps,
                })
            }
            PROGRESS_DONE => {
                let payload: StepPayload = serde_json::from_value(value.clone()).ok()?;
                Some(ProgressEvent::Done {
                    id: payload.id,
                    step: payload.step,
                })
            }
            PROGRESS_ERROR => {
                let payload: StepPayload = serde_json::from_value(value.clone()).ok()?;
                Some(ProgressEvent::Error {
                    id: payload.id,
                    step: payload.step,
                    message: payload.message.unwrap_or_default(),
                })
            }
            _ => None,
        }
    }
}
