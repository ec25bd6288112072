//! Render-ready conversation timeline.
//!
//! The timeline is the ordered sequence of entries the UI renders as the
//! conversation. Ordering is by arrival, never by timestamp: persisted
//! history first, then session events queued during runs, then provisional
//! content (the in-flight streaming message and the thinking marker).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::history::HistoryState;

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Lifecycle state of a tool invocation part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    Call,
    Result,
}

/// A tool invocation embedded in a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub state: InvocationState,
    pub tool_call_id: String,
    pub tool_name: String,
    pub args: Value,
}

/// One piece of message content.
///
/// `Reasoning`, `Source`, `File` and `StepStart` are carried through
/// unchanged for the renderer; the reducer never inspects them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ToolInvocation {
        tool_invocation: ToolInvocation,
    },
    /// Reference to a component-rendered widget for a tool call.
    Widget {
        tool_name: String,
        args: Value,
    },
    Reasoning {
        reasoning: String,
    },
    Source {
        source: Value,
    },
    File {
        mime_type: String,
        data: String,
    },
    StepStart,
}

/// A conversation message (persisted or streamed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub thread_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    pub parts: Vec<ContentPart>,
}

impl Message {
    fn new(role: Role, thread_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            created_at: Utc::now(),
            thread_id: thread_id.into(),
            resource_id: None,
            parts: Vec::new(),
        }
    }

    /// Creates a user message with a single text part.
    pub fn user(text: impl Into<String>, thread_id: impl Into<String>) -> Self {
        let mut message = Self::new(Role::User, thread_id);
        message.parts.push(ContentPart::Text { text: text.into() });
        message
    }

    /// Creates an empty assistant message (streaming buffer).
    pub fn assistant(thread_id: impl Into<String>) -> Self {
        Self::new(Role::Assistant, thread_id)
    }

    /// Creates an assistant message with the id announced by the transport.
    pub fn assistant_with_id(id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        let mut message = Self::new(Role::Assistant, thread_id);
        message.id = id.into();
        message
    }

    /// Creates an assistant message with a single text part.
    pub fn assistant_text(text: impl Into<String>, thread_id: impl Into<String>) -> Self {
        let mut message = Self::assistant(thread_id);
        message.parts.push(ContentPart::Text { text: text.into() });
        message
    }

    /// Appends a streamed text delta, extending the trailing text part if
    /// there is one.
    pub fn push_text_delta(&mut self, delta: &str) {
        if let Some(ContentPart::Text { text }) = self.parts.last_mut() {
            text.push_str(delta);
        } else {
            self.parts.push(ContentPart::Text {
                text: delta.to_string(),
            });
        }
    }

    /// Concatenated text content across text parts.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let ContentPart::Text { text } = part {
                out.push_str(text);
            }
        }
        out
    }
}

/// A named execution step shown inline in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEntry {
    pub id: String,
    pub thread_id: String,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub is_running: bool,
}

/// A surfaced run failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub id: String,
    pub thread_id: String,
    pub created_at: DateTime<Utc>,
    pub error: String,
}

/// One entry of the rendered conversation.
///
/// The `Thinking` marker is a singleton and transient: it is never queued or
/// persisted, only appended by the timeline builder while the session waits
/// for the first token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TimelineEntry {
    Message(Message),
    Step(StepEntry),
    Error(ErrorEntry),
    Thinking,
}

impl TimelineEntry {
    /// Creates a running step entry with a fresh id.
    pub fn step(name: impl Into<String>, thread_id: impl Into<String>) -> Self {
        TimelineEntry::Step(StepEntry {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            created_at: Utc::now(),
            name: name.into(),
            is_running: true,
        })
    }

    /// Creates an error entry with a fresh id.
    pub fn error(error: impl Into<String>, thread_id: impl Into<String>) -> Self {
        TimelineEntry::Error(ErrorEntry {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            created_at: Utc::now(),
            error: error.into(),
        })
    }

    /// Entry id, if the variant carries one.
    pub fn id(&self) -> Option<&str> {
        match self {
            TimelineEntry::Message(m) => Some(&m.id),
            TimelineEntry::Step(s) => Some(&s.id),
            TimelineEntry::Error(e) => Some(&e.id),
            TimelineEntry::Thinking => None,
        }
    }
}

/// Builds the render-ready timeline from its layers.
///
/// Layer order is the ordering guarantee the UI depends on:
/// 1. greeting messages, only for a brand-new session (history loaded, empty)
/// 2. persisted history, once loaded
/// 3. events queued during runs
/// 4. the in-flight streaming message, if any
/// 5. the thinking marker, if set (always last)
pub fn build_timeline(
    history: &HistoryState,
    greeting: &[Message],
    queued: &[TimelineEntry],
    streaming: Option<&Message>,
    thinking: bool,
) -> Vec<TimelineEntry> {
    let mut entries = Vec::new();

    if let HistoryState::Ready(messages) = history {
        if messages.is_empty() {
            entries.extend(greeting.iter().cloned().map(TimelineEntry::Message));
        }
        entries.extend(messages.iter().cloned().map(TimelineEntry::Message));
    }

    entries.extend_from_slice(queued);

    if let Some(message) = streaming {
        entries.push(TimelineEntry::Message(message.clone()));
    }

    if thinking {
        entries.push(TimelineEntry::Thinking);
    }

    entries
}
