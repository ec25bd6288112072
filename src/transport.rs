//! Agent transport seam.
//!
//! The transport accepts a run request, emits [`AgentEvent`]s on a bounded
//! channel, and honors cooperative cancellation. The session never talks to
//! the network itself; it only drains the channel.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::events::AgentEvent;
use crate::timeline::Message;
use crate::tools::ToolDescriptor;

/// Channel-based event sender (async, bounded).
pub type AgentEventTx = mpsc::Sender<AgentEvent>;

/// Channel-based event receiver (async, bounded).
pub type AgentEventRx = mpsc::Receiver<AgentEvent>;

/// Default channel capacity for event streams.
///
/// Set higher (128) to accommodate best-effort delta sends without blocking.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 128;

/// Creates a bounded event channel with the default capacity.
pub fn create_event_channel() -> (AgentEventTx, AgentEventRx) {
    mpsc::channel(DEFAULT_EVENT_CHANNEL_CAPACITY)
}

/// Request payload for one streaming run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunAgentInput {
    pub thread_id: String,
    pub run_id: String,
    /// New messages for this run (the submitted user message).
    pub messages: Vec<Message>,
    /// Tools offered to the agent: enabled declarations only.
    pub tools: Vec<ToolDescriptor>,
}

/// A transport that can execute runs against an agent.
///
/// Implementations spawn their own task, send events on `events`, and stop
/// producing promptly once `cancel` fires. A terminal error event arriving
/// after cancellation is tolerated by the session and classified as
/// cancellation, never surfaced.
pub trait AgentTransport {
    fn start_run(&self, input: RunAgentInput, events: AgentEventTx, cancel: CancellationToken);
}
