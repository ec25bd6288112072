//! Session state and lifecycle.
//!
//! A [`Session`] is the aggregate root for one open conversation: the events
//! queued during runs, the in-flight streaming message, the agent's free-form
//! state object, progress ledger, tool registry, and the handle to the active
//! run. All mutation happens on delivery of discrete events; the event loop's
//! serialization is the mutual-exclusion mechanism, so there are no locks.
//!
//! ## Lifecycle
//!
//! Idle -> Running only via `start_run`; Running -> Idle on a terminal event.
//! Switching the chat identity forces Running -> Idle unconditionally: the
//! cancellation token is raised *before* any state is cleared, so no event
//! from the abandoned run can mutate state for the session it no longer
//! addresses.

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::history::HistoryState;
use crate::progress::ProgressLedger;
use crate::timeline::{Message, TimelineEntry, build_timeline};
use crate::tools::{ToolCapability, ToolDescriptor, ToolRegistry};
use crate::transport::AgentEventRx;

/// Handle to the active run's subscription.
///
/// Dropping the handle detaches the session from the stream; raising the
/// token tells the transport to stop producing.
#[derive(Debug)]
pub struct RunHandle {
    pub(crate) cancel: CancellationToken,
    pub(crate) rx: AgentEventRx,
}

impl RunHandle {
    /// Signals the transport to stop producing events.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// The run's cancellation token.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Aggregate state for one open conversation.
#[derive(Debug)]
pub struct Session {
    pub(crate) chat_id: String,
    /// Events queued during runs. Append-only while a run is active; cleared
    /// only on session switch.
    pub(crate) events: Vec<TimelineEntry>,
    /// In-flight assistant message being assembled from streamed deltas.
    pub(crate) streaming: Option<Message>,
    /// Free-form agent state, replaced wholesale by snapshot events.
    pub(crate) state: Value,
    pub(crate) progress: ProgressLedger,
    pub(crate) tools: ToolRegistry,
    pub(crate) running: bool,
    pub(crate) thinking: bool,
    /// Latched after run_finished; consumed by the host to refetch history.
    pub(crate) history_refetch: bool,
    /// Pending user input mirrored from the composer.
    pub(crate) draft: String,
    pub(crate) run: Option<RunHandle>,
}

impl Session {
    /// Creates a fresh session for a chat identity.
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            events: Vec::new(),
            streaming: None,
            state: Value::Object(serde_json::Map::new()),
            progress: ProgressLedger::default(),
            tools: ToolRegistry::new(),
            running: false,
            thinking: false,
            history_refetch: false,
            draft: String::new(),
            run: None,
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_thinking(&self) -> bool {
        self.thinking
    }

    /// Events queued during runs, in arrival order.
    pub fn queued_events(&self) -> &[TimelineEntry] {
        &self.events
    }

    /// The uncommitted in-flight assistant message, if a run is streaming one.
    pub fn streaming_message(&self) -> Option<&Message> {
        self.streaming.as_ref()
    }

    /// The agent's free-form state object.
    pub fn state(&self) -> &Value {
        &self.state
    }

    pub fn progress(&self) -> &ProgressLedger {
        &self.progress
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Declares (or replaces) a tool offered to the agent.
    pub fn register_tool(&mut self, descriptor: ToolDescriptor) {
        self.tools.register(descriptor);
    }

    /// Attaches component-local behavior for a tool name.
    pub fn update_tool_capability(&mut self, name: impl Into<String>, capability: ToolCapability) {
        self.tools.update_capability(name, capability);
    }

    /// Removes a tool declaration and its capability.
    pub fn unregister_tool(&mut self, name: &str) {
        self.tools.unregister(name);
    }

    /// Pending composer text.
    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Returns and clears the history-refetch flag raised by `run_finished`.
    pub fn take_history_refetch(&mut self) -> bool {
        std::mem::take(&mut self.history_refetch)
    }

    /// The active run handle, if a run is in flight.
    pub fn run_handle(&self) -> Option<&RunHandle> {
        self.run.as_ref()
    }

    /// Builds the render-ready timeline for the current state.
    pub fn timeline(&self, history: &HistoryState, greeting: &[Message]) -> Vec<TimelineEntry> {
        build_timeline(
            history,
            greeting,
            &self.events,
            self.streaming.as_ref(),
            self.thinking,
        )
    }

    /// Switches to a different conversation.
    ///
    /// The abort is issued before any state reset; events still in flight
    /// from the old run can never reach the new session's state.
    pub fn switch_chat(&mut self, chat_id: impl Into<String>) {
        self.abort_run();
        let chat_id = chat_id.into();
        debug!(from = %self.chat_id, to = %chat_id, "switching chat");
        self.chat_id = chat_id;
        self.reset();
    }

    /// Tears the session down on unmount. No further mutation is permitted.
    pub fn teardown(&mut self) {
        self.abort_run();
        self.reset();
    }

    fn abort_run(&mut self) {
        if let Some(run) = self.run.take() {
            debug!(chat_id = %self.chat_id, "aborting active run");
            run.abort();
        }
    }

    fn reset(&mut self) {
        self.events.clear();
        self.streaming = None;
        self.state = Value::Object(serde_json::Map::new());
        self.progress.clear();
        self.running = false;
        self.thinking = false;
        self.history_refetch = false;
        self.draft.clear();
    }
}
