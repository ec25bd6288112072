//! Run controller: opens streaming runs and folds their events into session
//! state.
//!
//! One run is a single request/response streaming interaction, from
//! submission to a terminal event. The controller enforces the two hard
//! invariants:
//!
//! - **Single active run per session.** Starting a run first invalidates any
//!   stale subscription: its cancellation token is raised and its receiver
//!   dropped, so events from an abandoned run can never corrupt the in-flight
//!   buffer of a new one.
//! - **Cancellation is first-class.** The controller raises its own token on
//!   abort rather than inferring cancellation from the shape of a transport
//!   error. A terminal error arriving after an abort is classified as
//!   cancellation and suppressed, never surfaced in the timeline.
//!
//! Reduction is synchronous and takes the session by `&mut` per event; state
//! is never read through a stale capture held across events.

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::events::{AgentEvent, ErrorKind, ProgressEvent};
use crate::session::{RunHandle, Session};
use crate::timeline::{ContentPart, InvocationState, Message, TimelineEntry, ToolInvocation};
use crate::transport::{AgentTransport, RunAgentInput, create_event_channel};

/// How a finished tool call is materialized in the timeline.
enum ToolDispatch {
    /// Invoke the side-effecting handler, then append the generic result.
    Handler,
    /// Append a widget entry for component-local rendering.
    Widget,
    /// Append the generic tool-result entry.
    Generic,
}

impl Session {
    /// Opens a streaming run for the user's text.
    ///
    /// Single-flight per session: any run still active is aborted before the
    /// new subscription is created. The submitted text is appended to the
    /// queued events immediately; the composer draft is cleared.
    pub fn start_run(&mut self, transport: &impl AgentTransport, text: &str) {
        if let Some(stale) = self.run.take() {
            debug!(chat_id = %self.chat_id, "aborting stale run before starting a new one");
            stale.abort();
        }

        let user = Message::user(text, &self.chat_id);
        let input = RunAgentInput {
            thread_id: self.chat_id.clone(),
            run_id: Uuid::new_v4().to_string(),
            messages: vec![user.clone()],
            tools: self.tools.enabled_descriptors(),
        };

        self.events.push(TimelineEntry::Message(user));
        self.draft.clear();
        self.running = true;
        self.thinking = true;

        let (tx, rx) = create_event_channel();
        let cancel = CancellationToken::new();
        debug!(chat_id = %self.chat_id, run_id = %input.run_id, "starting run");
        transport.start_run(input, tx, cancel.clone());

        self.run = Some(RunHandle { cancel, rx });
    }

    /// Applies one protocol event to session state.
    ///
    /// Unknown or malformed events are ignored; nothing here can fail the
    /// session. Terminal events tear down the subscription handle.
    pub fn apply_event(&mut self, event: &AgentEvent) {
        trace!(chat_id = %self.chat_id, ?event, "applying event");
        match event {
            AgentEvent::RunStarted => {}

            AgentEvent::TextMessageStart { message_id } => {
                self.streaming = Some(Message::assistant_with_id(message_id, &self.chat_id));
            }

            AgentEvent::TextMessageContent { delta, .. } => {
                // First token: the agent is no longer just thinking.
                self.thinking = false;
                let chat_id = self.chat_id.clone();
                self.streaming
                    .get_or_insert_with(|| Message::assistant(chat_id))
                    .push_text_delta(delta);
            }

            AgentEvent::TextMessageEnd { .. } => {
                if let Some(message) = self.streaming.take() {
                    self.events.push(TimelineEntry::Message(message));
                }
            }

            AgentEvent::ToolCallStart { .. } => {
                self.thinking = false;
            }

            AgentEvent::ToolCallEnd {
                tool_call_id,
                tool_call_name,
                args,
            } => {
                self.on_tool_call_end(tool_call_id, tool_call_name, args);
            }

            AgentEvent::StateSnapshot { snapshot } => {
                self.state = snapshot.clone();
            }

            AgentEvent::StateChanged { state } => {
                self.thinking = false;
                self.state = state.clone();
            }

            AgentEvent::StepStarted { step_name } => {
                self.thinking = false;
                self.events
                    .push(TimelineEntry::step(step_name, &self.chat_id));
            }

            AgentEvent::StepFinished { step_name } => {
                self.finish_step(step_name);
            }

            AgentEvent::RunFinished => {
                debug!(chat_id = %self.chat_id, "run finished");
                self.running = false;
                self.run = None;
                self.history_refetch = true;
            }

            AgentEvent::RunError { message, kind } => {
                self.on_run_error(message, *kind);
            }

            AgentEvent::Custom { name, value } => {
                self.thinking = false;
                if let Some(progress) = ProgressEvent::from_custom(name, value) {
                    self.progress.apply(&progress);
                } else {
                    trace!(name, "ignoring custom event");
                }
            }
        }
    }

    /// Drains the active run's event stream until a terminal event, channel
    /// close, or cancellation.
    ///
    /// No-op when no run is active. On an abnormal close (transport dropped
    /// the channel without a terminal event) the running/thinking flags are
    /// cleared so the session stays usable.
    pub async fn drive_run(&mut self) {
        let Some(mut handle) = self.run.take() else {
            return;
        };

        loop {
            tokio::select! {
                () = handle.cancel.cancelled() => {
                    debug!(chat_id = %self.chat_id, "run cancelled; stopping event drain");
                    return;
                }
                event = handle.rx.recv() => match event {
                    Some(event) => {
                        let terminal = event.is_terminal();
                        self.apply_event(&event);
                        if terminal {
                            return;
                        }
                    }
                    None => {
                        debug!(chat_id = %self.chat_id, "event channel closed without terminal event");
                        self.running = false;
                        self.thinking = false;
                        return;
                    }
                },
            }
        }
    }

    /// Flips the first queued step with a matching name to not-running.
    ///
    /// Forward scan, first occurrence only, even if the name recurs; the
    /// entry keeps its position and id. No match is a no-op.
    fn finish_step(&mut self, step_name: &str) {
        let found = self.events.iter_mut().find_map(|entry| match entry {
            TimelineEntry::Step(step) if step.name == step_name => Some(step),
            _ => None,
        });
        if let Some(step) = found {
            step.is_running = false;
        }
    }

    fn on_tool_call_end(&mut self, tool_call_id: &str, tool_name: &str, args: &Value) {
        let has_args = !args.is_null();
        let dispatch = if has_args && self.tools.descriptor(tool_name).is_some() {
            match self.tools.capability(tool_name) {
                // Handler takes priority over render when both exist.
                Some(capability) if capability.handler.is_some() => ToolDispatch::Handler,
                Some(capability) if capability.render.is_some() => ToolDispatch::Widget,
                _ => ToolDispatch::Generic,
            }
        } else {
            ToolDispatch::Generic
        };

        match dispatch {
            ToolDispatch::Handler => {
                if let Some(handler) = self
                    .tools
                    .capability_mut(tool_name)
                    .and_then(|c| c.handler.as_mut())
                {
                    handler(args);
                }
                self.push_tool_result(tool_call_id, tool_name, args);
            }
            ToolDispatch::Widget => {
                let mut message = Message::assistant(&self.chat_id);
                message.parts.push(ContentPart::Widget {
                    tool_name: tool_name.to_string(),
                    args: args.clone(),
                });
                self.events.push(TimelineEntry::Message(message));
            }
            ToolDispatch::Generic => {
                self.push_tool_result(tool_call_id, tool_name, args);
            }
        }
    }

    fn push_tool_result(&mut self, tool_call_id: &str, tool_name: &str, args: &Value) {
        let mut message = Message::assistant(&self.chat_id);
        message.parts.push(ContentPart::ToolInvocation {
            tool_invocation: ToolInvocation {
                state: InvocationState::Result,
                tool_call_id: tool_call_id.to_string(),
                tool_name: tool_name.to_string(),
                args: args.clone(),
            },
        });
        self.events.push(TimelineEntry::Message(message));
    }

    fn on_run_error(&mut self, message: &str, kind: ErrorKind) {
        self.running = false;
        self.thinking = false;

        let cancelled = kind == ErrorKind::Cancelled
            || self.run.as_ref().is_some_and(|r| r.cancel.is_cancelled());
        self.run = None;

        if cancelled {
            debug!(chat_id = %self.chat_id, "suppressing cancellation error");
        } else {
            debug!(chat_id = %self.chat_id, kind = %kind, "run failed: {message}");
            self.events
                .push(TimelineEntry::error(message, &self.chat_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::timeline::Role;

    fn content(delta: &str) -> AgentEvent {
        AgentEvent::TextMessageContent {
            message_id: "m1".to_string(),
            delta: delta.to_string(),
        }
    }

    #[test]
    fn test_deltas_accumulate_in_order() {
        let mut session = Session::new("chat-1");
        session.thinking = true;

        session.apply_event(&AgentEvent::TextMessageStart {
            message_id: "m1".to_string(),
        });
        session.apply_event(&content("Hi"));
        session.apply_event(&content(" there"));

        assert!(!session.is_thinking());
        let streaming = session.streaming_message().unwrap();
        assert_eq!(streaming.text(), "Hi there");
        // Still provisional: nothing committed yet.
        assert!(session.queued_events().is_empty());

        session.apply_event(&AgentEvent::TextMessageEnd {
            message_id: "m1".to_string(),
        });
        assert!(session.streaming_message().is_none());
        assert_eq!(session.queued_events().len(), 1);
        let TimelineEntry::Message(committed) = &session.queued_events()[0] else {
            panic!("expected message entry");
        };
        assert_eq!(committed.text(), "Hi there");
        assert_eq!(committed.role, Role::Assistant);
    }

    #[test]
    fn test_delta_without_start_begins_buffer() {
        let mut session = Session::new("chat-1");
        session.apply_event(&content("orphan"));
        assert_eq!(session.streaming_message().unwrap().text(), "orphan");
    }

    #[test]
    fn test_step_finished_updates_first_match_only() {
        let mut session = Session::new("chat-1");
        session.apply_event(&AgentEvent::StepStarted {
            step_name: "index".to_string(),
        });
        session.apply_event(&AgentEvent::StepStarted {
            step_name: "index".to_string(),
        });

        session.apply_event(&AgentEvent::StepFinished {
            step_name: "index".to_string(),
        });

        let steps: Vec<bool> = session
            .queued_events()
            .iter()
            .filter_map(|e| match e {
                TimelineEntry::Step(s) => Some(s.is_running),
                _ => None,
            })
            .collect();
        assert_eq!(steps, vec![false, true]);
    }

    #[test]
    fn test_step_finished_without_match_is_noop() {
        let mut session = Session::new("chat-1");
        session.apply_event(&AgentEvent::StepStarted {
            step_name: "index".to_string(),
        });

        session.apply_event(&AgentEvent::StepFinished {
            step_name: "unknown".to_string(),
        });

        assert_eq!(session.queued_events().len(), 1);
        assert!(matches!(
            &session.queued_events()[0],
            TimelineEntry::Step(s) if s.is_running
        ));
    }

    #[test]
    fn test_state_snapshot_replaces_wholesale() {
        let mut session = Session::new("chat-1");
        session.apply_event(&AgentEvent::StateSnapshot {
            snapshot: json!({"a": 1, "b": 2}),
        });
        session.apply_event(&AgentEvent::StateChanged {
            state: json!({"c": 3}),
        });

        // No merge: only the last write survives.
        assert_eq!(session.state(), &json!({"c": 3}));
    }

    #[test]
    fn test_run_error_appends_single_error_entry() {
        let mut session = Session::new("chat-1");
        session.running = true;
        session.thinking = true;

        session.apply_event(&AgentEvent::RunError {
            message: "model overloaded".to_string(),
            kind: ErrorKind::ApiError,
        });

        assert!(!session.is_running());
        assert!(!session.is_thinking());
        assert_eq!(session.queued_events().len(), 1);
        assert!(matches!(
            &session.queued_events()[0],
            TimelineEntry::Error(e) if e.error == "model overloaded"
        ));
    }

    #[test]
    fn test_cancellation_error_is_suppressed() {
        let mut session = Session::new("chat-1");
        session.running = true;

        session.apply_event(&AgentEvent::RunError {
            message: "aborted".to_string(),
            kind: ErrorKind::Cancelled,
        });

        assert!(!session.is_running());
        assert!(session.queued_events().is_empty());
    }

    #[test]
    fn test_session_usable_after_surfaced_error() {
        let mut session = Session::new("chat-1");
        session.apply_event(&AgentEvent::RunError {
            message: "boom".to_string(),
            kind: ErrorKind::Internal,
        });

        // A surfaced error is terminal for that run only.
        session.apply_event(&AgentEvent::TextMessageStart {
            message_id: "m2".to_string(),
        });
        session.apply_event(&content("recovered"));
        session.apply_event(&AgentEvent::TextMessageEnd {
            message_id: "m2".to_string(),
        });

        assert_eq!(session.queued_events().len(), 2);
    }

    #[test]
    fn test_run_finished_raises_refetch() {
        let mut session = Session::new("chat-1");
        session.running = true;

        session.apply_event(&AgentEvent::RunFinished);

        assert!(!session.is_running());
        assert!(session.take_history_refetch());
    }

    #[test]
    fn test_unrelated_custom_event_only_clears_thinking() {
        let mut session = Session::new("chat-1");
        session.thinking = true;

        session.apply_event(&AgentEvent::Custom {
            name: "telemetry".to_string(),
            value: json!({"latency_ms": 12}),
        });

        assert!(!session.is_thinking());
        assert!(session.queued_events().is_empty());
        assert!(session.progress().is_empty());
    }

    #[test]
    fn test_tool_call_end_without_registration_falls_back_to_generic() {
        let mut session = Session::new("chat-1");
        session.apply_event(&AgentEvent::ToolCallEnd {
            tool_call_id: "tc1".to_string(),
            tool_call_name: "unknown".to_string(),
            args: json!({"x": 1}),
        });

        assert_eq!(session.queued_events().len(), 1);
        let TimelineEntry::Message(message) = &session.queued_events()[0] else {
            panic!("expected message entry");
        };
        assert!(matches!(
            &message.parts[0],
            ContentPart::ToolInvocation { tool_invocation }
                if tool_invocation.tool_name == "unknown"
                    && tool_invocation.state == InvocationState::Result
        ));
    }

    #[test]
    fn test_render_capability_appends_widget() {
        use crate::tools::{ToolCapability, ToolDescriptor};

        let mut session = Session::new("chat-1");
        session.register_tool(ToolDescriptor::new("chart", "Render a chart"));
        session.update_tool_capability("chart", ToolCapability::render(|args| args.clone()));

        session.apply_event(&AgentEvent::ToolCallEnd {
            tool_call_id: "tc1".to_string(),
            tool_call_name: "chart".to_string(),
            args: json!({"series": [1, 2]}),
        });

        let TimelineEntry::Message(message) = &session.queued_events()[0] else {
            panic!("expected message entry");
        };
        assert!(matches!(
            &message.parts[0],
            ContentPart::Widget { tool_name, args }
                if tool_name == "chart" && args == &json!({"series": [1, 2]})
        ));
    }

    #[test]
    fn test_handler_takes_priority_over_render() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        use crate::tools::{ToolCapability, ToolDescriptor};

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        let mut session = Session::new("chat-1");
        session.register_tool(ToolDescriptor::new("alert", "Show an alert"));
        session.update_tool_capability(
            "alert",
            ToolCapability {
                handler: Some(Box::new(move |_| {
                    seen.fetch_add(1, Ordering::SeqCst);
                })),
                render: Some(Box::new(|args| args.clone())),
                render_and_wait: None,
            },
        );

        session.apply_event(&AgentEvent::ToolCallEnd {
            tool_call_id: "tc1".to_string(),
            tool_call_name: "alert".to_string(),
            args: json!({"message": "x"}),
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let TimelineEntry::Message(message) = &session.queued_events()[0] else {
            panic!("expected message entry");
        };
        // Generic result shape, not the widget shape.
        assert!(matches!(
            &message.parts[0],
            ContentPart::ToolInvocation { .. }
        ));
    }

    #[test]
    fn test_render_capability_without_args_falls_back_to_generic() {
        use crate::tools::{ToolCapability, ToolDescriptor};

        let mut session = Session::new("chat-1");
        session.register_tool(ToolDescriptor::new("chart", "Render a chart"));
        session.update_tool_capability("chart", ToolCapability::render(|args| args.clone()));

        session.apply_event(&AgentEvent::ToolCallEnd {
            tool_call_id: "tc1".to_string(),
            tool_call_name: "chart".to_string(),
            args: Value::Null,
        });

        let TimelineEntry::Message(message) = &session.queued_events()[0] else {
            panic!("expected message entry");
        };
        assert!(matches!(
            &message.parts[0],
            ContentPart::ToolInvocation { .. }
        ));
    }

    #[test]
    fn test_progress_events_mutate_ledger() {
        let mut session = Session::new("chat-1");
        session.apply_event(&AgentEvent::Custom {
            name: "progress-start".to_string(),
            value: json!({"id": "g1", "steps": [{"label": "a"}, {"label": "b"}]}),
        });
        session.apply_event(&AgentEvent::Custom {
            name: "progress-done".to_string(),
            value: json!({"id": "g1", "step": 1}),
        });

        let steps = session.progress().group("g1").unwrap();
        assert!(!steps[0].done);
        assert!(steps[1].done);
        // Progress lives outside the timeline.
        assert!(session.queued_events().is_empty());
    }
}
