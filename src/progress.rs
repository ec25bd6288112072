//! Out-of-band multi-step progress tracking.
//!
//! Progress groups arrive on the custom event channel, separate from the
//! message stream. A group is created atomically with its full step list;
//! individual steps flip to done or errored by positional index.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::events::ProgressEvent;

/// One step within a progress group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressStep {
    pub label: String,
    #[serde(default)]
    pub done: bool,
    /// An errored step stays errored; the rest of the group is unaffected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressStep {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            done: false,
            error: None,
        }
    }
}

/// Mapping from progress-group id to its ordered step list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressLedger {
    groups: BTreeMap<String, Vec<ProgressStep>>,
}

impl ProgressLedger {
    /// Creates (or replaces) a group with its full step list.
    pub fn start_group(&mut self, id: impl Into<String>, steps: Vec<ProgressStep>) {
        self.groups.insert(id.into(), steps);
    }

    /// Marks the step at `index` done. Unknown group or out-of-range index
    /// is a no-op.
    pub fn mark_done(&mut self, id: &str, index: usize) {
        if let Some(step) = self.groups.get_mut(id).and_then(|s| s.get_mut(index)) {
            step.done = true;
        }
    }

    /// Marks the step at `index` errored. Unknown group or out-of-range
    /// index is a no-op.
    pub fn mark_error(&mut self, id: &str, index: usize, message: impl Into<String>) {
        if let Some(step) = self.groups.get_mut(id).and_then(|s| s.get_mut(index)) {
            step.error = Some(message.into());
        }
    }

    /// Applies a decoded progress event.
    pub fn apply(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Start { id, steps } => self.start_group(id.clone(), steps.clone()),
            ProgressEvent::Done { id, step } => self.mark_done(id, *step),
            ProgressEvent::Error { id, step, message } => self.mark_error(id, *step, message),
        }
    }

    /// Returns the steps for a group, if it exists.
    pub fn group(&self, id: &str) -> Option<&[ProgressStep]> {
        self.groups.get(id).map(Vec::as_slice)
    }

    /// Iterates groups in stable (id) order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ProgressStep])> {
        self.groups.iter().map(|(id, s)| (id.as_str(), s.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }
}
