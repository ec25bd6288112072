//! Tool registry: declared tools and their component-local behavior.
//!
//! Descriptors (what the agent is told about) and capabilities (what runs
//! locally when the agent calls the tool) are stored in parallel maps keyed
//! by name. They register and unregister independently: configuration can
//! declare a tool before the component providing its behavior exists, and a
//! capability can be swapped without touching the declaration.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Side-effecting handler invoked with the tool call arguments.
pub type ToolHandler = Box<dyn FnMut(&Value) + Send>;

/// Render callback producing a widget payload from the tool call arguments.
///
/// The reducer never invokes these; their presence selects widget dispatch.
pub type ToolRenderer = Box<dyn Fn(&Value) -> Value + Send>;

/// A tool as declared to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON schema for the tool arguments.
    #[serde(default)]
    pub parameters: Value,
    /// Disabled tools are never offered to the agent.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Value::Object(serde_json::Map::new()),
            enabled: true,
        }
    }

    #[must_use]
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Component-local behavior attached to a declared tool.
///
/// When both a handler and a render callback exist, the handler wins.
#[derive(Default)]
pub struct ToolCapability {
    pub handler: Option<ToolHandler>,
    pub render: Option<ToolRenderer>,
    pub render_and_wait: Option<ToolRenderer>,
}

impl ToolCapability {
    /// Capability with only a side-effecting handler.
    pub fn handler(handler: impl FnMut(&Value) + Send + 'static) -> Self {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::default()
        }
    }

    /// Capability with only an inline render callback.
    pub fn render(render: impl Fn(&Value) -> Value + Send + 'static) -> Self {
        Self {
            render: Some(Box::new(render)),
            ..Self::default()
        }
    }

    /// Capability with a render-and-await callback.
    pub fn render_and_wait(render: impl Fn(&Value) -> Value + Send + 'static) -> Self {
        Self {
            render_and_wait: Some(Box::new(render)),
            ..Self::default()
        }
    }
}

impl fmt::Debug for ToolCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCapability")
            .field("handler", &self.handler.is_some())
            .field("render", &self.render.is_some())
            .field("render_and_wait", &self.render_and_wait.is_some())
            .finish()
    }
}

/// Registry of declared tools and their capabilities.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    descriptors: HashMap<String, ToolDescriptor>,
    capabilities: HashMap<String, ToolCapability>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a tool declaration. Any capability already
    /// stored under the same name is untouched.
    pub fn register(&mut self, descriptor: ToolDescriptor) {
        self.descriptors.insert(descriptor.name.clone(), descriptor);
    }

    /// Attaches (or replaces) the capability for a name. The declaration, if
    /// any, is untouched; the capability may arrive first.
    pub fn update_capability(&mut self, name: impl Into<String>, capability: ToolCapability) {
        self.capabilities.insert(name.into(), capability);
    }

    /// Removes both the declaration and the capability for a name.
    pub fn unregister(&mut self, name: &str) {
        self.descriptors.remove(name);
        self.capabilities.remove(name);
    }

    pub fn descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.descriptors.get(name)
    }

    pub fn capability(&self, name: &str) -> Option<&ToolCapability> {
        self.capabilities.get(name)
    }

    pub(crate) fn capability_mut(&mut self, name: &str) -> Option<&mut ToolCapability> {
        self.capabilities.get_mut(name)
    }

    /// Declarations offered to the agent on run start: enabled tools only.
    pub fn enabled_descriptors(&self) -> Vec<ToolDescriptor> {
        let mut tools: Vec<ToolDescriptor> = self
            .descriptors
            .values()
            .filter(|d| d.enabled)
            .cloned()
            .collect();
        // Stable payload order regardless of map iteration.
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    #[test]
    fn test_descriptor_enabled_by_default() {
        let descriptor: ToolDescriptor = serde_json::from_value(json!({
            "name": "alert",
            "description": "Show an alert",
        }))
        .unwrap();
        assert!(descriptor.enabled);
    }

    #[test]
    fn test_capability_independent_of_descriptor() {
        let mut registry = ToolRegistry::new();

        // Capability can arrive before the declaration...
        registry.update_capability("alert", ToolCapability::handler(|_| {}));
        assert!(registry.descriptor("alert").is_none());
        assert!(registry.capability("alert").is_some());

        // ...and registering the declaration does not clobber it.
        registry.register(ToolDescriptor::new("alert", "Show an alert"));
        assert!(registry.capability("alert").unwrap().handler.is_some());
    }

    #[test]
    fn test_unregister_removes_both() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolDescriptor::new("alert", "Show an alert"));
        registry.update_capability("alert", ToolCapability::handler(|_| {}));

        registry.unregister("alert");
        assert!(registry.descriptor("alert").is_none());
        assert!(registry.capability("alert").is_none());
    }

    #[test]
    fn test_enabled_descriptors_filters_disabled() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolDescriptor::new("alert", "Show an alert"));
        registry.register(ToolDescriptor::new("chart", "Render a chart").disabled());

        let offered = registry.enabled_descriptors();
        assert_eq!(offered.len(), 1);
        assert_eq!(offered[0].name, "alert");
    }

    #[test]
    fn test_handler_is_callable_through_registry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        let mut registry = ToolRegistry::new();
        registry.update_capability(
            "alert",
            ToolCapability::handler(move |args| {
                assert_eq!(args, &json!({"message": "x"}));
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let capability = registry.capability_mut("alert").unwrap();
        (capability.handler.as_mut().unwrap())(&json!({"message": "x"}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
