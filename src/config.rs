//! Configuration management.
//!
//! Loads configuration from ${AGUI_SESSION_HOME}/config.toml with sensible
//! defaults.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::timeline::Message;

pub mod paths {
    //! Path resolution for configuration directories.
    //!
    //! AGUI_SESSION_HOME resolution order:
    //! 1. AGUI_SESSION_HOME environment variable (if set)
    //! 2. ~/.config/agui-session (default)

    use std::path::PathBuf;

    /// Returns the home directory for configuration.
    ///
    /// Checks AGUI_SESSION_HOME env var first, falls back to
    /// ~/.config/agui-session
    pub fn session_home() -> PathBuf {
        if let Ok(home) = std::env::var("AGUI_SESSION_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir()
            .map(|h| h.join(".config").join("agui-session"))
            .unwrap_or_else(|| PathBuf::from(".agui-session"))
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        session_home().join("config.toml")
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the agent endpoint.
    pub agent_endpoint: String,

    /// Messages fetched per history page.
    pub history_page_size: usize,

    /// Greeting shown in empty conversations. Empty string disables it.
    pub greeting: String,
}

impl Config {
    const DEFAULT_AGENT_ENDPOINT: &str = "http://localhost:8000/agui";
    const DEFAULT_HISTORY_PAGE_SIZE: usize = 50;
    const DEFAULT_GREETING: &str = "Hi! How can I help you today?";

    /// Loads configuration from the default config path.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Greeting messages layered at the top of an empty conversation.
    pub fn greeting_messages(&self, chat_id: &str) -> Vec<Message> {
        if self.greeting.is_empty() {
            Vec::new()
        } else {
            vec![Message::assistant_text(&self.greeting, chat_id)]
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent_endpoint: Self::DEFAULT_AGENT_ENDPOINT.to_string(),
            history_page_size: Self::DEFAULT_HISTORY_PAGE_SIZE,
            greeting: Self::DEFAULT_GREETING.to_string(),
        }
    }
}
