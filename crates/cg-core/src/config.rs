//! Configuration management
//!
//! Settings are resolved in this order of precedence:
//! 1. Environment variables (`CG_*`)
//! 2. `chatgraph.toml`
//! 3. Built-in defaults
//!
//! `${VAR_NAME}` references inside the TOML file are replaced with the
//! value of the environment variable before parsing.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::graph::{DEFAULT_BUSY_TIMEOUT, GraphDriver};
use crate::memory::{
    ChatMemoryConfig, DEFAULT_ASSISTANT_LABEL, DEFAULT_SESSION_LABEL, DEFAULT_TOOL_RESPONSE_LABEL,
    DEFAULT_USER_LABEL,
};
use crate::{Error, Result};

/// Default configuration file name, looked up in the working directory
pub const CONFIG_FILE: &str = "chatgraph.toml";

/// Main configuration for chatgraph
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Graph database settings
    #[serde(default)]
    pub graph: GraphConfig,

    /// Conversation memory settings
    #[serde(default)]
    pub memory: MemoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphConfig {
    /// Path to the SQLite file holding the graph
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// How long a writer waits for the database lock, in milliseconds
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl GraphConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Open the configured graph database, creating parent directories
    pub fn open(&self) -> Result<GraphDriver> {
        if let Some(parent) = Path::new(&self.db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        GraphDriver::open_with_timeout(&self.db_path, self.busy_timeout())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryConfig {
    #[serde(default = "default_session_label")]
    pub session_label: String,

    #[serde(default = "default_user_label")]
    pub user_label: String,

    #[serde(default = "default_assistant_label")]
    pub assistant_label: String,

    #[serde(default = "default_tool_response_label")]
    pub tool_response_label: String,

    /// Conversation time-to-live in seconds; unset means never expire
    #[serde(default)]
    pub time_to_live_secs: Option<i64>,

    /// Delete the conversation node too when clearing
    #[serde(default)]
    pub remove_conversation_on_clear: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            session_label: default_session_label(),
            user_label: default_user_label(),
            assistant_label: default_assistant_label(),
            tool_response_label: default_tool_response_label(),
            time_to_live_secs: None,
            remove_conversation_on_clear: false,
        }
    }
}

impl MemoryConfig {
    /// Validate and convert into the store's configuration
    pub fn to_chat_memory_config(&self) -> Result<ChatMemoryConfig> {
        let mut builder = ChatMemoryConfig::builder()
            .session_label(self.session_label.clone())
            .user_label(self.user_label.clone())
            .assistant_label(self.assistant_label.clone())
            .tool_response_label(self.tool_response_label.clone())
            .remove_conversation_on_clear(self.remove_conversation_on_clear);
        if let Some(secs) = self.time_to_live_secs {
            let ttl = chrono::Duration::try_seconds(secs).ok_or_else(|| {
                Error::InvalidConfiguration(format!("time-to-live of {}s is out of range", secs))
            })?;
            builder = builder.time_to_live(ttl);
        }
        builder.build()
    }
}

fn default_db_path() -> String {
    "data/chatgraph.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT.as_millis() as u64
}

fn default_session_label() -> String {
    DEFAULT_SESSION_LABEL.to_string()
}

fn default_user_label() -> String {
    DEFAULT_USER_LABEL.to_string()
}

fn default_assistant_label() -> String {
    DEFAULT_ASSISTANT_LABEL.to_string()
}

fn default_tool_response_label() -> String {
    DEFAULT_TOOL_RESPONSE_LABEL.to_string()
}

impl Config {
    /// Replace `${VAR_NAME}` with the value of the environment variable
    ///
    /// Unset variables expand to an empty string.
    fn expand_env_vars(value: &str) -> String {
        let mut result = String::new();
        let mut chars = value.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next(); // consume '{'

                let mut var_name = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    var_name.push(c);
                }

                if let Ok(env_value) = std::env::var(&var_name) {
                    result.push_str(&env_value);
                }
            } else {
                result.push(c);
            }
        }

        result
    }

    /// Load configuration from a TOML file
    ///
    /// Environment variables are expanded inside the file and then applied
    /// on top of it.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let toml_content = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfiguration(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let mut cfg = Self::from_toml_str(&toml_content)?;
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    /// Parse TOML text, expanding `${VAR}` references first
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let expanded_content = Self::expand_env_vars(content);
        let config: TomlConfig = toml::from_str(&expanded_content)
            .map_err(|e| Error::InvalidConfiguration(format!("Failed to parse TOML: {}", e)))?;
        Ok(Self::from_toml_config(config))
    }

    /// Load configuration from the default location
    ///
    /// Uses `./chatgraph.toml` when present, otherwise environment
    /// variables and defaults only.
    pub fn load() -> Result<Self> {
        if Path::new(CONFIG_FILE).exists() {
            return Self::from_toml_file(CONFIG_FILE);
        }
        Self::from_env()
    }

    /// Load configuration from environment variables over defaults
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    fn from_toml_config(toml: TomlConfig) -> Self {
        let graph = toml.graph.unwrap_or_default();
        let graph_config = GraphConfig {
            db_path: graph.db_path.unwrap_or_else(default_db_path),
            busy_timeout_ms: graph.busy_timeout_ms.unwrap_or_else(default_busy_timeout_ms),
        };

        let memory = toml.memory.unwrap_or_default();
        let memory_config = MemoryConfig {
            session_label: memory.session_label.unwrap_or_else(default_session_label),
            user_label: memory.user_label.unwrap_or_else(default_user_label),
            assistant_label: memory.assistant_label.unwrap_or_else(default_assistant_label),
            tool_response_label: memory
                .tool_response_label
                .unwrap_or_else(default_tool_response_label),
            time_to_live_secs: memory.time_to_live_secs,
            remove_conversation_on_clear: memory.remove_conversation_on_clear.unwrap_or(false),
        };

        Config {
            graph: graph_config,
            memory: memory_config,
        }
    }

    /// Override settings with `CG_*` environment variables
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(path) = non_empty_var("CG_DB_PATH") {
            self.graph.db_path = path;
        }
        if let Some(timeout) = non_empty_var("CG_BUSY_TIMEOUT_MS") {
            self.graph.busy_timeout_ms = parse_var("CG_BUSY_TIMEOUT_MS", &timeout)?;
        }

        if let Some(label) = non_empty_var("CG_SESSION_LABEL") {
            self.memory.session_label = label;
        }
        if let Some(label) = non_empty_var("CG_USER_LABEL") {
            self.memory.user_label = label;
        }
        if let Some(label) = non_empty_var("CG_ASSISTANT_LABEL") {
            self.memory.assistant_label = label;
        }
        if let Some(label) = non_empty_var("CG_TOOL_RESPONSE_LABEL") {
            self.memory.tool_response_label = label;
        }
        if let Some(ttl) = non_empty_var("CG_TIME_TO_LIVE_SECS") {
            self.memory.time_to_live_secs = Some(parse_var("CG_TIME_TO_LIVE_SECS", &ttl)?);
        }
        if let Some(remove) = non_empty_var("CG_REMOVE_CONVERSATION_ON_CLEAR") {
            self.memory.remove_conversation_on_clear = remove.to_lowercase() != "false";
        }
        Ok(())
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::InvalidConfiguration(format!("{}={}: {}", name, value, e)))
}

// ============================================================================
// TOML file layout
// ============================================================================

#[derive(Debug, Deserialize)]
struct TomlConfig {
    graph: Option<TomlGraphConfig>,
    memory: Option<TomlMemoryConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlGraphConfig {
    #[serde(default)]
    db_path: Option<String>,
    #[serde(default)]
    busy_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlMemoryConfig {
    #[serde(default)]
    session_label: Option<String>,
    #[serde(default)]
    user_label: Option<String>,
    #[serde(default)]
    assistant_label: Option<String>,
    #[serde(default)]
    tool_response_label: Option<String>,
    #[serde(default)]
    time_to_live_secs: Option<i64>,
    #[serde(default)]
    remove_conversation_on_clear: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests touching process environment must not interleave
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_graph_config_default() {
        let config = GraphConfig::default();
        assert_eq!(config.db_path, "data/chatgraph.db");
        assert_eq!(config.busy_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_memory_config_default() {
        let config = MemoryConfig::default();
        assert_eq!(config.session_label, "Session");
        assert_eq!(config.user_label, "UserMessage");
        assert_eq!(config.assistant_label, "AssistantMessage");
        assert_eq!(config.tool_response_label, "ToolResponseMessage");
        assert!(config.time_to_live_secs.is_none());
        assert!(!config.remove_conversation_on_clear);
    }

    #[test]
    fn test_expand_env_vars() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("CHATGRAPH_TEST_VAR", "test_value");
        }

        let result = Config::expand_env_vars("prefix_${CHATGRAPH_TEST_VAR}_suffix");
        assert_eq!(result, "prefix_test_value_suffix");

        let result = Config::expand_env_vars("prefix_${CHATGRAPH_NONEXISTENT_VAR}_suffix");
        assert_eq!(result, "prefix__suffix");

        unsafe {
            std::env::remove_var("CHATGRAPH_TEST_VAR");
        }
    }

    #[test]
    fn test_expand_env_vars_no_braces() {
        assert_eq!(Config::expand_env_vars("no_vars_here"), "no_vars_here");
        assert_eq!(Config::expand_env_vars("$HOME"), "$HOME");
    }

    #[test]
    fn test_expand_env_vars_empty_name() {
        assert_eq!(Config::expand_env_vars("${}_content"), "_content");
    }

    #[test]
    fn test_toml_config_parsing() -> Result<()> {
        let toml_content = r#"
[graph]
db_path = "/var/lib/chatgraph/graph.db"
busy_timeout_ms = 250

[memory]
session_label = "Conversation"
user_label = "Human"
time_to_live_secs = 86400
remove_conversation_on_clear = true
"#;

        let config = Config::from_toml_str(toml_content)?;
        assert_eq!(config.graph.db_path, "/var/lib/chatgraph/graph.db");
        assert_eq!(config.graph.busy_timeout(), Duration::from_millis(250));
        assert_eq!(config.memory.session_label, "Conversation");
        assert_eq!(config.memory.user_label, "Human");
        assert_eq!(config.memory.assistant_label, "AssistantMessage");
        assert_eq!(config.memory.time_to_live_secs, Some(86400));
        assert!(config.memory.remove_conversation_on_clear);
        Ok(())
    }

    #[test]
    fn test_empty_toml_uses_defaults() -> Result<()> {
        assert_eq!(Config::from_toml_str("")?, Config::default());
        Ok(())
    }

    #[test]
    fn test_invalid_toml_is_configuration_error() {
        let err = Config::from_toml_str("[graph\ndb_path = 1").unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn test_env_overrides() -> Result<()> {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("CG_DB_PATH", "/tmp/override.db");
            std::env::set_var("CG_TIME_TO_LIVE_SECS", "60");
            std::env::set_var("CG_REMOVE_CONVERSATION_ON_CLEAR", "true");
        }

        let config = Config::from_env();

        unsafe {
            std::env::remove_var("CG_DB_PATH");
            std::env::remove_var("CG_TIME_TO_LIVE_SECS");
            std::env::remove_var("CG_REMOVE_CONVERSATION_ON_CLEAR");
        }

        let config = config?;
        assert_eq!(config.graph.db_path, "/tmp/override.db");
        assert_eq!(config.memory.time_to_live_secs, Some(60));
        assert!(config.memory.remove_conversation_on_clear);
        Ok(())
    }

    #[test]
    fn test_unparseable_env_value() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("CG_BUSY_TIMEOUT_MS", "soon");
        }
        let result = Config::from_env();
        unsafe {
            std::env::remove_var("CG_BUSY_TIMEOUT_MS");
        }
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_memory_config_conversion() -> Result<()> {
        let memory = MemoryConfig {
            session_label: "Chat".to_string(),
            time_to_live_secs: Some(3600),
            ..Default::default()
        };
        let config = memory.to_chat_memory_config()?;
        assert_eq!(config.session_label(), "Chat");
        assert_eq!(config.retention().time_to_live_secs(), Some(3600));
        Ok(())
    }

    #[test]
    fn test_negative_ttl_rejected_on_conversion() {
        let memory = MemoryConfig {
            time_to_live_secs: Some(-5),
            ..Default::default()
        };
        let err = memory.to_chat_memory_config().unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn test_open_creates_parent_directory() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let config = GraphConfig {
            db_path: dir.path().join("nested/dir/graph.db").display().to_string(),
            busy_timeout_ms: 100,
        };
        let driver = config.open()?;
        assert!(driver.location().is_some());
        assert!(dir.path().join("nested/dir/graph.db").exists());
        Ok(())
    }
}
