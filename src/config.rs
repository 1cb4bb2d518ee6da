//! Configuration for the pushpoll server.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! environment variables, then CLI flags (applied by `main`).
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [completion]
//! api_base = "https://api.openai.com/v1"
//! model = "gpt-3.5-turbo"
//! max_tokens = 150
//!
//! [relay]
//! deadline_secs = 30
//!
//! [poll]
//! recheck_delay_secs = 1
//! mode = "single-slot"   # or "per-session"
//! retention_secs = 300
//!
//! [stream]
//! channel_capacity = 32
//! ```
//!
//! The API key is read from `OPENAI_API_KEY` (or `completion.api_key`) and is
//! never written back out.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// How poll job records are keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PollMode {
    /// One process-wide record shared by every client.
    #[default]
    SingleSlot,
    /// One record per `session` parameter; requests without one share the
    /// default record.
    PerSession,
}

impl std::fmt::Display for PollMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollMode::SingleSlot => write!(f, "single-slot"),
            PollMode::PerSession => write!(f, "per-session"),
        }
    }
}

impl std::str::FromStr for PollMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single-slot" | "single" => Ok(PollMode::SingleSlot),
            "per-session" | "session" => Ok(PollMode::PerSession),
            _ => Err(ConfigError::InvalidValue {
                key: "poll.mode",
                value: s.to_string(),
            }),
        }
    }
}

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Completion API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionSection {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_max_tokens() -> u32 {
    150
}

impl Default for CompletionSection {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            api_key: None,
        }
    }
}

/// Streaming relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySection {
    /// Hard deadline for one completion, relay or poll job.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

fn default_deadline_secs() -> u64 {
    30
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline_secs(),
        }
    }
}

/// Polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollSection {
    #[serde(default = "default_recheck_delay_secs")]
    pub recheck_delay_secs: u64,
    #[serde(default)]
    pub mode: PollMode,
    /// How long an unread result is kept before it is swept.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

fn default_recheck_delay_secs() -> u64 {
    1
}

fn default_retention_secs() -> u64 {
    300
}

impl Default for PollSection {
    fn default() -> Self {
        Self {
            recheck_delay_secs: default_recheck_delay_secs(),
            mode: PollMode::default(),
            retention_secs: default_retention_secs(),
        }
    }
}

/// Push connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSection {
    /// Frames buffered between the connection task and the response body.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    32
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// The complete configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub completion: CompletionSection,
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub poll: PollSection,
    #[serde(default)]
    pub stream: StreamSection,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load from `path` if given, otherwise start from defaults; then apply
    /// the process environment.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `PORT`, `HOST`, `OPENAI_API_KEY`, `OPENAI_API_BASE`,
    /// `OPENAI_MODEL` and `POLL_MODE` from `lookup`. Empty values are ignored.
    pub fn apply_env_with(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = get("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key: "PORT", value: port })?;
        }
        if let Some(host) = get("HOST") {
            self.server.host = host;
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.completion.api_key = Some(key);
        }
        if let Some(base) = get("OPENAI_API_BASE") {
            self.completion.api_base = base;
        }
        if let Some(model) = get("OPENAI_MODEL") {
            self.completion.model = model;
        }
        if let Some(mode) = get("POLL_MODE") {
            self.poll.mode = mode.trim().parse()?;
        }
        Ok(())
    }

    /// Render as TOML (the API key is never included).
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn relay_deadline(&self) -> Duration {
        Duration::from_secs(self.relay.deadline_secs)
    }

    pub fn recheck_delay(&self) -> Duration {
        Duration::from_secs(self.poll.recheck_delay_secs)
    }

    pub fn poll_retention(&self) -> Duration {
        Duration::from_secs(self.poll.retention_secs)
    }

    /// Buffer size for push connections; never below one.
    pub fn channel_capacity(&self) -> usize {
        self.stream.channel_capacity.max(1)
    }

    pub fn has_api_key(&self) -> bool {
        self.completion
            .api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !self.has_api_key() {
            warnings.push("OPENAI_API_KEY not set. OpenAI features will not work.".to_string());
        }
        if self.relay.deadline_secs == 0 {
            warnings.push("relay.deadline_secs is 0: every completion will time out".to_string());
        }
        if self.poll.recheck_delay_secs == 0 {
            warnings.push(
                "poll.recheck_delay_secs is 0: clients will re-check without pause".to_string(),
            );
        }
        if self.stream.channel_capacity == 0 {
            warnings.push("stream.channel_capacity is 0: using 1".to_string());
        }
        if !self.completion.api_base.starts_with("http://")
            && !self.completion.api_base.starts_with("https://")
        {
            warnings.push(format!(
                "completion.api_base '{}' is not an http(s) URL",
                self.completion.api_base
            ));
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.completion.model, "gpt-3.5-turbo");
        assert_eq!(config.completion.max_tokens, 150);
        assert_eq!(config.relay_deadline(), Duration::from_secs(30));
        assert_eq!(config.recheck_delay(), Duration::from_secs(1));
        assert_eq!(config.poll.mode, PollMode::SingleSlot);
        assert_eq!(config.stream.channel_capacity, 32);
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let config = Config::parse(
            r#"
            [server]
            port = 9000

            [poll]
            mode = "per-session"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.poll.mode, PollMode::PerSession);
        assert_eq!(config.poll.recheck_delay_secs, 1);
        assert_eq!(config.poll_retention(), Duration::from_secs(300));
        assert_eq!(config.relay.deadline_secs, 30);
    }

    #[test]
    fn test_parse_rejects_unknown_poll_mode() {
        assert!(Config::parse("[poll]\nmode = \"sharded\"").is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config::parse("[server]\nport = 9000").unwrap();
        config
            .apply_env_with(env(&[
                ("PORT", "7000"),
                ("OPENAI_API_KEY", "sk-test"),
                ("OPENAI_MODEL", "gpt-4o-mini"),
                ("HOST", ""),
            ]))
            .unwrap();
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.completion.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.completion.model, "gpt-4o-mini");
    }

    #[test]
    fn test_env_invalid_port() {
        let mut config = Config::default();
        let err = config.apply_env_with(env(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "PORT", .. }));
    }

    #[test]
    fn test_env_poll_mode() {
        let mut config = Config::default();
        config
            .apply_env_with(env(&[("POLL_MODE", " Per-Session ")]))
            .unwrap();
        assert_eq!(config.poll.mode, PollMode::PerSession);

        let err = config
            .apply_env_with(env(&[("POLL_MODE", "sharded")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        assert_eq!(config.poll.mode, PollMode::PerSession);
    }

    #[test]
    fn test_api_key_is_never_serialized() {
        let mut config = Config::default();
        config.completion.api_key = Some("sk-secret".to_string());
        let rendered = config.to_toml().unwrap();
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("gpt-3.5-turbo"));
    }

    #[test]
    fn test_validate_warns_without_api_key() {
        let warnings = Config::default().validate();
        assert!(warnings.iter().any(|w| w.contains("OPENAI_API_KEY")));

        let mut config = Config::default();
        config.completion.api_key = Some("sk-test".to_string());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/pushpoll.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_poll_mode_from_str_and_display() {
        assert_eq!("per-session".parse::<PollMode>().unwrap(), PollMode::PerSession);
        assert_eq!("SINGLE-SLOT".parse::<PollMode>().unwrap(), PollMode::SingleSlot);
        assert!("bogus".parse::<PollMode>().is_err());
        assert_eq!(PollMode::PerSession.to_string(), "per-session");
    }
}
