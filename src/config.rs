use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ClientError, ClientResult};
use crate::state::TransitionPolicy;

const DEFAULT_NAME: &str = "head-client";
const DEFAULT_HOST: &str = "127.0.0.1:4001";
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_COMMIT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_SIGNAL_CAPACITY: usize = 64;

/// Client configuration, usually loaded from a TOML file.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Label used in logs and error messages.
    pub name: String,
    /// `host:port` of the head node API (websocket and HTTP).
    pub host: String,
    /// Ask the node to replay (`true`) or skip (`false`) its history on
    /// connect. Unset leaves the node's default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<bool>,
    pub connect_timeout_ms: u64,
    pub commit_timeout_ms: u64,
    /// Reject lifecycle events that arrive outside their source phase.
    pub strict_transitions: bool,
    /// Buffered session signals per receiver before it starts lagging.
    pub signal_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            host: DEFAULT_HOST.to_string(),
            history: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            commit_timeout_ms: DEFAULT_COMMIT_TIMEOUT_MS,
            strict_transitions: false,
            signal_capacity: DEFAULT_SIGNAL_CAPACITY,
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> ClientResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|err| ClientError::Config(format!("unable to parse config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> ClientResult<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;
        let encoded = toml::to_string_pretty(self)
            .map_err(|err| ClientError::Config(format!("unable to encode config: {err}")))?;
        fs::write(path, encoded)?;
        Ok(())
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.host.trim().is_empty() {
            return Err(ClientError::Config("host must not be empty".into()));
        }
        if self.connect_timeout_ms == 0 || self.commit_timeout_ms == 0 {
            return Err(ClientError::Config("timeouts must be greater than zero".into()));
        }
        if self.signal_capacity == 0 {
            return Err(ClientError::Config(
                "signal_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn websocket_url(&self) -> String {
        match self.history {
            Some(true) => format!("ws://{}/?history=yes", self.host),
            Some(false) => format!("ws://{}/?history=no", self.host),
            None => format!("ws://{}", self.host),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }

    pub fn transition_policy(&self) -> TransitionPolicy {
        if self.strict_transitions {
            TransitionPolicy::Strict
        } else {
            TransitionPolicy::Lenient
        }
    }
}
