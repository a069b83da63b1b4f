use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration. Every section is optional in the file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynadminConfig {
    pub server: ServerConfig,
    pub oauth: OAuthSettings,
    pub storage: StorageConfig,
    pub poll: PollConfig,
    pub cache: CacheConfig,
    pub rooms: RoomsConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Pin the console to a single server; `auth login` then ignores its argument.
    pub name: Option<String>,
    /// Domain suffix appended to whatever the user types (e.g. `example.org`
    /// turns `chat` into `chat.example.org`).
    pub suffix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthSettings {
    pub client_name: String,
    pub client_uri: String,
    /// Loopback port the redirect is captured on.
    pub callback_port: u16,
    /// How long `auth login` waits for the browser to come back.
    pub login_timeout_secs: u64,
    /// Pending sessions older than this are evicted on startup.
    pub session_max_age_secs: u64,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            client_name: "synadmin".into(),
            client_uri: "https://localhost/".into(),
            callback_port: 19485,
            login_timeout_secs: 300,
            session_max_age_secs: 600,
        }
    }
}

impl OAuthSettings {
    pub fn redirect_uri(&self) -> String {
        Self::redirect_uri_for(self.callback_port)
    }

    /// Redirect URI for a listener actually bound to `port` (relevant when
    /// `callback_port` is 0).
    pub fn redirect_uri_for(port: u16) -> String {
        format!("http://127.0.0.1:{port}/callback")
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn session_max_age(&self) -> Duration {
        Duration::from_secs(self.session_max_age_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Where credentials and pending sessions live. Defaults to the platform
    /// data directory.
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_ms: u64,
    pub retry: RetryConfig,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            retry: RetryConfig::default(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Delay applied after a failed poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RetryConfig {
    Fixed { delay_ms: u64 },
    Exponential { base_ms: u64, max_ms: u64 },
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::Exponential {
            base_ms: 1_000,
            max_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub stale_secs: u64,
    pub gc_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_secs: 60,
            gc_secs: 300,
        }
    }
}

impl CacheConfig {
    pub fn stale_time(&self) -> Duration {
        Duration::from_secs(self.stale_secs)
    }

    pub fn gc_time(&self) -> Duration {
        Duration::from_secs(self.gc_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    pub page_size: u32,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self { page_size: 100 }
    }
}
