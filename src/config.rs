//! Configuration types for records-tasks

use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use url::Url;

/// Main configuration
///
/// Every section has defaults, so `{}` deserializes into a working
/// configuration backed by `records-tasks.db` in the working directory.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Engine lifecycle and event delivery
    #[serde(default)]
    pub engine: EngineConfig,

    /// API and external server integration
    #[serde(flatten)]
    pub server: ServerIntegrationConfig,

    /// Settings of the built-in job kinds
    #[serde(default)]
    pub jobs: JobsConfig,
}

/// Persistence configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./records-tasks.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Engine configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long shutdown waits for in-flight items to drain (default: 30s)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Capacity of the event broadcast channel (default: 1000)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: default_shutdown_timeout(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// API and external server integration configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServerIntegrationConfig {
    /// REST API settings
    #[serde(default)]
    pub api: ApiConfig,
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:6790)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
        }
    }
}

/// Job kind settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Format verification against an external analysis service
    #[serde(default)]
    pub format_verification: FormatVerificationConfig,
}

/// Format verification configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FormatVerificationConfig {
    /// Analysis endpoint receiving multipart uploads
    /// (default: http://localhost:8080/analyze)
    #[serde(default = "default_verification_endpoint")]
    pub endpoint: Url,

    /// Per-request timeout (default: 300s)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for FormatVerificationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_verification_endpoint(),
            request_timeout: default_request_timeout(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("records-tasks.db")
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_event_buffer() -> usize {
    1000
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6790))
}

fn default_true() -> bool {
    true
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_verification_endpoint() -> Url {
    // constant literal, always parses
    #[allow(clippy::expect_used)]
    Url::parse("http://localhost:8080/analyze").expect("default endpoint is a valid URL")
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(300)
}

// Duration serialization helper (as seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
