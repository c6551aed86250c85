//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, OPENAI_API_KEY, HOST, PORT, ...)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! The upstream credential is deliberately *not* part of the TOML surface: it is
//! read from the `OPENAI_API_KEY` environment variable only, so it never ends up
//! committed in a config file.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub limits: LimitsConfig,
    pub cleanup: CleanupConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Upstream speech service endpoints and credentials.
///
/// ## Fields:
/// - `api_key`: Bearer credential for both upstream APIs; populated from the
///   `OPENAI_API_KEY` environment variable. Absence is a per-request /
///   per-connection condition, never a startup failure.
/// - `base_url`: REST base for the batch transcription call
/// - `realtime_url`: WebSocket URL of the realtime speech API (model selection
///   rides in the query string)
/// - `batch_model`: transcription model used for uploaded files
/// - `negotiation_timeout_secs`: bounded wait for the realtime session
///   acknowledgment during the handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub realtime_url: String,
    pub batch_model: String,
    pub negotiation_timeout_secs: u64,
}

/// Size ceilings for the batch transcription pipeline.
///
/// ## Fields:
/// - `max_upload_bytes`: hard ceiling on an uploaded payload (larger is rejected)
/// - `chunk_ceiling_bytes`: per-upstream-call ceiling; payloads above this are
///   split into time-bounded chunks. Must stay below `max_upload_bytes`.
/// - `max_transcript_chars`: response transcript is truncated beyond this
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_upload_bytes: u64,
    pub chunk_ceiling_bytes: u64,
    pub max_transcript_chars: usize,
}

/// Bounded-retry policy for temporary-file cleanup.
///
/// Cleanup failures are never fatal to a response already computed; after
/// `max_attempts` deletions the file is logged and abandoned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            upstream: UpstreamConfig {
                api_key: None,
                base_url: "https://api.openai.com/v1".to_string(),
                realtime_url: "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview"
                    .to_string(),
                batch_model: "gpt-4o-mini-transcribe".to_string(),
                negotiation_timeout_secs: 5,
            },
            limits: LimitsConfig {
                max_upload_bytes: 25 * 1024 * 1024,    // 25 MiB upload ceiling
                chunk_ceiling_bytes: 20 * 1024 * 1024, // 20 MiB per upstream call
                max_transcript_chars: 10_000,
            },
            cleanup: CleanupConfig {
                max_attempts: 3,
                retry_backoff_ms: 50,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases: `HOST`, `PORT` (deployment platforms) and
    ///    `OPENAI_API_KEY` (upstream credential)
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms commonly inject these without the APP_ prefix.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("OPENAI_API_KEY") {
            settings = settings.set_override("upstream.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - The per-call chunk ceiling is positive and does not exceed the upload
    ///   ceiling
    /// - The transcript ceiling is positive
    /// - Cleanup attempts at least one deletion
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.limits.chunk_ceiling_bytes == 0 {
            return Err(anyhow::anyhow!("Chunk ceiling must be greater than 0"));
        }

        if self.limits.chunk_ceiling_bytes > self.limits.max_upload_bytes {
            return Err(anyhow::anyhow!(
                "Chunk ceiling ({} bytes) must not exceed the upload ceiling ({} bytes)",
                self.limits.chunk_ceiling_bytes,
                self.limits.max_upload_bytes
            ));
        }

        if self.limits.max_transcript_chars == 0 {
            return Err(anyhow::anyhow!("Transcript ceiling must be greater than 0"));
        }

        if self.cleanup.max_attempts == 0 {
            return Err(anyhow::anyhow!("Cleanup must attempt at least one deletion"));
        }

        Ok(())
    }

    /// Whether an upstream credential is available for this process.
    pub fn has_upstream_credential(&self) -> bool {
        matches!(&self.upstream.api_key, Some(key) if !key.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.limits.max_upload_bytes, 25 * 1024 * 1024);
        assert_eq!(config.limits.chunk_ceiling_bytes, 20 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_chunk_ceiling_must_stay_under_upload_ceiling() {
        let mut config = AppConfig::default();
        config.limits.chunk_ceiling_bytes = config.limits.max_upload_bytes + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_credential_presence() {
        let mut config = AppConfig::default();
        assert!(!config.has_upstream_credential());
        config.upstream.api_key = Some(String::new());
        assert!(!config.has_upstream_credential());
        config.upstream.api_key = Some("sk-test".to_string());
        assert!(config.has_upstream_credential());
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let mut config = AppConfig::default();
        config.upstream.api_key = Some("sk-test".to_string());
        let rendered = toml::to_string(&config).expect("config serializes");
        let parsed: AppConfig = toml::from_str(&rendered).expect("rendered config parses");
        assert_eq!(parsed.server.port, config.server.port);
        assert_eq!(
            parsed.limits.chunk_ceiling_bytes,
            config.limits.chunk_ceiling_bytes
        );
        assert_eq!(parsed.cleanup.max_attempts, config.cleanup.max_attempts);
    }
}
