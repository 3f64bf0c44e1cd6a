//! Configuration management for proximity-mesh

use crate::mesh::media::MediaConstraints;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Peer address derivation
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Local capture
    #[serde(default)]
    pub media: MediaConfig,

    /// Call lifecycle
    #[serde(default)]
    pub mesh: MeshConfig,

    /// In-process transport and device simulation
    #[serde(default)]
    pub loopback: LoopbackConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Replacement for characters the transport rejects in addresses
    #[serde(default = "default_filler")]
    pub filler: char,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self { filler: default_filler() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Capture microphone
    #[serde(default = "default_true")]
    pub audio: bool,

    /// Capture camera
    #[serde(default = "default_true")]
    pub video: bool,

    /// Give up on a device request after this many ms (0 = wait forever)
    #[serde(default)]
    pub request_timeout_ms: u64,

    /// Silently resume capture at startup when permission was granted before
    #[serde(default = "default_true")]
    pub probe_prior_permission: bool,
}

impl MediaConfig {
    pub fn constraints(&self) -> MediaConstraints {
        MediaConstraints {
            audio: self.audio,
            video: self.video,
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        millis(self.request_timeout_ms)
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
            request_timeout_ms: 0,
            probe_prior_permission: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Give up on placing/answering a call after this many ms (0 = no limit)
    #[serde(default)]
    pub call_timeout_ms: u64,

    /// Call peers that came near before local media was ready once it is
    #[serde(default = "default_true")]
    pub connect_on_ready: bool,
}

impl MeshConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        millis(self.call_timeout_ms)
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 0,
            connect_on_ready: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopbackConfig {
    /// Delay before a simulated remote stream arrives
    #[serde(default = "default_stream_delay_ms")]
    pub stream_delay_ms: u64,

    /// Make every call placement fail
    #[serde(default)]
    pub fail_calls: bool,

    /// Refuse camera/microphone requests
    #[serde(default)]
    pub deny_media: bool,

    /// Report a prior microphone grant to the permission probe
    #[serde(default)]
    pub permission_granted: bool,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            stream_delay_ms: default_stream_delay_ms(),
            fail_calls: false,
            deny_media: false,
            permission_granted: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if !self.identity.filler.is_ascii_alphanumeric() {
            return Err("Identity filler must be an ASCII letter or digit".into());
        }

        if !self.media.audio && !self.media.video {
            return Err("Media must request audio, video or both".into());
        }

        if self.logging.level.parse::<log::LevelFilter>().is_err() {
            return Err(format!("Unknown log level: {}", self.logging.level).into());
        }

        Ok(())
    }
}

fn millis(ms: u64) -> Option<Duration> {
    if ms == 0 {
        None
    } else {
        Some(Duration::from_millis(ms))
    }
}

fn default_filler() -> char {
    crate::mesh::identity::DEFAULT_FILLER
}

fn default_true() -> bool {
    true
}

fn default_stream_delay_ms() -> u64 {
    250
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::Config;
    use std::time::Duration;

    #[test]
    fn defaults_validate() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.identity.filler, 'G');
        assert!(cfg.mesh.call_timeout().is_none());
    }

    #[test]
    fn validate_rejects_illegal_filler() {
        let mut cfg = Config::default();
        cfg.identity.filler = '_';
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_requires_some_media() {
        let mut cfg = Config::default();
        cfg.media.audio = false;
        cfg.media.video = false;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [identity]
            filler = "X"

            [mesh]
            call_timeout_ms = 1500
            "#,
        )
        .unwrap();
        assert_eq!(cfg.identity.filler, 'X');
        assert_eq!(cfg.mesh.call_timeout(), Some(Duration::from_millis(1500)));
        assert!(cfg.mesh.connect_on_ready);
        assert!(cfg.media.video);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = Config::load(&"/nonexistent/proximity-mesh.toml".into()).unwrap();
        assert!(cfg.media.probe_prior_permission);
    }
}
