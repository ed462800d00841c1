//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Seconds a live session may sit idle before shutting down.
    /// Override: `IDLE_TIMEOUT`
    pub idle_timeout_secs: u64,

    /// Legacy numeric slot index honored only on the very first cold start.
    /// Override: `AUDIO_SOURCE`
    pub legacy_audio_source_index: usize,

    /// Inset overlay width in pip/dvd_pip layouts.
    /// Override: `INSET_SCALE`
    pub inset_scale: u32,

    /// Inset overlay margin in pip/dvd_pip layouts.
    /// Override: `INSET_MARGIN`
    pub inset_margin: u32,

    /// M3U playlist source: an `http(s)://` URL or a local file path.
    /// Override: `M3U_SOURCE`
    pub m3u_source: String,

    /// User-Agent for upstream input connections and catalog fetches.
    /// Override: `DEFAULT_UA`
    pub default_user_agent: String,

    /// Extra headers for upstream input connections, raw form (literal `\n`
    /// separated). Override: `SOURCE_HEADERS`
    pub source_headers: String,

    /// Encoder hardware preference: auto, nvidia, intel, amd, cpu.
    /// Override: `ENCODER_PREFERENCE`
    pub encoder_preference: String,

    /// HTTP bind port.
    /// Override: `PORT`
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = multiview_core::Config::default();
        Self {
            idle_timeout_secs: core.idle_timeout_secs,
            legacy_audio_source_index: core.legacy_audio_source_index,
            inset_scale: core.inset_scale,
            inset_margin: core.inset_margin,
            m3u_source: core.m3u_source,
            default_user_agent: core.default_user_agent,
            source_headers: core.source_headers,
            encoder_preference: core.encoder_preference,
            port: core.port,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("IDLE_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                self.idle_timeout_secs = secs;
            }
        }
        if let Ok(val) = std::env::var("AUDIO_SOURCE") {
            if let Ok(index) = val.parse() {
                self.legacy_audio_source_index = index;
            }
        }
        if let Ok(val) = std::env::var("INSET_SCALE") {
            if let Ok(scale) = val.parse() {
                self.inset_scale = scale;
            }
        }
        if let Ok(val) = std::env::var("INSET_MARGIN") {
            if let Ok(margin) = val.parse() {
                self.inset_margin = margin;
            }
        }
        if let Ok(val) = std::env::var("M3U_SOURCE") {
            self.m3u_source = val;
        }
        if let Ok(val) = std::env::var("DEFAULT_UA") {
            self.default_user_agent = val;
        }
        if let Ok(val) = std::env::var("SOURCE_HEADERS") {
            self.source_headers = val.replace("\\n", "\r\n");
        }
        if let Ok(val) = std::env::var("ENCODER_PREFERENCE") {
            self.encoder_preference = val;
        }
        if let Ok(val) = std::env::var("PORT") {
            if let Ok(port) = val.parse() {
                self.port = port;
            }
        }
    }

    /// Converts to multiview-core's `Config` type.
    pub fn to_core_config(&self) -> multiview_core::Config {
        multiview_core::Config {
            idle_timeout_secs: self.idle_timeout_secs,
            legacy_audio_source_index: self.legacy_audio_source_index,
            inset_scale: self.inset_scale,
            inset_margin: self.inset_margin,
            m3u_source: self.m3u_source.clone(),
            default_user_agent: self.default_user_agent.clone(),
            source_headers: self.source_headers.clone(),
            encoder_preference: self.encoder_preference.clone(),
            port: self.port,
        }
    }
}
