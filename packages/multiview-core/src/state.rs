//! Core application configuration.
//!
//! [`Config`] holds every environment-tunable documented in the external
//! interfaces section; all fields have sensible defaults.

use serde::{Deserialize, Serialize};

/// Application configuration for the multiview server. All fields have
/// sensible defaults and may be overridden by environment variables (see
/// the standalone server's `ServerConfig`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds a live session may sit with zero connected clients before the
    /// idle watchdog stops it. `IDLE_TIMEOUT`.
    pub idle_timeout_secs: u64,

    /// Legacy numeric slot index used only to seed the very first cold start
    /// when no client has ever applied a layout. `AUDIO_SOURCE`.
    pub legacy_audio_source_index: usize,

    /// Width (px) of the inset overlay in `pip`/`dvd_pip` layouts.
    /// `INSET_SCALE`.
    pub inset_scale: u32,

    /// Margin (px) between the inset overlay and the canvas edge in
    /// `pip`/`dvd_pip` layouts. `INSET_MARGIN`.
    pub inset_margin: u32,

    /// M3U playlist source: an `http(s)://` URL or a local file path.
    /// `M3U_SOURCE`.
    pub m3u_source: String,

    /// User-Agent sent on upstream input connections and catalog fetches.
    /// `DEFAULT_UA`.
    pub default_user_agent: String,

    /// Extra headers attached to upstream input connections, CRLF-joined
    /// after replacing literal `\n` in the raw environment value.
    /// `SOURCE_HEADERS`.
    pub source_headers: String,

    /// Encoder hardware preference. `ENCODER_PREFERENCE`.
    pub encoder_preference: String,

    /// HTTP bind port. `PORT`.
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            idle_timeout_secs: crate::protocol_constants::DEFAULT_IDLE_TIMEOUT_SECS,
            legacy_audio_source_index: 0,
            inset_scale: 640,
            inset_margin: 40,
            m3u_source: String::new(),
            default_user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"
                .to_string(),
            source_headers: String::new(),
            encoder_preference: "auto".to_string(),
            port: 8004,
        }
    }
}

impl Config {
    /// Parses `source_headers` (as stored, already `\n`-normalized to CRLF)
    /// into a `(name, value)` list, skipping blank lines and lines without
    /// a `:` separator.
    pub fn parsed_source_headers(&self) -> Vec<(String, String)> {
        self.source_headers
            .split("\r\n")
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() {
                    return None;
                }
                let (name, value) = line.split_once(':')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect()
    }
}
