//! Channel catalog (C1): a read-mostly, refreshable channel → upstream-URL map.
//!
//! The catalog loads an M3U playlist into an immutable [`Channel`] list and
//! publishes it behind a shared-reader lock. `refresh()` replaces the whole
//! list in one atomic swap so readers never observe a partially-updated
//! catalog.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{MultiviewError, MultiviewResult};
use crate::protocol_constants::RESERVED_CHANNEL_NAME;

/// An immutable catalog entry. Produced in bulk by the loader; replaced
/// atomically on refresh; never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub upstream_url: String,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub channel_number: Option<u32>,
}

struct CatalogData {
    channels: Vec<Channel>,
    by_id: HashMap<String, usize>,
}

impl CatalogData {
    fn empty() -> Self {
        Self {
            channels: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    fn from_channels(channels: Vec<Channel>) -> Self {
        let by_id = channels
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();
        Self { channels, by_id }
    }
}

/// Read-only mapping channel-id → channel record, with an atomic-swap refresh.
pub struct Catalog {
    data: RwLock<Arc<CatalogData>>,
    source: String,
    user_agent: String,
    extra_headers: Vec<(String, String)>,
    http: Client,
}

impl Catalog {
    /// Creates an empty catalog pointed at `source` (an `http(s)://` URL or a
    /// local file path). Call [`Catalog::refresh`] to populate it.
    pub fn new(source: impl Into<String>, user_agent: impl Into<String>, extra_headers: Vec<(String, String)>) -> Self {
        Self {
            data: RwLock::new(Arc::new(CatalogData::empty())),
            source: source.into(),
            user_agent: user_agent.into(),
            extra_headers,
            http: Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("failed to build catalog HTTP client"),
        }
    }

    /// Looks up a channel by id.
    pub fn lookup(&self, id: &str) -> Option<Channel> {
        let data = self.data.read().clone();
        data.by_id.get(id).map(|&i| data.channels[i].clone())
    }

    /// Returns a snapshot of every channel currently in the catalog.
    pub fn snapshot(&self) -> Vec<Channel> {
        self.data.read().channels.clone()
    }

    /// Number of channels currently loaded.
    pub fn len(&self) -> usize {
        self.data.read().channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetches and reparses the playlist, atomically replacing the channel
    /// list. A single malformed entry is skipped and logged; it does not fail
    /// the whole refresh.
    pub async fn refresh(&self) -> MultiviewResult<usize> {
        let body = self.fetch_source().await?;
        let channels = parse_m3u(&body);
        let count = channels.len();
        *self.data.write() = Arc::new(CatalogData::from_channels(channels));
        log::info!("[Catalog] refreshed {} channel(s) from {}", count, self.source);
        Ok(count)
    }

    /// Seeds the catalog directly, bypassing the fetch/parse path. Used by
    /// other modules' tests that need a populated catalog without a live M3U
    /// source.
    #[cfg(test)]
    pub(crate) fn seed_for_test(&self, channels: Vec<Channel>) {
        *self.data.write() = Arc::new(CatalogData::from_channels(channels));
    }

    async fn fetch_source(&self) -> MultiviewResult<String> {
        if self.source.starts_with("http://") || self.source.starts_with("https://") {
            let mut req = self.http.get(&self.source).header("User-Agent", &self.user_agent);
            for (k, v) in &self.extra_headers {
                req = req.header(k.as_str(), v.as_str());
            }
            let resp = req
                .send()
                .await
                .map_err(|e| MultiviewError::Internal(format!("failed to fetch M3U source: {e}")))?;
            resp.text()
                .await
                .map_err(|e| MultiviewError::Internal(format!("failed to read M3U body: {e}")))
        } else {
            tokio::fs::read_to_string(&self.source)
                .await
                .map_err(|e| MultiviewError::Internal(format!("failed to read M3U file: {e}")))
        }
    }
}

/// Parses `#EXTM3U`/`#EXTINF` entries into channels, skipping malformed ones
/// and excluding any entry whose display name matches the reserved sentinel.
fn parse_m3u(body: &str) -> Vec<Channel> {
    let mut channels = Vec::new();
    let mut pending: Option<(HashMap<String, String>, String)> = None;
    let mut ordinal: u32 = 0;

    for raw_line in body.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line == "#EXTM3U" {
            continue;
        }
        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            pending = parse_extinf(rest);
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        // This line is a URL; it terminates whatever #EXTINF preceded it.
        let Some((attrs, display_name)) = pending.take() else {
            continue;
        };
        ordinal += 1;

        if display_name == RESERVED_CHANNEL_NAME {
            continue;
        }

        let id = attrs
            .get("tvg-id")
            .filter(|s| !s.is_empty())
            .cloned()
            .unwrap_or_else(|| ordinal.to_string());
        let name = attrs
            .get("tvg-name")
            .filter(|s| !s.is_empty())
            .cloned()
            .unwrap_or(display_name);
        let channel_number = attrs
            .get("tvg-chno")
            .and_then(|s| s.parse().ok())
            .or(Some(ordinal));

        channels.push(Channel {
            id,
            name,
            upstream_url: line.to_string(),
            icon_url: attrs.get("tvg-logo").cloned(),
            group: attrs.get("group-title").cloned(),
            channel_number,
        });
    }

    channels
}

/// Parses the attribute list and trailing display name out of an `#EXTINF`
/// line's content (everything after `#EXTINF:`), e.g.
/// `-1 tvg-id="1" tvg-name="News" group-title="News",Channel One`.
fn parse_extinf(rest: &str) -> Option<(HashMap<String, String>, String)> {
    let comma = rest.rfind(',')?;
    let (attr_section, display) = rest.split_at(comma);
    let display_name = display[1..].trim().to_string();

    let mut attrs = HashMap::new();
    let mut remaining = attr_section;
    while let Some(eq) = remaining.find('=') {
        let key_start = remaining[..eq]
            .rfind(|c: char| c.is_whitespace())
            .map(|i| i + 1)
            .unwrap_or(0);
        let key = remaining[key_start..eq].trim().to_string();
        let after_eq = &remaining[eq + 1..];
        if !after_eq.starts_with('"') {
            break;
        }
        let Some(close) = after_eq[1..].find('"') else {
            break;
        };
        let value = after_eq[1..1 + close].to_string();
        attrs.insert(key, value);
        remaining = &after_eq[1 + close + 1..];
    }

    Some((attrs, display_name))
}
