//! Session Supervisor (C5): owns session mode, current/last layout and the
//! encoder handle; serializes every transition under one mutex.
//!
//! See the module-level design notes in the repository root `DESIGN.md` for
//! why the compare-and-set `idle -> starting` is the one critical section
//! that must not be simplified away.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::process::ChildStdout;
use tokio::sync::{Mutex, Notify};

use crate::broadcaster::Broadcaster;
use crate::catalog::Catalog;
use crate::encoder::EncoderHandle;
use crate::error::{MultiviewError, MultiviewResult};
use crate::layout::{self, CustomSlot, EncoderProfile, LayoutConfig, LayoutKind};
use crate::protocol_constants::{CANVAS_HEIGHT, CANVAS_WIDTH};

/// Session mode. `Starting` is a short-lived transition barrier held only
/// while spawning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Idle,
    Starting,
    Live,
}

/// A point-in-time read of supervisor state for the status endpoint.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub mode: Mode,
    pub connected_clients: usize,
    pub current_layout: Option<LayoutConfig>,
    pub last_layout: Option<LayoutConfig>,
    pub time_until_idle: Option<u64>,
}

struct Inner {
    mode: Mode,
    current_layout: Option<LayoutConfig>,
    last_layout: Option<LayoutConfig>,
    handle: Option<EncoderHandle>,
    became_empty_at: Option<Instant>,
}

/// Static, per-process transcoder invocation parameters that do not change
/// across layout applies.
pub struct EncodeEnvironment {
    pub profile: EncoderProfile,
    pub default_ua: String,
    pub extra_headers: Vec<(String, String)>,
    pub inset_scale: u32,
    pub inset_margin: u32,
    /// `AUDIO_SOURCE`'s legacy numeric slot index. Consulted only to
    /// synthesize the very first cold-start layout when no client has ever
    /// applied one; dead once a `last_layout` exists.
    pub legacy_audio_source_index: usize,
}

/// The single owned value modeling the process-wide session. Created at
/// startup, torn down at shutdown; all mutation happens through its methods.
pub struct Supervisor {
    inner: Mutex<Inner>,
    broadcaster: Arc<Broadcaster>,
    catalog: Arc<Catalog>,
    env: EncodeEnvironment,
    transition_notify: Notify,
}

impl Supervisor {
    pub fn new(broadcaster: Arc<Broadcaster>, catalog: Arc<Catalog>, env: EncodeEnvironment) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                mode: Mode::Idle,
                current_layout: None,
                last_layout: None,
                handle: None,
                became_empty_at: None,
            }),
            broadcaster,
            catalog,
            env,
            transition_notify: Notify::new(),
        })
    }

    /// Read-only handle to the broadcaster, for the stream endpoint to
    /// subscribe against.
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn encoder_profile(&self) -> &EncoderProfile {
        &self.env.profile
    }

    /// Applies a new layout. If a session is already live this is an
    /// optimistic swap: the new handle is spawned first, then - holding the
    /// mutex - the old handle is killed with no grace period and the
    /// broadcaster's source is retargeted in the same locked step.
    pub async fn apply_layout(&self, cfg: LayoutConfig) -> MultiviewResult<LayoutConfig> {
        let (new_handle, stdout, normalized) = self.spawn_from_layout(cfg).await?;

        let mut inner = self.inner.lock().await;
        let old_handle = inner.handle.take();
        inner.handle = Some(new_handle);
        inner.mode = Mode::Live;
        inner.current_layout = Some(normalized.clone());
        inner.last_layout = Some(normalized.clone());
        inner.became_empty_at = None;
        self.broadcaster.attach(stdout);
        if let Some(mut old) = old_handle {
            old.kill().await;
        }
        drop(inner);
        self.transition_notify.notify_waiters();
        Ok(normalized)
    }

    /// Forces the session back to idle: stops the handle, detaches the
    /// broadcaster, clears `current_layout`. `last_layout` is preserved.
    /// Idempotent.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(mut handle) = inner.handle.take() {
            handle.stop_graceful().await;
        }
        inner.mode = Mode::Idle;
        inner.current_layout = None;
        inner.became_empty_at = None;
        drop(inner);
        self.broadcaster.detach();
        self.transition_notify.notify_waiters();
    }

    /// Updates one slot's volume by re-applying the current layout with a
    /// modified volume map (an apply-layout under the hood).
    pub async fn set_volume(&self, slot_id: &str, volume: f32) -> MultiviewResult<LayoutConfig> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(MultiviewError::InvalidLayout(format!(
                "volume must be in [0, 1], got {volume}"
            )));
        }

        let current = {
            let inner = self.inner.lock().await;
            inner.current_layout.clone()
        };
        let Some(mut cfg) = current else {
            return Err(MultiviewError::NoActiveLayout);
        };
        if !cfg.slot_to_channel.contains_key(slot_id) {
            return Err(MultiviewError::UnknownSlot(slot_id.to_string()));
        }
        cfg.slot_volumes.insert(slot_id.to_string(), volume);
        self.apply_layout(cfg).await
    }

    /// If idle, cold-starts from `last_layout` and waits out the warm-up
    /// before returning. Concurrent callers arriving while another is
    /// cold-starting observe `starting` and wait; only the CAS winner spawns.
    pub async fn cold_start_if_idle(&self) -> MultiviewResult<()> {
        loop {
            let mut inner = self.inner.lock().await;
            match inner.mode {
                Mode::Live => return Ok(()),
                Mode::Starting => {
                    drop(inner);
                    let notified = self.transition_notify.notified();
                    notified.await;
                    continue;
                }
                Mode::Idle => {
                    let last = match inner.last_layout.clone() {
                        Some(last) => last,
                        None => match self.seed_layout_from_legacy_audio_source() {
                            Some(seed) => seed,
                            None => {
                                return Err(MultiviewError::ColdStartFailed(
                                    "no last-layout available to cold start from".into(),
                                ));
                            }
                        },
                    };
                    inner.mode = Mode::Starting;
                    drop(inner);
                    self.transition_notify.notify_waiters();
                    return self.finish_cold_start(last).await;
                }
            }
        }
    }

    /// Builds a single-slot, full-canvas layout from the channel at
    /// `AUDIO_SOURCE`'s legacy index, for the very first cold start when no
    /// client has ever applied a layout. Returns `None` when the catalog has
    /// no channel at that index (e.g. catalog not yet refreshed).
    fn seed_layout_from_legacy_audio_source(&self) -> Option<LayoutConfig> {
        let channel = self.catalog.snapshot().into_iter().nth(self.env.legacy_audio_source_index)?;
        let mut slot_to_channel = BTreeMap::new();
        slot_to_channel.insert("main".to_string(), channel.id);
        Some(LayoutConfig {
            kind: LayoutKind::Custom,
            slot_to_channel,
            audio_source_slot: "main".to_string(),
            custom_slots: Some(vec![CustomSlot {
                id: "main".to_string(),
                x: 0,
                y: 0,
                width: CANVAS_WIDTH,
                height: CANVAS_HEIGHT,
                border: false,
            }]),
            slot_volumes: BTreeMap::new(),
        })
    }

    async fn finish_cold_start(&self, last: LayoutConfig) -> MultiviewResult<()> {
        let spawned = self.spawn_from_layout(last).await;

        let (handle, stdout, normalized) = match spawned {
            Ok(v) => v,
            Err(e) => {
                let mut inner = self.inner.lock().await;
                inner.mode = Mode::Idle;
                drop(inner);
                self.transition_notify.notify_waiters();
                return Err(e);
            }
        };

        {
            let mut inner = self.inner.lock().await;
            inner.handle = Some(handle);
            inner.mode = Mode::Live;
            inner.current_layout = Some(normalized.clone());
            inner.last_layout = Some(normalized);
            inner.became_empty_at = None;
            self.broadcaster.attach(stdout);
        }
        self.transition_notify.notify_waiters();

        tokio::time::sleep(Duration::from_secs(crate::protocol_constants::COLD_START_WARMUP_SECS)).await;

        let mut inner = self.inner.lock().await;
        let alive = inner.handle.as_mut().map(|h| h.is_alive()).unwrap_or(false);
        if alive {
            return Ok(());
        }

        if let Some(mut dead) = inner.handle.take() {
            dead.kill().await;
        }
        inner.mode = Mode::Idle;
        inner.current_layout = None;
        drop(inner);
        self.broadcaster.detach();
        self.transition_notify.notify_waiters();
        Err(MultiviewError::ColdStartFailed(
            "encoder exited during warm-up".into(),
        ))
    }

    /// Resolves channel ids to upstream URLs via the catalog, compiles argv,
    /// and spawns a handle. Performs no locking and no state mutation - pure
    /// preparation shared by `apply_layout` and cold start.
    async fn spawn_from_layout(
        &self,
        cfg: LayoutConfig,
    ) -> MultiviewResult<(EncoderHandle, ChildStdout, LayoutConfig)> {
        let (slots, volumes) = cfg.validate()?;

        let mut urls: BTreeMap<String, String> = BTreeMap::new();
        for slot in &slots {
            let channel_id = cfg
                .slot_to_channel
                .get(slot)
                .expect("slot presence checked by validate()");
            if urls.contains_key(channel_id) {
                continue;
            }
            let channel = self
                .catalog
                .lookup(channel_id)
                .ok_or_else(|| MultiviewError::UnknownChannel(channel_id.clone()))?;
            urls.insert(channel_id.clone(), channel.upstream_url);
        }

        let normalized = LayoutConfig {
            slot_volumes: volumes,
            ..cfg
        };

        let argv = layout::compile_with_geometry(
            &normalized,
            &urls,
            &self.env.profile,
            &self.env.default_ua,
            &self.env.extra_headers,
            self.env.inset_scale,
            self.env.inset_margin,
        )?;

        let mut handle = EncoderHandle::spawn(&argv)?;
        let stdout = handle
            .take_stdout()
            .ok_or_else(|| MultiviewError::SpawnFailed("encoder produced no stdout pipe".into()))?;

        Ok((handle, stdout, normalized))
    }

    /// Called periodically by the idle watchdog task. Observes
    /// `client_count == 0 && mode == live`; once that condition has held
    /// continuously for `idle_timeout`, transitions to idle.
    pub async fn idle_watchdog_tick(&self, idle_timeout: Duration) {
        let mut inner = self.inner.lock().await;
        if inner.mode != Mode::Live {
            inner.became_empty_at = None;
            return;
        }

        if self.broadcaster.count() > 0 {
            inner.became_empty_at = None;
            return;
        }

        let now = Instant::now();
        let became_empty_at = *inner.became_empty_at.get_or_insert(now);
        if now.duration_since(became_empty_at) < idle_timeout {
            return;
        }

        if let Some(mut handle) = inner.handle.take() {
            handle.stop_graceful().await;
        }
        inner.mode = Mode::Idle;
        inner.current_layout = None;
        inner.became_empty_at = None;
        drop(inner);
        self.broadcaster.detach();
        self.transition_notify.notify_waiters();
        log::info!("[Supervisor] idle timeout reached, session stopped");
    }

    pub async fn status(&self, idle_timeout: Duration) -> StatusSnapshot {
        let inner = self.inner.lock().await;
        let time_until_idle = match (inner.mode, inner.became_empty_at) {
            (Mode::Live, Some(became_empty_at)) => {
                Some(idle_timeout.saturating_sub(became_empty_at.elapsed()).as_secs())
            }
            _ => None,
        };
        StatusSnapshot {
            mode: inner.mode,
            connected_clients: self.broadcaster.count(),
            current_layout: inner.current_layout.clone(),
            last_layout: inner.last_layout.clone(),
            time_until_idle,
        }
    }

    /// Forces `mode` to `live` with no handle, for tests that need to drive
    /// the idle watchdog without actually spawning an encoder.
    #[cfg(test)]
    pub(crate) async fn force_live_for_test(&self) {
        let mut inner = self.inner.lock().await;
        inner.mode = Mode::Live;
        inner.became_empty_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Channel;
    use std::collections::BTreeMap;

    fn env() -> EncodeEnvironment {
        EncodeEnvironment {
            profile: EncoderProfile {
                name: "software".into(),
                codec: "h264".into(),
                preference: "cpu".into(),
                video_encode_args: vec!["-c:v".into(), "libx264".into()],
            },
            default_ua: "UA/1.0".into(),
            extra_headers: Vec::new(),
            inset_scale: 640,
            inset_margin: 40,
            legacy_audio_source_index: 0,
        }
    }

    fn pip_layout() -> LayoutConfig {
        let mut map = BTreeMap::new();
        map.insert("main".to_string(), "a".to_string());
        map.insert("inset".to_string(), "b".to_string());
        LayoutConfig {
            kind: crate::layout::LayoutKind::Pip,
            slot_to_channel: map,
            audio_source_slot: "main".into(),
            custom_slots: None,
            slot_volumes: BTreeMap::new(),
        }
    }

    async fn seeded_catalog() -> Arc<Catalog> {
        let catalog = Arc::new(Catalog::new("/nonexistent", "UA", Vec::new()));
        // Directly exercise the loader with in-memory content instead of a
        // real fetch, by constructing channels the way refresh() would.
        let a = Channel {
            id: "a".into(),
            name: "A".into(),
            upstream_url: "http://u/a".into(),
            icon_url: None,
            group: None,
            channel_number: None,
        };
        let b = Channel {
            id: "b".into(),
            name: "B".into(),
            upstream_url: "http://u/b".into(),
            icon_url: None,
            group: None,
            channel_number: None,
        };
        catalog.seed_for_test(vec![a, b]);
        catalog
    }

    #[tokio::test]
    async fn apply_layout_with_unknown_channel_does_not_change_status() {
        let catalog = Arc::new(Catalog::new("/nonexistent", "UA", Vec::new()));
        let broadcaster = Broadcaster::new();
        let supervisor = Supervisor::new(broadcaster, catalog, env());

        let err = supervisor.apply_layout(pip_layout()).await.unwrap_err();
        assert!(matches!(err, MultiviewError::UnknownChannel(_)));

        let status = supervisor.status(Duration::from_secs(60)).await;
        assert_eq!(status.mode, Mode::Idle);
        assert!(status.current_layout.is_none());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_preserves_last_layout() {
        let catalog = seeded_catalog().await;
        let broadcaster = Broadcaster::new();
        let supervisor = Supervisor::new(broadcaster, catalog, env());

        // Can't actually spawn ffmpeg in this environment's test sandbox, so
        // drive stop() directly against the idle supervisor: stop on idle
        // must be a harmless no-op, twice.
        supervisor.stop().await;
        supervisor.stop().await;
        let status = supervisor.status(Duration::from_secs(60)).await;
        assert_eq!(status.mode, Mode::Idle);
        assert!(status.last_layout.is_none());
    }

    #[tokio::test]
    async fn set_volume_without_active_layout_fails() {
        let catalog = seeded_catalog().await;
        let broadcaster = Broadcaster::new();
        let supervisor = Supervisor::new(broadcaster, catalog, env());

        let err = supervisor.set_volume("main", 0.5).await.unwrap_err();
        assert!(matches!(err, MultiviewError::NoActiveLayout));
    }

    #[tokio::test]
    async fn set_volume_out_of_range_is_rejected_before_touching_state() {
        let catalog = seeded_catalog().await;
        let broadcaster = Broadcaster::new();
        let supervisor = Supervisor::new(broadcaster, catalog, env());

        let err = supervisor.set_volume("main", 1.01).await.unwrap_err();
        assert!(matches!(err, MultiviewError::InvalidLayout(_)));
    }

    #[tokio::test]
    async fn cold_start_with_no_last_layout_and_empty_catalog_fails() {
        // No last_layout and an empty catalog: the legacy-index seed has
        // nothing to pick, so there is no layout to cold start from at all.
        let catalog = Arc::new(Catalog::new("/nonexistent", "UA", Vec::new()));
        let broadcaster = Broadcaster::new();
        let supervisor = Supervisor::new(broadcaster, catalog, env());

        let err = supervisor.cold_start_if_idle().await.unwrap_err();
        assert!(matches!(err, MultiviewError::ColdStartFailed(_)));
    }

    #[test]
    fn seed_layout_from_legacy_audio_source_returns_none_when_index_out_of_range() {
        let catalog = Arc::new(Catalog::new("/nonexistent", "UA", Vec::new()));
        let broadcaster = Broadcaster::new();
        let mut e = env();
        e.legacy_audio_source_index = 5;
        let supervisor = Supervisor::new(broadcaster, catalog, e);

        assert!(supervisor.seed_layout_from_legacy_audio_source().is_none());
    }

    #[tokio::test]
    async fn seed_layout_from_legacy_audio_source_builds_single_slot_layout() {
        let catalog = seeded_catalog().await;
        let broadcaster = Broadcaster::new();
        let mut e = env();
        e.legacy_audio_source_index = 1;
        let supervisor = Supervisor::new(broadcaster, catalog, e);

        let seed = supervisor.seed_layout_from_legacy_audio_source().unwrap();
        assert_eq!(seed.kind, crate::layout::LayoutKind::Custom);
        assert_eq!(seed.audio_source_slot, "main");
        assert_eq!(seed.slot_to_channel.get("main"), Some(&"b".to_string()));
        let slots = seed.custom_slots.unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].width, CANVAS_WIDTH);
        assert_eq!(slots[0].height, CANVAS_HEIGHT);
    }

    #[tokio::test]
    async fn idle_watchdog_is_a_noop_while_idle() {
        let catalog = seeded_catalog().await;
        let broadcaster = Broadcaster::new();
        let supervisor = Supervisor::new(broadcaster, catalog, env());

        supervisor.idle_watchdog_tick(Duration::from_secs(0)).await;
        let status = supervisor.status(Duration::from_secs(60)).await;
        assert_eq!(status.mode, Mode::Idle);
    }
}
