//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the MPEG-TS container spec or by reference
//! timings called out in the design; changing them would break wire
//! compatibility or the documented behavior they model.

// ─────────────────────────────────────────────────────────────────────────────
// MPEG-TS
// ─────────────────────────────────────────────────────────────────────────────

/// Size in bytes of one MPEG-TS packet.
pub const MPEG_TS_PACKET_SIZE: usize = 188;

/// Reference pump read size: a multiple of `MPEG_TS_PACKET_SIZE` close to the
/// documented ~3.7 KB reference (188 * 20 = 3760).
pub const PUMP_READ_CHUNK_SIZE: usize = MPEG_TS_PACKET_SIZE * 20;

/// Per-sink bounded queue depth (in chunks). Policy on overflow is drop-consumer,
/// never drop-message.
pub const SINK_QUEUE_CAPACITY: usize = 100;

// ─────────────────────────────────────────────────────────────────────────────
// Session Supervisor timing
// ─────────────────────────────────────────────────────────────────────────────

/// Interval between idle-watchdog observations.
pub const IDLE_WATCHDOG_INTERVAL_SECS: u64 = 5;

/// Default idle timeout (seconds) before a live session with no clients
/// transitions back to idle. Overridable via `IDLE_TIMEOUT`.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

/// Cold-start warm-up: time to let upstream inputs connect and the transcoder
/// begin emitting PAT/PMT before the first sink is allowed to subscribe.
pub const COLD_START_WARMUP_SECS: u64 = 5;

/// Deadline for graceful (interrupt) encoder shutdown before a forceful kill.
pub const ENCODER_STOP_GRACE_SECS: u64 = 3;

/// I/O timeout on dequeuing from a client sink; bounds how long disconnect
/// detection and handle-liveness re-checks can lag.
pub const SINK_DEQUEUE_TIMEOUT_SECS: u64 = 1;

/// Upstream input read timeout passed to the transcoder's reconnect policy.
pub const UPSTREAM_READ_TIMEOUT_SECS: u64 = 15;

// ─────────────────────────────────────────────────────────────────────────────
// Layout geometry
// ─────────────────────────────────────────────────────────────────────────────

/// Output canvas width.
pub const CANVAS_WIDTH: u32 = 1920;

/// Output canvas height.
pub const CANVAS_HEIGHT: u32 = 1080;

/// Output frame rate.
pub const OUTPUT_FPS: u32 = 30;

/// Border width (px) drawn around inset overlays.
pub const INSET_BORDER_PX: u32 = 8;

/// Maximum number of custom-layout slots.
pub const MAX_CUSTOM_SLOTS: usize = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Audio
// ─────────────────────────────────────────────────────────────────────────────

/// Output audio sample rate (Hz).
pub const AUDIO_SAMPLE_RATE: u32 = 48000;

/// Output audio channel count (stereo).
pub const AUDIO_CHANNELS: u16 = 2;

// ─────────────────────────────────────────────────────────────────────────────
// Application identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name used in the reserved catalog sentinel check.
pub const APP_NAME: &str = "Multiview";

/// Reserved channel display name excluded from the catalog at load time to
/// prevent an M3U entry that points back at this tuner from being ingested.
pub const RESERVED_CHANNEL_NAME: &str = "Multiview";

/// Maximum bytes proxied through `/proxy-image` for a single request.
pub const MAX_PROXY_IMAGE_BYTES: u64 = 8 * 1024 * 1024;
