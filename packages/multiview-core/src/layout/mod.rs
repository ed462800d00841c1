//! Layout Compiler (C2): pure, I/O-free translation of a declarative layout
//! into a transcoder invocation (argv).
//!
//! [`compile`] is the only entry point; everything else in this module is
//! data. No function here performs I/O or spawns anything.

mod compiler;

pub use compiler::{compile, compile_with_geometry};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{MultiviewError, MultiviewResult};
use crate::protocol_constants::MAX_CUSTOM_SLOTS;

/// Tagged variant identifying the composited video arrangement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutKind {
    #[serde(rename = "pip")]
    Pip,
    #[serde(rename = "dvd_pip")]
    DvdPip,
    #[serde(rename = "split_h")]
    SplitH,
    #[serde(rename = "split_v")]
    SplitV,
    #[serde(rename = "grid_2x2")]
    Grid2x2,
    #[serde(rename = "multi_pip_2")]
    MultiPip2,
    #[serde(rename = "multi_pip_3")]
    MultiPip3,
    #[serde(rename = "multi_pip_4")]
    MultiPip4,
    #[serde(rename = "custom")]
    Custom,
}

impl LayoutKind {
    /// The fixed, ordered slot ids for non-custom kinds; `None` for `custom`,
    /// whose slot order comes from the caller's `custom_slots` list instead.
    pub fn fixed_slots(self) -> Option<&'static [&'static str]> {
        match self {
            Self::Pip | Self::DvdPip => Some(&["main", "inset"]),
            Self::SplitH | Self::SplitV => Some(&["left", "right"]),
            Self::Grid2x2 => Some(&["slot1", "slot2", "slot3", "slot4"]),
            Self::MultiPip2 => Some(&["main", "inset1", "inset2"]),
            Self::MultiPip3 => Some(&["main", "inset1", "inset2", "inset3"]),
            Self::MultiPip4 => Some(&["main", "inset1", "inset2", "inset3", "inset4"]),
            Self::Custom => None,
        }
    }
}

/// A free-form rectangle used by `LayoutKind::Custom`. Coordinates and sizes
/// are in output-canvas pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomSlot {
    pub id: String,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub border: bool,
}

impl CustomSlot {
    fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// The declarative layout a client asks the supervisor to apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(rename = "layout")]
    pub kind: LayoutKind,
    #[serde(rename = "streams")]
    pub slot_to_channel: BTreeMap<String, String>,
    #[serde(rename = "audio_source")]
    pub audio_source_slot: String,
    #[serde(default)]
    pub custom_slots: Option<Vec<CustomSlot>>,
    #[serde(default, rename = "audio_volumes")]
    pub slot_volumes: BTreeMap<String, f32>,
}

impl LayoutConfig {
    /// The ordered slot ids this layout requires, validating kind/custom_slots
    /// consistency and slot-count bounds along the way.
    pub fn ordered_slots(&self) -> MultiviewResult<Vec<String>> {
        match self.kind {
            LayoutKind::Custom => {
                let slots = self.custom_slots.as_ref().ok_or_else(|| {
                    MultiviewError::InvalidLayout("custom layout requires custom_slots".into())
                })?;
                if slots.is_empty() || slots.len() > MAX_CUSTOM_SLOTS {
                    return Err(MultiviewError::InvalidLayout(format!(
                        "custom layout must have between 1 and {} slots, got {}",
                        MAX_CUSTOM_SLOTS,
                        slots.len()
                    )));
                }
                let mut sorted = slots.clone();
                sorted.sort_by(|a, b| b.area().cmp(&a.area()));
                Ok(sorted.into_iter().map(|s| s.id).collect())
            }
            kind => {
                if self.custom_slots.is_some() {
                    return Err(MultiviewError::InvalidLayout(
                        "custom_slots is only valid with kind=custom".into(),
                    ));
                }
                Ok(kind
                    .fixed_slots()
                    .expect("non-custom kind always has fixed slots")
                    .iter()
                    .map(|s| s.to_string())
                    .collect())
            }
        }
    }

    /// Validates the full set of C2 invariants and returns the normalized
    /// per-slot volume map (missing slot → 1.0 for slot index 0, 0.0
    /// otherwise).
    pub fn validate(&self) -> MultiviewResult<(Vec<String>, BTreeMap<String, f32>)> {
        let slots = self.ordered_slots()?;

        for slot in &slots {
            if !self.slot_to_channel.contains_key(slot) {
                return Err(MultiviewError::InvalidLayout(format!(
                    "missing channel assignment for slot '{slot}'"
                )));
            }
        }

        if !slots.iter().any(|s| s == &self.audio_source_slot) {
            return Err(MultiviewError::InvalidLayout(format!(
                "audio_source_slot '{}' is not one of this layout's slots",
                self.audio_source_slot
            )));
        }

        for (slot, vol) in &self.slot_volumes {
            if !(0.0..=1.0).contains(vol) {
                return Err(MultiviewError::InvalidLayout(format!(
                    "volume for slot '{slot}' must be in [0, 1], got {vol}"
                )));
            }
        }

        let mut volumes = BTreeMap::new();
        for (i, slot) in slots.iter().enumerate() {
            let default = if i == 0 { 1.0 } else { 0.0 };
            let v = self.slot_volumes.get(slot).copied().unwrap_or(default);
            volumes.insert(slot.clone(), v);
        }

        Ok((slots, volumes))
    }
}

/// A pluggable encoder profile. Resolved once at startup from a static table
/// keyed by preference string; never probed at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderProfile {
    pub name: String,
    pub codec: String,
    pub preference: String,
    pub video_encode_args: Vec<String>,
}

/// Resolves an `ENCODER_PREFERENCE` string to a static encoder profile. No
/// hardware is probed: `auto` and any unrecognized preference both fall back
/// to the software encoder.
pub fn resolve_encoder_profile(preference: &str) -> EncoderProfile {
    match preference {
        "nvidia" => EncoderProfile {
            name: "NVIDIA NVENC".into(),
            codec: "h264_nvenc".into(),
            preference: "nvidia".into(),
            video_encode_args: vec![
                "-c:v".into(), "h264_nvenc".into(),
                "-preset".into(), "p4".into(),
                "-b:v".into(), "6M".into(),
            ],
        },
        "intel" => EncoderProfile {
            name: "Intel Quick Sync".into(),
            codec: "h264_qsv".into(),
            preference: "intel".into(),
            video_encode_args: vec![
                "-c:v".into(), "h264_qsv".into(),
                "-preset".into(), "medium".into(),
                "-b:v".into(), "6M".into(),
            ],
        },
        "amd" => EncoderProfile {
            name: "AMD AMF".into(),
            codec: "h264_amf".into(),
            preference: "amd".into(),
            video_encode_args: vec![
                "-c:v".into(), "h264_amf".into(),
                "-quality".into(), "balanced".into(),
                "-b:v".into(), "6M".into(),
            ],
        },
        _ => EncoderProfile {
            name: "Software (libx264)".into(),
            codec: "h264".into(),
            preference: "cpu".into(),
            video_encode_args: vec![
                "-c:v".into(), "libx264".into(),
                "-preset".into(), "veryfast".into(),
                "-b:v".into(), "6M".into(),
            ],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> EncoderProfile {
        EncoderProfile {
            name: "software".into(),
            codec: "h264".into(),
            preference: "cpu".into(),
            video_encode_args: vec!["-c:v".into(), "libx264".into()],
        }
    }

    #[test]
    fn pip_has_fixed_slots_main_inset() {
        assert_eq!(LayoutKind::Pip.fixed_slots(), Some(["main", "inset"].as_slice()));
    }

    #[test]
    fn custom_with_zero_slots_is_invalid() {
        let cfg = LayoutConfig {
            kind: LayoutKind::Custom,
            slot_to_channel: BTreeMap::new(),
            audio_source_slot: "a".into(),
            custom_slots: Some(vec![]),
            slot_volumes: BTreeMap::new(),
        };
        assert!(matches!(cfg.validate(), Err(MultiviewError::InvalidLayout(_))));
    }

    #[test]
    fn custom_with_six_slots_is_invalid() {
        let slots: Vec<CustomSlot> = (0..6)
            .map(|i| CustomSlot {
                id: format!("s{i}"),
                x: 0,
                y: 0,
                width: 10,
                height: 10,
                border: false,
            })
            .collect();
        let cfg = LayoutConfig {
            kind: LayoutKind::Custom,
            slot_to_channel: BTreeMap::new(),
            audio_source_slot: "s0".into(),
            custom_slots: Some(slots),
            slot_volumes: BTreeMap::new(),
        };
        assert!(matches!(cfg.validate(), Err(MultiviewError::InvalidLayout(_))));
    }

    #[test]
    fn audio_source_not_in_slots_is_invalid() {
        let mut map = BTreeMap::new();
        map.insert("main".to_string(), "a".to_string());
        map.insert("inset".to_string(), "b".to_string());
        let cfg = LayoutConfig {
            kind: LayoutKind::Pip,
            slot_to_channel: map,
            audio_source_slot: "nonexistent".into(),
            custom_slots: None,
            slot_volumes: BTreeMap::new(),
        };
        assert!(matches!(cfg.validate(), Err(MultiviewError::InvalidLayout(_))));
    }

    #[test]
    fn missing_slot_assignment_is_invalid() {
        let mut map = BTreeMap::new();
        map.insert("main".to_string(), "a".to_string());
        let cfg = LayoutConfig {
            kind: LayoutKind::Pip,
            slot_to_channel: map,
            audio_source_slot: "main".into(),
            custom_slots: None,
            slot_volumes: BTreeMap::new(),
        };
        assert!(matches!(cfg.validate(), Err(MultiviewError::InvalidLayout(_))));
    }

    #[test]
    fn volume_out_of_range_is_invalid() {
        let mut map = BTreeMap::new();
        map.insert("main".to_string(), "a".to_string());
        map.insert("inset".to_string(), "b".to_string());
        let mut volumes = BTreeMap::new();
        volumes.insert("inset".to_string(), 1.01);
        let cfg = LayoutConfig {
            kind: LayoutKind::Pip,
            slot_to_channel: map,
            audio_source_slot: "main".into(),
            custom_slots: None,
            slot_volumes: volumes,
        };
        assert!(matches!(cfg.validate(), Err(MultiviewError::InvalidLayout(_))));
    }

    #[test]
    fn default_volumes_mute_all_but_first_slot() {
        let mut map = BTreeMap::new();
        map.insert("main".to_string(), "a".to_string());
        map.insert("inset".to_string(), "b".to_string());
        let cfg = LayoutConfig {
            kind: LayoutKind::Pip,
            slot_to_channel: map,
            audio_source_slot: "main".into(),
            custom_slots: None,
            slot_volumes: BTreeMap::new(),
        };
        let (slots, volumes) = cfg.validate().unwrap();
        assert_eq!(slots, vec!["main", "inset"]);
        assert_eq!(volumes["main"], 1.0);
        assert_eq!(volumes["inset"], 0.0);
    }

    #[test]
    fn custom_slots_sorted_by_area_descending() {
        let slots = vec![
            CustomSlot { id: "small".into(), x: 100, y: 100, width: 400, height: 300, border: false },
            CustomSlot { id: "big".into(), x: 0, y: 0, width: 1920, height: 1080, border: false },
        ];
        let mut channels = BTreeMap::new();
        channels.insert("small".to_string(), "b".to_string());
        channels.insert("big".to_string(), "a".to_string());
        let cfg = LayoutConfig {
            kind: LayoutKind::Custom,
            slot_to_channel: channels,
            audio_source_slot: "big".into(),
            custom_slots: Some(slots),
            slot_volumes: BTreeMap::new(),
        };
        let ordered = cfg.ordered_slots().unwrap();
        assert_eq!(ordered, vec!["big", "small"]);
    }

    #[test]
    fn same_inputs_produce_byte_identical_argv() {
        let mut map = BTreeMap::new();
        map.insert("main".to_string(), "a".to_string());
        map.insert("inset".to_string(), "b".to_string());
        let cfg = LayoutConfig {
            kind: LayoutKind::Pip,
            slot_to_channel: map,
            audio_source_slot: "main".into(),
            custom_slots: None,
            slot_volumes: BTreeMap::new(),
        };
        let mut urls = BTreeMap::new();
        urls.insert("a".to_string(), "http://u/a".to_string());
        urls.insert("b".to_string(), "http://u/b".to_string());

        let first = compile(&cfg, &urls, &profile(), "UA", &[]).unwrap();
        let second = compile(&cfg, &urls, &profile(), "UA", &[]).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unrecognized_preference_falls_back_to_software() {
        let profile = resolve_encoder_profile("quantum");
        assert_eq!(profile.preference, "cpu");
        assert!(profile.video_encode_args.contains(&"libx264".to_string()));
    }

    #[test]
    fn auto_preference_is_software() {
        let profile = resolve_encoder_profile("auto");
        assert_eq!(profile.preference, "cpu");
    }

    #[test]
    fn nvidia_preference_resolves_to_nvenc() {
        let profile = resolve_encoder_profile("nvidia");
        assert_eq!(profile.codec, "h264_nvenc");
    }
}
