//! The actual argv-building logic behind [`super::compile`].

use std::collections::BTreeMap;

use super::{CustomSlot, EncoderProfile, LayoutConfig, LayoutKind};
use crate::error::{MultiviewError, MultiviewResult};
use crate::protocol_constants::{AUDIO_SAMPLE_RATE, CANVAS_HEIGHT, CANVAS_WIDTH, INSET_BORDER_PX, OUTPUT_FPS};

const INSET_SCALE_DEFAULT: u32 = 640;
const INSET_MARGIN_DEFAULT: u32 = 40;

/// Compiles a [`LayoutConfig`] into a transcoder argv.
///
/// `channel_urls` maps channel id → upstream URL (already resolved by the
/// caller via the catalog). `inset_scale`/`inset_margin` parameterize the
/// `pip`/`dvd_pip` geometry per the `INSET_SCALE`/`INSET_MARGIN` environment
/// settings; pass `None` to use the documented defaults.
#[allow(clippy::too_many_arguments)]
pub fn compile(
    cfg: &LayoutConfig,
    channel_urls: &BTreeMap<String, String>,
    profile: &EncoderProfile,
    default_ua: &str,
    extra_headers: &[(String, String)],
) -> MultiviewResult<Vec<String>> {
    compile_with_geometry(
        cfg,
        channel_urls,
        profile,
        default_ua,
        extra_headers,
        INSET_SCALE_DEFAULT,
        INSET_MARGIN_DEFAULT,
    )
}

/// As [`compile`] but with explicit inset geometry overrides.
#[allow(clippy::too_many_arguments)]
pub fn compile_with_geometry(
    cfg: &LayoutConfig,
    channel_urls: &BTreeMap<String, String>,
    profile: &EncoderProfile,
    default_ua: &str,
    extra_headers: &[(String, String)],
    inset_scale: u32,
    inset_margin: u32,
) -> MultiviewResult<Vec<String>> {
    let (slots, volumes) = cfg.validate()?;

    let mut urls = Vec::with_capacity(slots.len());
    for slot in &slots {
        let channel_id = cfg
            .slot_to_channel
            .get(slot)
            .expect("slot presence checked by validate()");
        let url = channel_urls
            .get(channel_id)
            .ok_or_else(|| MultiviewError::UnknownChannel(channel_id.clone()))?;
        urls.push(url.clone());
    }

    let audio_index = slots
        .iter()
        .position(|s| s == &cfg.audio_source_slot)
        .expect("audio_source_slot membership checked by validate()");

    let mut argv = vec!["ffmpeg".to_string(), "-y".to_string()];
    for url in &urls {
        argv.extend(input_args(url, default_ua, extra_headers));
    }

    let sorted_custom_slots = match cfg.kind {
        LayoutKind::Custom => {
            let mut s = cfg
                .custom_slots
                .clone()
                .expect("custom kind always carries custom_slots, checked by validate()");
            s.sort_by(|a, b| (b.width as u64 * b.height as u64).cmp(&(a.width as u64 * a.height as u64)));
            Some(s)
        }
        _ => None,
    };

    let video_filter = video_filter_graph(cfg.kind, sorted_custom_slots.as_deref(), slots.len(), inset_scale, inset_margin);
    let audio_filter = audio_filter_graph(&slots, &volumes);
    let filter_complex = format!("{video_filter};{audio_filter}");

    argv.push("-filter_complex".to_string());
    argv.push(filter_complex);
    argv.push("-map".to_string());
    argv.push("[vout]".to_string());
    argv.push("-map".to_string());
    argv.push("[aout]".to_string());
    argv.extend(profile.video_encode_args.clone());
    argv.push("-r".to_string());
    argv.push(OUTPUT_FPS.to_string());
    argv.push("-c:a".to_string());
    argv.push("aac".to_string());
    argv.push("-b:a".to_string());
    argv.push("192k".to_string());
    argv.push("-f".to_string());
    argv.push("mpegts".to_string());
    argv.push("pipe:1".to_string());

    let _ = audio_index; // audio source is selected via the volume map, not a direct map flag
    Ok(argv)
}

fn input_args(url: &str, default_ua: &str, extra_headers: &[(String, String)]) -> Vec<String> {
    let mut args = vec![
        "-reconnect".to_string(),
        "1".to_string(),
        "-reconnect_streamed".to_string(),
        "1".to_string(),
        "-reconnect_delay_max".to_string(),
        "5".to_string(),
        "-rw_timeout".to_string(),
        (crate::protocol_constants::UPSTREAM_READ_TIMEOUT_SECS * 1_000_000).to_string(),
        "-thread_queue_size".to_string(),
        "1024".to_string(),
        "-user_agent".to_string(),
        default_ua.to_string(),
    ];
    if !extra_headers.is_empty() {
        let header_block = extra_headers
            .iter()
            .map(|(k, v)| format!("{k}: {v}\r\n"))
            .collect::<String>();
        args.push("-headers".to_string());
        args.push(header_block);
    }
    args.push("-i".to_string());
    args.push(url.to_string());
    args
}

fn scale_pad(input_label: &str, w: u32, h: u32, out_label: &str) -> String {
    format!(
        "[{input_label}]scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black[{out_label}]"
    )
}

fn scale_pad_border(input_label: &str, w: u32, h: u32, out_label: &str) -> String {
    let inner_w = w - 2 * INSET_BORDER_PX;
    let inner_h = h - 2 * INSET_BORDER_PX;
    format!(
        "[{input_label}]scale={inner_w}:{inner_h}:force_original_aspect_ratio=decrease,pad={inner_w}:{inner_h}:(ow-iw)/2:(oh-ih)/2:color=black,pad={w}:{h}:{b}:{b}:color=white[{out_label}]",
        b = INSET_BORDER_PX
    )
}

fn video_filter_graph(
    kind: LayoutKind,
    custom_slots: Option<&[CustomSlot]>,
    input_count: usize,
    inset_scale: u32,
    inset_margin: u32,
) -> String {
    match kind {
        LayoutKind::Pip | LayoutKind::DvdPip => {
            let inset_h = inset_scale * CANVAS_HEIGHT / CANVAS_WIDTH;
            let mut parts = vec![
                scale_pad("0:v", CANVAS_WIDTH, CANVAS_HEIGHT, "base"),
                scale_pad_border("1:v", inset_scale, inset_h, "inset"),
            ];
            let overlay_xy = if kind == LayoutKind::DvdPip {
                format!(
                    "x='abs(mod(t*100,2*(W-w-{m}))-(W-w-{m}))':y='abs(mod(t*75,2*(H-h-{m}))-(H-h-{m}))'",
                    m = inset_margin
                )
            } else {
                format!("x=W-w-{m}:y=H-h-{m}", m = inset_margin)
            };
            parts.push(format!("[base][inset]overlay={overlay_xy}[vout]"));
            parts.join(";")
        }
        LayoutKind::SplitH => {
            let w = CANVAS_WIDTH / 2;
            format!(
                "{};{};[left][right]hstack=inputs=2[vout]",
                scale_pad("0:v", w, CANVAS_HEIGHT, "left"),
                scale_pad("1:v", w, CANVAS_HEIGHT, "right")
            )
        }
        LayoutKind::SplitV => {
            let h = CANVAS_HEIGHT / 2;
            format!(
                "{};{};[top][bottom]vstack=inputs=2[vout]",
                scale_pad("0:v", CANVAS_WIDTH, h, "top"),
                scale_pad("1:v", CANVAS_WIDTH, h, "bottom")
            )
        }
        LayoutKind::Grid2x2 => {
            let w = CANVAS_WIDTH / 2;
            let h = CANVAS_HEIGHT / 2;
            format!(
                "{};{};{};{};[c0][c1]hstack=inputs=2[row0];[c2][c3]hstack=inputs=2[row1];[row0][row1]vstack=inputs=2[vout]",
                scale_pad("0:v", w, h, "c0"),
                scale_pad("1:v", w, h, "c1"),
                scale_pad("2:v", w, h, "c2"),
                scale_pad("3:v", w, h, "c3"),
            )
        }
        LayoutKind::MultiPip2 | LayoutKind::MultiPip3 | LayoutKind::MultiPip4 => {
            let n = input_count - 1;
            let (iw, ih) = if n == 2 { (480, 270) } else { (384, 216) };
            let gap = 20u32;
            let mut parts = vec![scale_pad("0:v", CANVAS_WIDTH, CANVAS_HEIGHT, "base")];
            let mut current = "base".to_string();
            for i in 0..n {
                let label = format!("inset{i}");
                parts.push(scale_pad_border(&format!("{}:v", i + 1), iw, ih, &label));
                let wraps_to_top_right = n == 4 && i == 3;
                let y = if wraps_to_top_right {
                    gap
                } else {
                    gap + (i as u32) * (ih + gap)
                };
                let next = if i + 1 == n { "vout".to_string() } else { format!("ov{i}") };
                parts.push(format!(
                    "[{current}][{label}]overlay=x=W-w-{gap}:y={y}[{next}]"
                ));
                current = next;
            }
            parts.join(";")
        }
        LayoutKind::Custom => {
            let slots = custom_slots.expect("custom kind always has sorted custom_slots");
            let mut parts = vec![format!(
                "color=c=black:s={CANVAS_WIDTH}x{CANVAS_HEIGHT}:r={OUTPUT_FPS}[base]"
            )];
            let mut current = "base".to_string();
            for (i, slot) in slots.iter().enumerate() {
                let label = format!("slot{i}");
                if slot.border {
                    parts.push(scale_pad_border(&format!("{i}:v"), slot.width, slot.height, &label));
                } else {
                    parts.push(scale_pad(&format!("{i}:v"), slot.width, slot.height, &label));
                }
                let (x, y) = if slot.border {
                    (slot.x.saturating_sub(INSET_BORDER_PX), slot.y.saturating_sub(INSET_BORDER_PX))
                } else {
                    (slot.x, slot.y)
                };
                let next = if i + 1 == slots.len() { "vout".to_string() } else { format!("ov{i}") };
                parts.push(format!("[{current}][{label}]overlay=x={x}:y={y}[{next}]"));
                current = next;
            }
            parts.join(";")
        }
    }
}

fn audio_filter_graph(slots: &[String], volumes: &BTreeMap<String, f32>) -> String {
    let mut parts = Vec::new();
    let mut labels = Vec::new();
    for (i, slot) in slots.iter().enumerate() {
        let vol = volumes.get(slot).copied().unwrap_or(0.0);
        let label = format!("a{i}");
        parts.push(format!(
            "[{i}:a]aformat=sample_rates={AUDIO_SAMPLE_RATE}:channel_layouts=stereo,volume={vol}[{label}]"
        ));
        labels.push(format!("[{label}]"));
    }
    if labels.len() == 1 {
        parts.push(format!("{}anull[aout]", labels[0]));
    } else {
        parts.push(format!(
            "{}amix=inputs={}:duration=longest:normalize=0[aout]",
            labels.concat(),
            labels.len()
        ));
    }
    parts.join(";")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutConfig;

    fn profile() -> EncoderProfile {
        EncoderProfile {
            name: "software".into(),
            codec: "h264".into(),
            preference: "cpu".into(),
            video_encode_args: vec!["-c:v".into(), "libx264".into()],
        }
    }

    fn pip_config() -> LayoutConfig {
        let mut map = BTreeMap::new();
        map.insert("main".to_string(), "a".to_string());
        map.insert("inset".to_string(), "b".to_string());
        LayoutConfig {
            kind: LayoutKind::Pip,
            slot_to_channel: map,
            audio_source_slot: "main".into(),
            custom_slots: None,
            slot_volumes: BTreeMap::new(),
        }
    }

    fn urls() -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();
        m.insert("a".to_string(), "http://u/a".to_string());
        m.insert("b".to_string(), "http://u/b".to_string());
        m
    }

    #[test]
    fn pip_argv_contains_two_inputs_and_overlay() {
        let argv = compile(&pip_config(), &urls(), &profile(), "UA/1.0", &[]).unwrap();
        assert_eq!(argv[0], "ffmpeg");
        let joined = argv.join(" ");
        assert_eq!(argv.iter().filter(|a| a.as_str() == "-i").count(), 2);
        assert!(joined.contains("http://u/a"));
        assert!(joined.contains("http://u/b"));
        assert!(joined.contains("overlay"));
        assert!(joined.contains("[vout]"));
        assert!(joined.contains("[aout]"));
    }

    #[test]
    fn unknown_channel_in_url_map_is_rejected() {
        let mut urls = BTreeMap::new();
        urls.insert("a".to_string(), "http://u/a".to_string());
        // "b" deliberately missing.
        let err = compile(&pip_config(), &urls, &profile(), "UA", &[]).unwrap_err();
        assert!(matches!(err, MultiviewError::UnknownChannel(ref id) if id == "b"));
    }

    #[test]
    fn custom_layout_overlays_in_area_descending_order() {
        let slots = vec![
            CustomSlot { id: "a".into(), x: 0, y: 0, width: 1920, height: 1080, border: false },
            CustomSlot { id: "b".into(), x: 100, y: 100, width: 400, height: 300, border: false },
        ];
        let mut channels = BTreeMap::new();
        channels.insert("a".to_string(), "a".to_string());
        channels.insert("b".to_string(), "b".to_string());
        let cfg = LayoutConfig {
            kind: LayoutKind::Custom,
            slot_to_channel: channels,
            audio_source_slot: "a".into(),
            custom_slots: Some(slots),
            slot_volumes: BTreeMap::new(),
        };
        let argv = compile(&cfg, &urls(), &profile(), "UA", &[]).unwrap();
        let filter = argv.iter().find(|a| a.contains("overlay")).unwrap();
        let pos_a = filter.find("slot0").unwrap();
        let pos_b = filter.find("slot1").unwrap();
        assert!(pos_a < pos_b, "larger slot (a) must be composited before smaller slot (b)");
    }

    #[test]
    fn single_audio_input_bypasses_amix() {
        let mut map = BTreeMap::new();
        map.insert("main".to_string(), "a".to_string());
        let cfg = LayoutConfig {
            kind: LayoutKind::Custom,
            slot_to_channel: map,
            audio_source_slot: "main".into(),
            custom_slots: Some(vec![CustomSlot { id: "main".into(), x: 0, y: 0, width: 1920, height: 1080, border: false }]),
            slot_volumes: BTreeMap::new(),
        };
        let mut urls = BTreeMap::new();
        urls.insert("a".to_string(), "http://u/a".to_string());
        let argv = compile(&cfg, &urls, &profile(), "UA", &[]).unwrap();
        let filter = argv.iter().find(|a| a.contains("[aout]")).unwrap();
        assert!(filter.contains("anull"));
        assert!(!filter.contains("amix"));
    }

    fn multi_pip_config(kind: LayoutKind, n: usize) -> (LayoutConfig, BTreeMap<String, String>) {
        let mut map = BTreeMap::new();
        let mut urls = BTreeMap::new();
        map.insert("main".to_string(), "main".to_string());
        urls.insert("main".to_string(), "http://u/main".to_string());
        for i in 1..=n {
            let slot = format!("inset{i}");
            map.insert(slot.clone(), slot.clone());
            urls.insert(slot.clone(), format!("http://u/{slot}"));
        }
        let cfg = LayoutConfig {
            kind,
            slot_to_channel: map,
            audio_source_slot: "main".into(),
            custom_slots: None,
            slot_volumes: BTreeMap::new(),
        };
        (cfg, urls)
    }

    #[test]
    fn multi_pip_2_insets_are_480x270() {
        let (cfg, urls) = multi_pip_config(LayoutKind::MultiPip2, 2);
        let argv = compile(&cfg, &urls, &profile(), "UA", &[]).unwrap();
        let filter = argv.iter().find(|a| a.contains("overlay")).unwrap();
        assert!(filter.contains("pad=480:270"), "N=2 insets must be 480x270: {filter}");
        assert!(!filter.contains("pad=384:216"));
    }

    #[test]
    fn multi_pip_3_insets_are_384x216_and_do_not_wrap() {
        let (cfg, urls) = multi_pip_config(LayoutKind::MultiPip3, 3);
        let argv = compile(&cfg, &urls, &profile(), "UA", &[]).unwrap();
        let filter = argv.iter().find(|a| a.contains("overlay")).unwrap();
        assert!(filter.contains("pad=384:216"), "N=3 insets must be 384x216: {filter}");
        assert!(!filter.contains("pad=480:270"));
        // last inset (inset2, i=2) stacks below the others, it does not wrap.
        assert!(filter.contains("[inset2]overlay=x=W-w-20:y=492["));
    }

    #[test]
    fn multi_pip_4_last_inset_wraps_to_top_right() {
        let (cfg, urls) = multi_pip_config(LayoutKind::MultiPip4, 4);
        let argv = compile(&cfg, &urls, &profile(), "UA", &[]).unwrap();
        let filter = argv.iter().find(|a| a.contains("overlay")).unwrap();
        assert!(filter.contains("pad=384:216"), "N=4 insets must be 384x216: {filter}");
        // insets 0..2 stack normally; the last one (inset3, i=3) wraps back to
        // the top-right corner instead of continuing the stack.
        assert!(filter.contains("[inset0]overlay=x=W-w-20:y=20["));
        assert!(filter.contains("[inset1]overlay=x=W-w-20:y=256["));
        assert!(filter.contains("[inset2]overlay=x=W-w-20:y=492["));
        assert!(filter.contains("[inset3]overlay=x=W-w-20:y=20["));
    }
}
