//! Turning an ordered list of clips into one video.
//!
//! Planning is pure: validation, tail trimming, crossfade offsets and the
//! FFmpeg filtergraph text are computed here and handed to a [`Compositor`]
//! which does the actual decoding and encoding.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::capture::MediaInspector;
use crate::error::ConcatError;
use crate::seed::Resolution;
use crate::session::ClipArtifact;

pub const DEFAULT_FPS: u32 = 30;

#[derive(Debug, Clone)]
pub struct ConcatOptions {
    /// Seconds of overlap between adjacent clips; `0` is a hard cut.
    pub crossfade: f64,
    pub audio: Option<PathBuf>,
    pub resolution: Resolution,
    pub fps: u32,
    /// Caption burned into the whole output.
    pub overlay: Option<TextOverlay>,
}

impl Default for ConcatOptions {
    fn default() -> Self {
        Self {
            crossfade: 0.0,
            audio: None,
            resolution: Resolution::LANDSCAPE,
            fps: DEFAULT_FPS,
            overlay: None,
        }
    }
}

/// Where a caption sits in the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayPosition {
    TopLeft,
    TopCenter,
    TopRight,
    CenterLeft,
    Center,
    CenterRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
}

/// Distance from the frame edge, in pixels.
const OVERLAY_MARGIN: u32 = 10;

impl OverlayPosition {
    /// `drawtext` x and y expressions.
    fn expressions(self) -> (String, String) {
        use OverlayPosition::*;
        let x = match self {
            TopLeft | CenterLeft | BottomLeft => OVERLAY_MARGIN.to_string(),
            TopCenter | Center | BottomCenter => "(w-text_w)/2".to_string(),
            TopRight | CenterRight | BottomRight => format!("w-text_w-{OVERLAY_MARGIN}"),
        };
        let y = match self {
            TopLeft | TopCenter | TopRight => OVERLAY_MARGIN.to_string(),
            CenterLeft | Center | CenterRight => "(h-text_h)/2".to_string(),
            BottomLeft | BottomCenter | BottomRight => format!("h-text_h-{OVERLAY_MARGIN}"),
        };
        (x, y)
    }
}

impl FromStr for OverlayPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use OverlayPosition::*;
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "top-left" => TopLeft,
            "top-center" => TopCenter,
            "top-right" => TopRight,
            "center-left" => CenterLeft,
            "center" => Center,
            "center-right" => CenterRight,
            "bottom-left" => BottomLeft,
            "bottom-center" => BottomCenter,
            "bottom-right" => BottomRight,
            other => return Err(format!("unknown position {other:?}")),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextOverlay {
    pub text: String,
    pub position: OverlayPosition,
    pub font_size: u32,
    /// Any FFmpeg colour: a name, `#RRGGBB` or `0xRRGGBB`.
    pub color: String,
    /// Fontconfig family name; FFmpeg's default font when `None`.
    pub font: Option<String>,
}

impl TextOverlay {
    fn drawtext(&self) -> String {
        let (x, y) = self.position.expressions();
        let mut filter = format!(
            "drawtext=text={text}:expansion=none:fontsize={size}:fontcolor={color}:x={x}:y={y}",
            text = escape_filter_value(&self.text),
            size = self.font_size,
            color = escape_filter_value(&self.color),
        );
        if let Some(font) = &self.font {
            let _ = write!(filter, ":font={}", escape_filter_value(font));
        }
        filter
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedSegment {
    pub path: PathBuf,
    /// Seconds of this clip that reach the output, after trimming.
    pub duration: f64,
    /// Output time at which the transition into the next clip starts.
    pub transition_offset: Option<f64>,
}

/// Everything a compositor needs to render one output.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcatenationPlan {
    pub segments: Vec<PlannedSegment>,
    pub crossfade: f64,
    pub audio: Option<PathBuf>,
    pub resolution: Resolution,
    pub fps: u32,
    pub overlay: Option<TextOverlay>,
    pub total_duration: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinalVideo {
    pub path: PathBuf,
    pub duration: f64,
    pub segments: usize,
}

#[cfg_attr(test, mockall::automock)]
pub trait Compositor: Send + Sync {
    fn render(&self, plan: &ConcatenationPlan, output: &Path) -> anyhow::Result<()>;
}

/// Re-probes every clip and keeps the playable ones in order.
pub fn validate_clips<M>(inspector: &M, clips: &[ClipArtifact]) -> Vec<ClipArtifact>
where
    M: MediaInspector + ?Sized,
{
    clips
        .iter()
        .filter_map(|clip| {
            if !clip.path.is_file() {
                tracing::warn!(path = %clip.path.display(), "Dropping clip: file is missing");
                return None;
            }
            match inspector.probe_duration(&clip.path) {
                Some(duration) if duration > 0.0 => Some(ClipArtifact {
                    duration,
                    ..clip.clone()
                }),
                other => {
                    tracing::warn!(
                        path = %clip.path.display(),
                        duration = ?other,
                        "Dropping clip: unreadable or zero length"
                    );
                    None
                }
            }
        })
        .collect()
}

/// Lays validated clips end to end.
///
/// With a crossfade every clip except the last loses one frame interval from
/// its tail, since each generated clip opens on the previous clip's final
/// frame.
pub fn plan(
    clips: &[ClipArtifact],
    options: &ConcatOptions,
) -> Result<ConcatenationPlan, ConcatError> {
    if clips.is_empty() {
        return Err(ConcatError::NoValidSegments);
    }
    let fps = options.fps.max(1);
    let crossfade = options.crossfade;
    let trim = if crossfade > 0.0 { 1.0 / f64::from(fps) } else { 0.0 };
    let last = clips.len() - 1;

    let durations: Vec<f64> = clips
        .iter()
        .enumerate()
        .map(|(i, c)| if i < last { c.duration - trim } else { c.duration })
        .collect();

    let shortest = durations.iter().copied().fold(f64::INFINITY, f64::min);
    if !crossfade.is_finite() || crossfade < 0.0 || (crossfade > 0.0 && crossfade >= shortest) {
        return Err(ConcatError::InvalidCrossfade {
            crossfade,
            shortest,
        });
    }

    let mut segments = Vec::with_capacity(clips.len());
    let mut elapsed = 0.0;
    for (i, (clip, duration)) in clips.iter().zip(&durations).enumerate() {
        elapsed += duration;
        let transition_offset = (i < last).then(|| elapsed - crossfade * (i + 1) as f64);
        segments.push(PlannedSegment {
            path: clip.path.clone(),
            duration: *duration,
            transition_offset,
        });
    }
    let total_duration = elapsed - crossfade * last as f64;

    Ok(ConcatenationPlan {
        segments,
        crossfade,
        audio: options.audio.clone(),
        resolution: options.resolution,
        fps,
        overlay: options.overlay.clone(),
        total_duration,
    })
}

/// Validates, plans and renders. Nothing is written when no clip survives
/// validation, and a half-written output is removed on failure.
pub fn concatenate<M, C>(
    inspector: &M,
    compositor: &C,
    clips: &[ClipArtifact],
    options: &ConcatOptions,
    output: &Path,
) -> Result<FinalVideo, ConcatError>
where
    M: MediaInspector + ?Sized,
    C: Compositor + ?Sized,
{
    let valid = validate_clips(inspector, clips);
    if valid.len() < clips.len() {
        tracing::warn!(
            dropped = clips.len() - valid.len(),
            kept = valid.len(),
            "Some clips were excluded from concatenation"
        );
    }
    let plan = plan(&valid, options)?;

    if let Some(audio) = &plan.audio {
        if !audio.is_file() {
            return Err(ConcatError::Failed(format!(
                "background audio {} does not exist",
                audio.display()
            )));
        }
    }

    tracing::info!(
        segments = plan.segments.len(),
        crossfade = plan.crossfade,
        total_secs = plan.total_duration,
        output = %output.display(),
        "Rendering final video"
    );

    if let Err(e) = compositor.render(&plan, output) {
        if output.exists() {
            let _ = std::fs::remove_file(output);
        }
        return Err(ConcatError::Failed(format!("{e:#}")));
    }

    Ok(FinalVideo {
        path: output.to_path_buf(),
        duration: plan.total_duration,
        segments: plan.segments.len(),
    })
}

/// Reorders `items` by 1-based indices such as `"2,1,3"`. An empty order keeps
/// the given order; a malformed or out-of-range one is reported and also
/// falls back to the given order.
pub fn apply_order<T: Clone>(items: &[T], spec: Option<&str>) -> Vec<T> {
    let Some(spec) = spec.map(str::trim).filter(|s| !s.is_empty()) else {
        return items.to_vec();
    };
    match parse_order(spec, items.len()) {
        Ok(order) => order.into_iter().map(|i| items[i].clone()).collect(),
        Err(reason) => {
            tracing::warn!(
                order = spec,
                reason = %reason,
                "Invalid clip order, keeping input order"
            );
            items.to_vec()
        }
    }
}

fn parse_order(spec: &str, len: usize) -> Result<Vec<usize>, String> {
    spec.split(',')
        .map(|part| {
            let index: usize = part
                .trim()
                .parse()
                .map_err(|_| format!("{:?} is not an index", part.trim()))?;
            if index == 0 || index > len {
                return Err(format!("index {index} out of range 1..={len}"));
            }
            Ok(index - 1)
        })
        .collect()
}

/// Escapes a path for use as a `movie`/`amovie` option value inside a
/// filtergraph description (option level first, then graph level).
pub(crate) fn escape_filter_path(path: &Path) -> String {
    escape_filter_value(&path.to_string_lossy())
}

/// Escapes any option value for a filtergraph description.
pub(crate) fn escape_filter_value(raw: &str) -> String {
    let mut option_level = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '\'' | ':') {
            option_level.push('\\');
        }
        option_level.push(c);
    }
    let mut graph_level = String::with_capacity(option_level.len());
    for c in option_level.chars() {
        if matches!(c, '\\' | '\'' | '[' | ']' | ',' | ';') {
            graph_level.push('\\');
        }
        graph_level.push(c);
    }
    graph_level
}

pub(crate) const VIDEO_SINK: &str = "vout";
pub(crate) const AUDIO_SINK: &str = "aout";
pub(crate) const AUDIO_SAMPLE_RATE: u32 = 44_100;

/// Filtergraph text for a plan. Every clip is read by its own `movie`
/// source, conformed to the target size and rate, then joined with
/// `xfade` or `concat`. Outputs are labelled [`VIDEO_SINK`] and, with
/// background audio, [`AUDIO_SINK`].
pub(crate) fn filter_spec(plan: &ConcatenationPlan) -> String {
    let Resolution { width, height } = plan.resolution;
    let fps = plan.fps;
    let mut spec = String::new();

    for (i, segment) in plan.segments.iter().enumerate() {
        let _ = write!(
            spec,
            "movie={path},fps={fps},trim=end_frame={frames},setpts=PTS-STARTPTS,\
             scale={width}:{height}:force_original_aspect_ratio=decrease,\
             pad={width}:{height}:(ow-iw)/2:(oh-ih)/2,setsar=1,format=yuv420p[v{i}];",
            path = escape_filter_path(&segment.path),
            frames = (segment.duration * f64::from(fps)).round() as u64,
        );
    }

    let n = plan.segments.len();
    if n == 1 {
        spec.push_str("[v0]null[joined];");
    } else if plan.crossfade > 0.0 {
        let mut previous = "v0".to_string();
        for (i, segment) in plan.segments.iter().enumerate().take(n - 1) {
            let offset = segment.transition_offset.unwrap_or_default();
            let next = if i + 2 == n {
                "joined".to_string()
            } else {
                format!("x{}", i + 1)
            };
            let _ = write!(
                spec,
                "[{previous}][v{}]xfade=transition=fade:duration={:.6}:offset={offset:.6}[{next}];",
                i + 1,
                plan.crossfade,
            );
            previous = next;
        }
    } else {
        for i in 0..n {
            let _ = write!(spec, "[v{i}]");
        }
        let _ = write!(spec, "concat=n={n}:v=1:a=0[joined];");
    }
    let _ = write!(spec, "[joined]fps={fps},");
    if let Some(overlay) = &plan.overlay {
        let _ = write!(spec, "{},", overlay.drawtext());
    }
    let _ = write!(spec, "format=yuv420p[{VIDEO_SINK}]");

    if let Some(audio) = &plan.audio {
        let _ = write!(
            spec,
            ";amovie={path}:loop=0,asetpts=N/SR/TB,atrim=duration={total:.6},\
             aresample={AUDIO_SAMPLE_RATE},\
             aformat=sample_fmts=fltp:channel_layouts=stereo[{AUDIO_SINK}]",
            path = escape_filter_path(audio),
            total = plan.total_duration,
        );
    }

    spec
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::MockMediaInspector;
    use mockall::predicate::always;

    fn clips_in(dir: &Path, durations: &[f64]) -> Vec<ClipArtifact> {
        durations
            .iter()
            .enumerate()
            .map(|(i, d)| {
                let path = dir.join(format!("clip_{i:03}.mp4"));
                std::fs::write(&path, b"clip").unwrap();
                ClipArtifact {
                    path,
                    duration: *d,
                    job_id: None,
                }
            })
            .collect()
    }

    fn fake_clips(durations: &[f64]) -> Vec<ClipArtifact> {
        durations
            .iter()
            .enumerate()
            .map(|(i, d)| ClipArtifact {
                path: PathBuf::from(format!("clip_{i}.mp4")),
                duration: *d,
                job_id: None,
            })
            .collect()
    }

    fn with_crossfade(crossfade: f64) -> ConcatOptions {
        ConcatOptions {
            crossfade,
            ..Default::default()
        }
    }

    #[test]
    fn crossfade_total_matches_overlap_math() {
        let (n, l, d) = (4usize, 4.0, 0.5);
        let plan = plan(&fake_clips(&vec![l; n]), &with_crossfade(d)).unwrap();
        let expected = n as f64 * l - (n as f64 - 1.0) * d;
        let trim_slack = (n as f64 - 1.0) / f64::from(DEFAULT_FPS);
        assert!((plan.total_duration - expected).abs() <= trim_slack + 1e-9);
        assert!((plan.total_duration - (expected - trim_slack)).abs() < 1e-9);
    }

    #[test]
    fn crossfade_trims_all_but_last() {
        let plan = plan(&fake_clips(&[4.0, 4.0, 4.0]), &with_crossfade(1.0)).unwrap();
        let frame = 1.0 / 30.0;
        assert!((plan.segments[0].duration - (4.0 - frame)).abs() < 1e-9);
        assert!((plan.segments[1].duration - (4.0 - frame)).abs() < 1e-9);
        assert_eq!(plan.segments[2].duration, 4.0);
        assert!(plan.segments[2].transition_offset.is_none());
        let first = plan.segments[0].transition_offset.unwrap();
        assert!((first - (4.0 - frame - 1.0)).abs() < 1e-9);
        let second = plan.segments[1].transition_offset.unwrap();
        assert!((second - (2.0 * (4.0 - frame) - 2.0)).abs() < 1e-9);
    }

    #[test]
    fn hard_cut_keeps_full_durations() {
        let plan = plan(&fake_clips(&[4.0, 3.0, 2.5]), &ConcatOptions::default()).unwrap();
        assert_eq!(
            plan.segments.iter().map(|s| s.duration).collect::<Vec<_>>(),
            vec![4.0, 3.0, 2.5]
        );
        assert_eq!(plan.total_duration, 9.5);
    }

    #[test]
    fn crossfade_longer_than_shortest_clip_is_rejected() {
        let err = plan(&fake_clips(&[4.0, 1.0, 4.0]), &with_crossfade(1.0)).unwrap_err();
        assert!(matches!(err, ConcatError::InvalidCrossfade { .. }));
    }

    #[test]
    fn negative_or_nan_crossfade_is_rejected() {
        for bad in [-0.5, f64::NAN, f64::INFINITY] {
            let err = plan(&fake_clips(&[4.0, 4.0]), &with_crossfade(bad)).unwrap_err();
            assert!(matches!(err, ConcatError::InvalidCrossfade { .. }), "{bad}");
        }
    }

    #[test]
    fn empty_plan_has_no_valid_segments() {
        assert!(matches!(
            plan(&[], &ConcatOptions::default()),
            Err(ConcatError::NoValidSegments)
        ));
    }

    #[test]
    fn validation_drops_missing_and_zero_length_clips() {
        let dir = tempfile::tempdir().unwrap();
        let mut clips = clips_in(dir.path(), &[4.0, 4.0, 4.0]);
        clips.push(ClipArtifact {
            path: dir.path().join("missing.mp4"),
            duration: 4.0,
            job_id: None,
        });
        let zero = clips[1].path.clone();

        let mut inspector = MockMediaInspector::new();
        inspector
            .expect_probe_duration()
            .returning(move |p| if p == zero { Some(0.0) } else { Some(3.9) });

        let valid = validate_clips(&inspector, &clips);
        assert_eq!(valid.len(), 2);
        assert_eq!(valid[0].path, clips[0].path);
        assert_eq!(valid[1].path, clips[2].path);
        assert_eq!(valid[0].duration, 3.9);
    }

    #[test]
    fn all_invalid_clips_fail_without_rendering() {
        let dir = tempfile::tempdir().unwrap();
        let clips = clips_in(dir.path(), &[4.0, 4.0]);
        let mut inspector = MockMediaInspector::new();
        inspector.expect_probe_duration().returning(|_| None);
        let mut compositor = MockCompositor::new();
        compositor.expect_render().times(0);

        let output = dir.path().join("final.mp4");
        let err = concatenate(&inspector, &compositor, &clips, &ConcatOptions::default(), &output)
            .unwrap_err();
        assert!(matches!(err, ConcatError::NoValidSegments));
        assert!(!output.exists());
    }

    #[test]
    fn castle_at_dusk_hard_cut_renders_three_untrimmed_clips() {
        let dir = tempfile::tempdir().unwrap();
        let clips = clips_in(dir.path(), &[4.0, 4.0, 4.0]);
        let mut inspector = MockMediaInspector::new();
        inspector.expect_probe_duration().returning(|_| Some(4.0));
        let mut compositor = MockCompositor::new();
        compositor
            .expect_render()
            .withf(|plan, _| {
                plan.segments.len() == 3
                    && plan.segments.iter().all(|s| s.duration == 4.0)
                    && plan.crossfade == 0.0
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let output = dir.path().join("final.mp4");
        let video =
            concatenate(&inspector, &compositor, &clips, &ConcatOptions::default(), &output)
                .unwrap();
        assert_eq!(video.segments, 3);
        assert_eq!(video.duration, 12.0);
    }

    #[test]
    fn failed_render_removes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let clips = clips_in(dir.path(), &[2.0]);
        let output = dir.path().join("final.mp4");
        let mut inspector = MockMediaInspector::new();
        inspector.expect_probe_duration().returning(|_| Some(2.0));
        let mut compositor = MockCompositor::new();
        compositor
            .expect_render()
            .with(always(), always())
            .returning(|_, out| {
                std::fs::write(out, b"partial").unwrap();
                Err(anyhow::anyhow!("encoder exploded"))
            });

        let err = concatenate(&inspector, &compositor, &clips, &ConcatOptions::default(), &output)
            .unwrap_err();
        assert!(matches!(err, ConcatError::Failed(ref d) if d.contains("encoder exploded")));
        assert!(!output.exists());
    }

    #[test]
    fn missing_background_audio_fails_before_render() {
        let dir = tempfile::tempdir().unwrap();
        let clips = clips_in(dir.path(), &[2.0]);
        let mut inspector = MockMediaInspector::new();
        inspector.expect_probe_duration().returning(|_| Some(2.0));
        let mut compositor = MockCompositor::new();
        compositor.expect_render().times(0);
        let options = ConcatOptions {
            audio: Some(dir.path().join("nope.mp3")),
            ..Default::default()
        };
        let err = concatenate(&inspector, &compositor, &clips, &options, &dir.path().join("o.mp4"))
            .unwrap_err();
        assert!(matches!(err, ConcatError::Failed(_)));
    }

    #[test]
    fn order_spec_reorders_by_one_based_index() {
        let items = vec!["a", "b", "c"];
        assert_eq!(apply_order(&items, Some("3, 1,2")), vec!["c", "a", "b"]);
        assert_eq!(apply_order(&items, Some("2")), vec!["b"]);
        assert_eq!(apply_order(&items, None), items);
        assert_eq!(apply_order(&items, Some("  ")), items);
    }

    #[test]
    fn bad_order_spec_falls_back_to_input_order() {
        let items = vec!["a", "b", "c"];
        assert_eq!(apply_order(&items, Some("0,1")), items);
        assert_eq!(apply_order(&items, Some("4")), items);
        assert_eq!(apply_order(&items, Some("one,two")), items);
    }

    #[test]
    fn filter_paths_are_escaped_twice() {
        assert_eq!(escape_filter_path(Path::new("/tmp/clip.mp4")), "/tmp/clip.mp4");
        assert_eq!(escape_filter_path(Path::new("C:/a.mp4")), "C\\\\:/a.mp4");
        assert_eq!(escape_filter_path(Path::new("a,b[1].mp4")), "a\\,b\\[1\\].mp4");
    }

    #[test]
    fn hard_cut_spec_uses_concat() {
        let plan = plan(&fake_clips(&[2.0, 2.0, 2.0]), &ConcatOptions::default()).unwrap();
        let spec = filter_spec(&plan);
        assert!(spec.contains("[v0][v1][v2]concat=n=3:v=1:a=0[joined]"));
        assert!(!spec.contains("xfade"));
        assert!(spec.ends_with("[vout]"));
    }

    #[test]
    fn crossfade_spec_chains_xfades() {
        let plan = plan(&fake_clips(&[3.0, 3.0, 3.0]), &with_crossfade(0.5)).unwrap();
        let spec = filter_spec(&plan);
        assert_eq!(spec.matches("xfade=").count(), 2);
        assert!(spec.contains("[v0][v1]xfade=transition=fade:duration=0.500000"));
        assert!(spec.contains("[x1][v2]xfade="));
        assert!(spec.contains("[joined]fps=30"));
    }

    #[test]
    fn audio_is_looped_and_cut_to_total() {
        let options = ConcatOptions {
            audio: Some(PathBuf::from("/music/bed.mp3")),
            ..Default::default()
        };
        let plan = plan(&fake_clips(&[2.0, 3.0]), &options).unwrap();
        let spec = filter_spec(&plan);
        assert!(spec.contains("amovie=/music/bed.mp3:loop=0"));
        assert!(spec.contains("atrim=duration=5.000000"));
        assert!(spec.ends_with("[aout]"));
    }

    #[test]
    fn single_clip_passes_through() {
        let plan = plan(&fake_clips(&[2.0]), &with_crossfade(0.5)).unwrap();
        assert_eq!(plan.segments[0].duration, 2.0);
        assert!(filter_spec(&plan).contains("[v0]null[joined]"));
    }

    #[test]
    fn trimmed_clips_are_cut_on_whole_frames() {
        let plan = plan(&fake_clips(&[2.0, 2.0]), &with_crossfade(0.5)).unwrap();
        let spec = filter_spec(&plan);
        assert!(spec.contains("fps=30,trim=end_frame=59,setpts=PTS-STARTPTS"));
        assert!(spec.contains("fps=30,trim=end_frame=60,setpts=PTS-STARTPTS"));
    }

    fn caption(position: OverlayPosition) -> TextOverlay {
        TextOverlay {
            text: "Day 1: the castle".into(),
            position,
            font_size: 30,
            color: "#FFFFFF".into(),
            font: None,
        }
    }

    #[test]
    fn overlay_adds_drawtext_before_the_sink() {
        let options = ConcatOptions {
            overlay: Some(caption(OverlayPosition::BottomCenter)),
            ..Default::default()
        };
        let plan = plan(&fake_clips(&[2.0, 2.0]), &options).unwrap();
        let spec = filter_spec(&plan);
        assert!(spec.ends_with(
            "[joined]fps=30,drawtext=text=Day 1\\\\: the castle:expansion=none:\
             fontsize=30:fontcolor=#FFFFFF:x=(w-text_w)/2:y=h-text_h-10,format=yuv420p[vout]"
        ));
    }

    #[test]
    fn overlay_font_is_optional() {
        let mut overlay = caption(OverlayPosition::TopLeft);
        assert!(!overlay.drawtext().contains(":font="));
        overlay.font = Some("Arial".into());
        let filter = overlay.drawtext();
        assert!(filter.ends_with(":x=10:y=10:font=Arial"), "{filter}");
    }

    #[test]
    fn no_overlay_means_no_drawtext() {
        let plan = plan(&fake_clips(&[2.0]), &ConcatOptions::default()).unwrap();
        assert!(!filter_spec(&plan).contains("drawtext"));
    }

    #[test]
    fn overlay_positions_parse_from_names() {
        assert_eq!("top-right".parse(), Ok(OverlayPosition::TopRight));
        assert_eq!("Center".parse(), Ok(OverlayPosition::Center));
        assert_eq!("bottom-left".parse(), Ok(OverlayPosition::BottomLeft));
        assert!("middle".parse::<OverlayPosition>().is_err());
        assert_eq!(
            OverlayPosition::CenterRight.expressions(),
            ("w-text_w-10".to_string(), "(h-text_h)/2".to_string())
        );
    }
}
