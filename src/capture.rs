use ffmpeg::util::frame::video::Video;
use ffmpeg::{format, media, rescale, Rescale};
use ffmpeg_next::{self as ffmpeg};
use image::RgbImage;
use std::path::Path;
use std::sync::Once;

/// Offset back from the end timestamp when sampling the final frame,
/// roughly one frame at 30fps.
pub(crate) const LAST_FRAME_EPSILON_SECS: f64 = 1.0 / 30.0;

static INIT: Once = Once::new();

pub(crate) fn init() {
    INIT.call_once(|| {
        if let Err(e) = ffmpeg::init() {
            tracing::error!(error = %e, "FFmpeg initialisation failed");
        }
    });
}

/// Read-only questions the pipeline asks about rendered clips.
#[cfg_attr(test, mockall::automock)]
pub trait MediaInspector: Send + Sync {
    /// Container duration in seconds, `None` when the file cannot be opened.
    fn probe_duration(&self, path: &Path) -> Option<f64>;

    /// Final frame of the clip as RGB, `None` on any decode failure.
    fn extract_last_frame(&self, path: &Path) -> Option<RgbImage>;
}

pub struct FfmpegInspector;

impl FfmpegInspector {
    pub fn new() -> Self {
        init();
        Self
    }
}

impl MediaInspector for FfmpegInspector {
    fn probe_duration(&self, path: &Path) -> Option<f64> {
        match duration_secs(path) {
            Ok(d) => Some(d),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Probe failed");
                None
            }
        }
    }

    fn extract_last_frame(&self, path: &Path) -> Option<RgbImage> {
        match last_frame(path) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Last frame extraction failed");
                None
            }
        }
    }
}

fn duration_secs(path: &Path) -> anyhow::Result<f64> {
    let input = format::input(&path)?;
    let container = input.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE);
    if container > 0.0 {
        return Ok(container);
    }
    let stream = input
        .streams()
        .best(media::Type::Video)
        .ok_or(anyhow::anyhow!(ffmpeg::Error::StreamNotFound))?;
    let time_base: f64 = stream.time_base().into();
    Ok((stream.duration() as f64 * time_base).max(0.0))
}

fn last_frame(path: &Path) -> anyhow::Result<RgbImage> {
    let duration = duration_secs(path)?;
    if duration <= 0.0 {
        return Err(anyhow::anyhow!("non-positive duration {duration}"));
    }
    let target_secs = (duration - LAST_FRAME_EPSILON_SECS).max(0.0);

    let mut input = format::input(&path)?;

    // Land on the keyframe before the tail and decode forward from there.
    let seek_ms = ((target_secs - 1.0).max(0.0) * 1000.0) as i64;
    let seek_pos = seek_ms.rescale((1, 1000), rescale::TIME_BASE);
    if let Err(e) = input.seek(seek_pos, ..seek_pos) {
        tracing::debug!(error = %e, "Seek failed, decoding from start");
    }

    let video_stream_index = input
        .streams()
        .best(media::Type::Video)
        .ok_or(anyhow::anyhow!(ffmpeg::Error::StreamNotFound))?
        .index();
    let video_stream = input
        .stream(video_stream_index)
        .ok_or(anyhow::anyhow!(ffmpeg::Error::StreamNotFound))?;
    let time_base: f64 = video_stream.time_base().into();
    let mut decoder = ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())?
        .decoder()
        .video()?;

    let mut scaler = ffmpeg::software::scaling::context::Context::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        format::Pixel::RGB24,
        decoder.width(),
        decoder.height(),
        ffmpeg::software::scaling::Flags::BILINEAR,
    )?;

    let mut chosen: Option<RgbImage> = None;
    // Returns true once a frame beyond the target has been seen.
    let mut receive_decoded_frames =
        |decoder: &mut ffmpeg::decoder::Video| -> anyhow::Result<bool> {
            let mut past_target = false;
            let mut decoded = Video::empty();
            while decoder.receive_frame(&mut decoded).is_ok() {
                let at = decoded
                    .timestamp()
                    .map(|ts| ts as f64 * time_base)
                    .unwrap_or(f64::MAX);
                if at > target_secs && chosen.is_some() {
                    past_target = true;
                    continue;
                }
                let mut rgb_frame = Video::empty();
                scaler.run(&decoded, &mut rgb_frame)?;
                chosen = Some(to_rgb_image(&rgb_frame)?);
            }
            Ok(past_target)
        };

    let mut past_target = false;
    for (stream, packet) in input.packets() {
        if stream.index() != video_stream_index {
            continue;
        }
        decoder.send_packet(&packet)?;
        if receive_decoded_frames(&mut decoder)? {
            past_target = true;
            break;
        }
    }
    if !past_target {
        decoder.send_eof()?;
        receive_decoded_frames(&mut decoder)?;
    }

    chosen.ok_or(anyhow::anyhow!("no frame decoded"))
}

/// Copies visible pixels out of a packed RGB24 frame, skipping stride padding.
fn to_rgb_image(frame: &Video) -> anyhow::Result<RgbImage> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let stride = frame.stride(0);
    let row_bytes = width * 3;
    let raw = frame.data(0);
    let data: Vec<u8> = (0..height)
        .flat_map(|row| &raw[row * stride..row * stride + row_bytes])
        .copied()
        .collect();
    RgbImage::from_raw(frame.width(), frame.height(), data)
        .ok_or(anyhow::anyhow!("Failed to create image buffer"))
}
