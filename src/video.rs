use anyhow::Ok;
use ffmpeg::encoder;
use ffmpeg::util::frame::{audio::Audio, video::Video};
use ffmpeg_next::{
    self as ffmpeg, channel_layout, codec, filter, format, picture, Dictionary, Error, Packet,
    Rational,
};
use std::path::Path;

use crate::capture;
use crate::concat::{
    filter_spec, Compositor, ConcatenationPlan, AUDIO_SAMPLE_RATE, AUDIO_SINK, VIDEO_SINK,
};
use crate::seed::Resolution;

/// Consecutive EAGAIN results tolerated from the sinks before giving up.
const MAX_STALLED_PULLS: u32 = 1_000;

/// Renders a [`ConcatenationPlan`] in-process through an FFmpeg filtergraph
/// and encodes it to H.264 (plus AAC when there is background audio).
pub struct FfmpegCompositor;

impl FfmpegCompositor {
    pub fn new() -> Self {
        capture::init();
        Self
    }
}

impl Compositor for FfmpegCompositor {
    fn render(&self, plan: &ConcatenationPlan, output_path: &Path) -> anyhow::Result<()> {
        render(plan, output_path)
    }
}

enum Pulled {
    Frame,
    Again,
    Finished,
}

trait SinkTrack {
    /// Seconds of output this track has produced so far.
    fn position(&self) -> f64;

    fn pull_and_encode(
        &mut self,
        graph: &mut filter::Graph,
        output: &mut format::context::Output,
    ) -> anyhow::Result<Pulled>;

    fn send_eof_to_encoder(&mut self) -> anyhow::Result<()>;

    fn receive_and_process_encoded_packets(
        &mut self,
        output: &mut format::context::Output,
    ) -> anyhow::Result<()>;
}

fn pull_result(result: Result<(), Error>) -> anyhow::Result<Pulled> {
    match result {
        Result::Ok(()) => Ok(Pulled::Frame),
        Err(Error::Eof) => Ok(Pulled::Finished),
        Err(Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN => Ok(Pulled::Again),
        Err(e) => Err(anyhow::Error::from(e)),
    }
}

struct VideoTrack {
    output_stream_index: usize,
    encoder: encoder::Video,
    encoder_time_base: Rational,
    output_stream_time_base: Rational,
    position: f64,
}

impl VideoTrack {
    fn new(
        resolution: Resolution,
        fps: u32,
        output: &mut format::context::Output,
        output_stream_index: usize,
    ) -> anyhow::Result<Self> {
        let global_header = output
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER);
        let fps = fps as i32;
        let encoder_time_base = Rational(1, fps);

        let codec = encoder::find(codec::Id::H264);
        let mut output_stream = output.add_stream(codec)?;
        let mut encoder = codec::context::Context::new_with_codec(
            codec.ok_or(anyhow::anyhow!(Error::EncoderNotFound))?,
        )
        .encoder()
        .video()?;
        encoder.set_width(resolution.width);
        encoder.set_height(resolution.height);
        encoder.set_aspect_ratio(Rational(1, 1));
        encoder.set_format(format::Pixel::YUV420P);
        encoder.set_frame_rate(Some(Rational(fps, 1)));
        encoder.set_time_base(encoder_time_base);
        output_stream.set_time_base(encoder_time_base);

        if global_header {
            encoder.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let mut opts = Dictionary::new();
        opts.set("preset", "medium");

        let opened_encoder = encoder.open_with(opts)?;
        output_stream.set_parameters(&opened_encoder);

        Ok(Self {
            output_stream_index,
            encoder: opened_encoder,
            encoder_time_base,
            output_stream_time_base: encoder_time_base,
            position: 0.0,
        })
    }
}

impl SinkTrack for VideoTrack {
    fn position(&self) -> f64 {
        self.position
    }

    fn pull_and_encode(
        &mut self,
        graph: &mut filter::Graph,
        output: &mut format::context::Output,
    ) -> anyhow::Result<Pulled> {
        let mut frame = Video::empty();
        let pulled = pull_result(
            graph
                .get(VIDEO_SINK)
                .ok_or(anyhow::anyhow!("Failed to get filter"))?
                .sink()
                .frame(&mut frame),
        )?;
        if let Pulled::Frame = pulled {
            if let Some(pts) = frame.pts() {
                self.position = pts as f64 * f64::from(self.encoder_time_base);
            }
            frame.set_kind(picture::Type::None);
            self.encoder.send_frame(&frame)?;
            self.receive_and_process_encoded_packets(output)?;
        }
        Ok(pulled)
    }

    fn send_eof_to_encoder(&mut self) -> anyhow::Result<()> {
        self.encoder.send_eof().map_err(anyhow::Error::from)
    }

    fn receive_and_process_encoded_packets(
        &mut self,
        output: &mut format::context::Output,
    ) -> anyhow::Result<()> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.output_stream_index);
            packet.rescale_ts(self.encoder_time_base, self.output_stream_time_base);
            packet.write_interleaved(output)?;
        }
        Ok(())
    }
}

struct AudioTrack {
    output_stream_index: usize,
    encoder: encoder::Audio,
    encoder_time_base: Rational,
    output_stream_time_base: Rational,
    position: f64,
}

impl AudioTrack {
    fn new(
        output: &mut format::context::Output,
        output_stream_index: usize,
    ) -> anyhow::Result<Self> {
        let global_header = output
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER);
        let rate = AUDIO_SAMPLE_RATE as i32;
        let encoder_time_base = Rational(1, rate);

        let codec = encoder::find(codec::Id::AAC)
            .ok_or(anyhow::anyhow!(Error::EncoderNotFound))?
            .audio()?;
        let mut output_stream = output.add_stream(codec)?;
        let context = codec::context::Context::from_parameters(output_stream.parameters())?;
        let mut encoder = context.encoder().audio()?;

        if global_header {
            encoder.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        encoder.set_channel_layout(channel_layout::ChannelLayout::STEREO);
        encoder.set_rate(rate);
        encoder.set_format(format::Sample::F32(format::sample::Type::Planar));
        encoder.set_bit_rate(192_000);
        encoder.set_time_base(encoder_time_base);
        output_stream.set_time_base(encoder_time_base);

        let opened_encoder = encoder.open_as(codec)?;
        output_stream.set_parameters(&opened_encoder);

        Ok(Self {
            output_stream_index,
            encoder: opened_encoder,
            encoder_time_base,
            output_stream_time_base: encoder_time_base,
            position: 0.0,
        })
    }

    fn configure_sink(&self, graph: &mut filter::Graph) -> anyhow::Result<()> {
        let mut out = graph
            .get(AUDIO_SINK)
            .ok_or(anyhow::anyhow!("Failed to get filter"))?;
        out.set_sample_format(self.encoder.format());
        out.set_channel_layout(self.encoder.channel_layout());
        out.set_sample_rate(self.encoder.rate());
        Ok(())
    }

    fn fix_frame_size(&self, graph: &mut filter::Graph) -> anyhow::Result<()> {
        if let Some(codec) = self.encoder.codec() {
            if !codec
                .capabilities()
                .contains(ffmpeg::codec::capabilities::Capabilities::VARIABLE_FRAME_SIZE)
            {
                graph
                    .get(AUDIO_SINK)
                    .ok_or(anyhow::anyhow!("Failed to get filter"))?
                    .sink()
                    .set_frame_size(self.encoder.frame_size());
            }
        }
        Ok(())
    }
}

impl SinkTrack for AudioTrack {
    fn position(&self) -> f64 {
        self.position
    }

    fn pull_and_encode(
        &mut self,
        graph: &mut filter::Graph,
        output: &mut format::context::Output,
    ) -> anyhow::Result<Pulled> {
        let mut frame = Audio::empty();
        let pulled = pull_result(
            graph
                .get(AUDIO_SINK)
                .ok_or(anyhow::anyhow!("Failed to get filter"))?
                .sink()
                .frame(&mut frame),
        )?;
        if let Pulled::Frame = pulled {
            if let Some(pts) = frame.pts() {
                self.position = pts as f64 * f64::from(self.encoder_time_base);
            }
            self.encoder.send_frame(&frame)?;
            self.receive_and_process_encoded_packets(output)?;
        }
        Ok(pulled)
    }

    fn send_eof_to_encoder(&mut self) -> anyhow::Result<()> {
        self.encoder.send_eof().map_err(anyhow::Error::from)
    }

    fn receive_and_process_encoded_packets(
        &mut self,
        output: &mut format::context::Output,
    ) -> anyhow::Result<()> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.output_stream_index);
            packet.rescale_ts(self.encoder_time_base, self.output_stream_time_base);
            packet.write_interleaved(output)?;
        }
        Ok(())
    }
}

fn build_graph(
    spec: &str,
    audio: Option<&AudioTrack>,
) -> anyhow::Result<filter::Graph> {
    let mut filter_graph = filter::Graph::new();

    filter_graph.add(
        &filter::find("buffersink").ok_or(anyhow::anyhow!("Failed to find filter"))?,
        VIDEO_SINK,
        "",
    )?;
    if let Some(track) = audio {
        filter_graph.add(
            &filter::find("abuffersink").ok_or(anyhow::anyhow!("Failed to find filter"))?,
            AUDIO_SINK,
            "",
        )?;
        track.configure_sink(&mut filter_graph)?;
    }

    let parser = filter_graph.input(VIDEO_SINK, 0)?;
    let parser = match audio {
        Some(_) => parser.input(AUDIO_SINK, 0)?,
        None => parser,
    };
    parser.parse(spec)?;
    filter_graph.validate()?;

    tracing::debug!(graph = %filter_graph.dump(), "Filter graph ready");

    if let Some(track) = audio {
        track.fix_frame_size(&mut filter_graph)?;
    }

    Ok(filter_graph)
}

fn render(plan: &ConcatenationPlan, output_path: &Path) -> anyhow::Result<()> {
    let spec = filter_spec(plan);
    tracing::debug!(spec = %spec, "Concatenation filter spec");
    render_graph(
        &spec,
        plan.resolution,
        plan.fps,
        plan.audio.is_some(),
        output_path,
    )
}

/// Encodes whatever `spec` produces on its [`VIDEO_SINK`] (and, with
/// `with_audio`, [`AUDIO_SINK`]) output into `output_path`.
fn render_graph(
    spec: &str,
    resolution: Resolution,
    fps: u32,
    with_audio: bool,
    output_path: &Path,
) -> anyhow::Result<()> {
    capture::init();

    let mut output = format::output(&output_path)?;
    let mut video = VideoTrack::new(resolution, fps, &mut output, 0)?;
    let mut audio = if with_audio {
        Some(AudioTrack::new(&mut output, 1)?)
    } else {
        None
    };

    let mut graph = build_graph(spec, audio.as_ref())?;

    output.write_header()?;
    video.output_stream_time_base = output
        .stream(video.output_stream_index)
        .ok_or(anyhow::anyhow!(Error::StreamNotFound))?
        .time_base();
    if let Some(track) = audio.as_mut() {
        track.output_stream_time_base = output
            .stream(track.output_stream_index)
            .ok_or(anyhow::anyhow!(Error::StreamNotFound))?
            .time_base();
    }

    let mut video_done = false;
    let mut audio_done = audio.is_none();
    let mut stalled = 0u32;
    while !video_done || !audio_done {
        let take_video = match audio.as_ref() {
            Some(track) if !audio_done => !video_done && video.position() <= track.position(),
            _ => true,
        };
        let pulled = if take_video {
            video.pull_and_encode(&mut graph, &mut output)?
        } else {
            match audio.as_mut() {
                Some(track) => track.pull_and_encode(&mut graph, &mut output)?,
                None => Pulled::Finished,
            }
        };
        match pulled {
            Pulled::Frame => stalled = 0,
            Pulled::Finished if take_video => video_done = true,
            Pulled::Finished => audio_done = true,
            Pulled::Again => {
                stalled += 1;
                if stalled > MAX_STALLED_PULLS {
                    return Err(anyhow::anyhow!("filter graph stopped producing frames"));
                }
                // Give the other sink a turn.
                if take_video {
                    if let Some(track) = audio.as_mut().filter(|_| !audio_done) {
                        if let Pulled::Finished = track.pull_and_encode(&mut graph, &mut output)? {
                            audio_done = true;
                        }
                    }
                }
            }
        }
    }

    video.send_eof_to_encoder()?;
    video.receive_and_process_encoded_packets(&mut output)?;
    if let Some(track) = audio.as_mut() {
        track.send_eof_to_encoder()?;
        track.receive_and_process_encoded_packets(&mut output)?;
    }

    output.write_trailer()?;

    tracing::info!(
        path = %output_path.display(),
        video_secs = video.position(),
        "Final video written"
    );
    Ok(())
}
