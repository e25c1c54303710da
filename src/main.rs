mod batch;
mod capture;
mod chain;
mod concat;
mod config;
mod error;
mod poll;
mod prompts;
mod seed;
mod session;
mod stability;
mod video;
mod watch;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::capture::{FfmpegInspector, MediaInspector};
use crate::chain::{ChainOrchestrator, ChainParams, SegmentOutcome};
use crate::concat::{ConcatOptions, OverlayPosition, TextOverlay, DEFAULT_FPS};
use crate::config::Settings;
use crate::seed::Resolution;
use crate::session::{ClipArtifact, SessionArtifacts};
use crate::stability::{ImageRequest, StabilityClient};
use crate::video::FfmpegCompositor;

#[derive(Parser)]
#[command(name = "clipchain")]
#[command(about = "Chain image-to-video clips and stitch them together", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate N segments, each seeded from the previous clip's last frame.
    Chain {
        /// Text prompt for the initial seed image.
        prompt: Option<String>,
        /// Use this image as the initial seed instead of generating one.
        #[arg(short, long)]
        image: Option<PathBuf>,
        #[arg(short = 'n', long, default_value_t = 3)]
        segments: usize,
        /// How strongly the video sticks to the seed image, 0 to 10.
        #[arg(long, default_value_t = 1.8, value_parser = parse_cfg_scale)]
        cfg_scale: f32,
        /// Amount of motion, 1 to 255.
        #[arg(long, default_value_t = 127, value_parser = clap::value_parser!(u8).range(1..))]
        motion_bucket_id: u8,
        /// 0 picks a random seed.
        #[arg(long, default_value_t = 0)]
        seed: u32,
        /// Crossfade between clips in seconds; 0 joins with hard cuts.
        #[arg(short, long, default_value_t = 0.0)]
        crossfade: f64,
        /// Background audio, looped or cut to the video length.
        #[arg(short, long)]
        audio: Option<PathBuf>,
        #[arg(short, long, default_value_t = Resolution::LANDSCAPE)]
        resolution: Resolution,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Also write every seed, clip and the final video into this ZIP.
        #[arg(long)]
        bundle: Option<PathBuf>,
        #[command(flatten)]
        overlay: OverlayArgs,
    },
    /// Join existing clips into one video.
    Concat {
        #[arg(required = true)]
        clips: Vec<PathBuf>,
        /// 1-based clip order, e.g. "2,1,3".
        #[arg(long)]
        order: Option<String>,
        #[arg(short, long, default_value_t = 0.0)]
        crossfade: f64,
        #[arg(short, long)]
        audio: Option<PathBuf>,
        #[arg(short, long, default_value_t = Resolution::LANDSCAPE)]
        resolution: Resolution,
        #[arg(short, long, default_value = "final.mp4")]
        output: PathBuf,
        #[command(flatten)]
        overlay: OverlayArgs,
    },
    /// Generate independent images concurrently.
    Batch {
        /// One image per prompt.
        prompts: Vec<String>,
        /// Interpolate from this prompt ...
        #[arg(long, requires = "to")]
        from: Option<String>,
        /// ... to this one.
        #[arg(long, requires = "from")]
        to: Option<String>,
        #[arg(long, default_value_t = 5)]
        steps: usize,
        #[arg(short, long, default_value_t = Resolution::SQUARE)]
        resolution: Resolution,
    },
    /// Rebuild the concatenated video whenever clips in a folder change.
    Watch {
        dir: PathBuf,
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
        #[arg(short, long, default_value_t = 0.0)]
        crossfade: f64,
        #[arg(short, long, default_value_t = Resolution::LANDSCAPE)]
        resolution: Resolution,
        #[arg(short, long, default_value = "final.mp4")]
        output: PathBuf,
        #[command(flatten)]
        overlay: OverlayArgs,
    },
}

#[derive(Args)]
struct OverlayArgs {
    /// Caption burned into the final video.
    #[arg(long)]
    text: Option<String>,
    /// top-left, top-center, ..., center, ..., bottom-right.
    #[arg(long, default_value = "bottom-center")]
    text_position: OverlayPosition,
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(10..=100))]
    font_size: u32,
    #[arg(long, default_value = "#FFFFFF")]
    text_color: String,
    /// Font family; FFmpeg's default when omitted.
    #[arg(long)]
    font: Option<String>,
}

impl OverlayArgs {
    fn into_overlay(self) -> Option<TextOverlay> {
        let text = self.text.filter(|t| !t.trim().is_empty())?;
        Some(TextOverlay {
            text,
            position: self.text_position,
            font_size: self.font_size,
            color: self.text_color,
            font: self.font,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clipchain=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    match cli.command {
        Command::Chain {
            prompt,
            image,
            segments,
            cfg_scale,
            motion_bucket_id,
            seed,
            crossfade,
            audio,
            resolution,
            output,
            bundle,
            overlay,
        } => {
            let source_image = match image {
                Some(path) => Some(
                    image::open(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?
                        .to_rgb8(),
                ),
                None => None,
            };
            let params = ChainParams {
                prompt,
                source_image,
                segments,
                cfg_scale,
                motion_bucket_id,
                seed,
                resolution,
            };
            let options = ConcatOptions {
                crossfade,
                audio,
                resolution,
                fps: DEFAULT_FPS,
                overlay: overlay.into_overlay(),
            };
            run_chain(&settings, &params, &options, output, bundle).await
        }
        Command::Concat {
            clips,
            order,
            crossfade,
            audio,
            resolution,
            output,
            overlay,
        } => {
            let options = ConcatOptions {
                crossfade,
                audio,
                resolution,
                fps: DEFAULT_FPS,
                overlay: overlay.into_overlay(),
            };
            let ordered = concat::apply_order(&clips, order.as_deref());
            concat_files(&ordered, &options, &output)
        }
        Command::Batch {
            prompts,
            from,
            to,
            steps,
            resolution,
        } => run_batch(&settings, prompts, from.zip(to), steps, resolution).await,
        Command::Watch {
            dir,
            interval_ms,
            crossfade,
            resolution,
            output,
            overlay,
        } => {
            let options = ConcatOptions {
                crossfade,
                resolution,
                overlay: overlay.into_overlay(),
                ..ConcatOptions::default()
            };
            run_watch(dir, Duration::from_millis(interval_ms), options, output).await
        }
    }
}

fn parse_cfg_scale(raw: &str) -> Result<f32, String> {
    let value: f32 = raw.parse().map_err(|_| format!("{raw:?} is not a number"))?;
    if (0.0..=10.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{value} is outside 0..=10"))
    }
}

fn stability_client(settings: &Settings) -> StabilityClient {
    StabilityClient::new(
        settings.api_base.clone(),
        settings.api_key.clone().unwrap_or_default(),
        settings.image_engine.clone(),
        settings.request_timeout,
    )
}

async fn run_chain(
    settings: &Settings,
    params: &ChainParams,
    options: &ConcatOptions,
    output: Option<PathBuf>,
    bundle: Option<PathBuf>,
) -> anyhow::Result<()> {
    let backend = stability_client(settings);
    let inspector = FfmpegInspector::new();
    let orchestrator = ChainOrchestrator::new(
        &backend,
        &inspector,
        settings.poll,
        settings.output_dir.join("run"),
    );

    let mut session = SessionArtifacts::new();
    let report = orchestrator.run(params, &mut session).await?;
    for (i, outcome) in report.outcomes.iter().enumerate() {
        match outcome {
            SegmentOutcome::Produced {
                clip,
                seed_advanced,
            } => tracing::info!(
                segment = i,
                clip = %clip.display(),
                seed_advanced,
                "Segment ready"
            ),
            other => tracing::warn!(segment = i, outcome = ?other, "Segment skipped"),
        }
    }
    println!("{}/{} segments produced", report.produced(), params.segments);

    let output = output.unwrap_or_else(|| orchestrator.work_dir().join("final.mp4"));
    let video = concat::concatenate(
        &inspector,
        &FfmpegCompositor::new(),
        session.clips(),
        options,
        &output,
    )?;
    session.set_final_video(video.path);

    if let Some(bundle) = bundle {
        let files = session.write_bundle(&bundle)?;
        tracing::info!(path = %bundle.display(), files, "Bundle written");
    }
    if let Some(path) = session.final_video() {
        println!(
            "{} ({} segments, {:.2}s, {} seeds)",
            path.display(),
            video.segments,
            video.duration,
            session.seeds().len()
        );
    }
    Ok(())
}

fn concat_files(paths: &[PathBuf], options: &ConcatOptions, output: &Path) -> anyhow::Result<()> {
    let inspector = FfmpegInspector::new();
    let clips: Vec<ClipArtifact> = paths
        .iter()
        .map(|path| ClipArtifact {
            path: path.clone(),
            duration: inspector.probe_duration(path).unwrap_or(0.0),
            job_id: None,
        })
        .collect();
    let video = concat::concatenate(&inspector, &FfmpegCompositor::new(), &clips, options, output)?;
    println!(
        "{} ({} segments, {:.2}s)",
        video.path.display(),
        video.segments,
        video.duration
    );
    Ok(())
}

async fn run_batch(
    settings: &Settings,
    prompts: Vec<String>,
    interpolation: Option<(String, String)>,
    steps: usize,
    resolution: Resolution,
) -> anyhow::Result<()> {
    if settings.api_key.is_none() {
        anyhow::bail!("an API key is required (set STABILITY_API_KEY)");
    }
    let mut requests: Vec<ImageRequest> = prompts
        .iter()
        .map(|p| ImageRequest::from_prompt(p, resolution))
        .collect();
    if let Some((from, to)) = interpolation {
        requests.extend(prompts::interpolate(&from, &to, steps).into_iter().map(|weighted| {
            ImageRequest {
                prompts: weighted,
                ..ImageRequest::from_prompt("", resolution)
            }
        }));
    }
    if requests.is_empty() {
        anyhow::bail!("nothing to generate: pass prompts or --from/--to");
    }

    let output_dir = settings.output_dir.join("batch");
    std::fs::create_dir_all(&output_dir)?;
    let backend = stability_client(settings);
    let results =
        batch::generate_batch(&backend, requests, &output_dir, settings.batch_workers).await;

    let saved = results.iter().filter(|r| r.path.is_some()).count();
    for result in &results {
        match &result.path {
            Some(path) => println!("{:>3} {}", result.index, path.display()),
            None => println!("{:>3} failed", result.index),
        }
    }
    if saved == 0 {
        anyhow::bail!("every batch request failed");
    }
    Ok(())
}

async fn run_watch(
    dir: PathBuf,
    interval: Duration,
    options: ConcatOptions,
    output: PathBuf,
) -> anyhow::Result<()> {
    let output = if output.is_relative() && output.parent() == Some(Path::new("")) {
        dir.join(output)
    } else {
        output
    };
    let cancel = CancellationToken::new();
    let (events, watcher) =
        watch::spawn_watcher(dir.clone(), Some(output.clone()), interval, cancel.clone()).await?;

    let rebuild = move || -> anyhow::Result<()> {
        let clips = watch::list_videos(&dir, Some(&output))?;
        concat_files(&clips, &options, &output)
    };
    let rebuilds = tokio::spawn(watch::run_rebuilds(
        events,
        watch::SingleFlight::default(),
        rebuild,
    ));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupted, stopping watcher");
    cancel.cancel();
    watcher.await?;
    rebuilds.await?;
    Ok(())
}
