//! Segment chaining: seed image -> video job -> clip -> last frame -> next seed.
//!
//! Segments are strictly sequential because each seed is taken from the
//! previous clip. A segment that fails at any step is skipped and the chain
//! carries on from the last good seed; only preconditions, a missing
//! initial seed, or a run that yields no clips at all halt it.

use std::fmt;
use std::path::{Path, PathBuf};

use image::RgbImage;

use crate::capture::MediaInspector;
use crate::error::PipelineError;
use crate::poll::{wait_for_job, PollPolicy};
use crate::seed::{Resolution, SeedImage, SeedOrigin};
use crate::session::{ClipArtifact, SessionArtifacts};
use crate::stability::{
    GenerationBackend, GenerationJob, GenerationRequest, ImageRequest, JobStatus,
};

/// Parameters of one run, fixed when the run starts.
#[derive(Debug, Clone)]
pub struct ChainParams {
    pub prompt: Option<String>,
    pub source_image: Option<RgbImage>,
    pub segments: usize,
    pub cfg_scale: f32,
    pub motion_bucket_id: u8,
    pub seed: u32,
    pub resolution: Resolution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainState {
    Init,
    Seeding,
    Generating(usize),
    Extracting(usize),
    Done,
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainState::Init => f.write_str("init"),
            ChainState::Seeding => f.write_str("seeding"),
            ChainState::Generating(i) => write!(f, "generating({i})"),
            ChainState::Extracting(i) => write!(f, "extracting({i})"),
            ChainState::Done => f.write_str("done"),
        }
    }
}

/// What happened to one segment.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentOutcome {
    Produced { clip: PathBuf, seed_advanced: bool },
    SubmitFailed(String),
    JobFailed(String),
    TimedOut,
    WriteFailed(String),
    InvalidClip(PathBuf),
}

impl SegmentOutcome {
    pub fn is_produced(&self) -> bool {
        matches!(self, SegmentOutcome::Produced { .. })
    }
}

#[derive(Debug, Default)]
pub struct ChainReport {
    pub outcomes: Vec<SegmentOutcome>,
}

impl ChainReport {
    pub fn produced(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_produced()).count()
    }
}

pub struct ChainOrchestrator<'a, B: ?Sized, M: ?Sized> {
    backend: &'a B,
    inspector: &'a M,
    policy: PollPolicy,
    work_dir: PathBuf,
}

impl<'a, B, M> ChainOrchestrator<'a, B, M>
where
    B: GenerationBackend + ?Sized,
    M: MediaInspector + ?Sized,
{
    pub fn new(backend: &'a B, inspector: &'a M, policy: PollPolicy, work_dir: PathBuf) -> Self {
        Self {
            backend,
            inspector,
            policy,
            work_dir,
        }
    }

    /// Runs all segments, recording seeds and clips into `session`.
    pub async fn run(
        &self,
        params: &ChainParams,
        session: &mut SessionArtifacts,
    ) -> Result<ChainReport, PipelineError> {
        let mut state = ChainState::Init;
        let mut report = ChainReport::default();
        let mut current: Option<SeedImage> = None;
        let mut pending_clip: Option<(GenerationJob, Vec<u8>)> = None;

        loop {
            tracing::debug!(state = %state, "Chain state");
            state = match state {
                ChainState::Init => {
                    self.check_preconditions(params)?;
                    std::fs::create_dir_all(&self.work_dir)?;
                    session.clear();
                    ChainState::Seeding
                }
                ChainState::Seeding => {
                    let mut seed = self.initial_seed(params).await?.normalized();
                    seed.save(&self.seed_path(0))?;
                    session.record_seed(seed.clone());
                    current = Some(seed);
                    ChainState::Generating(0)
                }
                ChainState::Generating(i) if i >= params.segments => ChainState::Done,
                ChainState::Generating(i) => {
                    let Some(seed) = current.as_ref() else {
                        return Err(PipelineError::Precondition("no seed image".into()));
                    };
                    match self.generate(i, seed, params).await {
                        Ok(done) => {
                            pending_clip = Some(done);
                            ChainState::Extracting(i)
                        }
                        Err(outcome) => {
                            tracing::warn!(
                                segment = i,
                                outcome = ?outcome,
                                "Segment skipped, keeping current seed"
                            );
                            report.outcomes.push(outcome);
                            ChainState::Generating(i + 1)
                        }
                    }
                }
                ChainState::Extracting(i) => {
                    if let Some((job, bytes)) = pending_clip.take() {
                        let outcome = self.extract(i, job, &bytes, &mut current, session);
                        report.outcomes.push(outcome);
                    }
                    ChainState::Generating(i + 1)
                }
                ChainState::Done => break,
            };
        }

        let produced = report.produced();
        tracing::info!(
            requested = params.segments,
            produced,
            seeds = session.seeds().len(),
            "Chain finished"
        );
        if produced == 0 {
            return Err(PipelineError::NoSegments);
        }
        Ok(report)
    }

    fn check_preconditions(&self, params: &ChainParams) -> Result<(), PipelineError> {
        if !self.backend.has_credential() {
            return Err(PipelineError::Precondition(
                "an API key is required (set STABILITY_API_KEY)".into(),
            ));
        }
        let has_prompt = params
            .prompt
            .as_deref()
            .is_some_and(|p| !p.trim().is_empty());
        if !has_prompt && params.source_image.is_none() {
            return Err(PipelineError::Precondition(
                "either a prompt or a source image is required".into(),
            ));
        }
        if params.segments == 0 {
            return Err(PipelineError::Precondition(
                "segment count must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    async fn initial_seed(&self, params: &ChainParams) -> Result<SeedImage, PipelineError> {
        if let Some(image) = &params.source_image {
            return Ok(SeedImage::new(image.clone(), SeedOrigin::UserUploaded));
        }
        let prompt = params.prompt.as_deref().unwrap_or_default();
        tracing::info!(prompt, "Generating initial seed image");
        let request = ImageRequest::from_prompt(prompt, params.resolution);
        let image = self
            .backend
            .generate_image(&request)
            .await
            .map_err(PipelineError::Seeding)?;
        Ok(SeedImage::new(image, SeedOrigin::ModelGenerated))
    }

    async fn generate(
        &self,
        index: usize,
        seed: &SeedImage,
        params: &ChainParams,
    ) -> Result<(GenerationJob, Vec<u8>), SegmentOutcome> {
        let request = GenerationRequest {
            seed_image: seed.clone(),
            cfg_scale: params.cfg_scale,
            motion_bucket_id: params.motion_bucket_id,
            seed: params.seed,
        };
        let job_id = self
            .backend
            .submit_video_job(&request)
            .await
            .map_err(|e| SegmentOutcome::SubmitFailed(e.to_string()))?;
        tracing::info!(segment = index, job_id = %job_id, "Video job submitted");

        let mut job = GenerationJob::submitted(job_id);
        wait_for_job(self.backend, &mut job, &self.policy).await;
        match std::mem::replace(&mut job.status, JobStatus::Pending) {
            JobStatus::Ready(bytes) => Ok((job, bytes)),
            JobStatus::Failed(detail) => Err(SegmentOutcome::JobFailed(detail)),
            JobStatus::TimedOut | JobStatus::Pending => Err(SegmentOutcome::TimedOut),
        }
    }

    fn extract(
        &self,
        index: usize,
        job: GenerationJob,
        bytes: &[u8],
        current: &mut Option<SeedImage>,
        session: &mut SessionArtifacts,
    ) -> SegmentOutcome {
        let clip_path = self.work_dir.join(format!("clip_{index:03}.mp4"));
        if let Err(e) = std::fs::write(&clip_path, bytes) {
            tracing::warn!(
                segment = index,
                path = %clip_path.display(),
                error = %e,
                "Could not write clip, keeping current seed"
            );
            return SegmentOutcome::WriteFailed(e.to_string());
        }

        let clip = ClipArtifact {
            duration: self.inspector.probe_duration(&clip_path).unwrap_or(0.0),
            path: clip_path.clone(),
            job_id: Some(job.id),
        };
        if !clip.is_valid() {
            tracing::warn!(
                segment = index,
                path = %clip_path.display(),
                "Clip is unreadable or empty, keeping current seed"
            );
            return SegmentOutcome::InvalidClip(clip_path);
        }
        tracing::info!(
            segment = index,
            duration = clip.duration,
            path = %clip_path.display(),
            "Clip saved"
        );
        session.record_clip(clip);

        let seed_advanced = match self.inspector.extract_last_frame(&clip_path) {
            Some(frame) => {
                let mut next = SeedImage::new(frame, SeedOrigin::ExtractedLastFrame).normalized();
                match next.save(&self.seed_path(index + 1)) {
                    Ok(()) => {
                        session.record_seed(next.clone());
                        *current = Some(next);
                        true
                    }
                    Err(e) => {
                        tracing::warn!(
                            segment = index,
                            error = %e,
                            "Could not save extracted frame, reusing previous seed"
                        );
                        false
                    }
                }
            }
            None => {
                tracing::warn!(
                    segment = index,
                    "Could not extract last frame, reusing previous seed"
                );
                false
            }
        };

        SegmentOutcome::Produced {
            clip: clip_path,
            seed_advanced,
        }
    }

    fn seed_path(&self, index: usize) -> PathBuf {
        self.work_dir.join(format!("seed_{index:03}.png"))
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }
}
