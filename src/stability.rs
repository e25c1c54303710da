//! HTTP client for the Stability AI generation endpoints.
//!
//! Three calls are used: text-to-image (seed generation and batch mode),
//! image-to-video job submission, and job result polling. The
//! [`GenerationBackend`] trait is the seam the orchestrator and batch runner
//! are written against.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use image::RgbImage;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::seed::{Resolution, SeedImage};

/// Opaque job identifier assigned by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextPrompt {
    pub text: String,
    pub weight: f32,
}

impl TextPrompt {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            weight: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub prompts: Vec<TextPrompt>,
    pub cfg_scale: f32,
    pub resolution: Resolution,
    pub steps: u32,
}

impl ImageRequest {
    pub fn from_prompt(prompt: &str, resolution: Resolution) -> Self {
        Self {
            prompts: vec![TextPrompt::new(prompt)],
            cfg_scale: 7.0,
            resolution,
            steps: 30,
        }
    }
}

/// One image-to-video submission. Built per segment, consumed once.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub seed_image: SeedImage,
    pub cfg_scale: f32,
    pub motion_bucket_id: u8,
    /// `0` lets the service pick a random seed.
    pub seed: u32,
}

/// Status of a remote job. The video payload exists only once it is ready.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Pending,
    Ready(Vec<u8>),
    Failed(String),
    TimedOut,
}

impl JobStatus {
    pub fn label(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Ready(_) => "ready",
            JobStatus::Failed(_) => "failed",
            JobStatus::TimedOut => "timed_out",
        }
    }
}

/// An in-flight job and its last observed status.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub id: JobId,
    pub status: JobStatus,
}

impl GenerationJob {
    pub fn submitted(id: JobId) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn has_credential(&self) -> bool;

    async fn generate_image(&self, request: &ImageRequest) -> Result<RgbImage, GenerationError>;

    async fn submit_video_job(&self, request: &GenerationRequest)
        -> Result<JobId, GenerationError>;

    /// One status request. Transport errors surface as [`JobStatus::Failed`].
    async fn poll_job(&self, job_id: &JobId) -> JobStatus;
}

pub struct StabilityClient {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    image_engine: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct TextToImageBody<'a> {
    text_prompts: &'a [TextPrompt],
    cfg_scale: f32,
    height: u32,
    width: u32,
    samples: u32,
    steps: u32,
}

#[derive(Debug, Deserialize)]
struct TextToImageResponse {
    artifacts: Vec<Artifact>,
}

#[derive(Debug, Deserialize)]
struct Artifact {
    base64: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

impl StabilityClient {
    pub fn new(api_base: String, api_key: String, image_engine: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base,
            api_key,
            image_engine,
            timeout,
        }
    }

    async fn with_timeout<T>(
        &self,
        request: impl Future<Output = Result<T, GenerationError>>,
    ) -> Result<T, GenerationError> {
        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout.as_secs()))?
    }

    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, GenerationError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(GenerationError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn fetch_status(&self, job_id: &JobId) -> Result<JobStatus, GenerationError> {
        let response = self
            .client
            .get(format!(
                "{}/v2beta/image-to-video/result/{}",
                self.api_base, job_id
            ))
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "video/*")
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        Ok(job_status(status, body.to_vec()))
    }
}

/// 202 means still rendering, 200 carries the finished video, anything else
/// is terminal.
fn job_status(status: StatusCode, body: Vec<u8>) -> JobStatus {
    match status {
        StatusCode::ACCEPTED => JobStatus::Pending,
        StatusCode::OK => JobStatus::Ready(body),
        status => JobStatus::Failed(format!(
            "HTTP {status}: {}",
            String::from_utf8_lossy(&body)
        )),
    }
}

/// Text fields sent alongside the seed image.
fn video_job_fields(request: &GenerationRequest) -> [(&'static str, String); 3] {
    [
        ("seed", request.seed.to_string()),
        ("cfg_scale", request.cfg_scale.to_string()),
        ("motion_bucket_id", request.motion_bucket_id.to_string()),
    ]
}

fn video_job_form(request: &GenerationRequest) -> Result<Form, GenerationError> {
    let png = request.seed_image.to_png()?;
    let image = Part::bytes(png)
        .file_name("seed.png")
        .mime_str("image/png")?;
    Ok(video_job_fields(request)
        .into_iter()
        .fold(Form::new().part(VIDEO_IMAGE_FIELD, image), |form, (name, value)| {
            form.text(name, value)
        }))
}

const VIDEO_IMAGE_FIELD: &str = "image";

#[async_trait]
impl GenerationBackend for StabilityClient {
    fn has_credential(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    async fn generate_image(&self, request: &ImageRequest) -> Result<RgbImage, GenerationError> {
        let body = TextToImageBody {
            text_prompts: &request.prompts,
            cfg_scale: request.cfg_scale,
            height: request.resolution.height,
            width: request.resolution.width,
            samples: 1,
            steps: request.steps,
        };

        let response = self
            .with_timeout(async {
                let response = self
                    .client
                    .post(format!(
                        "{}/v1/generation/{}/text-to-image",
                        self.api_base, self.image_engine
                    ))
                    .bearer_auth(&self.api_key)
                    .header(reqwest::header::ACCEPT, "application/json")
                    .json(&body)
                    .send()
                    .await?;
                let response = Self::ensure_success(response).await?;
                Ok::<_, GenerationError>(response.json::<TextToImageResponse>().await?)
            })
            .await?;

        decode_artifact(response)
    }

    async fn submit_video_job(
        &self,
        request: &GenerationRequest,
    ) -> Result<JobId, GenerationError> {
        let form = video_job_form(request)?;

        let submitted = self
            .with_timeout(async {
                let response = self
                    .client
                    .post(format!("{}/v2beta/image-to-video", self.api_base))
                    .bearer_auth(&self.api_key)
                    .multipart(form)
                    .send()
                    .await?;
                let response = Self::ensure_success(response).await?;
                Ok::<_, GenerationError>(response.json::<SubmitResponse>().await?)
            })
            .await?;

        if submitted.id.is_empty() {
            return Err(GenerationError::Malformed("empty job id".into()));
        }
        Ok(JobId(submitted.id))
    }

    async fn poll_job(&self, job_id: &JobId) -> JobStatus {
        match self.with_timeout(self.fetch_status(job_id)).await {
            Ok(status) => status,
            Err(e) => JobStatus::Failed(e.to_string()),
        }
    }
}

fn decode_artifact(response: TextToImageResponse) -> Result<RgbImage, GenerationError> {
    use base64::prelude::BASE64_STANDARD;

    let artifact = response
        .artifacts
        .into_iter()
        .next()
        .ok_or_else(|| GenerationError::Malformed("no artifacts in response".into()))?;
    let bytes = BASE64_STANDARD
        .decode(artifact.base64.as_bytes())
        .map_err(|e| GenerationError::Malformed(format!("artifact is not base64: {e}")))?;
    Ok(image::load_from_memory(&bytes)?.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::prelude::BASE64_STANDARD;

    #[test]
    fn text_to_image_body_matches_wire_format() {
        let request = ImageRequest::from_prompt("a castle at dusk", Resolution::LANDSCAPE);
        let body = TextToImageBody {
            text_prompts: &request.prompts,
            cfg_scale: request.cfg_scale,
            height: request.resolution.height,
            width: request.resolution.width,
            samples: 1,
            steps: request.steps,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["text_prompts"][0]["text"], "a castle at dusk");
        assert_eq!(json["text_prompts"][0]["weight"], 1.0);
        assert_eq!(json["width"], 1024);
        assert_eq!(json["height"], 576);
        assert_eq!(json["samples"], 1);
    }

    #[test]
    fn decodes_first_artifact() {
        let mut png = Vec::new();
        RgbImage::new(4, 2)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let payload = serde_json::json!({
            "artifacts": [{
                "base64": BASE64_STANDARD.encode(&png),
                "seed": 1,
                "finishReason": "SUCCESS"
            }]
        });
        let response: TextToImageResponse = serde_json::from_value(payload).unwrap();
        let image = decode_artifact(response).unwrap();
        assert_eq!((image.width(), image.height()), (4, 2));
    }

    #[test]
    fn empty_artifacts_is_malformed() {
        let response: TextToImageResponse =
            serde_json::from_value(serde_json::json!({ "artifacts": [] })).unwrap();
        assert!(matches!(
            decode_artifact(response),
            Err(GenerationError::Malformed(_))
        ));
    }

    #[test]
    fn bad_base64_is_malformed() {
        let response: TextToImageResponse =
            serde_json::from_value(serde_json::json!({ "artifacts": [{ "base64": "%%%" }] }))
                .unwrap();
        assert!(matches!(
            decode_artifact(response),
            Err(GenerationError::Malformed(_))
        ));
    }

    #[test]
    fn credential_check_rejects_blank_key() {
        let client = StabilityClient::new(
            "http://localhost".into(),
            " ".into(),
            "engine".into(),
            Duration::from_secs(1),
        );
        assert!(!client.has_credential());
    }

    #[tokio::test]
    async fn unreachable_host_polls_as_failed() {
        let client = StabilityClient::new(
            "http://127.0.0.1:9".into(),
            "key".into(),
            "engine".into(),
            Duration::from_secs(5),
        );
        let status = client.poll_job(&JobId("abc".into())).await;
        assert!(matches!(status, JobStatus::Failed(_)));
    }

    #[test]
    fn accepted_means_still_rendering() {
        assert_eq!(job_status(StatusCode::ACCEPTED, Vec::new()), JobStatus::Pending);
    }

    #[test]
    fn ok_carries_the_video_bytes() {
        assert_eq!(
            job_status(StatusCode::OK, b"mp4 bytes".to_vec()),
            JobStatus::Ready(b"mp4 bytes".to_vec())
        );
    }

    #[test]
    fn other_codes_fail_with_the_body() {
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::NOT_FOUND,
            StatusCode::INTERNAL_SERVER_ERROR,
        ] {
            match job_status(status, b"content moderation".to_vec()) {
                JobStatus::Failed(detail) => {
                    assert!(detail.contains(status.as_str()), "{detail}");
                    assert!(detail.contains("content moderation"), "{detail}");
                }
                other => panic!("{status} mapped to {other:?}"),
            }
        }
    }

    fn video_request() -> GenerationRequest {
        GenerationRequest {
            seed_image: SeedImage::new(
                RgbImage::new(768, 768),
                crate::seed::SeedOrigin::UserUploaded,
            ),
            cfg_scale: 1.8,
            motion_bucket_id: 127,
            seed: 42,
        }
    }

    #[test]
    fn video_job_form_uses_wire_field_names() {
        let fields = video_job_fields(&video_request());
        assert_eq!(
            fields,
            [
                ("seed", "42".to_string()),
                ("cfg_scale", "1.8".to_string()),
                ("motion_bucket_id", "127".to_string()),
            ]
        );
        assert_eq!(VIDEO_IMAGE_FIELD, "image");
        assert!(video_job_form(&video_request()).is_ok());
    }
}
