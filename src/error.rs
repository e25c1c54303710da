use thiserror::Error;

/// Failures talking to the remote generation service.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Failures of the concatenation step. Per-segment clips stay on disk.
#[derive(Debug, Error)]
pub enum ConcatError {
    #[error("no valid segments to concatenate")]
    NoValidSegments,

    #[error(
        "crossfade of {crossfade}s must be non-negative and shorter than \
         the shortest clip ({shortest:.3}s)"
    )]
    InvalidCrossfade { crossfade: f64, shortest: f64 },

    #[error("concatenation failed: {0}")]
    Failed(String),
}

/// Run-halting failures of a chain run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("could not produce an initial seed image: {0}")]
    Seeding(#[source] GenerationError),

    #[error("no segments were produced")]
    NoSegments,

    #[error(transparent)]
    Concat(#[from] ConcatError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}
