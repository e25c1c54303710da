//! Independent text-to-image requests run concurrently.
//!
//! Unlike chained segments these share no state, so up to `workers` requests
//! are in flight at once. Each result is written to its own file.

use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};

use crate::seed::{SeedImage, SeedOrigin};
use crate::stability::{GenerationBackend, ImageRequest};

#[derive(Debug)]
pub struct BatchResult {
    pub index: usize,
    /// `None` when the request or the write failed.
    pub path: Option<PathBuf>,
}

pub async fn generate_batch<B>(
    backend: &B,
    requests: Vec<ImageRequest>,
    output_dir: &Path,
    workers: usize,
) -> Vec<BatchResult>
where
    B: GenerationBackend + ?Sized,
{
    let total = requests.len();
    let mut results: Vec<BatchResult> = stream::iter(requests.into_iter().enumerate())
        .map(|(index, request)| async move {
            let path = output_dir.join(format!("batch_{index:03}.png"));
            let saved = match backend.generate_image(&request).await {
                Ok(image) => {
                    let mut seed = SeedImage::new(image, SeedOrigin::ModelGenerated);
                    seed.save(&path).map_err(|e| e.to_string())
                }
                Err(e) => Err(e.to_string()),
            };
            match saved {
                Ok(()) => {
                    tracing::info!(index, total, path = %path.display(), "Batch image saved");
                    BatchResult {
                        index,
                        path: Some(path),
                    }
                }
                Err(error) => {
                    tracing::warn!(index, error = %error, "Batch image failed");
                    BatchResult { index, path: None }
                }
            }
        })
        .buffer_unordered(workers.max(1))
        .collect()
        .await;

    results.sort_by_key(|r| r.index);
    results
}
