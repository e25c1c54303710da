//! Process-lifetime record of what a run produced.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;

use crate::seed::SeedImage;
use crate::stability::JobId;

/// A rendered segment on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipArtifact {
    pub path: PathBuf,
    pub duration: f64,
    pub job_id: Option<JobId>,
}

impl ClipArtifact {
    pub fn is_valid(&self) -> bool {
        self.duration > 0.0 && self.path.is_file()
    }
}

/// Seeds, clips and the final video of the current run.
///
/// Cleared when a new run starts; never written anywhere except through
/// [`SessionArtifacts::write_bundle`].
#[derive(Debug, Default)]
pub struct SessionArtifacts {
    seeds: Vec<SeedImage>,
    clips: Vec<ClipArtifact>,
    final_video: Option<PathBuf>,
}

impl SessionArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.seeds.clear();
        self.clips.clear();
        self.final_video = None;
    }

    pub fn record_seed(&mut self, seed: SeedImage) {
        self.seeds.push(seed);
    }

    pub fn record_clip(&mut self, clip: ClipArtifact) {
        self.clips.push(clip);
    }

    pub fn set_final_video(&mut self, path: PathBuf) {
        self.final_video = Some(path);
    }

    pub fn seeds(&self) -> &[SeedImage] {
        &self.seeds
    }

    pub fn clips(&self) -> &[ClipArtifact] {
        &self.clips
    }

    pub fn final_video(&self) -> Option<&Path> {
        self.final_video.as_deref()
    }

    /// Zips every persisted seed image and clip, plus the final video when
    /// there is one. Returns the number of files written.
    pub fn write_bundle(&self, zip_path: &Path) -> io::Result<usize> {
        let files: Vec<&Path> = self
            .seeds
            .iter()
            .filter_map(|s| s.path.as_deref())
            .chain(self.clips.iter().map(|c| c.path.as_path()))
            .chain(self.final_video.as_deref())
            .collect();

        let mut zip = zip::ZipWriter::new(File::create(zip_path)?);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

        let mut written = 0;
        for path in files {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let mut source = match File::open(path) {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Skipping missing artifact in bundle"
                    );
                    continue;
                }
            };
            zip.start_file(name, options).map_err(io::Error::other)?;
            io::copy(&mut source, &mut zip)?;
            written += 1;
        }
        zip.finish().map_err(io::Error::other)?;

        tracing::info!(path = %zip_path.display(), files = written, "Wrote artifact bundle");
        Ok(written)
    }
}
