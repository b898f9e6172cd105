//! Landmark sources.
//!
//! The pose detector runs outside this server. What the orchestrator consumes is
//! its output: a lazy sequence of raw frames for a given video reference.

use super::model::RawFrame;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// One item of a frame stream. `Skipped` marks a record that could not be
/// decoded; it still occupies a frame number.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceFrame {
    Frame(RawFrame),
    Skipped { reason: String },
}

pub type FrameStream = Box<dyn Iterator<Item = Result<SourceFrame, SourceError>> + Send>;

/// Job-level source faults.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("landmark source for '{0}' not found")]
    NotFound(String),
    #[error("failed to read landmark source: {0}")]
    Io(#[from] std::io::Error),
    #[error("landmark source is malformed: {0}")]
    Malformed(String),
    #[error("landmark source produced no frames")]
    NoFrames,
}

impl SourceError {
    /// Transient faults may succeed if the source is opened again later.
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Io(_))
    }
}

/// Produces the landmark frames for a stored video.
pub trait LandmarkSource: Send + Sync {
    fn open(&self, video_reference: &str) -> Result<FrameStream, SourceError>;
}

/// Reads detector output from `<root>/<video_reference>.landmarks.jsonl`,
/// one JSON frame record per line.
pub struct JsonlLandmarkSource {
    root: PathBuf,
}

impl JsonlLandmarkSource {
    pub const EXTENSION: &'static str = "landmarks.jsonl";

    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Resolves the landmark file for a video reference. References that try to
    /// escape the root directory are rejected.
    pub fn landmarks_path(&self, video_reference: &str) -> Result<PathBuf, SourceError> {
        let relative = Path::new(video_reference.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || video_reference.trim().is_empty() {
            return Err(SourceError::Malformed(format!(
                "invalid video reference '{}'",
                video_reference
            )));
        }
        let file_name = format!("{}.{}", relative.display(), Self::EXTENSION);
        Ok(self.root.join(file_name))
    }
}

impl LandmarkSource for JsonlLandmarkSource {
    fn open(&self, video_reference: &str) -> Result<FrameStream, SourceError> {
        let path = self.landmarks_path(video_reference)?;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::NotFound(video_reference.to_string()));
            }
            Err(e) => return Err(SourceError::Io(e)),
        };
        debug!("Opened landmark file {:?}", path);

        Ok(Box::new(JsonlFrames {
            reader: BufReader::new(file),
            line_no: 0,
            buf: Vec::new(),
        }))
    }
}

/// Lazy record iterator over a landmarks file. Lines are decoded one by one, so
/// a line that is not UTF-8 or not JSON only skips that record.
struct JsonlFrames<R> {
    reader: R,
    line_no: usize,
    buf: Vec<u8>,
}

impl<R: BufRead> JsonlFrames<R> {
    fn decode(&self) -> SourceFrame {
        let line = match std::str::from_utf8(&self.buf) {
            Ok(line) => line,
            Err(e) => {
                warn!("Skipping non UTF-8 landmark record on line {}: {}", self.line_no, e);
                return SourceFrame::Skipped {
                    reason: e.to_string(),
                };
            }
        };
        match serde_json::from_str::<RawFrame>(line) {
            Ok(frame) => SourceFrame::Frame(frame),
            Err(e) => {
                warn!("Skipping undecodable landmark record on line {}: {}", self.line_no, e);
                SourceFrame::Skipped {
                    reason: e.to_string(),
                }
            }
        }
    }
}

impl<R: BufRead> Iterator for JsonlFrames<R> {
    type Item = Result<SourceFrame, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(SourceError::Io(e))),
            }
            self.line_no += 1;
            if self.buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Some(Ok(self.decode()));
        }
    }
}

/// In-memory source keyed by video reference. Used by tests and by callers that
/// already hold detector output.
#[derive(Default, Clone)]
pub struct InMemoryLandmarkSource {
    videos: Arc<Mutex<HashMap<String, Vec<RawFrame>>>>,
}

impl InMemoryLandmarkSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, video_reference: &str, frames: Vec<RawFrame>) {
        self.videos
            .lock()
            .unwrap()
            .insert(video_reference.to_string(), frames);
    }
}

impl LandmarkSource for InMemoryLandmarkSource {
    fn open(&self, video_reference: &str) -> Result<FrameStream, SourceError> {
        let frames = self
            .videos
            .lock()
            .unwrap()
            .get(video_reference)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(video_reference.to_string()))?;
        Ok(Box::new(frames.into_iter().map(|f| Ok(SourceFrame::Frame(f)))))
    }
}
