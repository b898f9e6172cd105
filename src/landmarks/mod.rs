//! Pose landmark data: the frame model and the sources that produce frames.

mod model;
mod source;

pub use model::*;
pub use source::{
    FrameStream, InMemoryLandmarkSource, JsonlLandmarkSource, LandmarkSource, SourceError,
    SourceFrame,
};
