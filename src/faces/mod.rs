//! Face detection, embedding, and the similarity index the clustering
//! engine searches against.

pub mod detector;
pub mod index;

pub use detector::DetectedFace;
pub use index::{EnrolledFace, ExternalImageId, FaceIndex, FaceMatch, LocalFaceIndex};
