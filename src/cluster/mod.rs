//! Clustering: anchor/orphan classification, bib propagation, and the
//! debounce scheduler that decides when an event gets a run.

pub mod classifier;
pub mod engine;
pub mod scheduler;

pub use classifier::{classify, EventPartition};
pub use engine::{cluster_faces_by_event, needs_clustering, ClusteringStats};
pub use scheduler::ClusterScheduler;
