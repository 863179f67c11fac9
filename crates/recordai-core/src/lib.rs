//! recordai-core: Identity matching engine.
//!
//! Nearest-neighbour matching of face embeddings against known people,
//! multi-sample averaging, and the per-face tracking session that drives
//! a matching backend from a stream of detections.

pub mod greeting;
pub mod matcher;
pub mod sampling;
pub mod session;
pub mod tracker;
pub mod types;

pub use matcher::{IdentityMatcher, MatchError};
pub use sampling::{average, SamplingError};
pub use types::{
    BoundingBox, Confidence, DistanceMetric, Embedding, EmbeddingSpace, KnownPerson,
    MatchCandidate, MatchOutcome, PersonProfile,
};
