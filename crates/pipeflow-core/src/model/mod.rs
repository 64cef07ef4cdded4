//! Modelos neutrales (Artifact, Fingerprint, ExecutionContext, config).

pub mod artifact;
pub mod config;
pub mod context;
pub mod fingerprint;

pub use artifact::{Artifact, ArtifactStatus, CommitGuard, NewArtifact};
pub use config::PipelineConfig;
pub use context::ExecutionContext;
pub use fingerprint::Fingerprint;
