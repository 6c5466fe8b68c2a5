//! Chunked-file ingestion and atomic-commit pipeline.
//!
//! Chunks arrive independently and in any order; the pipeline tracks
//! per-upload sessions, verifies chunk integrity, reassembles the file
//! once every chunk is in, and commits it into a module's storage subtree
//! together with a metadata record — atomically, with compensation for
//! every failure point before the record transaction commits.
//!
//! The [`Pipeline`] facade is the intended entry point; the individual
//! components ([`ChunkStore`], [`AssemblyEngine`], [`CommitOrchestrator`],
//! the sweeper) are public for callers that need finer control.

pub mod artifacts;
pub mod assembly;
pub mod chunks;
pub mod commit;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod sweeper;

pub use artifacts::{ArtifactInput, DerivedArtifacts, NoArtifacts};
pub use assembly::AssemblyEngine;
pub use chunks::{ChunkStore, ChunkUpload};
pub use commit::{CommitOrchestrator, CommitReceipt};
pub use error::{PipelineError, PipelineResult};
pub use pipeline::Pipeline;
pub use registry::{ModuleBinding, ModuleRegistry, PlannedPaths};
pub use sweeper::SweeperHandle;
