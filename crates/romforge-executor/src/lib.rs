//! Per-job build pipeline for romforge.
//!
//! - [`PipelineExecutor`]: runs one job's stages and reports to its requester
//! - [`GitFetcher`]: shallow clone of the job's source
//! - [`ShellToolchain`]: combined environment setup and build in one shell
//! - [`Workspace`]: layout of the shared source tree

pub mod compress;
pub mod git;
pub mod pipeline;
pub mod toolchain;
pub mod workspace;

pub use git::GitFetcher;
pub use pipeline::PipelineExecutor;
pub use toolchain::ShellToolchain;
pub use workspace::Workspace;
