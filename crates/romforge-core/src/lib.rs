//! Core domain types and traits for the romforge image builder.
//!
//! This crate contains:
//! - Job identifiers, requests and submission validation
//! - The fixed build target table
//! - Artifact and compression policy types
//! - Seam traits for the delivery transport, source fetcher, toolchain and job runner

pub mod artifact;
pub mod error;
pub mod id;
pub mod job;
pub mod runner;
pub mod toolchain;
pub mod transport;

pub use error::{Error, Result};
pub use id::JobId;
pub use job::{ChannelId, DevicePath, Job, JobRequest, RequesterId, SourceRef, Target};
