//! Build artifacts and the size-based compression policy.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::Target;

/// Default threshold above which an artifact is delivered gzip-compressed.
pub const DEFAULT_COMPRESS_ABOVE_BYTES: u64 = 48 * 1024 * 1024;

/// An output image produced for one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub target: Target,
    /// File that is delivered; the `.gz` sibling when compressed.
    pub path: PathBuf,
    /// Size of the original image in bytes.
    pub size: u64,
    pub compressed: bool,
}

impl Artifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.target.image_file_name())
    }
}

/// Decides whether an artifact is compressed before delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionPolicy {
    pub compress_above_bytes: u64,
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        Self {
            compress_above_bytes: DEFAULT_COMPRESS_ABOVE_BYTES,
        }
    }
}

impl CompressionPolicy {
    /// Strictly greater than the threshold; an image of exactly the threshold ships raw.
    pub fn should_compress(&self, size: u64) -> bool {
        size > self.compress_above_bytes
    }
}

/// Path of the compressed sibling, `<image>.gz`.
pub fn compressed_path(image: &Path) -> PathBuf {
    let mut name = image.as_os_str().to_os_string();
    name.push(".gz");
    PathBuf::from(name)
}
