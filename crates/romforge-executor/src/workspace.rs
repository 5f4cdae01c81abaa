//! Layout of the shared source tree and per-job cleanup.

use romforge_core::{DevicePath, Target};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// The shared on-disk workspace all jobs build in.
///
/// ```text
/// <root>/device/<device path>/                  checkout of the job's source
/// <root>/out/target/product/<codename>/<t>.img  build output
/// ```
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn out_dir(&self) -> PathBuf {
        self.root.join("out")
    }

    /// Checkout directory for a device, joined segment by segment.
    pub fn device_dir(&self, device_path: &DevicePath) -> PathBuf {
        device_path
            .segments()
            .fold(self.root.join("device"), |dir, segment| dir.join(segment))
    }

    pub fn product_dir(&self, codename: &str) -> PathBuf {
        self.out_dir().join("target").join("product").join(codename)
    }

    pub fn image_path(&self, codename: &str, target: Target) -> PathBuf {
        self.product_dir(codename).join(target.image_file_name())
    }

    /// Remove the previous build output and the device checkout.
    ///
    /// Best effort: a missing directory is the desired end state and any
    /// other failure is only logged.
    pub async fn reset(&self, device_path: &DevicePath) {
        for dir in [self.out_dir(), self.device_dir(device_path)] {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => debug!(path = %dir.display(), "Removed directory"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = %dir.display(), error = %e, "Cleanup failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let workspace = Workspace::new("/srv/android");
        let device = DevicePath::parse("xiaomi/lavender").unwrap();

        assert_eq!(
            workspace.device_dir(&device),
            PathBuf::from("/srv/android/device/xiaomi/lavender")
        );
        assert_eq!(
            workspace.image_path(device.codename(), Target::VendorBoot),
            PathBuf::from("/srv/android/out/target/product/lavender/vendor_boot.img")
        );
    }

    #[tokio::test]
    async fn test_reset_removes_output_and_checkout() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path());
        let device = DevicePath::parse("xiaomi/lavender").unwrap();

        let product = workspace.product_dir("lavender");
        std::fs::create_dir_all(&product).unwrap();
        std::fs::write(product.join("boot.img"), b"old").unwrap();
        let checkout = workspace.device_dir(&device);
        std::fs::create_dir_all(&checkout).unwrap();
        std::fs::write(checkout.join("BoardConfig.mk"), b"x").unwrap();
        let sibling = dir.path().join("device").join("xiaomi").join("other");
        std::fs::create_dir_all(&sibling).unwrap();

        workspace.reset(&device).await;

        assert!(!workspace.out_dir().exists());
        assert!(!checkout.exists());
        assert!(sibling.exists());
    }

    #[tokio::test]
    async fn test_reset_tolerates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path());
        let device = DevicePath::parse("a/b").unwrap();

        workspace.reset(&device).await;
        workspace.reset(&device).await;

        assert!(!workspace.out_dir().exists());
    }
}
