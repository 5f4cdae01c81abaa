//! Gzip compression of oversized artifacts.

use flate2::Compression;
use flate2::write::GzEncoder;
use romforge_core::artifact::compressed_path;
use romforge_core::{Error, Result};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Write `<image>.gz` next to `image`, keeping the original.
///
/// The encoder runs on the blocking pool. A partially written sibling is
/// removed on failure.
pub async fn gzip_keep_original(image: &Path) -> Result<PathBuf> {
    let source = image.to_path_buf();
    let destination = compressed_path(image);

    let target = destination.clone();
    let result = tokio::task::spawn_blocking(move || gzip_file(&source, &target))
        .await
        .map_err(|e| Error::Internal(format!("compression task failed: {}", e)))?;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&destination).await;
        return Err(Error::Io(e));
    }
    Ok(destination)
}

fn gzip_file(source: &Path, destination: &Path) -> io::Result<()> {
    let mut reader = BufReader::new(File::open(source)?);
    let writer = BufWriter::new(File::create(destination)?);
    let mut encoder = GzEncoder::new(writer, Compression::default());
    io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?.flush()
}
