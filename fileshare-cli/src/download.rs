//! Saving accepted offers to disk.
//!
//! Names come from a remote peer, so only the final path component is
//! kept and existing files are never overwritten.

use anyhow::{Context, Result};
use base64::Engine;
use fileshare_types::FileOffer;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Name used when the offered name has nothing usable left.
const FALLBACK_NAME: &str = "download";

/// Reduce an offered file name to a single safe path component.
pub fn sanitize_file_name(name: &str) -> String {
    let last = name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();
    let cleaned: String = last
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').trim();

    if cleaned.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Candidate path for attempt `n`: `name.ext`, `name (1).ext`, ...
fn candidate(dir: &Path, name: &str, n: u32) -> PathBuf {
    if n == 0 {
        return dir.join(name);
    }
    let path = Path::new(name);
    match (
        path.file_stem().and_then(|s| s.to_str()),
        path.extension().and_then(|e| e.to_str()),
    ) {
        (Some(stem), Some(ext)) => dir.join(format!("{} ({}).{}", stem, n, ext)),
        _ => dir.join(format!("{} ({})", name, n)),
    }
}

/// Decode an accepted offer and write it into `dir`.
///
/// Returns the path written.
pub async fn save_offer(dir: &Path, offer: &FileOffer) -> Result<PathBuf> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(offer.file.trim())
        .with_context(|| format!("Offer {:?} is not valid base64", offer.file_name))?;

    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create download directory {:?}", dir))?;

    let name = sanitize_file_name(&offer.file_name);
    for n in 0.. {
        let path = candidate(dir, &name, n);
        // create_new: never clobber an existing file, even if one appears
        // between attempts.
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => {
                write_or_remove(file, &path, &bytes).await?;
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e).with_context(|| format!("Failed to create {:?}", path)),
        }
    }
    anyhow::bail!("No free file name for {:?}", name)
}

/// Write `bytes` to the freshly created `path`, removing it if the write
/// fails so no truncated file is left behind.
async fn write_or_remove<W>(mut file: W, path: &Path, bytes: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await
    }
    .await;
    drop(file);

    if let Err(e) = written {
        if let Err(remove) = tokio::fs::remove_file(path).await {
            tracing::warn!("Could not remove partial file {:?}: {}", path, remove);
        }
        return Err(e).with_context(|| format!("Failed to write {:?}", path));
    }
    Ok(())
}
