use crate::error::TaskError;
use crate::tasks::TaskContext;
use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::Client;
use sha1::{Digest, Sha1};
use std::path::Path;
use std::time::Instant;
use tokio::fs::{create_dir_all, File};
use tokio::io::AsyncWriteExt;

const MAX_ATTEMPTS: u32 = 3;
// Base delay; attempt n waits n times this.
const RETRY_DELAY_MS: u64 = 1000;

/// Download a file to a path with SHA1 validation and retry logic.
///
/// The body is streamed into `<name>.part` next to `path` and only renamed
/// into place once the hash matched, so `path` is never left half written.
pub async fn download_to_path(
    client: &Client,
    url: &str,
    path: &Path,
    expected_sha1: Option<&str>,
    ctx: &TaskContext,
) -> Result<()> {
    log::debug!("Downloading: {} -> {:?}", url, path);

    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }

    let mut attempt = 0;
    loop {
        attempt += 1;
        match download_with_validation(client, url, path, expected_sha1, ctx).await {
            Ok(()) => return Ok(()),
            Err(e) if is_abort(&e) => return Err(e),
            Err(e) if attempt >= MAX_ATTEMPTS => {
                log::error!("Download failed after {} attempts: {}", attempt, e);
                return Err(e)
                    .context(format!("Failed to download {} after {} attempts", url, attempt));
            }
            Err(e) => {
                log::warn!(
                    "Download failed (attempt {}/{}) : {}. Retrying...",
                    attempt,
                    MAX_ATTEMPTS,
                    e
                );
                tokio::time::sleep(std::time::Duration::from_millis(
                    RETRY_DELAY_MS * attempt as u64,
                ))
                .await;
            }
        }
    }
}

/// True when the error chain carries a user abort.
pub fn is_abort(e: &anyhow::Error) -> bool {
    matches!(e.downcast_ref::<TaskError>(), Some(TaskError::Aborted))
}

async fn download_with_validation(
    client: &Client,
    url: &str,
    path: &Path,
    expected_sha1: Option<&str>,
    ctx: &TaskContext,
) -> Result<()> {
    let start = Instant::now();
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        anyhow::bail!("HTTP error {}: {}", response.status(), url);
    }
    let total_size = response.content_length();

    let tmp_name = format!(
        "{}.part",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("download")
    );
    let tmp_path = path.with_file_name(tmp_name);
    let mut file = File::create(&tmp_path).await?;
    let mut downloaded: u64 = 0;
    let mut hasher = Sha1::new();

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        if let Err(e) = ctx.checkpoint().await {
            drop(file);
            let _ = tokio::fs::remove_file(&tmp_path).await;
            log::warn!("Download stopped: {:?}", path);
            return Err(e.into());
        }

        let chunk = chunk?;
        file.write_all(&chunk).await?;
        hasher.update(&chunk);
        downloaded += chunk.len() as u64;
        if let Some(total) = total_size {
            ctx.set_progress(downloaded, total);
        }
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    if let Some(expected) = expected_sha1 {
        let computed = format!("{:x}", hasher.finalize());
        if !computed.eq_ignore_ascii_case(expected) {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            anyhow::bail!(
                "SHA1 mismatch for {}: expected {}, got {}",
                url,
                expected,
                computed
            );
        }
    }

    tokio::fs::rename(&tmp_path, path).await?;
    log::info!(
        "Downloaded {} ({} bytes in {:.2}s)",
        url,
        downloaded,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
