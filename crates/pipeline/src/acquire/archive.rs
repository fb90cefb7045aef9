use std::path::{Path, PathBuf};

use futures::StreamExt;
use sourcepin_core::context::JobContext;
use sourcepin_core::error::{CoreError, CoreResult};
use sourcepin_core::process::{self, ProcessSpec};
use tokio::io::AsyncWriteExt;

use crate::fsutil;

fn failed(url: &str, reason: impl std::fmt::Display) -> CoreError {
    CoreError::Acquisition {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}

/// Download an archive, extract it into `dest` and unshuck a single
/// top-level directory.
pub(super) async fn fetch(
    ctx: &JobContext,
    http: &reqwest::Client,
    url: &str,
    dest: &Path,
) -> CoreResult<()> {
    let download = download_path(dest)?;
    let bytes = download_to(ctx, http, url, &download).await?;
    ctx.log(format!("Downloaded {bytes} bytes")).await;

    tokio::fs::create_dir_all(dest).await?;
    let extracted = if fsutil::is_zip(&download).await? {
        extract_zip(url, &download, dest).await
    } else {
        extract_tar(ctx, &download, dest).await
    };
    let _ = tokio::fs::remove_file(&download).await;
    extracted.map_err(|e| match e {
        CoreError::Command(f) => failed(url, format!("not a readable archive: {}", f.stderr.trim())),
        other => other,
    })?;

    if fsutil::unshuck(dest).await? {
        ctx.log("Archive had a single top-level directory, using its contents")
            .await;
    }
    Ok(())
}

fn download_path(dest: &Path) -> CoreResult<PathBuf> {
    let parent = dest
        .parent()
        .ok_or_else(|| CoreError::Internal(format!("{} has no parent", dest.display())))?;
    Ok(parent.join("download.archive"))
}

async fn download_to(
    ctx: &JobContext,
    http: &reqwest::Client,
    url: &str,
    path: &Path,
) -> CoreResult<u64> {
    ctx.ensure_active()?;
    let response = http.get(url).send().await.map_err(|e| failed(url, e))?;
    let status = response.status();
    if !status.is_success() {
        return Err(failed(url, format!("HTTP {}", status.as_u16())));
    }

    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut total = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| failed(url, e))?;
        file.write_all(&chunk).await?;
        total += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(total)
}

async fn extract_zip(url: &str, archive: &Path, dest: &Path) -> CoreResult<()> {
    let (url, archive, dest) = (url.to_string(), archive.to_path_buf(), dest.to_path_buf());
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&archive)?;
        let mut zip = zip::ZipArchive::new(file)
            .map_err(|e| failed(&url, format!("not a readable zip archive: {e}")))?;
        zip.extract(&dest)
            .map_err(|e| failed(&url, format!("could not extract zip archive: {e}")))
    })
    .await
    .map_err(|e| CoreError::Internal(format!("extraction task failed: {e}")))?
}

/// Tar-family archives are handed to the system `tar`, which detects the
/// compression itself.
async fn extract_tar(ctx: &JobContext, archive: &Path, dest: &Path) -> CoreResult<()> {
    let spec = ProcessSpec::new("tar")
        .arg("-xf")
        .arg(archive.to_string_lossy())
        .arg("-C")
        .arg(dest.to_string_lossy())
        .arg("--no-same-owner")
        .describe("Could not extract archive");
    process::run(ctx, spec).await?;
    Ok(())
}
