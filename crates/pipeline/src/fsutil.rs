//! Filesystem helpers for scratch working trees.
//!
//! The walks here are synchronous and run on the blocking pool through the
//! async wrappers.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sourcepin_core::error::{CoreError, CoreResult};

/// Directories holding version-control metadata of the acquired source.
pub const VCS_METADATA: &[&str] = &[".git", ".hg", ".svn", ".bzr"];

async fn blocking<T, F>(f: F) -> CoreResult<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CoreError::Internal(format!("filesystem task failed: {e}")))?
        .map_err(CoreError::from)
}

/// Remove VCS metadata (directories or `.git` files) at any depth.
pub async fn strip_vcs_metadata(root: &Path) -> CoreResult<usize> {
    let root = root.to_path_buf();
    blocking(move || strip_dir(&root)).await
}

fn strip_dir(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let is_metadata = entry
            .file_name()
            .to_str()
            .is_some_and(|name| VCS_METADATA.contains(&name));

        if is_metadata {
            if file_type.is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
            removed += 1;
        } else if file_type.is_dir() {
            removed += strip_dir(&entry.path())?;
        }
    }
    Ok(removed)
}

/// If `dir` holds exactly one entry and it is a directory, move that
/// directory's contents up into `dir`. Returns whether anything moved.
pub async fn unshuck(dir: &Path) -> CoreResult<bool> {
    let dir = dir.to_path_buf();
    blocking(move || unshuck_dir(&dir)).await
}

fn unshuck_dir(dir: &Path) -> io::Result<bool> {
    let entries: Vec<fs::DirEntry> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    let [only] = entries.as_slice() else {
        return Ok(false);
    };
    if !only.file_type()?.is_dir() {
        return Ok(false);
    }

    let parent = dir
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no parent directory"))?;
    let staging = unique_sibling(parent, "unshuck");
    fs::rename(only.path(), &staging)?;
    fs::remove_dir(dir)?;
    fs::rename(&staging, dir)?;
    Ok(true)
}

fn unique_sibling(parent: &Path, stem: &str) -> PathBuf {
    let mut n = 0;
    loop {
        let candidate = parent.join(format!(".{stem}-{n}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Recursively copy `src` to `dst`, preserving symlinks as symlinks.
pub async fn copy_tree(src: &Path, dst: &Path) -> CoreResult<()> {
    let (src, dst) = (src.to_path_buf(), dst.to_path_buf());
    blocking(move || copy_dir(&src, &dst)).await
}

fn copy_dir(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else if file_type.is_symlink() {
            copy_symlink(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(src)?, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst).map(|_| ())
}

/// Whether the file starts with the zip local-file-header signature.
pub async fn is_zip(path: &Path) -> CoreResult<bool> {
    use tokio::io::AsyncReadExt;

    let mut file = tokio::fs::File::open(path).await?;
    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic).await {
        Ok(_) => Ok(&magic == b"PK\x03\x04"),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}
