//! Atomic file placement.
//!
//! A [`StagedFile`] collects bytes in a hidden temporary file next to its
//! target and renames it into place on [`commit`](StagedFile::commit). Until
//! then the target is untouched, and dropping the staged file (failure,
//! timeout, cancelled task) deletes the temporary file.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

/// Temporary file that becomes `target` once committed.
#[derive(Debug)]
pub struct StagedFile {
    file: File,
    temp_path: TempPath,
    target: PathBuf,
}

impl StagedFile {
    /// Stage a new file for `target`, creating its parent directories.
    pub async fn create(target: &Path) -> io::Result<Self> {
        let parent = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).await?;

        let dir = parent.to_path_buf();
        let named = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(".fetchkeep-")
                .suffix(".part")
                .tempfile_in(dir)
        })
        .await
        .map_err(io::Error::other)??;
        let (file, temp_path) = named.into_parts();

        Ok(Self {
            file: File::from_std(file),
            temp_path,
            target: target.to_path_buf(),
        })
    }

    /// Append a chunk.
    pub async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk).await
    }

    /// Append the whole content of another file.
    pub async fn copy_from(&mut self, source: &Path) -> io::Result<u64> {
        let mut source = File::open(source).await?;
        tokio::io::copy(&mut source, &mut self.file).await
    }

    /// Where the bytes are collected until the commit.
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Flush to disk and rename onto the target, replacing it if present.
    pub async fn commit(mut self) -> io::Result<PathBuf> {
        self.file.flush().await?;
        self.file.sync_all().await?;

        let Self {
            file,
            temp_path,
            target,
        } = self;
        drop(file);

        temp_path.persist(&target).map_err(|e| e.error)?;
        Ok(target)
    }
}
