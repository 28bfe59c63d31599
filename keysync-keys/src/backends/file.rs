//! Local filesystem storage backend
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::backend::Backend;
use crate::error::{BackendError, BackendResult};
use async_trait::async_trait;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::{fs, task};
use tracing::{debug, info, warn};

const TEMP_PREFIX: &str = ".keysync-";
const TEMP_SUFFIX: &str = ".tmp";

/// Temporary files older than this belong to a writer that died before renaming
const STALE_TEMP_AGE: Duration = Duration::from_secs(10 * 60);

fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX)
}

/// Write `value` to a uniquely named sibling of `file`, then rename it into place
fn write_atomically(dir: &Path, file: &Path, value: &[u8]) -> io::Result<()> {
    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)?;
    tmp.write_all(value)?;
    tmp.as_file().sync_data()?;
    tmp.persist(file).map_err(|e| e.error)?;
    Ok(())
}

/// Remove `entry` if it is a temporary file abandoned by a crashed writer
async fn remove_if_stale(entry: &fs::DirEntry) {
    let stale = entry
        .metadata()
        .await
        .and_then(|metadata| metadata.modified())
        .map(|modified| modified.elapsed().is_ok_and(|age| age > STALE_TEMP_AGE))
        .unwrap_or(false);
    if !stale {
        return;
    }

    let path = entry.path();
    match fs::remove_file(&path).await {
        Ok(()) => debug!(path = %path.display(), "Removed stale temporary file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(
            path = %path.display(),
            error = %e,
            "Unable to remove stale temporary file"
        ),
    }
}

/// One file per backend path under a root directory.
///
/// Several processes on one host may share the directory. Watching is not
/// supported, so key stores on this backend rely on polling.
pub struct FileBackend {
    /// Storage directory
    root: PathBuf,
}

impl FileBackend {
    /// Open a file backend, creating the root directory if needed
    pub async fn new<P: AsRef<Path>>(root: P) -> BackendResult<Self> {
        let root = root.as_ref().to_path_buf();

        // Create storage directory if it doesn't exist
        fs::create_dir_all(&root).await?;

        let mut entries = fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_str().is_some_and(is_temp_name) {
                remove_if_stale(&entry).await;
            }
        }
        info!(path = %root.display(), "Opened file backend");

        Ok(Self { root })
    }

    /// Map a backend path onto the filesystem, refusing anything that could escape the root
    fn resolve(&self, path: &str) -> BackendResult<PathBuf> {
        let trimmed = path.trim_matches('/');
        let mut resolved = self.root.clone();

        if trimmed.is_empty() {
            return Ok(resolved);
        }

        for segment in trimmed.split('/') {
            if segment.is_empty()
                || segment == "."
                || segment == ".."
                || segment.contains('\\')
                || is_temp_name(segment)
            {
                return Err(BackendError::InvalidPath(path.to_string()));
            }
            resolved.push(segment);
        }

        Ok(resolved)
    }

    fn resolve_file(&self, path: &str) -> BackendResult<PathBuf> {
        let resolved = self.resolve(path)?;
        if resolved == self.root {
            return Err(BackendError::InvalidPath(path.to_string()));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl Backend for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, path: &str) -> BackendResult<Option<Vec<u8>>> {
        let file = self.resolve_file(path)?;
        match fs::read(&file).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, path: &str, value: &[u8]) -> BackendResult<()> {
        let file = self.resolve_file(path)?;
        let dir = file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&dir).await?;

        // Each write gets its own temporary file, so concurrent writers of
        // one path never share it and readers never see a partial value
        let value = value.to_vec();
        task::spawn_blocking(move || write_atomically(&dir, &file, &value))
            .await
            .map_err(|e| io::Error::new(ErrorKind::Other, e))??;

        debug!(path = %path, "Stored value");
        Ok(())
    }

    async fn delete(&self, path: &str) -> BackendResult<()> {
        let file = self.resolve_file(path)?;
        match fs::remove_file(&file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> BackendResult<Vec<String>> {
        let dir = self.resolve(prefix)?;

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                // In-flight writes from `set`, or leftovers of a crashed writer
                if is_temp_name(name) {
                    remove_if_stale(&entry).await;
                    continue;
                }
                if name.is_empty() {
                    continue;
                }
                children.push(name.to_string());
            }
        }

        children.sort();
        Ok(children)
    }

    async fn close(&self) -> BackendResult<()> {
        Ok(())
    }
}
