use anyhow::{anyhow, Context, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::models::{CanonicalJobRecord, ScrapeRunArtifact};

/// The committed `jobs.json` list the careers site renders.
pub struct JobStore {
    path: PathBuf,
}

/// Exclusive right to rewrite the store. Released on drop.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("failed to release {}: {}", self.path.display(), e);
        }
    }
}

impl JobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }

    /// Stored records, or an empty list when nothing has been committed yet.
    pub fn load(&self) -> Result<Vec<CanonicalJobRecord>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read {}", self.path.display()));
            }
        };
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid job list in {}", self.path.display()))
    }

    pub fn lock(&self) -> Result<StoreLock> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let lock_path = self.sibling(".lock");
        match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())
                    .with_context(|| format!("Failed to write {}", lock_path.display()))?;
                debug!("acquired {}", lock_path.display());
                Ok(StoreLock { path: lock_path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(anyhow!(
                "{} is locked by another run (delete {} if that run is gone)",
                self.path.display(),
                lock_path.display()
            )),
            Err(e) => Err(e).with_context(|| format!("Failed to create {}", lock_path.display())),
        }
    }

    /// Replace the list on disk. Readers see either the old or the new file.
    pub fn save(&self, _lock: &StoreLock, records: &[CanonicalJobRecord]) -> Result<()> {
        let mut json = serde_json::to_string_pretty(records)?;
        json.push('\n');

        let tmp = self.sibling(".tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// Write one run's diagnostics as `scrape-run-<timestamp>.json` under `dir`.
pub fn write_artifact(dir: &Path, artifact: &ScrapeRunArtifact) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(format!(
        "scrape-run-{}.json",
        artifact.ran_at.format("%Y%m%dT%H%M%S%.3fZ")
    ));
    let json = serde_json::to_string_pretty(artifact)?;
    fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
