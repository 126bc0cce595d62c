//! Durable count of permanently failed fetches for one day's crawl.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Context};
use chrono::NaiveDate;

pub trait ErrorCounter: Send + Sync {
    /// Current count, 0 when nothing was recorded yet.
    fn load(&self) -> u64;

    /// Adds one terminal failure and returns the new count.
    fn increment(&self) -> anyhow::Result<u64>;

    fn reset(&self) -> anyhow::Result<()>;
}

/// Counter backed by a plain text file holding a decimal integer.
#[derive(Debug)]
pub struct FileErrorCounter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileErrorCounter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Counter scoped to one jurisdiction and day inside `dir`.
    pub fn daily(dir: &Path, jurisdiction: &str, day: NaiveDate) -> Self {
        Self::new(dir.join(format!("{jurisdiction}_crawl_errors_{day}.txt")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> u64 {
        fs_err::read_to_string(&self.path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }
}

impl ErrorCounter for FileErrorCounter {
    fn load(&self) -> u64 {
        self.read()
    }

    fn increment(&self) -> anyhow::Result<u64> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow!("Error counter lock poisoned"))?;
        let count = self.read() + 1;
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        fs_err::write(&self.path, count.to_string())
            .with_context(|| format!("Couldn't persist error count to {}", self.path.display()))?;
        Ok(count)
    }

    fn reset(&self) -> anyhow::Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow!("Error counter lock poisoned"))?;
        if self.path.exists() {
            fs_err::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryErrorCounter {
    count: AtomicU64,
}

impl MemoryErrorCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ErrorCounter for MemoryErrorCounter {
    fn load(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    fn increment(&self) -> anyhow::Result<u64> {
        Ok(self.count.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn reset(&self) -> anyhow::Result<()> {
        self.count.store(0, Ordering::SeqCst);
        Ok(())
    }
}
