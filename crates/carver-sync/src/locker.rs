//! File-based run lock.
//!
//! One lock file per job type (`<dir>/<job>.lock`), held with an exclusive
//! advisory lock for as long as the job runs. A second process (or a second
//! [`FileLocker`]) asking for the same job fails immediately.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use carver_core::error::LockError;
use carver_core::traits::RunLock;
use fs2::FileExt;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct FileLocker {
    dir: PathBuf,
    held: HashMap<String, File>,
}

impl FileLocker {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            held: HashMap::new(),
        }
    }

    pub fn lock_path(&self, job: &str) -> PathBuf {
        self.dir.join(format!("{job}.lock"))
    }

    pub fn is_held(&self, job: &str) -> bool {
        self.held.contains_key(job)
    }
}

fn io_err(job: &str, e: std::io::Error) -> LockError {
    LockError::Io {
        job: job.to_string(),
        reason: e.to_string(),
    }
}

impl RunLock for FileLocker {
    fn lock(&mut self, job: &str) -> Result<(), LockError> {
        if self.held.contains_key(job) {
            return Err(LockError::AlreadyHeld(job.to_string()));
        }

        fs::create_dir_all(&self.dir).map_err(|e| io_err(job, e))?;
        let path = self.lock_path(job);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| io_err(job, e))?;

        if file.try_lock_exclusive().is_err() {
            return Err(LockError::AlreadyHeld(job.to_string()));
        }

        file.set_len(0).map_err(|e| io_err(job, e))?;
        writeln!(file, "pid={}", std::process::id()).map_err(|e| io_err(job, e))?;

        debug!(job, path = %path.display(), "Acquired run lock");
        self.held.insert(job.to_string(), file);
        Ok(())
    }

    fn unlock(&mut self, job: &str) -> Result<(), LockError> {
        let Some(file) = self.held.remove(job) else {
            return Ok(());
        };
        file.unlock().map_err(|e| io_err(job, e))?;
        fs::remove_file(self.lock_path(job)).map_err(|e| io_err(job, e))?;
        debug!(job, "Released run lock");
        Ok(())
    }
}

impl Drop for FileLocker {
    fn drop(&mut self) {
        let jobs: Vec<String> = self.held.keys().cloned().collect();
        for job in jobs {
            if let Err(e) = self.unlock(&job) {
                warn!(job, error = %e, "Failed to release run lock on drop");
            }
        }
    }
}
