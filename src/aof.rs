//! Append-only command log
//!
//! One text line per accepted mutation, `VERB ARG1 ARG2 ...` terminated
//! by a newline. The log is replayed through the dispatcher on startup
//! to rebuild the index after a crash.
//!
//! ## Fsync policy
//! - `always`   — flush and fsync after every append
//! - `everysec` — flush and fsync when at least the configured interval
//!                has elapsed since the last sync
//! - `no`       — never explicitly sync; rely on OS buffering

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Result, TowerError};

/// When to force appended records to stable storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    /// fsync after every append (safest, slowest)
    Always,

    /// fsync when the configured interval has elapsed
    EverySec,

    /// OS buffering only
    No,
}

impl FromStr for FsyncPolicy {
    type Err = TowerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "everysec" => Ok(Self::EverySec),
            "no" => Ok(Self::No),
            other => Err(TowerError::Config(format!(
                "unknown aof_fsync policy: {}",
                other
            ))),
        }
    }
}

struct AofFile {
    writer: BufWriter<File>,
    last_sync: Instant,
}

/// Handle to the append-only file
pub struct Aof {
    path: PathBuf,
    policy: FsyncPolicy,
    sync_interval: Duration,
    file: Mutex<AofFile>,
}

impl Aof {
    /// Open (or create) the log in append mode
    pub fn open(path: &Path, policy: FsyncPolicy, sync_interval: Duration) -> Result<Self> {
        let file = open_append(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            policy,
            sync_interval,
            file: Mutex::new(AofFile {
                writer: BufWriter::new(file),
                last_sync: Instant::now(),
            }),
        })
    }

    /// Append one record and apply the fsync policy
    pub fn append(&self, line: &str) -> Result<()> {
        let mut file = self.file.lock();
        file.writer.write_all(line.as_bytes())?;
        file.writer.write_all(b"\n")?;

        match self.policy {
            FsyncPolicy::Always => sync(&mut file)?,
            FsyncPolicy::EverySec => {
                if file.last_sync.elapsed() >= self.sync_interval {
                    sync(&mut file)?;
                }
            }
            FsyncPolicy::No => {}
        }

        Ok(())
    }

    /// Flush and fsync regardless of policy
    pub fn flush(&self) -> Result<()> {
        let mut file = self.file.lock();
        sync(&mut file)
    }

    /// Close and re-open the file in append mode (post-rotation hook)
    pub fn reopen(&self) -> Result<()> {
        let mut file = self.file.lock();
        file.writer.flush()?;
        file.writer = BufWriter::new(open_append(&self.path)?);
        file.last_sync = Instant::now();
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

fn sync(file: &mut AofFile) -> Result<()> {
    file.writer.flush()?;
    file.writer.get_ref().sync_all()?;
    file.last_sync = Instant::now();
    Ok(())
}
