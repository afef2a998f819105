use crate::error::{SpliceError, SpliceResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::Path;

pub const STATE_DIR: &str = ".splice";
const LOCK_FILE: &str = "task.lock";

/// Advisory lock held for the duration of one task.
///
/// Another process running against the same workspace gets `Busy`.
#[derive(Debug)]
pub struct TaskLock {
    file: File,
}

impl TaskLock {
    pub fn acquire(root: &Path) -> SpliceResult<Self> {
        let dir = root.join(STATE_DIR);
        let path = dir.join(LOCK_FILE);
        fs::create_dir_all(&dir).map_err(|e| SpliceError::write(&dir, e))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| SpliceError::write(&path, e))?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Self { file }),
            Err(err) if err.kind() == ErrorKind::WouldBlock => Err(SpliceError::Busy),
            // Some platforms report contention as a raw OS error rather than WouldBlock.
            Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Err(SpliceError::Busy)
            }
            Err(err) => Err(SpliceError::write(&path, err)),
        }
    }
}

impl Drop for TaskLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
