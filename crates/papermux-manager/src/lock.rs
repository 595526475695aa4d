use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};

use crate::error::ManagerError;

pub const LOCK_FILE_NAME: &str = ".papermux.lock";

/// Exclusive advisory lock held for a whole invocation, so two managers can't
/// both pass the "session absent" check and race to create it. The kernel
/// drops the lock when the process exits, even on SIGKILL.
#[derive(Debug)]
pub struct InvocationLock {
    _file: File,
    path: PathBuf,
}

impl InvocationLock {
    pub fn acquire(dir: &Path) -> Result<Self, ManagerError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        try_lock_exclusive(&file).map_err(|e| {
            if e.kind() == std::io::ErrorKind::WouldBlock {
                ManagerError::Busy(path.clone())
            } else {
                ManagerError::Io(e)
            }
        })?;
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;

    // SAFETY: the descriptor comes from a `File` borrowed for the duration of
    // the call, so it is open and valid. `flock` only touches kernel state.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> std::io::Result<()> {
    Ok(())
}
