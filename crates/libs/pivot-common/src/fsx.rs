//! File system utilities.

use std::ffi::CString;
use std::fs::File;
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

/// Error writing a file atomically.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("unable to open file {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to write file {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to sync file {path:?}")]
    Sync {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to rename file {from:?} to {to:?}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Durably replace the contents of `path` with `content`.
///
/// The content is first written and synced to a sibling file named
/// `<path>.tmp` and then moved over `path` with an exchanging rename. At no
/// point does `path` contain anything other than its complete previous or its
/// complete new content, even if the process dies or power is lost midway.
///
/// Retrying is left to the caller; no step is retried here.
pub fn write_atomic(path: &Path, content: &str) -> Result<(), WriteError> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    let mut file = File::create(&tmp_path).map_err(|source| WriteError::Open {
        path: tmp_path.clone(),
        source,
    })?;
    file.write_all(content.as_bytes())
        .map_err(|source| WriteError::Write {
            path: tmp_path.clone(),
            source,
        })?;
    file.flush().map_err(|source| WriteError::Write {
        path: tmp_path.clone(),
        source,
    })?;
    file.sync_all().map_err(|source| WriteError::Sync {
        path: tmp_path.clone(),
        source,
    })?;
    drop(file);
    exchange_rename(&tmp_path, path).map_err(|source| WriteError::Rename {
        from: tmp_path,
        to: path.to_owned(),
        source,
    })
}

/// Atomically exchange `old` with `new`, removing the stale file afterwards.
///
/// Falls back to a replacing rename if the file system or kernel does not
/// support `RENAME_EXCHANGE`. Failure to remove the stale file is only a
/// warning, its content is outdated but harmless.
fn exchange_rename(old: &Path, new: &Path) -> io::Result<()> {
    match renameat2_exchange(old, new) {
        Ok(()) => {
            // The previous content of `new` now lives under the old name.
            if let Err(error) = std::fs::remove_file(old) {
                warn!("unable to remove stale file {old:?}: {error}");
            }
            Ok(())
        }
        Err(error)
            if matches!(
                error.raw_os_error(),
                Some(nix::libc::EINVAL) | Some(nix::libc::ENOSYS)
            ) =>
        {
            std::fs::rename(old, new)
        }
        Err(error) => Err(error),
    }
}

/// Exchange two paths with `renameat2(2)` and `RENAME_EXCHANGE`.
fn renameat2_exchange(old: &Path, new: &Path) -> io::Result<()> {
    let old = CString::new(old.as_os_str().as_bytes())?;
    let new = CString::new(new.as_os_str().as_bytes())?;
    let res = unsafe {
        // SAFETY: Both paths are proper `\0`-terminated strings.
        nix::libc::syscall(
            nix::libc::SYS_renameat2,
            nix::libc::AT_FDCWD,
            old.as_ptr(),
            nix::libc::AT_FDCWD,
            new.as_ptr(),
            nix::libc::RENAME_EXCHANGE,
        )
    };
    if res == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
