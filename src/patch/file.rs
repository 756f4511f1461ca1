// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! File access with path context.
//!
//! Every read and write hostpatch performs against host files goes through
//! here, so that I/O failures always carry the path involved, and permission
//! failures are told apart from everything else.

use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

use crate::path::with_suffix;

/// Read raw bytes of file.
pub fn read(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    fs::read(path).map_err(|err| FileError::new(err, "read", path))
}

/// Read file as UTF-8 text.
pub fn read_text(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    String::from_utf8(read(path)?).map_err(|_| FileError::NotText {
        path: path.to_path_buf(),
    })
}

/// Overwrite file in place.
///
/// Keeps the file's inode, so ownership and mode of host files survive.
pub fn write(path: impl AsRef<Path>, bytes: impl AsRef<[u8]>) -> Result<()> {
    let path = path.as_ref();
    fs::write(path, bytes).map_err(|err| FileError::new(err, "write", path))
}

/// Write file through a temporary sibling and rename it into place.
pub fn write_atomic(path: impl AsRef<Path>, bytes: impl AsRef<[u8]>) -> Result<()> {
    let path = path.as_ref();
    let tmp = with_suffix(path, ".tmp");
    write(&tmp, bytes)?;
    fs::rename(&tmp, path).map_err(|err| FileError::new(err, "rename into", path))
}

/// Remove file, reporting whether there was anything to remove.
pub fn remove(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(FileError::new(err, "remove", path)),
    }
}

/// File access error types.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    /// Caller lacks rights to touch the file.
    #[error(
        "permission denied to {action} {:?}; elevated privileges may be required",
        path.display()
    )]
    PermissionDenied {
        #[source]
        source: io::Error,
        action: &'static str,
        path: PathBuf,
    },

    /// Any other I/O failure.
    #[error("failed to {action} {:?}", path.display())]
    Io {
        #[source]
        source: io::Error,
        action: &'static str,
        path: PathBuf,
    },

    /// File content is not valid UTF-8.
    #[error("file {:?} is not valid UTF-8 text", path.display())]
    NotText { path: PathBuf },
}

impl FileError {
    fn new(source: io::Error, action: &'static str, path: &Path) -> Self {
        let path = path.to_path_buf();
        match source.kind() {
            ErrorKind::PermissionDenied => Self::PermissionDenied {
                source,
                action,
                path,
            },
            _ => Self::Io {
                source,
                action,
                path,
            },
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }
}

/// Friendly result alias :3
pub type Result<T, E = FileError> = std::result::Result<T, E>;
