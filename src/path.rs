// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine where hostpatch keeps its own bookkeeping, and derive the paths
//! of files that live next to a patched target.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

/// Determine default absolute path to the state directory.
///
/// Uses XDG Base Directory path `$XDG_DATA_HOME/hostpatch` as the default
/// absolute path for campaign state. Does not check if the path returned
/// actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if data directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_state_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join("hostpatch"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to the patch definition file.
///
/// Uses `$XDG_CONFIG_HOME/hostpatch/patch.toml`. Does not check if the path
/// returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if config directory path cannot be determined.
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("hostpatch").join("patch.toml"))
        .ok_or(NoWayHome)
}

/// Append a fixed suffix to the file name of a path.
///
/// `/a/b/workbench.html` with suffix `.bak` becomes `/a/b/workbench.html.bak`.
pub fn with_suffix(path: impl AsRef<Path>, suffix: &str) -> PathBuf {
    let mut raw = OsString::from(path.as_ref().as_os_str());
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Path of a file that sits in the same directory as `target`.
pub fn sibling(target: impl AsRef<Path>, file_name: impl AsRef<Path>) -> PathBuf {
    match target.as_ref().parent() {
        Some(parent) => parent.join(file_name),
        None => file_name.as_ref().to_path_buf(),
    }
}

/// No way to determine user's data or config directory.
///
/// # See Also
///
/// - [`dirs::data_dir`](https://docs.rs/dirs/latest/dirs/fn.data_dir.html)
/// - [`dirs::config_dir`](https://docs.rs/dirs/latest/dirs/fn.config_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's data or config directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn suffix_keeps_extension() {
        let result = with_suffix("/opt/app/workbench.html", ".hostpatch.bak");
        assert_eq!(result, PathBuf::from("/opt/app/workbench.html.hostpatch.bak"));
    }

    #[test]
    fn sibling_shares_parent() {
        let result = sibling("/opt/app/out/workbench.html", "hostpatch.css");
        assert_eq!(result, PathBuf::from("/opt/app/out/hostpatch.css"));
    }
}
