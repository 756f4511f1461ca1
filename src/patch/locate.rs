// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Target location.
//!
//! The same host application can be installed in several layouts: system
//! packages, user local installs, portable copies, versioned directories. Each
//! target therefore lists candidate paths in order of preference, and the
//! first one that exists wins.
//!
//! Candidates may contain glob metacharacters to cover versioned install
//! directories. Matches of one glob are tried in sorted order before moving on
//! to the next candidate.

use glob::glob;
use std::{
    fmt::Write as _,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Resolve candidate list to first existing path.
///
/// Query only, never touches the filesystem beyond existence checks.
///
/// # Errors
///
/// - Return [`LocateError::TargetNotFound`] carrying every candidate if none
///   of them exist.
pub fn locate(candidates: impl IntoIterator<Item = impl AsRef<Path>>) -> Result<PathBuf> {
    let candidates: Vec<PathBuf> = candidates
        .into_iter()
        .map(|path| path.as_ref().to_path_buf())
        .collect();

    for candidate in &candidates {
        if let Some(found) = first_existing(candidate) {
            debug!("located {:?}", found.display());
            return Ok(found);
        }
    }

    Err(LocateError::TargetNotFound { candidates })
}

fn first_existing(candidate: &Path) -> Option<PathBuf> {
    // INVARIANT: Literal paths win over glob reading, `App [beta]` is a name.
    if candidate.exists() {
        return Some(candidate.to_path_buf());
    }

    let raw = candidate.to_string_lossy();
    if !is_glob(&raw) {
        return None;
    }

    let paths = match glob(&raw) {
        Ok(paths) => paths,
        Err(err) => {
            warn!("ignoring invalid candidate pattern {raw:?}: {err}");
            return None;
        }
    };

    let mut matches: Vec<PathBuf> = paths
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(err) => {
                warn!("skipping unreadable match of {raw:?}: {err}");
                None
            }
        })
        .collect();
    matches.sort();
    matches.into_iter().find(|path| path.exists())
}

fn is_glob(raw: &str) -> bool {
    raw.contains(['*', '?', '['])
}

/// Target location error types.
#[derive(Debug, thiserror::Error)]
pub enum LocateError {
    /// No candidate exists.
    #[error("target not found, tried:{}", list(candidates))]
    TargetNotFound { candidates: Vec<PathBuf> },
}

fn list(candidates: &[PathBuf]) -> String {
    let mut out = String::new();
    for candidate in candidates {
        let _ = write!(out, "\n  {}", candidate.display());
    }

    out
}

/// Friendly result alias :3
pub type Result<T, E = LocateError> = std::result::Result<T, E>;
