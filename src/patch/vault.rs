// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Pristine backups of patched files.
//!
//! Before a file is mutated for the first time in a campaign, its bytes are
//! copied to `<path><suffix>` next to it. That copy is the only thing a full
//! restore trusts, so it must never capture patched bytes.
//!
//! # Campaign Ledger
//!
//! The vault keeps a ledger of every path it has backed up in the current
//! campaign. A path in the ledger is never backed up again, no matter how
//! often the live file changes afterwards. Closing the campaign clears the
//! ledger but leaves the backup files on disk, so the next campaign refreshes
//! them from whatever the host ships by then. Restore only trusts a backup
//! outside the ledger while the live file still carries a marker block.
//!
//! The ledger is plain data. The orchestrator persists it between runs.

use crate::{
    patch::{
        file::{self, FileError},
        marker::MarkerEditor,
    },
    path::with_suffix,
};

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// Default suffix appended to backed up files.
pub const DEFAULT_BACKUP_SUFFIX: &str = ".hostpatch.bak";

/// Paths backed up in the current campaign.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackupLedger {
    paths: BTreeSet<PathBuf>,
}

impl BackupLedger {
    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.paths.contains(path.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// How a file was brought back to its unpatched state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Bytes copied back from backup.
    FromBackup,

    /// No backup; marker blocks stripped from live content instead.
    BestEffort,

    /// No backup, and nothing that could strip the live content.
    Skipped,

    /// Not backed up this campaign and free of marker blocks.
    Untouched,
}

/// Campaign scoped backup store.
#[derive(Debug, Clone)]
pub struct BackupVault {
    suffix: String,
    ledger: BackupLedger,
}

impl BackupVault {
    /// Construct new vault resuming a campaign ledger.
    pub fn new(suffix: impl Into<String>, ledger: BackupLedger) -> Self {
        Self {
            suffix: suffix.into(),
            ledger,
        }
    }

    /// Location of backup for path.
    pub fn backup_path(&self, path: impl AsRef<Path>) -> PathBuf {
        with_suffix(path, &self.suffix)
    }

    /// Check if a backup file exists for path, from any campaign.
    pub fn has_backup(&self, path: impl AsRef<Path>) -> bool {
        self.backup_path(path).is_file()
    }

    /// Check if path was already backed up this campaign.
    pub fn is_recorded(&self, path: impl AsRef<Path>) -> bool {
        self.ledger.contains(path)
    }

    pub fn ledger(&self) -> &BackupLedger {
        &self.ledger
    }

    /// Snapshot path unless it was already snapshotted this campaign.
    ///
    /// Returns `true` if a backup was written. Callers must hold the campaign
    /// lock, the check and the copy are not atomic on their own.
    ///
    /// # Errors
    ///
    /// - Return [`VaultError::File`] if path cannot be read, or backup cannot
    ///   be written.
    pub fn ensure_backup(&mut self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        if self.ledger.contains(path) {
            debug!("backup of {:?} already taken this campaign", path.display());
            return Ok(false);
        }

        let backup = self.backup_path(path);
        info!("back up {:?} to {:?}", path.display(), backup.display());
        let bytes = file::read(path)?;
        file::write_atomic(&backup, bytes)?;
        self.ledger.paths.insert(path.to_path_buf());

        Ok(true)
    }

    /// Record an existing backup file as this campaign's snapshot of path.
    ///
    /// Used when the ledger was lost while the live file is already patched;
    /// snapshotting the live file then would capture patched bytes. Returns
    /// `false` if there is no backup file to adopt.
    pub fn adopt(&mut self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        if !self.has_backup(path) {
            return false;
        }

        warn!(
            "adopting existing backup {:?} for already patched file",
            self.backup_path(path).display()
        );
        self.ledger.paths.insert(path.to_path_buf());

        true
    }

    /// Bring path back to its unpatched state.
    ///
    /// Copies the backup onto path if it was taken this campaign, or if the
    /// live file still carries a marker block. Otherwise strips marker blocks
    /// from the live content with `editor`, and reports the degraded path as
    /// [`RestoreOutcome::BestEffort`]. The backup file is left in place
    /// either way.
    ///
    /// # Errors
    ///
    /// - Return [`VaultError::File`] if backup or live file cannot be read,
    ///   or live file cannot be written.
    pub fn restore(
        &self,
        path: impl AsRef<Path>,
        editor: Option<&MarkerEditor>,
    ) -> Result<RestoreOutcome> {
        let path = path.as_ref();
        let backup = self.backup_path(path);
        let recorded = self.ledger.contains(path);
        let live = editor
            .map(|editor| file::read_text(path).map(|text| (editor, text)))
            .transpose()?;
        let patched = live
            .as_ref()
            .is_some_and(|(editor, text)| editor.has_block(text));

        // INVARIANT: Backups left by an earlier campaign may predate a host update.
        if backup.is_file() && (recorded || patched) {
            info!("restore {:?} from {:?}", path.display(), backup.display());
            file::write(path, file::read(&backup)?)?;
            return Ok(RestoreOutcome::FromBackup);
        }

        let Some((editor, content)) = live else {
            if recorded {
                warn!("no backup of {:?} to restore from", path.display());
            }
            return Ok(RestoreOutcome::Skipped);
        };

        if !patched {
            debug!("{:?} carries no marker block", path.display());
            return Ok(RestoreOutcome::Untouched);
        }

        warn!(
            "no backup of {:?}, stripping marker blocks from live content",
            path.display()
        );
        file::write(path, editor.strip(&content))?;

        Ok(RestoreOutcome::BestEffort)
    }

    /// End campaign. Backup files stay on disk.
    pub fn close_campaign(&mut self) {
        self.ledger.paths.clear();
    }
}

impl Default for BackupVault {
    fn default() -> Self {
        Self::new(DEFAULT_BACKUP_SUFFIX, BackupLedger::default())
    }
}

/// Backup vault error types.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error(transparent)]
    File(#[from] FileError),
}

/// Friendly result alias :3
pub type Result<T, E = VaultError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::marker::{Framing, Markers};
    use pretty_assertions::assert_eq;
    use std::fs;

    #[test]
    fn ensure_backup_snapshots_once_per_campaign() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("workbench.html");
        fs::write(&target, "pristine")?;

        let mut vault = BackupVault::default();
        assert!(vault.ensure_backup(&target)?);

        fs::write(&target, "patched")?;
        assert!(!vault.ensure_backup(&target)?);
        assert_eq!(fs::read_to_string(vault.backup_path(&target))?, "pristine");

        Ok(())
    }

    #[test]
    fn new_campaign_refreshes_backup() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("workbench.html");
        fs::write(&target, "v1")?;

        let mut vault = BackupVault::default();
        vault.ensure_backup(&target)?;
        vault.close_campaign();

        fs::write(&target, "v2")?;
        assert!(vault.ensure_backup(&target)?);
        assert_eq!(fs::read_to_string(vault.backup_path(&target))?, "v2");

        Ok(())
    }

    #[test]
    fn restore_prefers_backup_and_keeps_it() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("workbench.html");
        fs::write(&target, "pristine")?;

        let mut vault = BackupVault::default();
        vault.ensure_backup(&target)?;
        fs::write(&target, "patched")?;

        assert_eq!(vault.restore(&target, None)?, RestoreOutcome::FromBackup);
        assert_eq!(fs::read_to_string(&target)?, "pristine");
        assert!(vault.has_backup(&target));

        Ok(())
    }

    #[test]
    fn restore_without_backup_strips_blocks() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("workbench.html");
        let editor = MarkerEditor::new(Markers::markup(), Framing::Inline);
        fs::write(
            &target,
            "<head><!-- hostpatch:start -->X<!-- hostpatch:end --></head>",
        )?;

        let vault = BackupVault::default();
        assert_eq!(vault.restore(&target, Some(&editor))?, RestoreOutcome::BestEffort);
        assert_eq!(fs::read_to_string(&target)?, "<head></head>");

        Ok(())
    }

    #[test]
    fn restore_without_backup_or_editor_is_skipped() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let manifest = dir.path().join("product.json");
        fs::write(&manifest, "{}")?;

        let vault = BackupVault::default();
        assert_eq!(vault.restore(&manifest, None)?, RestoreOutcome::Skipped);
        assert_eq!(fs::read_to_string(&manifest)?, "{}");

        Ok(())
    }

    #[test]
    fn restore_ignores_stale_backup_of_clean_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("workbench.html");
        let editor = MarkerEditor::new(Markers::markup(), Framing::Inline);
        fs::write(&target, "<head></head>")?;

        let mut vault = BackupVault::default();
        vault.ensure_backup(&target)?;
        vault.close_campaign();
        fs::write(&target, "<head>v2</head>")?;

        assert_eq!(vault.restore(&target, Some(&editor))?, RestoreOutcome::Untouched);
        assert_eq!(fs::read_to_string(&target)?, "<head>v2</head>");

        fs::write(
            &target,
            "<head>v2<!-- hostpatch:start -->X<!-- hostpatch:end --></head>",
        )?;
        assert_eq!(vault.restore(&target, Some(&editor))?, RestoreOutcome::FromBackup);
        assert_eq!(fs::read_to_string(&target)?, "<head></head>");

        Ok(())
    }

    #[test]
    fn adopt_requires_backup_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("workbench.html");
        fs::write(&target, "patched")?;

        let mut vault = BackupVault::default();
        assert!(!vault.adopt(&target));

        fs::write(vault.backup_path(&target), "pristine")?;
        assert!(vault.adopt(&target));
        assert!(!vault.ensure_backup(&target)?);
        assert_eq!(fs::read_to_string(vault.backup_path(&target))?, "pristine");

        Ok(())
    }
}
