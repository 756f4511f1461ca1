// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Reversible patching of host files.
//!
//! Hostpatch injects content into static files of a host application it does
//! not own, and can always take that content back out again.
//!
//! # Campaigns
//!
//! A __campaign__ spans from an apply that starts on an unpatched host to the
//! restore that returns it to that state. Applying again in between refreshes
//! the injected content. Everything that has to survive between runs of a
//! campaign lives in a small state file: which files were backed up, which
//! manifest was backed up, which side resources were written, and the prior
//! values of overridden settings.
//!
//! # Apply
//!
//! For each target, in configured order: locate, back up, strip any existing
//! block, insert the new block, write, and rewrite the target's digest in the
//! integrity manifest. The manifest itself is backed up before the first
//! target is touched. Settings overrides go last. Apply is not transactional
//! across targets. A target that fails is reported and skipped, targets before
//! it stay patched.
//!
//! # Restore
//!
//! For each target, in reverse order: restore from backup (or strip blocks if
//! there is no backup), and remove its side resource. Then restore settings and
//! finally the manifest. Missing targets and missing backups are not errors.
//!
//! # Locking
//!
//! Apply and restore hold the campaign lock for their whole duration, so at
//! most one of them touches the host at a time.

pub mod file;
pub mod locate;
pub mod manifest;
pub mod marker;
pub mod shadow;
pub mod vault;

use crate::{
    config::{PatchDefinition, ResourceKind, TargetDefinition},
    lock::{CampaignLock, LockError},
    patch::{
        file::FileError,
        locate::{locate, LocateError},
        manifest::{ManifestError, ManifestUpdate, ManifestUpdater},
        marker::{MarkerEditor, MarkerError},
        shadow::{SettingsError, SettingsShadow, SettingsStore},
        vault::{BackupLedger, BackupVault, RestoreOutcome, VaultError},
    },
    path::sibling,
};

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, info, instrument, warn};

const STATE_FILE: &str = "campaign.json";

/// Content handed to a target at apply time.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Content placed inside the marker block.
    pub content: String,

    /// Bytes of the standalone side resource, if the target has one.
    pub side_resource: Option<Vec<u8>>,
}

impl Payload {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            side_resource: None,
        }
    }

    pub fn with_side_resource(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.side_resource = Some(bytes.into());
        self
    }
}

/// Patch state of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchState {
    Unpatched,
    Patched,
}

/// Apply and restore marker blocks across a host install.
#[derive(Debug)]
pub struct Patcher<S>
where
    S: SettingsStore,
{
    definition: PatchDefinition,
    state_dir: PathBuf,
    settings: S,
    lock_timeout: Duration,
}

impl<S> Patcher<S>
where
    S: SettingsStore,
{
    /// Construct new patcher keeping campaign state in `state_dir`.
    pub fn new(definition: PatchDefinition, state_dir: impl Into<PathBuf>, settings: S) -> Self {
        Self {
            definition,
            state_dir: state_dir.into(),
            settings,
            lock_timeout: Duration::from_secs(15),
        }
    }

    /// Wait at most `timeout` for another campaign to release the lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn definition(&self) -> &PatchDefinition {
        &self.definition
    }

    pub fn settings(&self) -> &S {
        &self.settings
    }

    /// Patch every target with its payload, then override settings.
    ///
    /// Targets without a payload, that cannot be located, or whose anchor is
    /// missing are reported as failed and skipped. Campaign state is saved
    /// even if apply fails part way.
    ///
    /// # Errors
    ///
    /// - Return [`PatchError::Lock`] if campaign lock cannot be acquired.
    /// - Return [`PatchError::State`] if campaign state cannot be loaded or
    ///   saved.
    /// - Return [`PatchError::Manifest`] if the manifest cannot be backed up.
    /// - Return [`PatchError::Settings`] if settings cannot be overridden.
    #[instrument(skip(self, payloads), level = "debug")]
    pub fn apply(&mut self, payloads: &BTreeMap<String, Payload>) -> Result<ApplyReport> {
        let _lock = CampaignLock::acquire(&self.state_dir, self.lock_timeout)?;
        let mut campaign = Campaign::load(
            self.state_dir.join(STATE_FILE),
            &self.definition.host.backup_suffix,
        )?;

        let report = self.apply_in(&mut campaign, payloads);
        campaign.save()?;

        report
    }

    fn apply_in(
        &mut self,
        campaign: &mut Campaign,
        payloads: &BTreeMap<String, Payload>,
    ) -> Result<ApplyReport> {
        let app_root = self.locate_app_root();
        let manifest = self.locate_manifest(app_root.as_deref());

        // INVARIANT: Manifest backup precedes the first target mutation.
        if let Some(manifest) = &manifest {
            let lost_ledger = !campaign.vault.is_recorded(manifest)
                && self.any_target_patched(app_root.as_deref());
            let adopted = lost_ledger && campaign.vault.adopt(manifest);
            if lost_ledger && !adopted {
                warn!(
                    "host is already patched and {:?} has no backup; it may keep patched digests after restore",
                    manifest.display()
                );
            }
            if !adopted {
                campaign
                    .vault
                    .ensure_backup(manifest)
                    .map_err(PatchError::Manifest)?;
            }
            campaign.manifest = Some(manifest.clone());
            campaign.save()?;
        }

        let updater = ManifestUpdater::new(self.definition.host.manifest_prefix.clone());
        let mut report = ApplyReport::default();
        for target in &self.definition.targets {
            let result = self.apply_target(
                campaign,
                target,
                payloads.get(&target.name),
                app_root.as_deref(),
                manifest.as_deref().map(|manifest| (manifest, &updater)),
            );

            if let Err(error) = &result {
                warn!("failed to patch target {:?}: {error}", target.name);
            }
            report.targets.push((target.name.clone(), result));
            campaign.save()?;
        }

        if !self.definition.settings.is_empty() {
            campaign
                .shadow
                .apply(&mut self.settings, &self.definition.settings)?;
            report.settings_overridden = self.definition.settings.len();
        }

        Ok(report)
    }

    fn apply_target(
        &self,
        campaign: &mut Campaign,
        target: &TargetDefinition,
        payload: Option<&Payload>,
        app_root: Option<&Path>,
        manifest: Option<(&Path, &ManifestUpdater)>,
    ) -> Result<AppliedTarget, TargetError> {
        let payload = payload.ok_or_else(|| TargetError::MissingPayload(target.name.clone()))?;
        let path = self.locate_target(target, app_root)?;
        let editor = self.editor(target.kind);
        let text = file::read_text(&path)?;

        if !campaign.vault.is_recorded(&path) && editor.has_block(&text) {
            // INVARIANT: Never snapshot bytes that already carry a block.
            if !campaign.vault.adopt(&path) {
                warn!(
                    "{:?} is already patched and has no backup; restore will strip blocks instead",
                    path.display()
                );
            }
        } else {
            campaign.vault.ensure_backup(&path)?;
        }

        let patched = editor.insert(&editor.strip(&text), &payload.content, &target.anchor)?;

        let side_resource = match (&target.side_resource, &payload.side_resource) {
            (Some(name), Some(bytes)) => {
                let side = sibling(&path, name);
                info!("write side resource {:?}", side.display());
                file::write(&side, bytes)?;
                campaign.side_resources.insert(side.clone());
                Some(side)
            }
            (Some(name), None) => {
                warn!("no side resource content supplied for {name:?}");
                None
            }
            (None, Some(_)) => {
                warn!("target {:?} has no side resource to write content to", target.name);
                None
            }
            (None, None) => None,
        };

        if patched != text {
            info!("patch {:?}", path.display());
            file::write(&path, &patched)?;
        } else {
            debug!("{:?} already carries this block", path.display());
        }

        let manifest = match (manifest, app_root) {
            (Some((manifest, updater)), Some(app_root)) => Some(updater.update(
                manifest,
                &path,
                app_root,
                self.definition.digest.for_kind(target.kind),
            )?),
            _ => None,
        };

        Ok(AppliedTarget {
            path,
            manifest,
            side_resource,
        })
    }

    /// Return every target, every shadowed setting, and the manifest to their
    /// state before the campaign.
    ///
    /// Succeeds on a partially applied host, and on one that was never
    /// patched at all. The campaign only ends if every target could be
    /// restored, so a failed restore can simply be run again.
    ///
    /// # Errors
    ///
    /// - Return [`PatchError::Lock`] if campaign lock cannot be acquired.
    /// - Return [`PatchError::State`] if campaign state cannot be loaded or
    ///   saved.
    /// - Return [`PatchError::Settings`] if settings cannot be restored.
    /// - Return [`PatchError::Manifest`] if manifest cannot be restored.
    #[instrument(skip(self), level = "debug")]
    pub fn restore(&mut self) -> Result<RestoreReport> {
        let _lock = CampaignLock::acquire(&self.state_dir, self.lock_timeout)?;
        let mut campaign = Campaign::load(
            self.state_dir.join(STATE_FILE),
            &self.definition.host.backup_suffix,
        )?;

        let report = self.restore_in(&mut campaign);
        campaign.save()?;

        report
    }

    fn restore_in(&mut self, campaign: &mut Campaign) -> Result<RestoreReport> {
        let app_root = self.locate_app_root();
        let mut report = RestoreReport::default();

        for target in self.definition.targets.iter().rev() {
            let result = self.restore_target(campaign, target, app_root.as_deref());
            match &result {
                Ok(RestoredTarget::Missing) => {
                    warn!("target {:?} not found, nothing to restore", target.name)
                }
                Ok(RestoredTarget::Restored {
                    outcome: RestoreOutcome::BestEffort,
                    path,
                }) => warn!(
                    "restored {:?} without a backup; verify it by hand",
                    path.display()
                ),
                Ok(_) => {}
                Err(error) => warn!("failed to restore target {:?}: {error}", target.name),
            }
            report.targets.push((target.name.clone(), result));
        }

        // Side resources written under an earlier layout or configuration.
        for side in std::mem::take(&mut campaign.side_resources) {
            match file::remove(&side) {
                Ok(true) => info!("remove side resource {:?}", side.display()),
                Ok(false) => {}
                Err(error) => {
                    warn!("{error}");
                    campaign.side_resources.insert(side);
                }
            }
        }

        report.settings_restored = campaign.shadow.restore(&mut self.settings)?;

        // Targets patched outside the ledger mean the ledger was lost, and the
        // manifest most likely carries their digests.
        let lost_ledger = report.targets.iter().any(|(_, result)| match result {
            Ok(RestoredTarget::Restored { path, outcome }) => {
                matches!(outcome, RestoreOutcome::FromBackup | RestoreOutcome::BestEffort)
                    && !campaign.vault.is_recorded(path)
            }
            _ => false,
        });

        let manifest = campaign
            .manifest
            .clone()
            .or_else(|| self.locate_manifest(app_root.as_deref()));
        if let Some(manifest) = manifest {
            let mut outcome = campaign
                .vault
                .restore(&manifest, None)
                .map_err(PatchError::Manifest)?;
            if outcome == RestoreOutcome::Skipped && lost_ledger {
                if campaign.vault.adopt(&manifest) {
                    outcome = campaign
                        .vault
                        .restore(&manifest, None)
                        .map_err(PatchError::Manifest)?;
                } else {
                    warn!(
                        "integrity manifest {:?} has no backup and may still carry patched digests",
                        manifest.display()
                    );
                }
            }
            report.manifest = Some(outcome);
        }

        if report.is_complete() {
            debug!("campaign closed");
            campaign.close();
        }

        Ok(report)
    }

    fn restore_target(
        &self,
        campaign: &Campaign,
        target: &TargetDefinition,
        app_root: Option<&Path>,
    ) -> Result<RestoredTarget, TargetError> {
        let path = match self.locate_target(target, app_root) {
            Ok(path) => path,
            Err(LocateError::TargetNotFound { .. }) => return Ok(RestoredTarget::Missing),
        };

        let editor = self.editor(target.kind);
        let outcome = campaign.vault.restore(&path, Some(&editor))?;

        if let Some(name) = &target.side_resource {
            let side = sibling(&path, name);
            if file::remove(&side)? {
                info!("remove side resource {:?}", side.display());
            }
        }

        Ok(RestoredTarget::Restored { path, outcome })
    }

    /// Check if host is patched.
    ///
    /// Looks at the first configured target only. A host that cannot be found
    /// counts as unpatched.
    pub fn is_applied(&self) -> bool {
        self.state() == PatchState::Patched
    }

    /// Current patch state of the host.
    pub fn state(&self) -> PatchState {
        let Some(target) = self.definition.targets.first() else {
            return PatchState::Unpatched;
        };

        let app_root = self.locate_app_root();
        let patched = self
            .locate_target(target, app_root.as_deref())
            .ok()
            .and_then(|path| file::read_text(path).ok())
            .is_some_and(|text| self.editor(target.kind).has_block(&text));

        if patched {
            PatchState::Patched
        } else {
            PatchState::Unpatched
        }
    }

    fn any_target_patched(&self, app_root: Option<&Path>) -> bool {
        self.definition.targets.iter().any(|target| {
            self.locate_target(target, app_root)
                .ok()
                .and_then(|path| file::read_text(path).ok())
                .is_some_and(|text| self.editor(target.kind).has_block(&text))
        })
    }

    fn editor(&self, kind: ResourceKind) -> MarkerEditor {
        MarkerEditor::new(self.definition.markers.for_kind(kind), kind.framing())
    }

    fn locate_app_root(&self) -> Option<PathBuf> {
        let roots = &self.definition.host.app_roots;
        if roots.is_empty() {
            return None;
        }

        match locate(roots) {
            Ok(root) => Some(root),
            Err(error) => {
                warn!("host install root not found: {error}");
                None
            }
        }
    }

    fn locate_manifest(&self, app_root: Option<&Path>) -> Option<PathBuf> {
        let relative = self.definition.host.manifest.as_ref()?;
        let Some(app_root) = app_root else {
            warn!("cannot locate integrity manifest without host install root");
            return None;
        };

        let manifest = app_root.join(relative);
        if manifest.is_file() {
            Some(manifest)
        } else {
            warn!("integrity manifest {:?} not found", manifest.display());
            None
        }
    }

    fn locate_target(
        &self,
        target: &TargetDefinition,
        app_root: Option<&Path>,
    ) -> Result<PathBuf, LocateError> {
        // INVARIANT: Relative candidates only make sense under a located root.
        let candidates = target
            .candidates
            .iter()
            .filter_map(|candidate| match (candidate.is_absolute(), app_root) {
                (true, _) => Some(candidate.clone()),
                (false, Some(root)) => Some(root.join(candidate)),
                (false, None) => None,
            })
            .collect::<Vec<_>>();

        locate(candidates)
    }
}

/// Campaign bookkeeping persisted between runs.
#[derive(Debug, Default, Deserialize, Serialize)]
struct CampaignState {
    #[serde(default)]
    backups: BackupLedger,

    #[serde(default)]
    manifest: Option<PathBuf>,

    #[serde(default)]
    side_resources: BTreeSet<PathBuf>,

    #[serde(default)]
    shadow: SettingsShadow,
}

/// Live campaign, loaded from and saved to the state file.
#[derive(Debug)]
struct Campaign {
    path: PathBuf,
    vault: BackupVault,
    manifest: Option<PathBuf>,
    side_resources: BTreeSet<PathBuf>,
    shadow: SettingsShadow,
}

impl Campaign {
    fn load(path: PathBuf, backup_suffix: &str) -> Result<Self> {
        let state = if path.is_file() {
            let content = file::read_text(&path).map_err(PatchError::State)?;
            serde_json::from_str(&content).map_err(|err| PatchError::StateFormat {
                source: err,
                path: path.clone(),
            })?
        } else {
            CampaignState::default()
        };

        Ok(Self {
            path,
            vault: BackupVault::new(backup_suffix, state.backups),
            manifest: state.manifest,
            side_resources: state.side_resources,
            shadow: state.shadow,
        })
    }

    fn save(&self) -> Result<()> {
        let state = CampaignState {
            backups: self.vault.ledger().clone(),
            manifest: self.manifest.clone(),
            side_resources: self.side_resources.clone(),
            shadow: self.shadow.clone(),
        };
        let content =
            serde_json::to_string_pretty(&state).map_err(|err| PatchError::StateFormat {
                source: err,
                path: self.path.clone(),
            })?;

        file::write_atomic(&self.path, content).map_err(PatchError::State)
    }

    fn close(&mut self) {
        self.vault.close_campaign();
        self.manifest = None;
    }
}

/// Patched target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedTarget {
    pub path: PathBuf,
    pub manifest: Option<ManifestUpdate>,
    pub side_resource: Option<PathBuf>,
}

/// Outcome of restoring one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoredTarget {
    Restored { path: PathBuf, outcome: RestoreOutcome },
    Missing,
}

/// Summary of an apply.
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Per target result, in patch order.
    pub targets: Vec<(String, Result<AppliedTarget, TargetError>)>,

    /// Number of settings overridden.
    pub settings_overridden: usize,
}

impl ApplyReport {
    /// Check if every target was patched.
    pub fn is_complete(&self) -> bool {
        self.targets.iter().all(|(_, result)| result.is_ok())
    }
}

/// Summary of a restore.
#[derive(Debug, Default)]
pub struct RestoreReport {
    /// Per target result, in restore order.
    pub targets: Vec<(String, Result<RestoredTarget, TargetError>)>,

    /// Whether shadowed settings were written back.
    pub settings_restored: bool,

    /// How the manifest was restored, if there was one.
    pub manifest: Option<RestoreOutcome>,
}

impl RestoreReport {
    /// Check if no target failed to restore.
    pub fn is_complete(&self) -> bool {
        self.targets.iter().all(|(_, result)| result.is_ok())
    }

    /// Names of targets restored without a backup.
    pub fn best_effort(&self) -> impl Iterator<Item = &str> {
        self.targets.iter().filter_map(|(name, result)| match result {
            Ok(RestoredTarget::Restored {
                outcome: RestoreOutcome::BestEffort,
                ..
            }) => Some(name.as_str()),
            _ => None,
        })
    }
}

/// Failure isolated to a single target.
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    /// Caller supplied no content.
    #[error("no content supplied for target {0:?}")]
    MissingPayload(String),

    #[error(transparent)]
    Locate(#[from] LocateError),

    #[error(transparent)]
    Marker(#[from] MarkerError),

    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

impl TargetError {
    /// Check if failure came from missing file permissions.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Self::File(err)
            | Self::Vault(VaultError::File(err))
            | Self::Manifest(ManifestError::File(err)) => err.is_permission_denied(),
            _ => false,
        }
    }
}

/// Failure aborting a whole apply or restore.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Campaign state file cannot be read or written.
    #[error("failed to access campaign state")]
    State(#[source] FileError),

    /// Campaign state file is not valid.
    #[error("malformed campaign state at {:?}", path.display())]
    StateFormat {
        #[source]
        source: serde_json::Error,
        path: PathBuf,
    },

    /// Integrity manifest cannot be backed up or restored.
    #[error("failed to back up or restore integrity manifest")]
    Manifest(#[source] VaultError),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

/// Friendly result alias :3
pub type Result<T, E = PatchError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::shadow::JsonSettingsFile;
    use indoc::formatdoc;
    use pretty_assertions::assert_eq;
    use std::fs;

    const WORKBENCH: &str = "<html><head><title>Host</title></head><body></body></html>";

    fn host(dir: &Path) -> anyhow::Result<Patcher<JsonSettingsFile>> {
        let app = dir.join("app");
        fs::create_dir_all(&app)?;
        fs::write(app.join("workbench.html"), WORKBENCH)?;

        let definition: PatchDefinition = formatdoc!(
            r#"
                [host]
                app_roots = ["{}"]

                [markers.markup]
                start = "<!--S-->"
                end = "<!--E-->"

                [[target]]
                name = "workbench"
                candidates = ["workbench.html"]
                anchor = {{ before = "</head>" }}
            "#,
            app.display()
        )
        .parse()?;
        let settings = JsonSettingsFile::open(dir.join("settings.json"))?;

        Ok(Patcher::new(definition, dir.join("state"), settings))
    }

    fn payload(content: &str) -> BTreeMap<String, Payload> {
        BTreeMap::from([("workbench".to_string(), Payload::new(content))])
    }

    #[test]
    fn apply_then_restore_scenario() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut patcher = host(dir.path())?;
        let workbench = dir.path().join("app/workbench.html");

        let report = patcher.apply(&payload("X"))?;
        assert!(report.is_complete());
        assert_eq!(
            fs::read_to_string(&workbench)?,
            "<html><head><title>Host</title><!--S-->X<!--E--></head><body></body></html>"
        );
        assert!(patcher.is_applied());

        let report = patcher.restore()?;
        assert!(report.is_complete());
        assert_eq!(fs::read_to_string(&workbench)?, WORKBENCH);
        assert!(!patcher.is_applied());

        Ok(())
    }

    #[test]
    fn missing_payload_fails_only_that_target() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut patcher = host(dir.path())?;

        let report = patcher.apply(&BTreeMap::new())?;
        assert!(!report.is_complete());
        assert!(matches!(
            report.targets[0].1,
            Err(TargetError::MissingPayload(_))
        ));
        assert_eq!(fs::read_to_string(dir.path().join("app/workbench.html"))?, WORKBENCH);

        Ok(())
    }

    #[test]
    fn state_survives_between_patchers() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        host(dir.path())?.apply(&payload("one"))?;

        let state = fs::read_to_string(dir.path().join("state").join(STATE_FILE))?;
        let state: CampaignState = serde_json::from_str(&state)?;
        assert!(state
            .backups
            .contains(dir.path().join("app/workbench.html")));

        // Fresh patcher, second apply of the same campaign.
        let mut patcher = host(dir.path())?;
        fs::write(
            dir.path().join("app/workbench.html"),
            "<html><head><title>Host</title><!--S-->one<!--E--></head><body></body></html>",
        )?;
        patcher.apply(&payload("two"))?;
        patcher.restore()?;
        assert_eq!(fs::read_to_string(dir.path().join("app/workbench.html"))?, WORKBENCH);

        Ok(())
    }

    #[test]
    fn no_first_target_means_unpatched() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let definition: PatchDefinition = "[host]\n".parse()?;
        let settings = JsonSettingsFile::open(dir.path().join("settings.json"))?;
        let patcher = Patcher::new(definition, dir.path().join("state"), settings);
        assert_eq!(patcher.state(), PatchState::Unpatched);

        Ok(())
    }
}
