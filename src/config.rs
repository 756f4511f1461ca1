// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the patch definition file that drives hostpatch, to
//! simplify the process of serialization and deserialization. File I/O is left
//! to the caller to figure out.

use crate::patch::{
    manifest::DigestAlgorithm,
    marker::{Anchor, Framing, MarkerError, Markers},
    vault::DEFAULT_BACKUP_SUFFIX,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashSet},
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Patch definition layout.
///
/// A __patch definition__ describes where the host application lives, which
/// of its files get patched and how, and which of its settings get overridden
/// while patched.
///
/// # General Layout
///
/// - `[host]` lists candidate install roots and the integrity manifest.
/// - `[digest]` picks the hash family per resource kind.
/// - `[markers.<kind>]` optionally overrides sentinel pairs.
/// - `[[target]]` entries list patched files, in patch order.
/// - `[settings]` maps setting names to override values.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct PatchDefinition {
    /// Host install information.
    pub host: HostSettings,

    /// Digest algorithm per resource kind.
    #[serde(default)]
    pub digest: DigestSettings,

    /// Marker vocabulary overrides.
    #[serde(default)]
    pub markers: MarkerSettings,

    /// Files to patch.
    #[serde(rename = "target", default)]
    pub targets: Vec<TargetDefinition>,

    /// Settings to override while patched.
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
}

impl PatchDefinition {
    /// Look up target by name.
    pub fn target(&self, name: &str) -> Option<&TargetDefinition> {
        self.targets.iter().find(|target| target.name == name)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for target in &self.targets {
            if !seen.insert(target.name.as_str()) {
                return Err(ConfigError::DuplicateTarget(target.name.clone()));
            }

            if target.candidates.is_empty() {
                return Err(ConfigError::NoCandidates(target.name.clone()));
            }

            target.anchor.validate()?;
        }

        for kind in [ResourceKind::Markup, ResourceKind::Script] {
            self.markers.for_kind(kind).validate()?;
        }

        Ok(())
    }
}

impl FromStr for PatchDefinition {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut definition: PatchDefinition =
            toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every configured path.
        for root in &mut definition.host.app_roots {
            *root = expand(root)?;
        }
        if let Some(settings_file) = definition.host.settings_file.as_mut() {
            *settings_file = expand(settings_file)?;
        }
        for target in &mut definition.targets {
            for candidate in &mut target.candidates {
                *candidate = expand(candidate)?;
            }
        }

        definition.validate()?;

        Ok(definition)
    }
}

impl Display for PatchDefinition {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

fn expand(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Host install settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct HostSettings {
    /// Candidate install roots, in order of preference.
    #[serde(default)]
    pub app_roots: Vec<PathBuf>,

    /// Integrity manifest path relative to install root.
    pub manifest: Option<PathBuf>,

    /// Prefix manifest keys may omit.
    pub manifest_prefix: Option<String>,

    /// Host settings file, a JSON object.
    pub settings_file: Option<PathBuf>,

    /// Suffix appended to backups of patched files.
    #[serde(default = "default_backup_suffix")]
    pub backup_suffix: String,
}

fn default_backup_suffix() -> String {
    DEFAULT_BACKUP_SUFFIX.into()
}

/// Kind of resource a target is.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    #[default]
    Markup,
    Script,
}

impl ResourceKind {
    /// How marker blocks sit in this kind of resource.
    pub fn framing(&self) -> Framing {
        match self {
            Self::Markup => Framing::Inline,
            Self::Script => Framing::Line,
        }
    }
}

/// Digest algorithm per resource kind.
#[derive(Debug, Default, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct DigestSettings {
    #[serde(default)]
    pub markup: DigestAlgorithm,

    #[serde(default)]
    pub script: DigestAlgorithm,
}

impl DigestSettings {
    pub fn for_kind(&self, kind: ResourceKind) -> DigestAlgorithm {
        match kind {
            ResourceKind::Markup => self.markup,
            ResourceKind::Script => self.script,
        }
    }
}

/// Marker vocabulary overrides per resource kind.
#[derive(Debug, Default, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct MarkerSettings {
    pub markup: Option<Markers>,
    pub script: Option<Markers>,
}

impl MarkerSettings {
    pub fn for_kind(&self, kind: ResourceKind) -> Markers {
        match kind {
            ResourceKind::Markup => self.markup.clone().unwrap_or_else(Markers::markup),
            ResourceKind::Script => self.script.clone().unwrap_or_else(Markers::script),
        }
    }
}

/// Patched file.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct TargetDefinition {
    /// Unique name used to hand content to the target.
    pub name: String,

    /// Resource kind.
    #[serde(default)]
    pub kind: ResourceKind,

    /// Candidate paths, in order of preference. Relative paths are resolved
    /// against the located install root.
    pub candidates: Vec<PathBuf>,

    /// Where the marker block goes.
    pub anchor: Anchor,

    /// File name of a standalone resource written next to the target.
    pub side_resource: Option<String>,
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Two targets share a name.
    #[error("target {0:?} defined more than once")]
    DuplicateTarget(String),

    /// Target lists nowhere to look.
    #[error("target {0:?} has no candidate paths")]
    NoCandidates(String),

    /// Anchor or marker vocabulary is unusable.
    #[error(transparent)]
    Marker(#[from] MarkerError),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
