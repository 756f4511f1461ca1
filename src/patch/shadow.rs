// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Shadowing of host settings.
//!
//! Patching sometimes only works if a few host settings hold particular values.
//! Those settings belong to the user, so before overriding them their prior
//! values are recorded, and a restore writes them back verbatim, or unsets
//! them if they were never set to begin with.
//!
//! # Snapshot Once
//!
//! The first apply of a campaign records prior values. Later applies in the
//! same campaign must not record again, since by then the store holds our own
//! overrides and would be "remembered" as the user's values. Only names that
//! were never recorded get recorded on later applies; we never touched those,
//! so their current value is still the user's.
//!
//! Setting values are opaque JSON values. They are stored and written back
//! without interpretation.

use crate::patch::file::{self, FileError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

/// Access to the host's settings store.
///
/// A missing setting reads as `None`; callers supply their own default.
pub trait SettingsStore {
    /// Read current value of setting.
    fn get(&self, name: &str) -> Result<Option<Value>>;

    /// Write value of setting.
    fn set(&mut self, name: &str, value: Value) -> Result<()>;

    /// Remove setting entirely.
    fn unset(&mut self, name: &str) -> Result<()>;
}

/// Value a setting held before the campaign overrode it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorValue {
    Absent,
    Present(Value),
}

/// Campaign scoped snapshot of overridden settings.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SettingsShadow {
    saved: bool,
    values: BTreeMap<String, PriorValue>,
}

impl SettingsShadow {
    /// Check if a snapshot exists for current campaign.
    pub fn is_saved(&self) -> bool {
        self.saved
    }

    /// Recorded prior value of setting.
    pub fn prior(&self, name: &str) -> Option<&PriorValue> {
        self.values.get(name)
    }

    /// Snapshot settings if needed, then write overrides.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError`] if store cannot be read or written.
    pub fn apply(
        &mut self,
        store: &mut impl SettingsStore,
        overrides: &BTreeMap<String, Value>,
    ) -> Result<()> {
        // INVARIANT: Record every prior value before the first write.
        for name in overrides.keys() {
            if self.values.contains_key(name) {
                continue;
            }

            let prior = match store.get(name)? {
                Some(value) => PriorValue::Present(value),
                None => PriorValue::Absent,
            };
            debug!("shadow setting {name:?} as {prior:?}");
            self.values.insert(name.clone(), prior);
        }
        self.saved = true;

        for (name, value) in overrides {
            info!("override setting {name:?}");
            store.set(name, value.clone())?;
        }

        Ok(())
    }

    /// Write back every recorded prior value and end the campaign.
    ///
    /// Returns `false` if there was no snapshot to restore.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError`] if store cannot be written. The snapshot is
    ///   kept in that case, so a later restore can try again.
    pub fn restore(&mut self, store: &mut impl SettingsStore) -> Result<bool> {
        if !self.saved {
            return Ok(false);
        }

        for (name, prior) in &self.values {
            match prior {
                PriorValue::Present(value) => {
                    info!("restore setting {name:?}");
                    store.set(name, value.clone())?;
                }
                PriorValue::Absent => {
                    info!("unset setting {name:?}");
                    store.unset(name)?;
                }
            }
        }

        self.values.clear();
        self.saved = false;

        Ok(true)
    }
}

/// Settings stored as a top-level JSON object on disk.
///
/// Every change is written through immediately. Key order of the file is kept.
#[derive(Debug, Clone)]
pub struct JsonSettingsFile {
    path: PathBuf,
    values: Map<String, Value>,
}

impl JsonSettingsFile {
    /// Open settings file. A missing file reads as empty settings.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError::File`] if file exists but cannot be read.
    /// - Return [`SettingsError::Parse`] if file is not JSON.
    /// - Return [`SettingsError::NotAnObject`] if file is not a JSON object.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            debug!("settings file {:?} missing, starting empty", path.display());
            return Ok(Self {
                path,
                values: Map::new(),
            });
        }

        let content = file::read_text(&path)?;
        let values = match serde_json::from_str(&content) {
            Ok(Value::Object(values)) => values,
            Ok(_) => return Err(SettingsError::NotAnObject { path }),
            Err(err) => return Err(SettingsError::Parse { source: err, path }),
        };

        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            mkdirp::mkdirp(parent).map_err(|err| SettingsError::CreateDir {
                source: err,
                path: parent.to_path_buf(),
            })?;
        }

        let mut content = serde_json::to_string_pretty(&self.values).map_err(|err| {
            SettingsError::Serialize {
                source: err,
                path: self.path.clone(),
            }
        })?;
        content.push('\n');

        Ok(file::write(&self.path, content)?)
    }
}

impl SettingsStore for JsonSettingsFile {
    fn get(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.values.get(name).cloned())
    }

    fn set(&mut self, name: &str, value: Value) -> Result<()> {
        self.values.insert(name.to_string(), value);
        self.flush()
    }

    fn unset(&mut self, name: &str) -> Result<()> {
        if self.values.shift_remove(name).is_some() {
            self.flush()?;
        }

        Ok(())
    }
}

/// Settings store error types.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    File(#[from] FileError),

    /// Settings file is not valid JSON.
    #[error("failed to parse settings file {:?}", path.display())]
    Parse {
        #[source]
        source: serde_json::Error,
        path: PathBuf,
    },

    /// Settings cannot be rendered as JSON.
    #[error("failed to serialize settings for {:?}", path.display())]
    Serialize {
        #[source]
        source: serde_json::Error,
        path: PathBuf,
    },

    /// Settings file holds something other than an object.
    #[error("settings file {:?} is not a JSON object", path.display())]
    NotAnObject { path: PathBuf },

    /// Directory of settings file cannot be created.
    #[error("failed to create settings directory {:?}", path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = SettingsError> = std::result::Result<T, E>;
