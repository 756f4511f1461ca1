// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Integrity manifest maintenance.
//!
//! Hosts that verify their own install keep a manifest mapping relative file
//! paths to digests, and complain about a corrupt install when a file no longer
//! matches. After a target is patched, its entry must be rewritten with the
//! digest of the new bytes.
//!
//! # Minimal-Diff Rewrite
//!
//! The manifest is never parsed and re-serialized. It is read as raw text, the
//! quoted key is searched for literally, and only the string value right after
//! it is replaced. Unrelated formatting and key order stay byte for byte the
//! same. The cost is fragility: a manifest that escapes its keys differently,
//! or nests the value somewhere else, simply goes unmatched, which is logged
//! and otherwise treated as "host does not track this file".
//!
//! # Digest Format
//!
//! Binary hash, standard base64 alphabet, trailing `=` padding removed.

use crate::patch::file::{self, FileError};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Component, Path},
};
use tracing::{debug, info, instrument, warn};

/// Hash family used for a manifest entry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    /// Hash bytes into manifest digest format.
    pub fn digest(&self, bytes: impl AsRef<[u8]>) -> String {
        let bytes = bytes.as_ref();
        match self {
            Self::Sha256 => STANDARD_NO_PAD.encode(Sha256::digest(bytes)),
            Self::Sha384 => STANDARD_NO_PAD.encode(Sha384::digest(bytes)),
            Self::Sha512 => STANDARD_NO_PAD.encode(Sha512::digest(bytes)),
        }
    }
}

impl Display for DigestAlgorithm {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Sha256 => fmt.write_str("sha256"),
            Self::Sha384 => fmt.write_str("sha384"),
            Self::Sha512 => fmt.write_str("sha512"),
        }
    }
}

/// Result of a manifest update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestUpdate {
    /// Entry rewritten with new digest.
    Updated { key: String, digest: String },

    /// Entry already held the right digest.
    Unchanged { key: String },

    /// Manifest does not track target.
    KeyNotFound,

    /// Key occurs, but not as `"key": "<digest>"`.
    PatternMismatch { key: String },
}

/// Rewrite digests of patched files inside integrity manifest.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ManifestUpdater {
    strip_prefix: Option<String>,
}

impl ManifestUpdater {
    /// Construct new manifest updater.
    ///
    /// If `strip_prefix` is set, a secondary key form with that prefix
    /// removed is tried after the plain relative path.
    pub fn new(strip_prefix: Option<String>) -> Self {
        Self { strip_prefix }
    }

    /// Keys the manifest may use for target, in order of preference.
    ///
    /// Keys always use `/` as separator. A target outside `app_root`, or one
    /// reached through `..`, has no keys.
    pub fn candidate_keys(&self, target: impl AsRef<Path>, app_root: impl AsRef<Path>) -> Vec<String> {
        let Ok(relative) = target.as_ref().strip_prefix(app_root.as_ref()) else {
            return Vec::new();
        };

        // INVARIANT: A path that climbs out through `..` names some other file.
        let Some(parts) = relative
            .components()
            .map(|component| match component {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
        else {
            debug!("{:?} is not a plain path below install root", relative.display());
            return Vec::new();
        };
        if parts.is_empty() {
            return Vec::new();
        }
        let key = parts.join("/");

        let mut keys = vec![key.clone()];
        if let Some(prefix) = self.strip_prefix.as_deref().filter(|prefix| !prefix.is_empty()) {
            if let Some(stripped) = key.strip_prefix(prefix) {
                let stripped = stripped.trim_start_matches('/');
                if !stripped.is_empty() {
                    keys.push(stripped.to_string());
                }
            }
        }

        keys
    }

    /// Rewrite manifest entry of target with digest of its current bytes.
    ///
    /// The first candidate key found quoted in the manifest wins. Missing keys
    /// and entries that do not look like `"key": "<digest>"` leave the
    /// manifest untouched.
    ///
    /// # Errors
    ///
    /// - Return [`ManifestError::File`] if manifest or target cannot be read,
    ///   or manifest cannot be written.
    #[instrument(skip(self, manifest, target, app_root), level = "debug")]
    pub fn update(
        &self,
        manifest: impl AsRef<Path>,
        target: impl AsRef<Path>,
        app_root: impl AsRef<Path>,
        algorithm: DigestAlgorithm,
    ) -> Result<ManifestUpdate> {
        let manifest = manifest.as_ref();
        let target = target.as_ref();
        let text = file::read_text(manifest)?;

        let Some(key) = self
            .candidate_keys(target, app_root)
            .into_iter()
            .find(|key| text.contains(&format!("\"{key}\"")))
        else {
            debug!("manifest {:?} does not track {:?}", manifest.display(), target.display());
            return Ok(ManifestUpdate::KeyNotFound);
        };

        let digest = algorithm.digest(file::read(target)?);
        let entry = Regex::new(&format!(r#"("{}"\s*:\s*")([^"]*)(")"#, regex::escape(&key)))?;
        let Some(current) = entry.captures(&text) else {
            warn!("manifest entry for {key:?} is not a plain string value, leaving it alone");
            return Ok(ManifestUpdate::PatternMismatch { key });
        };

        if &current[2] == digest {
            debug!("manifest entry for {key:?} already up to date");
            return Ok(ManifestUpdate::Unchanged { key });
        }

        let patched = entry.replacen(&text, 1, |caps: &Captures<'_>| {
            format!("{}{digest}{}", &caps[1], &caps[3])
        });
        file::write(manifest, patched.as_bytes())?;
        info!("update {algorithm} digest of {key:?} in {:?}", manifest.display());

        Ok(ManifestUpdate::Updated { key, digest })
    }
}

/// Integrity manifest error types.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error(transparent)]
    File(#[from] FileError),

    /// Entry pattern cannot be built for key.
    #[error(transparent)]
    Pattern(#[from] regex::Error),
}

/// Friendly result alias :3
pub type Result<T, E = ManifestError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::{formatdoc, indoc};
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;
    use std::fs;

    const EMPTY_SHA256: &str = "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU";

    #[test]
    fn digest_drops_padding() {
        assert_eq!(DigestAlgorithm::Sha256.digest(b""), EMPTY_SHA256);
        assert!(!DigestAlgorithm::Sha512.digest(b"x").ends_with('='));
    }

    #[test_case(None, vec!["out/vs/workbench.html"]; "plain relative key")]
    #[test_case(Some("out/"), vec!["out/vs/workbench.html", "vs/workbench.html"]; "prefix stripped")]
    #[test_case(Some("lib/"), vec!["out/vs/workbench.html"]; "prefix absent")]
    #[test]
    fn candidate_keys_are_relative(prefix: Option<&str>, expect: Vec<&str>) {
        let updater = ManifestUpdater::new(prefix.map(Into::into));
        let result = updater.candidate_keys("/app/out/vs/workbench.html", "/app");
        pretty_assertions::assert_eq!(result, expect);
    }

    #[test]
    fn target_outside_app_root_has_no_keys() {
        let updater = ManifestUpdater::default();
        assert!(updater.candidate_keys("/elsewhere/a.js", "/app").is_empty());
        assert!(updater.candidate_keys("/app/../app2/x.js", "/app").is_empty());
    }

    #[test]
    fn escaping_target_leaves_sibling_entry_alone() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("app");
        fs::create_dir_all(root.join("app2"))?;
        fs::create_dir_all(dir.path().join("app2"))?;
        fs::write(dir.path().join("app2/x.js"), "outside")?;
        let manifest = root.join("product.json");
        let text = "{\"checksums\": {\"app2/x.js\": \"inside\"}}\n";
        fs::write(&manifest, text)?;

        let updater = ManifestUpdater::default();
        let result = updater.update(
            &manifest,
            root.join("../app2/x.js"),
            &root,
            DigestAlgorithm::Sha256,
        )?;
        assert_eq!(result, ManifestUpdate::KeyNotFound);
        assert_eq!(fs::read_to_string(&manifest)?, text);

        Ok(())
    }

    #[test]
    fn update_rewrites_only_matching_value() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let app = dir.path();
        fs::create_dir_all(app.join("out/vs"))?;
        fs::write(app.join("out/vs/workbench.html"), "")?;
        let manifest = app.join("product.json");
        fs::write(
            &manifest,
            indoc! {r#"
                {
                  "nameShort": "Host",
                  "checksums": {
                    "vs/workbench.html":   "stale",
                    "vs/other.js": "keep"
                  }
                }
            "#},
        )?;

        let updater = ManifestUpdater::new(Some("out/".into()));
        let result = updater.update(
            &manifest,
            app.join("out/vs/workbench.html"),
            app,
            DigestAlgorithm::Sha256,
        )?;
        assert_eq!(
            result,
            ManifestUpdate::Updated {
                key: "vs/workbench.html".into(),
                digest: EMPTY_SHA256.into(),
            }
        );

        let expect = formatdoc! {r#"
            {{
              "nameShort": "Host",
              "checksums": {{
                "vs/workbench.html":   "{EMPTY_SHA256}",
                "vs/other.js": "keep"
              }}
            }}
        "#};
        assert_eq!(fs::read_to_string(&manifest)?, expect);

        let again = updater.update(
            &manifest,
            app.join("out/vs/workbench.html"),
            app,
            DigestAlgorithm::Sha256,
        )?;
        assert_eq!(again, ManifestUpdate::Unchanged { key: "vs/workbench.html".into() });

        Ok(())
    }

    #[test]
    fn untracked_target_is_noop() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let app = dir.path();
        fs::write(app.join("a.js"), "x")?;
        let manifest = app.join("product.json");
        fs::write(&manifest, r#"{"checksums": {}}"#)?;

        let updater = ManifestUpdater::default();
        let result = updater.update(&manifest, app.join("a.js"), app, DigestAlgorithm::Sha256)?;
        assert_eq!(result, ManifestUpdate::KeyNotFound);
        assert_eq!(fs::read_to_string(&manifest)?, r#"{"checksums": {}}"#);

        Ok(())
    }

    #[test]
    fn key_without_string_value_is_left_alone() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let app = dir.path();
        fs::write(app.join("a.js"), "x")?;
        let manifest = app.join("product.json");
        let text = r#"{"preload": ["a.js"]}"#;
        fs::write(&manifest, text)?;

        let updater = ManifestUpdater::default();
        let result = updater.update(&manifest, app.join("a.js"), app, DigestAlgorithm::Sha256)?;
        assert_eq!(result, ManifestUpdate::PatternMismatch { key: "a.js".into() });
        assert_eq!(fs::read_to_string(&manifest)?, text);

        Ok(())
    }
}
