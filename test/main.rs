// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT


use anyhow::Result;
use hostpatch::{JsonSettingsFile, PatchDefinition, Patcher, Payload};
use indoc::{formatdoc, indoc};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use tempfile::TempDir;

pub(crate) const WORKBENCH: &str = indoc! {r#"
    <!DOCTYPE html>
    <html>
    <head>
    <meta charset="utf-8">
    </head>
    <body></body>
    </html>
"#};

pub(crate) const MAIN_JS: &str = indoc! {r#"
    "use strict";
    const boot = require("./boot");
    boot.start();
"#};

pub(crate) const SETTINGS: &str = indoc! {r#"
    {
      "window.titleBarStyle": "custom",
      "editor.fontSize": 13
    }
"#};

/// Fake host install living in a scratch directory.
pub(crate) struct HostFixture {
    dir: TempDir,
}

impl HostFixture {
    pub(crate) fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let fixture = Self { dir };

        fs::create_dir_all(fixture.app_root().join("out/vs"))?;
        fs::create_dir_all(fixture.root().join("user"))?;
        fs::write(fixture.workbench(), WORKBENCH)?;
        fs::write(fixture.main_js(), MAIN_JS)?;
        fs::write(fixture.settings_file(), SETTINGS)?;
        fs::write(
            fixture.manifest(),
            indoc! {r#"
                {
                  "nameShort": "Host",
                  "checksums": {
                    "vs/workbench.html": "AAAA",
                    "vs/main.js": "BBBB",
                    "vs/untouched.js": "CCCC"
                  }
                }
            "#},
        )?;

        Ok(fixture)
    }

    pub(crate) fn root(&self) -> &Path {
        self.dir.path()
    }

    pub(crate) fn app_root(&self) -> PathBuf {
        self.root().join("resources/app")
    }

    pub(crate) fn workbench(&self) -> PathBuf {
        self.app_root().join("out/vs/workbench.html")
    }

    pub(crate) fn main_js(&self) -> PathBuf {
        self.app_root().join("out/vs/main.js")
    }

    pub(crate) fn manifest(&self) -> PathBuf {
        self.app_root().join("product.json")
    }

    pub(crate) fn settings_file(&self) -> PathBuf {
        self.root().join("user/settings.json")
    }

    pub(crate) fn state_dir(&self) -> PathBuf {
        self.root().join("state")
    }

    pub(crate) fn definition(&self) -> String {
        formatdoc! {r#"
            [host]
            app_roots = ["{missing}", "{app}"]
            manifest = "product.json"
            manifest_prefix = "out/"
            settings_file = "{settings}"

            [digest]
            script = "sha512"

            [[target]]
            name = "workbench"
            kind = "markup"
            candidates = ["out/vs/workbench.html"]
            anchor = {{ before = "</head>" }}
            side_resource = "hostpatch.css"

            [[target]]
            name = "main"
            kind = "script"
            candidates = ["out/vs/main.js"]
            anchor = {{ after = "\"use strict\";" }}

            [settings]
            "window.titleBarStyle" = "native"
            "workbench.trusted" = true
            "#,
            missing = self.root().join("nowhere").display(),
            app = self.app_root().display(),
            settings = self.settings_file().display(),
        }
    }

    pub(crate) fn patcher(&self) -> Result<Patcher<JsonSettingsFile>> {
        self.patcher_with(&self.definition())
    }

    pub(crate) fn patcher_with(&self, definition: &str) -> Result<Patcher<JsonSettingsFile>> {
        let definition: PatchDefinition = definition.parse()?;
        let settings = JsonSettingsFile::open(self.settings_file())?;

        Ok(Patcher::new(definition, self.state_dir(), settings))
    }

    /// Snapshot of every file the patcher may touch.
    pub(crate) fn snapshot(&self) -> Result<Vec<(PathBuf, Vec<u8>)>> {
        [
            self.workbench(),
            self.main_js(),
            self.manifest(),
            self.settings_file(),
        ]
        .into_iter()
        .map(|path| Ok((path.clone(), fs::read(&path)?)))
        .collect()
    }
}

pub(crate) fn payloads(workbench: &str, main: &str) -> BTreeMap<String, Payload> {
    BTreeMap::from([
        (
            "workbench".to_string(),
            Payload::new(workbench).with_side_resource(b"body { color: red; }".to_vec()),
        ),
        ("main".to_string(), Payload::new(main)),
    ])
}
