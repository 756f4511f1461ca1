// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Reversible patching of host application resources.
//!
//! Hostpatch injects content into static markup and script files of an
//! application it does not own. Every change sits inside a marker block, is
//! preceded by a pristine backup, and is mirrored into the host's integrity
//! manifest, so that the host keeps trusting its own install and every change
//! can be undone exactly.
//!
//! See [`patch`] for the apply/restore lifecycle, and [`config`] for the patch
//! definition file that describes a host.

pub mod config;
pub mod lock;
pub mod patch;
pub mod path;

pub use config::{PatchDefinition, ResourceKind, TargetDefinition};
pub use patch::{
    shadow::{JsonSettingsFile, SettingsStore},
    ApplyReport, Patcher, PatchState, Payload, RestoreReport,
};
