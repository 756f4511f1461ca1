// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Marker block editing.
//!
//! Injected content always lives inside a __marker block__: a region of text
//! that opens with a start sentinel and closes with an end sentinel. Keeping
//! the injected content fenced like this is what makes patching reversible
//! without a backup. Everything between (and including) the sentinels belongs
//! to hostpatch, everything outside of them belongs to the host.
//!
//! # Round-Trip Law
//!
//! For any text without a block, any content, and any anchor that matches,
//! `strip(insert(text, content, anchor)) == text`. The editor never strips
//! before inserting. Callers that want to refresh a block run `strip` then
//! `insert` as a pair.
//!
//! # Framing
//!
//! Markup resources take the block inline, right up against the anchor.
//! Script resources take the block on a line of its own, so insertion adds one
//! newline between block and anchor, and stripping takes that newline back.
//! Since any two adjacent newlines are interchangeable, removing whichever
//! newline borders the block restores the original text either way.
//!
//! # Anchors
//!
//! An anchor names the spot the block is inserted at: before or after the
//! first occurrence of a literal substring or regular expression. Only the
//! first occurrence is considered.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use tracing::warn;

/// Start/end sentinel pair delimiting a marker block.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Markers {
    pub start: String,
    pub end: String,
}

impl Markers {
    /// Construct new sentinel pair.
    ///
    /// # Errors
    ///
    /// - Return [`MarkerError::InvalidMarkers`] if either sentinel is empty,
    ///   or both sentinels are the same string.
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Result<Self> {
        let markers = Self {
            start: start.into(),
            end: end.into(),
        };
        markers.validate()?;

        Ok(markers)
    }

    /// Default vocabulary for markup resources.
    pub fn markup() -> Self {
        Self {
            start: "<!-- hostpatch:start -->".into(),
            end: "<!-- hostpatch:end -->".into(),
        }
    }

    /// Default vocabulary for script resources.
    pub fn script() -> Self {
        Self {
            start: "/* hostpatch:start */".into(),
            end: "/* hostpatch:end */".into(),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.start.is_empty() || self.end.is_empty() || self.start == self.end {
            return Err(MarkerError::InvalidMarkers {
                start: self.start.clone(),
                end: self.end.clone(),
            });
        }

        Ok(())
    }
}

/// How a marker block sits relative to its anchor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// Block touches the anchor directly.
    #[default]
    Inline,

    /// Block sits on its own line next to the anchor.
    Line,
}

/// Insertion point of a marker block.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    /// Right before first occurrence of literal substring.
    Before(String),

    /// Right after first occurrence of literal substring.
    After(String),

    /// Right before first match of regular expression.
    BeforePattern(String),

    /// Right after first match of regular expression.
    AfterPattern(String),
}

impl Anchor {
    /// Byte offset to insert at, if anchor occurs in text.
    ///
    /// # Errors
    ///
    /// - Return [`MarkerError::InvalidPattern`] if pattern does not compile.
    pub fn position(&self, text: &str) -> Result<Option<usize>> {
        let position = match self {
            Self::Before(literal) => text.find(literal.as_str()),
            Self::After(literal) => text.find(literal.as_str()).map(|idx| idx + literal.len()),
            Self::BeforePattern(pattern) => compile(pattern)?.find(text).map(|m| m.start()),
            Self::AfterPattern(pattern) => compile(pattern)?.find(text).map(|m| m.end()),
        };

        Ok(position)
    }

    /// Check that a pattern anchor compiles.
    ///
    /// # Errors
    ///
    /// - Return [`MarkerError::InvalidPattern`] if pattern does not compile.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::BeforePattern(pattern) | Self::AfterPattern(pattern) => {
                compile(pattern).map(|_| ())
            }
            _ => Ok(()),
        }
    }

    fn is_before(&self) -> bool {
        matches!(self, Self::Before(_) | Self::BeforePattern(_))
    }
}

impl Display for Anchor {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Before(literal) => write!(fmt, "before {literal:?}"),
            Self::After(literal) => write!(fmt, "after {literal:?}"),
            Self::BeforePattern(pattern) => write!(fmt, "before pattern /{pattern}/"),
            Self::AfterPattern(pattern) => write!(fmt, "after pattern /{pattern}/"),
        }
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|err| MarkerError::InvalidPattern {
        source: err,
        pattern: pattern.to_string(),
    })
}

/// Detect, strip, and insert marker blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerEditor {
    markers: Markers,
    framing: Framing,
}

impl MarkerEditor {
    /// Construct new marker block editor.
    pub fn new(markers: Markers, framing: Framing) -> Self {
        Self { markers, framing }
    }

    pub fn markers(&self) -> &Markers {
        &self.markers
    }

    /// Check if text carries a marker block.
    pub fn has_block(&self, text: &str) -> bool {
        text.contains(self.markers.start.as_str())
    }

    /// Remove every marker block from text.
    ///
    /// Each region from a start sentinel through the next end sentinel is
    /// removed. Under line framing, one newline bordering the region goes
    /// with it, the trailing one if present, otherwise the leading one. A start
    /// sentinel without a matching end sentinel loses only the sentinel itself.
    ///
    /// Text without a block comes back unchanged.
    pub fn strip(&self, text: &str) -> String {
        let Markers { start, end } = &self.markers;
        let mut out = text.to_string();

        // INVARIANT: Every pass removes at least one start sentinel, and the
        // loop only ends once no start sentinel is left.
        while let Some(lo) = out.find(start.as_str()) {
            let body = lo + start.len();
            match out[body..].find(end.as_str()) {
                Some(offset) => {
                    let mut lo = lo;
                    let mut hi = body + offset + end.len();
                    if self.framing == Framing::Line {
                        if out[hi..].starts_with('\n') {
                            hi += 1;
                        } else if out[..lo].ends_with('\n') {
                            lo -= 1;
                        }
                    }
                    out.replace_range(lo..hi, "");
                }
                None => {
                    warn!("dropping start marker {start:?} that has no matching end marker");
                    out.replace_range(lo..body, "");
                }
            }
        }

        out
    }

    /// Insert marker block wrapping content at anchor.
    ///
    /// Does not strip any existing block first.
    ///
    /// # Errors
    ///
    /// - Return [`MarkerError::MarkerInContent`] if content contains either
    ///   sentinel.
    /// - Return [`MarkerError::AnchorNotFound`] if anchor does not occur in
    ///   text.
    /// - Return [`MarkerError::SentinelCollision`] if content or the text
    ///   around the anchor would fuse with a sentinel, so that stripping the
    ///   result would not give back the text.
    /// - Return [`MarkerError::InvalidPattern`] if anchor pattern does not
    ///   compile.
    pub fn insert(&self, text: &str, content: &str, anchor: &Anchor) -> Result<String> {
        let Markers { start, end } = &self.markers;
        if content.contains(start.as_str()) || content.contains(end.as_str()) {
            return Err(MarkerError::MarkerInContent);
        }

        let at = anchor
            .position(text)?
            .ok_or_else(|| MarkerError::AnchorNotFound {
                anchor: anchor.to_string(),
            })?;

        let mut block = String::with_capacity(start.len() + content.len() + end.len() + 1);
        if self.framing == Framing::Line && !anchor.is_before() {
            block.push('\n');
        }
        block.push_str(start);
        block.push_str(content);
        block.push_str(end);
        if self.framing == Framing::Line && anchor.is_before() {
            block.push('\n');
        }

        let mut out = String::with_capacity(text.len() + block.len());
        out.push_str(&text[..at]);
        out.push_str(&block);
        out.push_str(&text[at..]);

        // INVARIANT: Sentinel fragments at the block's edges must not join up
        // with neighbouring text into a sentinel found before ours.
        if self.strip(&out) != self.strip(text) {
            return Err(MarkerError::SentinelCollision {
                anchor: anchor.to_string(),
            });
        }

        Ok(out)
    }
}

/// Marker block editing error types.
#[derive(Debug, thiserror::Error)]
pub enum MarkerError {
    /// Insertion point missing from target content.
    #[error("anchor {anchor} not found in target content")]
    AnchorNotFound { anchor: String },

    /// Content would break block boundaries.
    #[error("content to insert contains a marker sentinel")]
    MarkerInContent,

    /// Content or text next to anchor completes a sentinel.
    #[error("block at anchor {anchor} would fuse with a partial marker sentinel")]
    SentinelCollision { anchor: String },

    /// Anchor pattern cannot be compiled.
    #[error("invalid anchor pattern {pattern:?}")]
    InvalidPattern {
        #[source]
        source: regex::Error,
        pattern: String,
    },

    /// Sentinel pair cannot delimit anything.
    #[error("invalid marker pair {start:?} / {end:?}: markers must be non-empty and distinct")]
    InvalidMarkers { start: String, end: String },
}

/// Friendly result alias :3
pub type Result<T, E = MarkerError> = std::result::Result<T, E>;
