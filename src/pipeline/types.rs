//! Shared types for the tokenization pipeline.

use serde::{Deserialize, Serialize};

// ── Line job ────────────────────────────────────────────────────────

/// One input line tagged with its position in the document.
///
/// Created by the line source in strictly increasing `order` and consumed
/// exactly once by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineJob {
    /// Zero-based line number.
    pub order: usize,
    /// Line content without its terminator.
    pub raw: String,
}

impl LineJob {
    pub fn new(order: usize, raw: impl Into<String>) -> Self {
        Self {
            order,
            raw: raw.into(),
        }
    }
}

// ── Record ──────────────────────────────────────────────────────────

/// Classified form of a [`LineJob`].
///
/// Serialized with the field names the conversion service expects:
/// `{"Order": 0, "Data": "# Hi", "ToggleMathMode": false}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Record {
    /// Same `order` as the job it was produced from.
    pub order: usize,
    /// Markdown text for the line (may be empty).
    pub data: String,
    /// Line opens or closes a math block.
    pub toggle_math_mode: bool,
}

impl Record {
    pub fn new(order: usize, data: impl Into<String>, toggle_math_mode: bool) -> Self {
        Self {
            order,
            data: data.into(),
            toggle_math_mode,
        }
    }

    /// A record that contributes nothing to the output.
    pub fn empty(order: usize) -> Self {
        Self::new(order, String::new(), false)
    }

    /// A record that flips math mode.
    pub fn math_toggle(order: usize) -> Self {
        Self::new(order, String::new(), true)
    }
}

// ── Ordered records ─────────────────────────────────────────────────

/// Records of one pipeline run, sorted by `order` with no gaps.
///
/// Only the fan-in collector builds this from worker output, so holding one
/// means the sequence covers `0..len()` exactly once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct OrderedRecords(Vec<Record>);

impl OrderedRecords {
    pub(crate) fn from_sorted(records: Vec<Record>) -> Self {
        debug_assert!(records.iter().enumerate().all(|(i, r)| r.order == i));
        Self(records)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Record] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<Record> {
        self.0
    }
}

impl<'a> IntoIterator for &'a OrderedRecords {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
