//! Schema-driven transcoding between KoboToolbox's flat wire records and
//! leaf-keyed answer trees.
//!
//! Read path: [`to_answer_tree`] splits off metadata, reduces every key to
//! its leaf name and coerces answers to their declared types.
//!
//! Write path: [`to_wire_record`] drops metadata, restores full paths from
//! the [`QuestionIndex`] and, for inserts, nests the result into groups.
//!
//! Everything here is synchronous and pure.

pub mod coerce;
pub mod error;
pub mod path;

use kobo_core::{
  QuestionIndex, RawRecord, Record, SubmissionEnvelope,
  metadata::remove_metadata,
};

pub use self::{
  coerce::{CoercionMode, coerce, coerce_record, coerce_strict, coerce_with},
  error::{CoercionError, Error, Result},
  path::{
    collapse_redundant_prefix, leaf_name, nest_by_path, restore_full_path,
    strip_group_prefix,
  },
};

/// The shape a wire record is produced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
  /// Nested groups, as a new submission's body.
  Insert,
  /// Flat, full-path keys, as the `data` of a bulk update.
  Update,
}

/// Options for [`to_wire_record`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireOptions {
  /// When set, `tag: "true"` is added at the top level. Used to mark
  /// submissions written by a tool.
  pub tag:      Option<String>,
  pub coercion: CoercionMode,
}

impl WireOptions {
  pub fn tagged(tag: impl Into<String>) -> Self {
    Self {
      tag: Some(tag.into()),
      ..Self::default()
    }
  }

  pub fn strict(mut self) -> Self {
    self.coercion = CoercionMode::Strict;
    self
  }
}

/// Convert a raw platform submission into metadata plus a typed answer tree
/// keyed by leaf name.
pub fn to_answer_tree(
  raw: RawRecord,
  index: &QuestionIndex,
  mode: CoercionMode,
) -> Result<SubmissionEnvelope> {
  let SubmissionEnvelope { metadata, answers } = SubmissionEnvelope::split(raw)?;
  let answers = coerce_record(strip_group_prefix(answers), index, mode)?;
  Ok(SubmissionEnvelope { metadata, answers })
}

/// Convert an answer tree into the record the platform expects.
///
/// Keys that are not in `index` pass through as they are and are not
/// coerced.
pub fn to_wire_record(
  answers: &Record,
  index: &QuestionIndex,
  output: Output,
  options: &WireOptions,
) -> Result<Record> {
  let cleaned = Record::from(remove_metadata(answers.as_map(), &[]));
  let coerced = coerce_record(strip_group_prefix(cleaned), index, options.coercion)?;
  let restored = restore_full_path(coerced, index);

  let mut record = match output {
    Output::Insert => nest_by_path(restored),
    Output::Update => restored,
  };
  if let Some(tag) = &options.tag {
    record.insert(tag.as_str(), "true");
  }
  Ok(record)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
