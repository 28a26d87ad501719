//! Separating platform metadata from user answers.
//!
//! Every submission carries a fixed set of system fields next to the answers.
//! The set is known in advance; it is not derived from the form schema.

use indexmap::IndexMap;
use serde::Serialize;

use crate::{
  Result,
  value::{RawRecord, Record},
};

/// System fields the platform adds to every submission.
pub const METADATA_KEYS: &[&str] = &[
  "formhub/uuid",
  "meta/instanceId",
  "meta/instanceID",
  "_id",
  "__version__",
  "_xform_id_string",
  "_uuid",
  "_attachments",
  "_status",
  "_geolocation",
  "_submission_time",
  "_tags",
  "_notes",
  "_validation_status",
  "_submitted_by",
];

pub fn is_metadata_key(key: &str) -> bool { METADATA_KEYS.contains(&key) }

/// Copy `record` without its metadata fields, except the ones named in
/// `exceptions`.
pub fn remove_metadata<V: Clone>(
  record: &IndexMap<String, V>,
  exceptions: &[&str],
) -> IndexMap<String, V> {
  record
    .iter()
    .filter(|(k, _)| !is_metadata_key(k) || exceptions.contains(&k.as_str()))
    .map(|(k, v)| (k.clone(), v.clone()))
    .collect()
}

/// Partition `record` into `(metadata, answers)`.
///
/// Every key lands on exactly one side; both sides keep the original order.
pub fn split_metadata<V>(
  record: IndexMap<String, V>,
) -> (IndexMap<String, V>, IndexMap<String, V>) {
  record.into_iter().partition(|(k, _)| is_metadata_key(k))
}

/// A submission split into its metadata and its answers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionEnvelope {
  /// System fields, kept as opaque JSON.
  pub metadata: RawRecord,
  pub answers:  Record,
}

impl SubmissionEnvelope {
  /// Split a raw submission without touching the answer keys.
  pub fn split(raw: RawRecord) -> Result<Self> {
    let (metadata, answers) = split_metadata(raw);
    Ok(Self {
      metadata,
      answers: Record::from_raw(answers)?,
    })
  }

  /// The submission id (`_id`), rendered as a string whatever its JSON type.
  pub fn id(&self) -> Option<String> {
    match self.metadata.get("_id")? {
      serde_json::Value::String(s) => Some(s.clone()),
      serde_json::Value::Number(n) => Some(n.to_string()),
      _ => None,
    }
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
