//! The form schema, as served by `GET /api/v2/assets/{uid}/`.
//!
//! Only the fields the transcoder and the client need are modelled; anything
//! else in the asset payload is ignored on deserialization.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::index::QuestionIndex;

// ─── QuestionType ────────────────────────────────────────────────────────────

/// The declared type of a survey row.
///
/// Serialized as the platform's type string (`select_one`, `phonenumber`,
/// ...). Any type string this crate does not know deserializes as
/// [`QuestionType::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuestionType {
  // ── Free input ─────────────────────────────────────────────────────────
  Text,
  Integer,
  Decimal,
  Range,
  Barcode,
  Email,
  PhoneNumber,

  // ── Temporal ───────────────────────────────────────────────────────────
  Date,
  Datetime,
  Time,
  Start,
  End,
  Today,

  // ── Choices ────────────────────────────────────────────────────────────
  SelectOne,
  SelectMultiple,
  SelectOneFromFile,
  SelectMultipleFromFile,
  Rank,

  // ── Structure ──────────────────────────────────────────────────────────
  BeginGroup,
  EndGroup,
  BeginRepeat,
  EndRepeat,

  // ── Computed and display-only ──────────────────────────────────────────
  Note,
  Calculate,
  Hidden,
  Acknowledge,
  XmlExternal,

  // ── Geo ────────────────────────────────────────────────────────────────
  Geopoint,
  Geotrace,
  Geoshape,

  // ── Media ──────────────────────────────────────────────────────────────
  File,
  Image,
  Audio,
  Video,

  // ── Device metadata ────────────────────────────────────────────────────
  DeviceId,
  Username,

  Unknown,
}

/// Every known variant with its wire string. `Unknown` is not listed.
const TYPE_NAMES: &[(QuestionType, &str)] = &[
  (QuestionType::Text, "text"),
  (QuestionType::Integer, "integer"),
  (QuestionType::Decimal, "decimal"),
  (QuestionType::Range, "range"),
  (QuestionType::Barcode, "barcode"),
  (QuestionType::Email, "email"),
  (QuestionType::PhoneNumber, "phonenumber"),
  (QuestionType::Date, "date"),
  (QuestionType::Datetime, "datetime"),
  (QuestionType::Time, "time"),
  (QuestionType::Start, "start"),
  (QuestionType::End, "end"),
  (QuestionType::Today, "today"),
  (QuestionType::SelectOne, "select_one"),
  (QuestionType::SelectMultiple, "select_multiple"),
  (QuestionType::SelectOneFromFile, "select_one_from_file"),
  (QuestionType::SelectMultipleFromFile, "select_multiple_from_file"),
  (QuestionType::Rank, "rank"),
  (QuestionType::BeginGroup, "begin_group"),
  (QuestionType::EndGroup, "end_group"),
  (QuestionType::BeginRepeat, "begin_repeat"),
  (QuestionType::EndRepeat, "end_repeat"),
  (QuestionType::Note, "note"),
  (QuestionType::Calculate, "calculate"),
  (QuestionType::Hidden, "hidden"),
  (QuestionType::Acknowledge, "acknowledge"),
  (QuestionType::XmlExternal, "xml-external"),
  (QuestionType::Geopoint, "geopoint"),
  (QuestionType::Geotrace, "geotrace"),
  (QuestionType::Geoshape, "geoshape"),
  (QuestionType::File, "file"),
  (QuestionType::Image, "image"),
  (QuestionType::Audio, "audio"),
  (QuestionType::Video, "video"),
  (QuestionType::DeviceId, "deviceid"),
  (QuestionType::Username, "username"),
];

impl QuestionType {
  /// Parse a platform type string. Never fails.
  pub fn from_type_str(s: &str) -> Self {
    TYPE_NAMES
      .iter()
      .find(|(_, name)| *name == s)
      .map_or(Self::Unknown, |(kind, _)| *kind)
  }

  /// The platform type string; `"unknown"` for [`QuestionType::Unknown`].
  pub fn as_str(self) -> &'static str {
    TYPE_NAMES
      .iter()
      .find(|(kind, _)| *kind == self)
      .map_or("unknown", |(_, name)| name)
  }
}

impl fmt::Display for QuestionType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl Serialize for QuestionType {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(self.as_str())
  }
}

impl<'de> Deserialize<'de> for QuestionType {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    Ok(Self::from_type_str(&s))
  }
}

impl QuestionType {
  /// Answers coerced to numbers.
  pub fn is_numeric(self) -> bool {
    matches!(self, Self::Integer | Self::Decimal)
  }

  /// Answers coerced to calendar dates.
  pub fn is_date(self) -> bool {
    matches!(self, Self::Date | Self::Datetime | Self::Start | Self::End)
  }
}

// ─── Question ────────────────────────────────────────────────────────────────

/// One row of the form's `survey` sheet.
///
/// Closing rows (`end_group`, `end_repeat`) carry no name or path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
  #[serde(default)]
  pub name:     String,
  /// Fully qualified `/`-joined path, e.g. `family/location/number`.
  #[serde(rename = "$xpath", default)]
  pub xpath:    String,
  /// Name generated by the platform for rows that were saved without one.
  #[serde(rename = "$autoname", default, skip_serializing_if = "Option::is_none")]
  pub autoname: Option<String>,
  #[serde(rename = "type")]
  pub kind:     QuestionType,
  /// One label per translation; the first is the default.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub label:    Vec<Option<String>>,
}

impl Question {
  pub fn new(
    name: impl Into<String>,
    xpath: impl Into<String>,
    kind: QuestionType,
  ) -> Self {
    Self {
      name: name.into(),
      xpath: xpath.into(),
      autoname: None,
      kind,
      label: Vec::new(),
    }
  }

  /// The label in the default (first) translation.
  pub fn default_label(&self) -> Option<&str> {
    self.label.first().and_then(|l| l.as_deref())
  }
}

// ─── Form ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormContent {
  #[serde(default)]
  pub survey: Vec<Question>,
}

/// A deployed form (a KoboToolbox "asset").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Form {
  pub uid:                 String,
  #[serde(default)]
  pub name:                String,
  #[serde(default)]
  pub content:             FormContent,
  #[serde(default)]
  pub version_id:          Option<String>,
  #[serde(default)]
  pub deployed_version_id: Option<String>,
}

impl Form {
  /// Replace every question name by its `$autoname`, when one is present.
  pub fn use_autoname_as_name(mut self) -> Self {
    for question in &mut self.content.survey {
      if let Some(autoname) = question.autoname.clone() {
        question.name = autoname;
      }
    }
    self
  }

  /// Find a question by its (leaf) name.
  pub fn question(&self, name: &str) -> Option<&Question> {
    self.content.survey.iter().find(|q| q.name == name)
  }

  pub fn question_index(&self) -> QuestionIndex {
    QuestionIndex::build(&self.content.survey)
  }
}

/// A form as listed by `GET /api/v2/assets/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSummary {
  pub uid:                  String,
  #[serde(default)]
  pub name:                 String,
  #[serde(default)]
  pub deployment_status:    Option<String>,
  #[serde(default, rename = "deployment__submission_count")]
  pub submission_count:     Option<u64>,
}

/// One saved version of a form, as listed by
/// `GET /api/v2/assets/{uid}/versions/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormVersion {
  pub uid:           String,
  #[serde(default)]
  pub url:           String,
  #[serde(default)]
  pub content_hash:  String,
  /// Absent for versions that were saved but never deployed.
  #[serde(default)]
  pub date_deployed: Option<DateTime<Utc>>,
  pub date_modified: DateTime<Utc>,
}

/// The envelope of every paginated list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
  pub count:   usize,
  pub results: Vec<T>,
}

// ─── Tests ───────────────────────────────────────────────────────────────────
