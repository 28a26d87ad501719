//! Normalising answer values by declared question type.
//!
//! Rules, in order:
//!   null or `""`                      → null
//!   integer / decimal                 → number
//!   date / datetime / start / end     → calendar date (`YYYY-MM-DD`)
//!   anything else                     → trimmed string
//!
//! Coercion is pure and idempotent: coercing an already-coerced value yields
//! it unchanged.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use kobo_core::{Node, QuestionIndex, QuestionType, Record, Value};

use crate::error::CoercionError;

/// How unparseable values are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CoercionMode {
  /// Non-numeric input for a numeric question becomes `NaN`; an unparseable
  /// date becomes null. Matches what the platform's web client produces.
  #[default]
  Lenient,
  /// Either case raises a [`CoercionError`].
  Strict,
}

/// Coerce `value` for a question of type `kind`, never failing.
pub fn coerce(kind: QuestionType, value: &Value) -> Value {
  match try_coerce(kind, value) {
    Some(v) => v,
    None if kind.is_numeric() => Value::Number(f64::NAN),
    None => Value::Null,
  }
}

/// Coerce `value`, raising an error that names `key` when it does not fit.
pub fn coerce_strict(
  key: &str,
  kind: QuestionType,
  value: &Value,
) -> Result<Value, CoercionError> {
  try_coerce(kind, value).ok_or_else(|| CoercionError {
    key:      key.to_string(),
    value:    value.clone(),
    expected: kind,
  })
}

/// Coerce with the given mode.
pub fn coerce_with(
  mode: CoercionMode,
  key: &str,
  kind: QuestionType,
  value: &Value,
) -> Result<Value, CoercionError> {
  match mode {
    CoercionMode::Lenient => Ok(coerce(kind, value)),
    CoercionMode::Strict => coerce_strict(key, kind, value),
  }
}

/// Coerce every leaf of `record` whose key is indexed, recursing into groups
/// and repeat occurrences. Leaves with unknown keys are left untouched.
pub fn coerce_record(
  record: Record,
  index: &QuestionIndex,
  mode: CoercionMode,
) -> Result<Record, CoercionError> {
  record
    .into_iter()
    .map(|(key, node)| {
      let node = match node {
        Node::Leaf(value) => match index.kind(&key) {
          Some(kind) => Node::Leaf(coerce_with(mode, &key, kind, &value)?),
          None => Node::Leaf(value),
        },
        Node::Group(group) => Node::Group(coerce_record(group, index, mode)?),
        Node::Repeat(items) => Node::Repeat(
          items
            .into_iter()
            .map(|item| coerce_record(item, index, mode))
            .collect::<Result<_, _>>()?,
        ),
      };
      Ok((key, node))
    })
    .collect()
}

/// `None` when the value does not fit the type.
fn try_coerce(kind: QuestionType, value: &Value) -> Option<Value> {
  match value {
    Value::Null => return Some(Value::Null),
    Value::String(s) if s.is_empty() => return Some(Value::Null),
    _ => {}
  }

  if kind.is_numeric() {
    to_number(value)
  } else if kind.is_date() {
    to_date(value).map(Value::Date)
  } else {
    Some(Value::String(value.to_string().trim().to_string()))
  }
}

fn to_number(value: &Value) -> Option<Value> {
  match value {
    Value::Number(n) if n.is_finite() => Some(Value::Number(*n)),
    Value::String(s) => {
      let s = s.trim();
      if s.is_empty() {
        return Some(Value::Null);
      }
      s.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .map(Value::Number)
    }
    _ => None,
  }
}

fn to_date(value: &Value) -> Option<NaiveDate> {
  match value {
    Value::Date(d) => Some(*d),
    // Epoch milliseconds.
    Value::Number(ms) if ms.is_finite() => {
      DateTime::from_timestamp_millis(*ms as i64).map(|dt| dt.date_naive())
    }
    Value::String(s) => parse_date(s.trim()),
    _ => None,
  }
}

/// Parse the date and datetime forms the platform emits.
///
/// Offset-carrying datetimes are converted to UTC before the date is taken;
/// naive datetimes keep their own date.
fn parse_date(s: &str) -> Option<NaiveDate> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc).date_naive());
  }
  if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
    return Some(d);
  }
  ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    .map(|dt| dt.date())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
