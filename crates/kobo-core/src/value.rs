//! The typed record tree.
//!
//! A single [`Record`] type carries every shape a submission passes through:
//! the flat path-keyed wire shape (`"family/location/number"`), the nested
//! insert shape (`{"family": {"location": [..]}}`), and the leaf-keyed answer
//! tree consumers read and write. Repeat groups are arrays of records and keep
//! their submission order through every transform.

use std::fmt;

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

/// A submission exactly as the platform serves it, key order preserved.
pub type RawRecord = IndexMap<String, serde_json::Value>;

/// Largest integer an `f64` holds exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

// ─── Value ───────────────────────────────────────────────────────────────────

/// A scalar answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  String(String),
  Number(f64),
  /// A calendar date; serialized as `YYYY-MM-DD`.
  Date(NaiveDate),
  Null,
}

impl Value {
  pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Self::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_f64(&self) -> Option<f64> {
    match self {
      Self::Number(n) => Some(*n),
      _ => None,
    }
  }
}

/// `true` when `n` renders as an integer (no fractional part, exactly
/// representable).
pub(crate) fn is_integral(n: f64) -> bool {
  n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER
}

/// Text rendering used when a value is coerced to a string question:
/// integral numbers drop the trailing `.0`, dates use ISO form and null is
/// empty.
impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::String(s) => f.write_str(s),
      Self::Number(n) if is_integral(*n) => write!(f, "{}", *n as i64),
      Self::Number(n) => write!(f, "{n}"),
      Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
      Self::Null => Ok(()),
    }
  }
}

impl Serialize for Value {
  fn serialize<S: Serializer>(
    &self,
    serializer: S,
  ) -> std::result::Result<S::Ok, S::Error> {
    match self {
      Self::String(s) => serializer.serialize_str(s),
      Self::Number(n) if is_integral(*n) => serializer.serialize_i64(*n as i64),
      Self::Number(n) => serializer.serialize_f64(*n),
      Self::Date(d) => serializer.collect_str(&d.format("%Y-%m-%d")),
      Self::Null => serializer.serialize_unit(),
    }
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self { Self::String(s.to_string()) }
}

impl From<String> for Value {
  fn from(s: String) -> Self { Self::String(s) }
}

impl From<f64> for Value {
  fn from(n: f64) -> Self { Self::Number(n) }
}

impl From<i64> for Value {
  fn from(n: i64) -> Self { Self::Number(n as f64) }
}

impl From<NaiveDate> for Value {
  fn from(d: NaiveDate) -> Self { Self::Date(d) }
}

// ─── Node ────────────────────────────────────────────────────────────────────

/// One entry of a [`Record`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Node {
  Leaf(Value),
  /// A non-repeating group, only present in nested (insert-shaped) records.
  Group(Record),
  /// A repeat group; one record per occurrence, in submission order.
  Repeat(Vec<Record>),
}

impl Node {
  /// Convert a raw JSON value found under `key`.
  ///
  /// Booleans become the strings `"true"` / `"false"`, the way the platform
  /// stores them in answers.
  pub fn from_json(key: &str, value: serde_json::Value) -> Result<Self> {
    use serde_json::Value as Json;

    match value {
      Json::Null => Ok(Self::Leaf(Value::Null)),
      Json::Bool(b) => Ok(Self::Leaf(Value::String(b.to_string()))),
      Json::Number(n) => {
        Ok(Self::Leaf(n.as_f64().map_or(Value::Null, Value::Number)))
      }
      Json::String(s) => Ok(Self::Leaf(Value::String(s))),
      Json::Object(map) => Record::from_json_map(map).map(Self::Group),
      Json::Array(items) => items
        .into_iter()
        .map(|item| match item {
          Json::Object(map) => Record::from_json_map(map),
          _ => Err(Error::UnsupportedShape {
            key: key.to_string(),
          }),
        })
        .collect::<Result<Vec<_>>>()
        .map(Self::Repeat),
    }
  }

  pub fn as_leaf(&self) -> Option<&Value> {
    match self {
      Self::Leaf(v) => Some(v),
      _ => None,
    }
  }

  pub fn as_group(&self) -> Option<&Record> {
    match self {
      Self::Group(r) => Some(r),
      _ => None,
    }
  }

  pub fn as_repeat(&self) -> Option<&[Record]> {
    match self {
      Self::Repeat(items) => Some(items),
      _ => None,
    }
  }
}

impl From<Value> for Node {
  fn from(v: Value) -> Self { Self::Leaf(v) }
}

impl From<&str> for Node {
  fn from(s: &str) -> Self { Self::Leaf(s.into()) }
}

impl From<String> for Node {
  fn from(s: String) -> Self { Self::Leaf(s.into()) }
}

impl From<f64> for Node {
  fn from(n: f64) -> Self { Self::Leaf(n.into()) }
}

impl From<NaiveDate> for Node {
  fn from(d: NaiveDate) -> Self { Self::Leaf(d.into()) }
}

impl From<Record> for Node {
  fn from(r: Record) -> Self { Self::Group(r) }
}

impl From<Vec<Record>> for Node {
  fn from(items: Vec<Record>) -> Self { Self::Repeat(items) }
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// An ordered string-keyed map of [`Node`]s.
///
/// Equality ignores key order; serialization preserves it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record(IndexMap<String, Node>);

impl Record {
  pub fn new() -> Self { Self::default() }

  /// Builder-style insert.
  pub fn with(mut self, key: impl Into<String>, node: impl Into<Node>) -> Self {
    self.insert(key, node);
    self
  }

  /// Insert `node` under `key`. An existing key keeps its position and has
  /// its node replaced.
  pub fn insert(
    &mut self,
    key: impl Into<String>,
    node: impl Into<Node>,
  ) -> Option<Node> {
    self.0.insert(key.into(), node.into())
  }

  pub fn get(&self, key: &str) -> Option<&Node> { self.0.get(key) }

  pub fn get_mut(&mut self, key: &str) -> Option<&mut Node> {
    self.0.get_mut(key)
  }

  /// Remove `key`, keeping the order of the remaining entries.
  pub fn remove(&mut self, key: &str) -> Option<Node> {
    self.0.shift_remove(key)
  }

  pub fn contains_key(&self, key: &str) -> bool { self.0.contains_key(key) }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.0.keys().map(String::as_str)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v))
  }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  pub fn as_map(&self) -> &IndexMap<String, Node> { &self.0 }

  pub fn into_map(self) -> IndexMap<String, Node> { self.0 }

  /// Convert a raw platform record into a typed record.
  pub fn from_raw(raw: RawRecord) -> Result<Self> {
    raw
      .into_iter()
      .map(|(key, value)| {
        let node = Node::from_json(&key, value)?;
        Ok((key, node))
      })
      .collect()
  }

  fn from_json_map(map: serde_json::Map<String, serde_json::Value>) -> Result<Self> {
    map
      .into_iter()
      .map(|(key, value)| {
        let node = Node::from_json(&key, value)?;
        Ok((key, node))
      })
      .collect()
  }

  /// Serialize into the JSON object sent over the wire.
  pub fn to_json(&self) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(self)?)
  }

  /// Serialize back into a [`RawRecord`].
  pub fn to_raw(&self) -> Result<RawRecord> {
    match self.to_json()? {
      serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
      // A record always serializes as an object.
      _ => Ok(RawRecord::new()),
    }
  }
}

impl From<IndexMap<String, Node>> for Record {
  fn from(map: IndexMap<String, Node>) -> Self { Self(map) }
}

impl FromIterator<(String, Node)> for Record {
  fn from_iter<I: IntoIterator<Item = (String, Node)>>(iter: I) -> Self {
    Self(iter.into_iter().collect())
  }
}

impl IntoIterator for Record {
  type Item = (String, Node);
  type IntoIter = indexmap::map::IntoIter<String, Node>;

  fn into_iter(self) -> Self::IntoIter { self.0.into_iter() }
}

impl<'a> IntoIterator for &'a Record {
  type Item = (&'a String, &'a Node);
  type IntoIter = indexmap::map::Iter<'a, String, Node>;

  fn into_iter(self) -> Self::IntoIter { self.0.iter() }
}

impl TryFrom<serde_json::Value> for Record {
  type Error = Error;

  fn try_from(value: serde_json::Value) -> Result<Self> {
    match value {
      serde_json::Value::Object(map) => Self::from_json_map(map),
      _ => Err(Error::UnsupportedShape { key: "$".to_string() }),
    }
  }
}

impl<'de> Deserialize<'de> for Record {
  fn deserialize<D: Deserializer<'de>>(
    deserializer: D,
  ) -> std::result::Result<Self, D::Error> {
    let json = serde_json::Value::deserialize(deserializer)?;
    Self::try_from(json).map_err(serde::de::Error::custom)
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
