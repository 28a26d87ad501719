//! Leaf-name → question lookup built from a form's survey.

use std::collections::HashMap;

use serde::Serialize;

use crate::form::{Question, QuestionType};

/// What the transcoder needs to know about a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionDefinition {
  pub name:      String,
  /// `/`-joined group path ending in `name`.
  pub full_path: String,
  pub kind:      QuestionType,
  pub label:     Option<String>,
}

impl From<&Question> for QuestionDefinition {
  fn from(q: &Question) -> Self {
    Self {
      name:      q.name.clone(),
      full_path: if q.xpath.is_empty() {
        q.name.clone()
      } else {
        q.xpath.clone()
      },
      kind:      q.kind,
      label:     q.default_label().map(str::to_owned),
    }
  }
}

/// Two survey rows sharing a leaf name. The later row wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameCollision {
  pub name:     String,
  /// Full path of the definition kept in the index.
  pub kept:     String,
  /// Full path of the definition it replaced.
  pub replaced: String,
}

/// Maps a question's leaf name to its definition.
///
/// Leaf names are only unique within their group. When two rows share a name
/// the last one in survey order wins; every such overwrite is recorded in
/// [`QuestionIndex::collisions`] and logged.
#[derive(Debug, Clone, Default)]
pub struct QuestionIndex {
  by_name:    HashMap<String, QuestionDefinition>,
  collisions: Vec<NameCollision>,
}

impl QuestionIndex {
  /// Build the index from survey rows. Unnamed rows (group and repeat
  /// closers) are skipped.
  pub fn build<'a>(survey: impl IntoIterator<Item = &'a Question>) -> Self {
    let mut index = Self::default();
    for question in survey {
      if question.name.is_empty() {
        continue;
      }
      index.register(QuestionDefinition::from(question));
    }
    index
  }

  fn register(&mut self, def: QuestionDefinition) {
    if let Some(previous) = self.by_name.get(&def.name)
      && previous.full_path != def.full_path
    {
      tracing::warn!(
        name = %def.name,
        kept = %def.full_path,
        replaced = %previous.full_path,
        "question name used in more than one group; last definition wins"
      );
      self.collisions.push(NameCollision {
        name:     def.name.clone(),
        kept:     def.full_path.clone(),
        replaced: previous.full_path.clone(),
      });
    }
    self.by_name.insert(def.name.clone(), def);
  }

  pub fn get(&self, name: &str) -> Option<&QuestionDefinition> {
    self.by_name.get(name)
  }

  /// The full path of `name`, if indexed.
  pub fn full_path(&self, name: &str) -> Option<&str> {
    self.get(name).map(|d| d.full_path.as_str())
  }

  /// The declared type of `name`, if indexed.
  pub fn kind(&self, name: &str) -> Option<QuestionType> {
    self.get(name).map(|d| d.kind)
  }

  pub fn collisions(&self) -> &[NameCollision] { &self.collisions }

  pub fn len(&self) -> usize { self.by_name.len() }

  pub fn is_empty(&self) -> bool { self.by_name.is_empty() }

  pub fn iter(&self) -> impl Iterator<Item = &QuestionDefinition> {
    self.by_name.values()
  }
}

impl FromIterator<QuestionDefinition> for QuestionIndex {
  fn from_iter<I: IntoIterator<Item = QuestionDefinition>>(iter: I) -> Self {
    let mut index = Self::default();
    for def in iter {
      index.register(def);
    }
    index
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
