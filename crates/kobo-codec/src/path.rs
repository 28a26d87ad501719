//! Group-path operations on records.
//!
//! The platform keys every answer by its full path (`family/location/number`)
//! and re-prefixes the keys inside each repeat occurrence with the full path
//! of the repeat. These functions move between that shape, the leaf-keyed
//! answer tree, and the nested shape used for inserts. All of them recurse
//! into repeat occurrences and preserve their order.

use kobo_core::{Node, QuestionIndex, Record, metadata::is_metadata_key};

/// The last `/`-separated segment of `key`.
pub fn leaf_name(key: &str) -> &str {
  key.rsplit_once('/').map_or(key, |(_, leaf)| leaf)
}

/// Reduce every key to its leaf name.
///
/// Metadata keys are kept as they are. Group nodes are dissolved: their
/// children are spliced into the parent, so a nested record reduces to the
/// same leaf-keyed tree as its flat equivalent.
pub fn strip_group_prefix(record: Record) -> Record {
  let mut out = Record::new();
  strip_into(&mut out, record);
  out
}

fn strip_into(out: &mut Record, record: Record) {
  for (key, node) in record {
    if is_metadata_key(&key) {
      out.insert(key, node);
      continue;
    }
    match node {
      Node::Group(group) => strip_into(out, group),
      Node::Repeat(items) => {
        let items = items.into_iter().map(strip_group_prefix).collect::<Vec<_>>();
        out.insert(leaf_name(&key), items);
      }
      leaf => {
        out.insert(leaf_name(&key), leaf);
      }
    }
  }
}

/// Drop the enclosing repeat's path from the front of each key.
///
/// `parent` is the key of the repeat that holds `record`, or `None` at the
/// top level. Occurrences of nested repeats are collapsed against the nested
/// repeat's original (uncollapsed) key.
pub fn collapse_redundant_prefix(record: Record, parent: Option<&str>) -> Record {
  record
    .into_iter()
    .map(|(key, node)| {
      let local = parent
        .and_then(|p| key.strip_prefix(p))
        .and_then(|rest| rest.strip_prefix('/'))
        .map(str::to_owned);
      let node = match node {
        Node::Repeat(items) => Node::Repeat(
          items
            .into_iter()
            .map(|item| collapse_redundant_prefix(item, Some(&key)))
            .collect(),
        ),
        other => other,
      };
      (local.unwrap_or(key), node)
    })
    .collect()
}

/// Rewrite each key to its question's full path.
///
/// Keys missing from `index` are kept unchanged; they are assumed to already
/// be full paths or metadata. Group nodes are left as they are.
pub fn restore_full_path(record: Record, index: &QuestionIndex) -> Record {
  record
    .into_iter()
    .map(|(key, node)| {
      let node = match node {
        Node::Repeat(items) => Node::Repeat(
          items
            .into_iter()
            .map(|item| restore_full_path(item, index))
            .collect(),
        ),
        other => other,
      };
      match index.full_path(&key) {
        Some(path) => (path.to_owned(), node),
        None => {
          tracing::trace!(key = %key, "key not in question index; kept as is");
          (key, node)
        }
      }
    })
    .collect()
}

/// Turn a full-path-keyed record into nested groups.
///
/// `{"family/family_name": "V"}` becomes `{"family": {"family_name": "V"}}`.
/// Paths sharing a prefix share the intermediate group. Repeat occurrences
/// are collapsed against their repeat's key and nested the same way. When a
/// path needs a group where a leaf already sits, the group replaces it.
pub fn nest_by_path(record: Record) -> Record {
  let mut out = Record::new();
  for (path, node) in collapse_redundant_prefix(record, None) {
    let node = match node {
      Node::Repeat(items) => {
        Node::Repeat(items.into_iter().map(nest_by_path).collect())
      }
      other => other,
    };
    let segments: Vec<&str> = path.split('/').collect();
    insert_at(&mut out, &segments, node);
  }
  out
}

fn insert_at(record: &mut Record, segments: &[&str], node: Node) {
  match segments {
    [] => {}
    [last] => {
      record.insert(*last, node);
    }
    [head, rest @ ..] => {
      if !matches!(record.get(head), Some(Node::Group(_))) {
        record.insert(*head, Record::new());
      }
      if let Some(Node::Group(group)) = record.get_mut(head) {
        insert_at(group, rest, node);
      }
    }
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
