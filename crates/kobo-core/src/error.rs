//! Error types for `kobo-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A raw value that is neither a scalar, an object, nor an array of
  /// objects (e.g. `[1, 2]`). Such values cannot be an answer.
  #[error("unsupported value shape at key {key:?}")]
  UnsupportedShape { key: String },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
