//! Error types for the kobo-codec transcoder.

use kobo_core::{QuestionType, Value};
use thiserror::Error;

/// A value that cannot be coerced to its question's declared type.
///
/// Only raised in [`CoercionMode::Strict`](crate::CoercionMode::Strict);
/// lenient coercion maps such values to `NaN` or null instead.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot coerce {value:?} at {key:?} to {expected}")]
pub struct CoercionError {
  pub key:      String,
  pub value:    Value,
  pub expected: QuestionType,
}

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Core(#[from] kobo_core::Error),

  #[error(transparent)]
  Coercion(#[from] CoercionError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
