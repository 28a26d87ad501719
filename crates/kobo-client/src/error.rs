//! Error type for `kobo-client`.

use thiserror::Error;

use crate::queue::QueueError;

#[derive(Debug, Error)]
pub enum Error {
  /// The platform answered with a non-success status.
  #[error("{method} {path} → {status}: {message}")]
  Api {
    status:  u16,
    method:  String,
    path:    String,
    message: String,
  },

  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("codec error: {0}")]
  Codec(#[from] kobo_codec::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("Form {0} not found")]
  FormNotFound(String),

  /// The platform returned no edit link, usually with a reason.
  #[error("no edit link for submission {submission_id}: {detail}")]
  NoEditLink {
    submission_id: String,
    detail:        String,
  },

  #[error("Question {question} not found in form {form_id}")]
  QuestionNotFound { question: String, form_id: String },

  /// The drain task for `key` stopped before reporting on the job.
  #[error("queue for {0:?} closed before the job completed")]
  QueueClosed(String),

  /// Some chunks of a queued job failed or were skipped.
  #[error("{failed} of {total} chunks for {key:?} did not complete")]
  ChunkFailed {
    key:    String,
    failed: usize,
    total:  usize,
  },
}

impl From<kobo_core::Error> for Error {
  fn from(e: kobo_core::Error) -> Self { Self::Codec(e.into()) }
}

impl From<QueueError<Error>> for Error {
  fn from(e: QueueError<Error>) -> Self {
    match e {
      QueueError::Prepare(inner) => inner,
      QueueError::Closed(key) => Self::QueueClosed(key),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
