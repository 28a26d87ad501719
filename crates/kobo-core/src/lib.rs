//! Core types for exchanging KoboToolbox submissions.
//!
//! This crate is deliberately free of HTTP dependencies. It holds the typed
//! record tree, the form schema model, the question index built from it, and
//! the metadata/answer split. The transcoder lives in `kobo-codec`; network
//! access lives in `kobo-client`.

pub mod error;
pub mod form;
pub mod index;
pub mod metadata;
pub mod value;

pub use error::{Error, Result};
pub use form::{Form, FormVersion, Question, QuestionType};
pub use index::{NameCollision, QuestionDefinition, QuestionIndex};
pub use metadata::SubmissionEnvelope;
pub use value::{Node, RawRecord, Record, Value};
