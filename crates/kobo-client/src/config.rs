//! Client configuration, deserialised from a config file or the environment.

use kobo_codec::WireOptions;
use serde::Deserialize;

use crate::queue::{FailurePolicy, QueueConfig};

/// Connection and scheduling settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
  /// Server root, e.g. `https://kf.kobotoolbox.org`. `/api` is appended.
  pub url:            String,
  /// Root of the v1 (KoboCAT) API, e.g. `https://kc.kobotoolbox.org`, used
  /// for JSON submission. Defaults to `url`.
  #[serde(default)]
  pub v1_url:         Option<String>,
  pub token:          String,
  /// Submission ids per bulk request.
  #[serde(default = "default_chunk_size")]
  pub chunk_size:     usize,
  /// Bulk requests in flight at once, per form.
  #[serde(default = "default_concurrency")]
  pub concurrency:    usize,
  #[serde(default)]
  pub failure_policy: FailurePolicy,
  /// Submissions requested per page when reading.
  #[serde(default = "default_page_size")]
  pub page_size:      usize,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs:   u64,
  /// Reject updates whose values do not fit their question's type instead
  /// of sending `NaN` or null.
  #[serde(default)]
  pub strict:         bool,
  /// Attempts after the first when a submission is refused.
  #[serde(default = "default_submit_retries")]
  pub submit_retries: usize,
  /// Delay before the first retry; doubled on each further one.
  #[serde(default = "default_retry_delay_ms")]
  pub retry_delay_ms: u64,
}

fn default_chunk_size() -> usize { 20 }
fn default_concurrency() -> usize { 12 }
// The platform caps a page at 30 000.
fn default_page_size() -> usize { 20_000 }
fn default_timeout_secs() -> u64 { 60 }
fn default_submit_retries() -> usize { 5 }
fn default_retry_delay_ms() -> u64 { 1000 }

impl ClientConfig {
  pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
    Self {
      url:            url.into(),
      v1_url:         None,
      token:          token.into(),
      chunk_size:     default_chunk_size(),
      concurrency:    default_concurrency(),
      failure_policy: FailurePolicy::default(),
      page_size:      default_page_size(),
      timeout_secs:   default_timeout_secs(),
      strict:         false,
      submit_retries: default_submit_retries(),
      retry_delay_ms: default_retry_delay_ms(),
    }
  }

  /// The v1 API root, falling back to `url`.
  pub fn v1_url(&self) -> &str { self.v1_url.as_deref().unwrap_or(&self.url) }

  /// How answers are transcoded for writes.
  pub fn wire_options(&self) -> WireOptions {
    let options = WireOptions::default();
    if self.strict { options.strict() } else { options }
  }

  /// The scheduling part of the configuration.
  pub fn queue(&self) -> QueueConfig {
    QueueConfig {
      chunk_size:     self.chunk_size,
      concurrency:    self.concurrency,
      failure_policy: self.failure_policy,
    }
  }
}
