//! Schema-aware bulk updates, serialized per form.
//!
//! Answers are given by leaf question name. The form is fetched once per
//! drain cycle, each job is transcoded once to full-path keys against it, and
//! the result is sent chunk by chunk to `PATCH /v2/assets/{uid}/data/bulk/`.

use std::sync::Arc;

use kobo_codec::{Output, WireOptions, to_wire_record};
use kobo_core::{QuestionIndex, Record};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result, forms,
  queue::{JobReport, KeyedQueue, QueueConfig, Worker},
  transport::{Method, RequestOptions, Transport},
};

/// New answers for a set of submissions of one form.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateJob {
  pub form_id:        String,
  pub submission_ids: Vec<String>,
  /// Keyed by leaf question name; full paths are accepted too.
  pub data:           Record,
}

/// Request body shared by the bulk endpoints.
#[derive(Serialize)]
pub(crate) struct Payload<T> {
  pub payload: T,
}

#[derive(Serialize)]
struct BulkPatch<'a> {
  submission_ids: &'a [String],
  data:           &'a Record,
}

/// What the platform answers to a bulk update. Missing fields read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BulkUpdateResponse {
  pub count:     usize,
  pub successes: usize,
  pub failures:  usize,
}

impl BulkUpdateResponse {
  /// Read the platform's counts. An unreadable body is logged and read as
  /// zero counts; the request itself succeeded.
  pub(crate) fn decode(form_id: &str, json: serde_json::Value) -> Self {
    serde_json::from_value(json).unwrap_or_else(|error| {
      tracing::warn!(form_id, %error, "unreadable bulk update response");
      Self::default()
    })
  }
}

/// The [`Worker`] behind [`BulkUpdater`].
pub struct BulkUpdateWorker<T> {
  transport: Arc<T>,
  options:   WireOptions,
}

impl<T: Transport> Worker for BulkUpdateWorker<T> {
  type Job = UpdateJob;
  type Item = String;
  type Context = QuestionIndex;
  type Error = Error;

  fn items(&self, job: &UpdateJob) -> Vec<String> { job.submission_ids.clone() }

  fn reconcile(&self, chunk: Vec<String>, job: &UpdateJob) -> UpdateJob {
    UpdateJob {
      form_id:        job.form_id.clone(),
      submission_ids: chunk,
      data:           job.data.clone(),
    }
  }

  async fn prepare(&self, form_id: &str) -> Result<QuestionIndex> {
    let form = forms::fetch(&*self.transport, form_id, false).await?;
    Ok(form.question_index())
  }

  fn prepare_job(&self, index: &QuestionIndex, job: UpdateJob) -> Result<UpdateJob> {
    match to_wire_record(&job.data, index, Output::Update, &self.options) {
      Ok(data) => Ok(UpdateJob { data, ..job }),
      Err(error) => {
        tracing::error!(
          form_id = %job.form_id,
          count = job.submission_ids.len(),
          %error,
          "update could not be transcoded"
        );
        Err(error.into())
      }
    }
  }

  /// `job.data` is already in wire form here.
  async fn run(&self, _index: Arc<QuestionIndex>, job: UpdateJob) -> Result<()> {
    let body = Payload {
      payload: BulkPatch {
        submission_ids: &job.submission_ids,
        data:           &job.data,
      },
    };
    let path = format!("/v2/assets/{}/data/bulk/", job.form_id);
    let options = RequestOptions::new().json(&body)?;

    let first = job.submission_ids.first().map_or("", String::as_str);
    let count = job.submission_ids.len();
    match self.transport.send(Method::PATCH, &path, options).await {
      Ok(response) => {
        let response = BulkUpdateResponse::decode(&job.form_id, response);
        tracing::info!(
          form_id = %job.form_id,
          first,
          count,
          successes = response.successes,
          failures = response.failures,
          "update applied"
        );
        if response.failures > 0 {
          tracing::warn!(
            form_id = %job.form_id,
            failures = response.failures,
            of = response.count,
            "platform rejected part of the update"
          );
        }
        Ok(())
      }
      Err(error) => {
        tracing::error!(form_id = %job.form_id, first, count, %error, "update failed");
        Err(error)
      }
    }
  }
}

/// Queues bulk updates so that each form receives them one job at a time,
/// in chunks of bounded concurrency.
pub struct BulkUpdater<T: Transport> {
  pub(crate) queue: KeyedQueue<BulkUpdateWorker<T>>,
}

impl<T: Transport> BulkUpdater<T> {
  pub fn new(transport: Arc<T>, config: QueueConfig, options: WireOptions) -> Self {
    Self {
      queue: KeyedQueue::new(BulkUpdateWorker { transport, options }, config),
    }
  }

  /// Queue `job` behind earlier jobs for the same form and wait for it.
  pub async fn update(&self, job: UpdateJob) -> Result<JobReport<Error>> {
    let key = job.form_id.clone();
    Ok(self.queue.enqueue(key, job).await?)
  }
}

impl JobReport<Error> {
  /// Turn a report with failed or skipped chunks into
  /// [`Error::ChunkFailed`].
  pub fn into_result(self) -> Result<Self> {
    if self.is_complete() {
      Ok(self)
    } else {
      Err(Error::ChunkFailed {
        failed: self.incomplete(),
        total:  self.chunks,
        key:    self.key,
      })
    }
  }
}
