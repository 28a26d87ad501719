//! Submission endpoints: paginated reads, new submissions, deletes and the
//! queued writes.

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use kobo_codec::{CoercionMode, Output, WireOptions, to_answer_tree, to_wire_record};
use kobo_core::{RawRecord, Record, SubmissionEnvelope, Value, form::Paginated};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
  Error, KoboClient, Result, forms,
  queue::{JobReport, Worker},
  retry::with_backoff,
  transport::{Method, RequestOptions, Transport},
  update::{BulkUpdateResponse, Payload, UpdateJob},
};

// ─── Filter ──────────────────────────────────────────────────────────────────

/// Bounds on `_submission_time`, both inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmissionFilter {
  pub submitted_after:  Option<DateTime<Utc>>,
  pub submitted_before: Option<DateTime<Utc>>,
}

impl SubmissionFilter {
  /// The platform's Mongo-style `query` parameter, if any bound is set.
  pub fn query(&self) -> Option<serde_json::Value> {
    let bound = |op: &str, at: &DateTime<Utc>| {
      let mut comparison = serde_json::Map::new();
      comparison.insert(
        op.to_string(),
        at.to_rfc3339_opts(SecondsFormat::Millis, true).into(),
      );
      json!({ "_submission_time": comparison })
    };
    let start = self.submitted_after.as_ref().map(|at| bound("$gte", at));
    let end = self.submitted_before.as_ref().map(|at| bound("$lte", at));
    match (start, end) {
      (Some(start), Some(end)) => Some(json!({ "$and": [start, end] })),
      (start, end) => start.or(end),
    }
  }
}

// ─── Validation ──────────────────────────────────────────────────────────────

/// A submission's review status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
  #[serde(rename = "validation_status_approved")]
  Approved,
  #[serde(rename = "validation_status_not_approved")]
  NotApproved,
  #[serde(rename = "validation_status_on_hold")]
  OnHold,
  #[serde(rename = "no_status")]
  NoStatus,
}

impl ValidationStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Approved => "validation_status_approved",
      Self::NotApproved => "validation_status_not_approved",
      Self::OnHold => "validation_status_on_hold",
      Self::NoStatus => "no_status",
    }
  }
}

impl fmt::Display for ValidationStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Accepts the platform uid or its short form (`approved`, `on_hold`, ...).
impl FromStr for ValidationStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let short = s.strip_prefix("validation_status_").unwrap_or(s);
    match short {
      "approved" => Ok(Self::Approved),
      "not_approved" => Ok(Self::NotApproved),
      "on_hold" => Ok(Self::OnHold),
      "no_status" => Ok(Self::NoStatus),
      _ => Err(format!("unknown validation status {s:?}")),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationJob {
  pub form_id:        String,
  pub submission_ids: Vec<String>,
  pub status:         ValidationStatus,
}

#[derive(Serialize)]
struct ValidationPatch<'a> {
  submission_ids: &'a [String],
  #[serde(rename = "validation_status.uid")]
  status:         ValidationStatus,
}

/// Sends validation-status changes chunk by chunk.
pub struct ValidationWorker<T> {
  pub(crate) transport: Arc<T>,
}

impl<T: Transport> Worker for ValidationWorker<T> {
  type Job = ValidationJob;
  type Item = String;
  type Context = ();
  type Error = Error;

  fn items(&self, job: &ValidationJob) -> Vec<String> { job.submission_ids.clone() }

  fn reconcile(&self, chunk: Vec<String>, job: &ValidationJob) -> ValidationJob {
    ValidationJob {
      submission_ids: chunk,
      ..job.clone()
    }
  }

  async fn prepare(&self, _form_id: &str) -> Result<()> { Ok(()) }

  async fn run(&self, _: Arc<()>, job: ValidationJob) -> Result<()> {
    let body = Payload {
      payload: ValidationPatch {
        submission_ids: &job.submission_ids,
        status:         job.status,
      },
    };
    let path = format!("/v2/assets/{}/data/validation_statuses/", job.form_id);
    let options = RequestOptions::new().json(&body)?;
    self.transport.send(Method::PATCH, &path, options).await?;
    tracing::info!(
      form_id = %job.form_id,
      count = job.submission_ids.len(),
      status = %job.status,
      "validation status updated"
    );
    Ok(())
  }
}

// ─── New submissions ─────────────────────────────────────────────────────────

/// A form as listed by the v1 API, which knows its formhub uuid.
#[derive(Debug, Clone, Deserialize)]
struct V1Form {
  uuid:      String,
  id_string: String,
}

/// The platform's answer to `POST /v1/submissions.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SubmitResponse {
  pub message:                 Option<String>,
  #[serde(rename = "formid")]
  pub form_id:                 Option<serde_json::Value>,
  pub encrypted:               Option<bool>,
  #[serde(rename = "instanceID")]
  pub instance_id:             Option<String>,
  pub submission_date:         Option<String>,
  pub marked_as_complete_date: Option<String>,
  /// Set instead of `message` when the platform refused the submission,
  /// e.g. `Duplicate submission`.
  pub error:                   Option<String>,
}

#[derive(Debug, Deserialize)]
struct EditLink {
  url:    Option<String>,
  detail: Option<String>,
}

// ─── Submissions ─────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct DeletePayload<'a> {
  submission_ids: &'a [String],
}

/// Submission endpoints of a [`KoboClient`].
pub struct Submissions<'a, T: Transport> {
  pub(crate) client: &'a KoboClient<T>,
}

impl<T: Transport> Submissions<'_, T> {
  /// Every submission matching `filter`, page by page.
  ///
  /// Results are sorted by `_submission_time` and `_id` is always a string.
  pub async fn fetch(
    &self,
    form_id: &str,
    filter: &SubmissionFilter,
  ) -> Result<Paginated<RawRecord>> {
    let path = format!("/v2/assets/{form_id}/data/");
    let query = filter.query().map(|q| q.to_string());
    let page_size = self.client.config.page_size.max(1);

    let mut results: Vec<RawRecord> = Vec::new();
    let count = loop {
      let mut options = RequestOptions::new()
        .query("limit", page_size)
        .query("start", results.len());
      if let Some(query) = &query {
        options = options.query("query", query);
      }
      let json = self.client.transport.send(Method::GET, &path, options).await?;
      let page: Paginated<RawRecord> = serde_json::from_value(json)?;
      let received = page.results.len();
      results.extend(page.results);
      tracing::debug!(form_id, received, total = page.count, "page fetched");

      if results.len() >= page.count || received == 0 {
        break page.count;
      }
    };

    for record in &mut results {
      stringify_id(record);
    }
    results.sort_by_cached_key(submission_time);
    Ok(Paginated { count, results })
  }

  /// [`Submissions::fetch`], with each submission split into metadata and a
  /// typed answer tree keyed by leaf name.
  pub async fn answers(
    &self,
    form_id: &str,
    filter: &SubmissionFilter,
  ) -> Result<Vec<SubmissionEnvelope>> {
    let index = self.client.forms().question_index(form_id).await?;
    let page = self.fetch(form_id, filter).await?;
    page
      .results
      .into_iter()
      .map(|raw| {
        to_answer_tree(raw, &index, CoercionMode::Lenient).map_err(Error::from)
      })
      .collect()
  }

  /// Create a submission from an answer tree keyed by leaf name.
  ///
  /// Answers are nested into the form's groups and, when `tag` is set,
  /// marked with `tag: "true"`. The request is retried with backoff.
  pub async fn submit(
    &self,
    form_id: &str,
    answers: &Record,
    tag: Option<&str>,
  ) -> Result<SubmitResponse> {
    let config = &self.client.config;
    let transport = &*self.client.transport;

    let index = forms::fetch(transport, form_id, false).await?.question_index();
    let options = WireOptions {
      tag: tag.map(str::to_string),
      ..config.wire_options()
    };
    let data = to_wire_record(answers, &index, Output::Insert, &options)?;

    let json = transport.send(Method::GET, "/v1/forms", RequestOptions::new()).await?;
    let v1_forms: Vec<V1Form> = serde_json::from_value(json)?;
    let Some(formhub) = v1_forms.into_iter().find(|f| f.id_string == form_id) else {
      return Err(Error::FormNotFound(form_id.to_string()));
    };

    let mut submission = serde_json::Map::new();
    submission.insert("formhub".into(), json!({ "uuid": formhub.uuid }));
    submission.insert(
      "meta/instanceID".into(),
      format!("uuid:{}", uuid::Uuid::new_v4()).into(),
    );
    submission.extend(data.to_raw()?);
    let body = json!({ "id": form_id, "submission": submission });

    let response = with_backoff(
      "submit",
      config.submit_retries,
      Duration::from_millis(config.retry_delay_ms),
      move || {
        let body = body.clone();
        async move {
          let options = RequestOptions { body: Some(body), ..RequestOptions::new() };
          transport.send(Method::POST, "/v1/submissions.json", options).await
        }
      },
    )
    .await?;

    let response: SubmitResponse = serde_json::from_value(response)?;
    tracing::info!(
      form_id,
      instance_id = response.instance_id.as_deref().unwrap_or(""),
      "submission created"
    );
    Ok(response)
  }

  /// A URL where the submission can be edited in the browser.
  pub async fn edit_link(&self, form_id: &str, submission_id: &str) -> Result<String> {
    let path = format!("/v2/assets/{form_id}/data/{submission_id}/enketo/edit/");
    let options = RequestOptions::new().query("return_url", "false");
    let json = self.client.transport.send(Method::GET, &path, options).await?;
    let link: EditLink = serde_json::from_value(json)?;
    link.url.ok_or_else(|| Error::NoEditLink {
      submission_id: submission_id.to_string(),
      detail:        link.detail.unwrap_or_default(),
    })
  }

  /// The raw bytes of one attachment of a submission.
  pub async fn attachment(
    &self,
    form_id: &str,
    submission_id: &str,
    attachment_id: &str,
  ) -> Result<Vec<u8>> {
    let path =
      format!("/v2/assets/{form_id}/data/{submission_id}/attachments/{attachment_id}/");
    self.client.transport.download(&path).await
  }

  /// `DELETE /v2/assets/{uid}/data/bulk/`. Returns the platform's message.
  pub async fn delete(&self, form_id: &str, ids: &[String]) -> Result<String> {
    let path = format!("/v2/assets/{form_id}/data/bulk/");
    let body = Payload {
      payload: DeletePayload { submission_ids: ids },
    };
    let options = RequestOptions::new().json(&body)?;
    let json = self.client.transport.send(Method::DELETE, &path, options).await?;
    let detail = json
      .get("detail")
      .and_then(serde_json::Value::as_str)
      .unwrap_or_default()
      .to_string();
    tracing::info!(form_id, count = ids.len(), %detail, "submissions deleted");
    Ok(detail)
  }

  /// Set the validation status of `ids`, queued behind earlier validation
  /// changes for the same form.
  pub async fn update_validation(
    &self,
    form_id: &str,
    ids: Vec<String>,
    status: ValidationStatus,
  ) -> Result<JobReport<Error>> {
    let job = ValidationJob {
      form_id: form_id.to_string(),
      submission_ids: ids,
      status,
    };
    Ok(self.client.validation.enqueue(form_id, job).await?)
  }

  /// Set one question to `value` on every submission in `ids`.
  ///
  /// The question is looked up by name, `$autoname` included.
  pub async fn update_by_question_name(
    &self,
    form_id: &str,
    ids: &[String],
    question: &str,
    value: impl Into<Value>,
  ) -> Result<BulkUpdateResponse> {
    let form = self.client.forms().get(form_id, true).await?;
    let Some(xpath) = form.question(question).map(|q| q.xpath.clone()) else {
      return Err(Error::QuestionNotFound {
        question: question.to_string(),
        form_id:  form_id.to_string(),
      });
    };

    let mut data = serde_json::Map::new();
    data.insert(xpath, serde_json::to_value(value.into())?);
    let body = json!({ "payload": { "submission_ids": ids, "data": data } });

    let path = format!("/v2/assets/{form_id}/data/bulk/");
    let options = RequestOptions::new().json(&body)?;
    let json = self.client.transport.send(Method::PATCH, &path, options).await?;
    Ok(BulkUpdateResponse::decode(form_id, json))
  }

  /// Apply `job` through the per-form bulk-update queue.
  pub async fn update(&self, job: UpdateJob) -> Result<JobReport<Error>> {
    self.client.updater.update(job).await
  }
}

fn stringify_id(record: &mut RawRecord) {
  if let Some(serde_json::Value::Number(n)) = record.get("_id") {
    let id = n.to_string();
    record.insert("_id".to_string(), id.into());
  }
}

fn submission_time(record: &RawRecord) -> Option<NaiveDateTime> {
  let s = record.get("_submission_time")?.as_str()?;
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.naive_utc())
    .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
    .ok()
}
