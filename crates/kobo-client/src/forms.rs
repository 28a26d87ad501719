//! Form (asset) endpoints.

use kobo_core::{
  Form, FormVersion, QuestionIndex,
  form::{FormSummary, Paginated},
};
use serde_json::json;

use crate::{
  Result,
  transport::{Method, RequestOptions, Transport},
};

/// `GET /v2/assets/{uid}/`, optionally renaming questions to their
/// `$autoname`.
pub(crate) async fn fetch<T: Transport>(
  transport: &T,
  form_id: &str,
  use_autoname: bool,
) -> Result<Form> {
  let path = format!("/v2/assets/{form_id}/");
  let json = transport.send(Method::GET, &path, RequestOptions::new()).await?;
  let form: Form = serde_json::from_value(json)?;
  tracing::debug!(form_id, questions = form.content.survey.len(), "form loaded");
  Ok(if use_autoname {
    form.use_autoname_as_name()
  } else {
    form
  })
}

/// The forms of the account.
pub struct Forms<'a, T> {
  pub(crate) transport: &'a T,
}

impl<T: Transport> Forms<'_, T> {
  /// `GET /v2/assets/?q=asset_type:survey&limit=<limit>`
  pub async fn list(&self, limit: usize) -> Result<Paginated<FormSummary>> {
    let options = RequestOptions::new()
      .query("q", "asset_type:survey")
      .query("limit", limit);
    let json = self.transport.send(Method::GET, "/v2/assets/", options).await?;
    Ok(serde_json::from_value(json)?)
  }

  /// `GET /v2/assets/{uid}/`
  pub async fn get(&self, form_id: &str, use_autoname: bool) -> Result<Form> {
    fetch(self.transport, form_id, use_autoname).await
  }

  /// `GET /v2/assets/{uid}/versions/`
  pub async fn versions(&self, form_id: &str) -> Result<Paginated<FormVersion>> {
    let path = format!("/v2/assets/{form_id}/versions/");
    let json = self.transport.send(Method::GET, &path, RequestOptions::new()).await?;
    Ok(serde_json::from_value(json)?)
  }

  /// The form as it was at `version_id`.
  pub async fn get_version(&self, form_id: &str, version_id: &str) -> Result<Form> {
    let path = format!("/v2/assets/{form_id}/versions/{version_id}/");
    let json = self.transport.send(Method::GET, &path, RequestOptions::new()).await?;
    Ok(serde_json::from_value(json)?)
  }

  /// Open (`active`) or close the deployed form to new submissions.
  pub async fn set_deployment_active(&self, form_id: &str, active: bool) -> Result<()> {
    let path = format!("/v2/assets/{form_id}/deployment/");
    let options = RequestOptions::new().json(&json!({ "active": active }))?;
    self.transport.send(Method::PATCH, &path, options).await?;
    tracing::info!(form_id, active, "deployment updated");
    Ok(())
  }

  /// Fetch the form and index its questions by leaf name.
  pub async fn question_index(&self, form_id: &str) -> Result<QuestionIndex> {
    Ok(self.get(form_id, false).await?.question_index())
  }
}
