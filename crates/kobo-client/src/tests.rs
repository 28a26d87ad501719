//! Client tests against an in-memory transport.

use std::{
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use kobo_core::Record;
use serde_json::{Value as Json, json};

use crate::{
  ClientConfig, Error, FailurePolicy, KoboClient, Result, SubmissionFilter,
  Transport, UpdateJob, ValidationStatus,
  transport::{Method, RequestOptions},
};

// ─── Fake transport ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Request {
  method:  Method,
  path:    String,
  options: RequestOptions,
}

impl Request {
  fn query(&self, key: &str) -> Option<&str> {
    self
      .options
      .query
      .iter()
      .find(|(k, _)| k == key)
      .map(|(_, v)| v.as_str())
  }

  fn body(&self) -> &Json { self.options.body.as_ref().unwrap_or(&Json::Null) }

  fn ids(&self) -> Vec<String> {
    serde_json::from_value(self.body()["payload"]["submission_ids"].clone())
      .unwrap_or_default()
  }
}

type Handler = Box<dyn Fn(&Request) -> Result<Json> + Send + Sync>;

struct FakeTransport {
  handler:  Handler,
  requests: Mutex<Vec<Request>>,
}

impl FakeTransport {
  fn new(handler: impl Fn(&Request) -> Result<Json> + Send + Sync + 'static) -> Self {
    Self {
      handler:  Box::new(handler),
      requests: Mutex::new(Vec::new()),
    }
  }
}

impl Transport for FakeTransport {
  async fn send(
    &self,
    method: Method,
    path: &str,
    options: RequestOptions,
  ) -> Result<Json> {
    let request = Request {
      method,
      path: path.to_string(),
      options,
    };
    tokio::task::yield_now().await;
    let response = (self.handler)(&request);
    self.requests.lock().unwrap().push(request);
    response
  }

  /// Served by the handler as a JSON string.
  async fn download(&self, path: &str) -> Result<Vec<u8>> {
    let json = self.send(Method::GET, path, RequestOptions::new()).await?;
    Ok(json.as_str().unwrap_or_default().as_bytes().to_vec())
  }
}

fn not_found(request: &Request) -> Error {
  Error::Api {
    status:  404,
    method:  request.method.to_string(),
    path:    request.path.clone(),
    message: "Not found.".into(),
  }
}

fn form_json() -> Json { form_with_name_path("family/family_name") }

fn form_with_name_path(family_name_xpath: &str) -> Json {
  json!({
    "uid": "aFORM",
    "name": "Shelter",
    "content": {
      "survey": [
        { "name": "family", "type": "begin_group", "$xpath": "family" },
        { "name": "family_name", "type": "text", "$xpath": family_name_xpath },
        { "name": "location", "type": "begin_repeat", "$xpath": "family/location" },
        { "name": "number", "type": "integer", "$xpath": "family/location/number" },
        { "type": "end_repeat" },
        { "type": "end_group" },
        { "name": "", "$autoname": "comment", "type": "text", "$xpath": "comment" },
      ],
    },
  })
}

/// Serves the form and accepts every write.
fn platform(request: &Request) -> Result<Json> {
  match (request.method.as_str(), request.path.as_str()) {
    ("GET", "/v2/assets/aFORM/") => Ok(form_json()),
    ("PATCH", "/v2/assets/aFORM/data/bulk/") => {
      let n = request.ids().len();
      Ok(json!({ "count": n, "successes": n, "failures": 0, "results": [] }))
    }
    ("GET", "/v1/forms") => Ok(json!([
      { "uuid": "hub-other", "id_string": "aOTHER" },
      { "uuid": "hub-1", "id_string": "aFORM" },
    ])),
    ("POST", "/v1/submissions.json") => Ok(json!({
      "message": "Successful submission.",
      "formid": 42,
      "instanceID": "uuid:abc",
      "submissionDate": "2025-01-22T13:16:16",
    })),
    ("GET", "/v2/assets/aFORM/versions/") => Ok(json!({
      "count": 1,
      "results": [{
        "uid": "vA",
        "url": "http://kobo.test/api/v2/assets/aFORM/versions/vA/",
        "content_hash": "abc",
        "date_deployed": "2025-01-10T09:00:00Z",
        "date_modified": "2025-01-10T08:59:00Z",
      }],
    })),
    ("GET", "/v2/assets/aFORM/versions/vA/") => Ok(form_with_name_path("family_name")),
    ("GET", "/v2/assets/aFORM/data/7/enketo/edit/") => {
      Ok(json!({ "url": "https://ee.example.org/edit/7" }))
    }
    ("GET", "/v2/assets/aFORM/data/8/enketo/edit/") => {
      Ok(json!({ "detail": "Submission is locked." }))
    }
    ("GET", "/v2/assets/aFORM/data/7/attachments/99/") => Ok(json!("PNG-bytes")),
    ("PATCH", _) | ("DELETE", _) => Ok(json!({ "detail": "ok" })),
    _ => Err(not_found(request)),
  }
}

fn client(transport: FakeTransport) -> KoboClient<FakeTransport> {
  KoboClient::with_transport(transport, ClientConfig::new("http://kobo.test", "t"))
}

fn requests(client: &KoboClient<FakeTransport>) -> Vec<Request> {
  client.transport().requests.lock().unwrap().clone()
}

fn ids(n: usize) -> Vec<String> { (1..=n).map(|i| i.to_string()).collect() }

// ─── Bulk update ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn update_sends_full_path_data_in_chunks() {
  let client = client(FakeTransport::new(platform));
  let report = client
    .submissions()
    .update(UpdateJob {
      form_id:        "aFORM".into(),
      submission_ids: ids(45),
      data:           Record::new()
        .with("family_name", "Mat")
        .with("number", "3"),
    })
    .await
    .unwrap();

  assert_eq!(report.chunks, 3);
  assert!(report.into_result().is_ok());

  let sent = requests(&client);
  let gets = sent.iter().filter(|r| r.method == Method::GET).count();
  assert_eq!(gets, 1);

  let patches: Vec<_> = sent.iter().filter(|r| r.method == Method::PATCH).collect();
  let mut sizes: Vec<_> = patches.iter().map(|r| r.ids().len()).collect();
  sizes.sort_unstable();
  assert_eq!(sizes, [5, 20, 20]);
  for patch in patches {
    assert_eq!(
      patch.body()["payload"]["data"],
      json!({ "family/family_name": "Mat", "family/location/number": 3 })
    );
  }
}

#[tokio::test]
async fn updates_for_one_form_are_applied_in_order() {
  let client = client(FakeTransport::new(platform));
  let submissions = client.submissions();
  let job = |name: &str| UpdateJob {
    form_id:        "aFORM".into(),
    submission_ids: ids(30),
    data:           Record::new().with("family_name", name),
  };

  let (first, second) =
    tokio::join!(submissions.update(job("first")), submissions.update(job("second")));
  assert!(first.unwrap().is_complete());
  assert!(second.unwrap().is_complete());

  let names: Vec<_> = requests(&client)
    .iter()
    .filter(|r| r.method == Method::PATCH)
    .map(|r| r.body()["payload"]["data"]["family/family_name"].clone())
    .collect();
  assert_eq!(names, [
    json!("first"),
    json!("first"),
    json!("second"),
    json!("second")
  ]);
}

#[tokio::test]
async fn failed_chunk_is_reported() {
  let transport = FakeTransport::new(|request| {
    if request.method == Method::PATCH && request.ids().contains(&"1".to_string()) {
      return Err(Error::Api {
        status:  502,
        method:  "PATCH".into(),
        path:    request.path.clone(),
        message: "Bad gateway".into(),
      });
    }
    platform(request)
  });
  let mut config = ClientConfig::new("http://kobo.test", "t");
  config.concurrency = 1;
  config.failure_policy = FailurePolicy::AbandonJob;
  let client = KoboClient::with_transport(transport, config);

  let report = client
    .submissions()
    .update(UpdateJob {
      form_id:        "aFORM".into(),
      submission_ids: ids(60),
      data:           Record::new().with("family_name", "x"),
    })
    .await
    .unwrap();

  assert_eq!(report.failures.len(), 1);
  assert!(matches!(report.failures[0].error, Error::Api { status: 502, .. }));
  assert_eq!(report.skipped, 2);
  assert!(matches!(
    report.into_result(),
    Err(Error::ChunkFailed { failed: 3, total: 3, ref key }) if key == "aFORM"
  ));
}

#[tokio::test]
async fn schema_is_fetched_again_for_a_new_drain_cycle() {
  let xpath = Arc::new(Mutex::new("family/family_name".to_string()));
  let served = xpath.clone();
  let client = client(FakeTransport::new(move |request| {
    if request.method == Method::GET && request.path == "/v2/assets/aFORM/" {
      return Ok(form_with_name_path(&served.lock().unwrap()));
    }
    platform(request)
  }));
  let job = || UpdateJob {
    form_id:        "aFORM".into(),
    submission_ids: ids(1),
    data:           Record::new().with("family_name", "Mat"),
  };

  client.submissions().update(job()).await.unwrap();
  while client.updater.queue.active_keys().await > 0 {
    tokio::time::sleep(Duration::from_millis(1)).await;
  }
  *xpath.lock().unwrap() = "household/family_name".to_string();
  client.submissions().update(job()).await.unwrap();

  let sent = requests(&client);
  assert_eq!(sent.iter().filter(|r| r.method == Method::GET).count(), 2);
  let data: Vec<_> = sent
    .iter()
    .filter(|r| r.method == Method::PATCH)
    .map(|r| r.body()["payload"]["data"].clone())
    .collect();
  assert_eq!(data, [
    json!({ "family/family_name": "Mat" }),
    json!({ "household/family_name": "Mat" }),
  ]);
}

#[tokio::test]
async fn strict_update_rejects_a_mistyped_answer_before_sending() {
  let mut config = ClientConfig::new("http://kobo.test", "t");
  config.strict = true;
  let client = KoboClient::with_transport(FakeTransport::new(platform), config);

  let result = client
    .submissions()
    .update(UpdateJob {
      form_id:        "aFORM".into(),
      submission_ids: ids(45),
      data:           Record::new().with("number", "three"),
    })
    .await;

  assert!(matches!(
    result,
    Err(Error::Codec(kobo_codec::Error::Coercion(ref e))) if e.key == "number"
  ));
  assert!(requests(&client).iter().all(|r| r.method == Method::GET));
}

#[tokio::test]
async fn missing_form_fails_the_update() {
  let client = client(FakeTransport::new(platform));
  let result = client
    .submissions()
    .update(UpdateJob {
      form_id:        "missing".into(),
      submission_ids: ids(3),
      data:           Record::new().with("family_name", "x"),
    })
    .await;

  assert!(matches!(result, Err(Error::Api { status: 404, .. })));
  assert!(requests(&client).iter().all(|r| r.method == Method::GET));
}

// ─── Reads ───────────────────────────────────────────────────────────────────

fn paged_platform(request: &Request) -> Result<Json> {
  if request.path != "/v2/assets/aFORM/data/" {
    return platform(request);
  }
  let all = [
    json!({ "_id": 3, "_submission_time": "2025-01-03T00:00:00", "family/family_name": "c" }),
    json!({ "_id": 1, "_submission_time": "2025-01-01T00:00:00", "family/family_name": "a" }),
    json!({
      "_id": 2,
      "_submission_time": "2025-01-02T00:00:00",
      "family/family_name": "b",
      "family/location": [{ "family/location/number": "7" }],
    }),
    json!({ "_id": 5, "_submission_time": "2025-01-05T00:00:00" }),
    json!({ "_id": 4, "_submission_time": "2025-01-04T00:00:00" }),
  ];
  let start: usize = request.query("start").and_then(|s| s.parse().ok()).unwrap_or(0);
  let limit: usize = request.query("limit").and_then(|s| s.parse().ok()).unwrap_or(100);
  let page: Vec<_> = all.iter().skip(start).take(limit).cloned().collect();
  Ok(json!({ "count": all.len(), "results": page }))
}

#[tokio::test]
async fn fetch_walks_every_page() {
  let mut config = ClientConfig::new("http://kobo.test", "t");
  config.page_size = 2;
  let client = KoboClient::with_transport(FakeTransport::new(paged_platform), config);

  let page = client
    .submissions()
    .fetch("aFORM", &SubmissionFilter::default())
    .await
    .unwrap();

  assert_eq!(page.count, 5);
  let ids: Vec<_> = page.results.iter().map(|r| r["_id"].clone()).collect();
  assert_eq!(ids, [json!("1"), json!("2"), json!("3"), json!("4"), json!("5")]);

  let starts: Vec<_> = requests(&client)
    .iter()
    .filter_map(|r| r.query("start").map(str::to_owned))
    .collect();
  assert_eq!(starts, ["0", "2", "4"]);
  assert!(requests(&client).iter().all(|r| r.query("query").is_none()));
}

#[tokio::test]
async fn fetch_passes_the_time_filter() {
  let client = client(FakeTransport::new(paged_platform));
  let filter = SubmissionFilter {
    submitted_after: Some("2025-01-02T00:00:00Z".parse().unwrap()),
    ..Default::default()
  };
  client.submissions().fetch("aFORM", &filter).await.unwrap();

  let sent = requests(&client);
  let query: Json = serde_json::from_str(sent[0].query("query").unwrap()).unwrap();
  assert_eq!(
    query,
    json!({ "_submission_time": { "$gte": "2025-01-02T00:00:00.000Z" } })
  );
  assert_eq!(sent[0].query("limit"), Some("20000"));
}

#[tokio::test]
async fn answers_are_leaf_keyed_and_typed() {
  let client = client(FakeTransport::new(paged_platform));
  let envelopes = client
    .submissions()
    .answers("aFORM", &SubmissionFilter::default())
    .await
    .unwrap();

  assert_eq!(envelopes.len(), 5);
  let second = &envelopes[1];
  assert_eq!(second.id().as_deref(), Some("2"));
  assert_eq!(
    second.answers,
    Record::new()
      .with("family_name", "b")
      .with("location", vec![Record::new().with("number", 7.0)])
  );
}

#[tokio::test]
async fn forms_list_filters_surveys() {
  let client = client(FakeTransport::new(|request| {
    assert_eq!(request.path, "/v2/assets/");
    Ok(json!({
      "count": 1,
      "results": [{ "uid": "aFORM", "name": "Shelter", "deployment__submission_count": 12 }],
    }))
  }));

  let forms = client.forms().list(2000).await.unwrap();
  assert_eq!(forms.results[0].submission_count, Some(12));
  let sent = requests(&client);
  assert_eq!(sent[0].query("q"), Some("asset_type:survey"));
  assert_eq!(sent[0].query("limit"), Some("2000"));
}

#[tokio::test]
async fn form_versions_and_deployment() {
  let client = client(FakeTransport::new(platform));
  let forms = client.forms();

  let versions = forms.versions("aFORM").await.unwrap();
  assert_eq!(versions.count, 1);
  assert_eq!(versions.results[0].uid, "vA");
  assert!(versions.results[0].date_deployed.is_some());

  let old = forms.get_version("aFORM", "vA").await.unwrap();
  assert_eq!(old.question_index().full_path("family_name"), Some("family_name"));

  forms.set_deployment_active("aFORM", false).await.unwrap();
  let patch = requests(&client).pop().unwrap();
  assert_eq!(patch.method, Method::PATCH);
  assert_eq!(patch.path, "/v2/assets/aFORM/deployment/");
  assert_eq!(patch.body(), &json!({ "active": false }));
}

// ─── Other writes ────────────────────────────────────────────────────────────

fn submit_config() -> ClientConfig {
  let mut config = ClientConfig::new("http://kobo.test", "t");
  config.retry_delay_ms = 1;
  config
}

#[tokio::test]
async fn submit_nests_tags_and_retries() {
  let posts = AtomicUsize::new(0);
  let transport = FakeTransport::new(move |request| {
    if request.method == Method::POST && posts.fetch_add(1, Ordering::SeqCst) < 2 {
      return Err(Error::Api {
        status:  503,
        method:  "POST".into(),
        path:    request.path.clone(),
        message: "Service unavailable".into(),
      });
    }
    platform(request)
  });
  let client = KoboClient::with_transport(transport, submit_config());

  let answers = Record::new()
    .with("family_name", " Mat ")
    .with("location", vec![Record::new().with("number", "3")])
    .with("_id", "ignored");
  let response = client
    .submissions()
    .submit("aFORM", &answers, Some("imported"))
    .await
    .unwrap();
  assert_eq!(response.instance_id.as_deref(), Some("uuid:abc"));
  assert_eq!(response.message.as_deref(), Some("Successful submission."));

  let sent = requests(&client);
  let posts: Vec<_> = sent.iter().filter(|r| r.method == Method::POST).collect();
  assert_eq!(posts.len(), 3);
  assert!(posts.iter().all(|r| r.path == "/v1/submissions.json"));

  let body = posts[2].body();
  assert_eq!(body["id"], json!("aFORM"));
  let submission = &body["submission"];
  assert_eq!(submission["formhub"], json!({ "uuid": "hub-1" }));
  assert!(submission["meta/instanceID"].as_str().unwrap().starts_with("uuid:"));
  assert_eq!(
    submission["family"],
    json!({ "family_name": "Mat", "location": [{ "number": 3 }] })
  );
  assert_eq!(submission["imported"], json!("true"));
  assert!(submission.get("_id").is_none());
  // Every attempt carries the same instance id.
  assert_eq!(posts[0].body(), body);
}

#[tokio::test]
async fn submit_gives_up_after_the_configured_retries() {
  let transport = FakeTransport::new(|request| {
    if request.method == Method::POST {
      return Err(Error::Api {
        status:  500,
        method:  "POST".into(),
        path:    request.path.clone(),
        message: "boom".into(),
      });
    }
    platform(request)
  });
  let mut config = submit_config();
  config.submit_retries = 2;
  let client = KoboClient::with_transport(transport, config);

  let result = client
    .submissions()
    .submit("aFORM", &Record::new().with("family_name", "x"), None)
    .await;

  assert!(matches!(result, Err(Error::Api { status: 500, .. })));
  let posts = requests(&client).iter().filter(|r| r.method == Method::POST).count();
  assert_eq!(posts, 3);
}

#[tokio::test]
async fn submit_needs_the_form_on_the_v1_server() {
  let client = client(FakeTransport::new(|request| {
    if request.path == "/v1/forms" {
      return Ok(json!([{ "uuid": "hub-other", "id_string": "aOTHER" }]));
    }
    platform(request)
  }));

  let err = client
    .submissions()
    .submit("aFORM", &Record::new().with("family_name", "x"), None)
    .await
    .unwrap_err();
  assert_eq!(err.to_string(), "Form aFORM not found");
  assert!(requests(&client).iter().all(|r| r.method != Method::POST));
}

#[tokio::test]
async fn edit_links_and_attachments() {
  let client = client(FakeTransport::new(platform));
  let submissions = client.submissions();

  assert_eq!(
    submissions.edit_link("aFORM", "7").await.unwrap(),
    "https://ee.example.org/edit/7"
  );
  assert_eq!(requests(&client)[0].query("return_url"), Some("false"));

  let err = submissions.edit_link("aFORM", "8").await.unwrap_err();
  assert!(matches!(
    err,
    Error::NoEditLink { ref submission_id, ref detail }
      if submission_id == "8" && detail == "Submission is locked."
  ));

  let bytes = submissions.attachment("aFORM", "7", "99").await.unwrap();
  assert_eq!(bytes, b"PNG-bytes");
}

#[tokio::test]
async fn delete_sends_the_ids() {
  let client = client(FakeTransport::new(platform));
  let detail = client
    .submissions()
    .delete("aFORM", &ids(2))
    .await
    .unwrap();

  assert_eq!(detail, "ok");
  let sent = requests(&client);
  assert_eq!(sent[0].method, Method::DELETE);
  assert_eq!(sent[0].path, "/v2/assets/aFORM/data/bulk/");
  assert_eq!(sent[0].body(), &json!({ "payload": { "submission_ids": ["1", "2"] } }));
}

#[tokio::test]
async fn validation_updates_are_chunked() {
  let client = client(FakeTransport::new(platform));
  let report = client
    .submissions()
    .update_validation("aFORM", ids(25), ValidationStatus::Approved)
    .await
    .unwrap();

  assert_eq!(report.chunks, 2);
  let sent = requests(&client);
  assert_eq!(sent.len(), 2);
  for request in &sent {
    assert_eq!(request.path, "/v2/assets/aFORM/data/validation_statuses/");
    assert_eq!(
      request.body()["payload"]["validation_status.uid"],
      json!("validation_status_approved")
    );
  }
}

#[tokio::test]
async fn update_by_question_name_uses_the_xpath() {
  let client = client(FakeTransport::new(platform));
  let response = client
    .submissions()
    .update_by_question_name("aFORM", &ids(2), "comment", "checked")
    .await
    .unwrap();

  assert_eq!(response.successes, 2);
  let patch = requests(&client)
    .into_iter()
    .find(|r| r.method == Method::PATCH)
    .unwrap();
  assert_eq!(
    patch.body(),
    &json!({ "payload": { "submission_ids": ["1", "2"], "data": { "comment": "checked" } } })
  );
}

#[tokio::test]
async fn update_by_unknown_question_name_fails() {
  let client = client(FakeTransport::new(platform));
  let err = client
    .submissions()
    .update_by_question_name("aFORM", &ids(1), "nope", "x")
    .await
    .unwrap_err();

  assert_eq!(err.to_string(), "Question nope not found in form aFORM");
  assert!(requests(&client).iter().all(|r| r.method == Method::GET));
}
