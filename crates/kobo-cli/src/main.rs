//! `kobo`: command-line access to a KoboToolbox server.
//!
//! # Usage
//!
//! ```
//! kobo forms
//! kobo submissions aBC7jcZzfPmzVpvdT9juNM --after 2025-01-01T00:00:00Z
//! kobo update aBC7jcZzfPmzVpvdT9juNM --ids 1,2,3 --set family_name=Mat
//! kobo submit aBC7jcZzfPmzVpvdT9juNM --set family_name=Mat --tag imported
//! ```
//!
//! Settings come from `kobo.toml` (or `--config`), then `KOBO_*` environment
//! variables, then flags.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use kobo_client::{
  ClientConfig, Error, JobReport, KoboClient, SubmissionFilter, UpdateJob,
  ValidationStatus,
};
use kobo_core::Record;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "kobo", version, about = "KoboToolbox form data from the command line")]
struct Cli {
  /// Path to a TOML config file.
  #[arg(short, long, value_name = "FILE", default_value = "kobo.toml")]
  config: PathBuf,

  /// Server root, e.g. https://kf.kobotoolbox.org.
  #[arg(long)]
  url: Option<String>,

  /// API token.
  #[arg(long)]
  token: Option<String>,

  /// Submission ids per bulk request.
  #[arg(long)]
  chunk_size: Option<usize>,

  /// Bulk requests in flight at once.
  #[arg(long)]
  concurrency: Option<usize>,

  /// Keep sending a job's remaining chunks after one fails.
  #[arg(long)]
  continue_on_failure: bool,

  /// Refuse answers that do not fit their question's type.
  #[arg(long)]
  strict: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List the account's forms.
  Forms {
    #[arg(long, default_value_t = 2000)]
    limit: usize,
  },

  /// Print a form's questions with their full paths and types.
  Form {
    form_id:  String,
    /// Use `$autoname` for unnamed questions.
    #[arg(long)]
    autoname: bool,
    /// Show this saved version instead of the current one.
    #[arg(long)]
    version:  Option<String>,
  },

  /// List a form's saved versions.
  Versions { form_id: String },

  /// Open or close a deployed form to new submissions.
  Deployment {
    form_id: String,
    #[arg(long, action = clap::ArgAction::Set)]
    active:  bool,
  },

  /// Print submissions as JSON.
  Submissions {
    form_id: String,
    #[command(flatten)]
    range:   TimeRange,
    /// Print the platform's flat records instead of answer trees.
    #[arg(long)]
    raw:     bool,
  },

  /// Create a submission from answers keyed by question name.
  Submit {
    form_id: String,
    #[command(flatten)]
    answers: Answers,
    /// Mark the submission with `<TAG>: "true"`.
    #[arg(long)]
    tag:     Option<String>,
  },

  /// Set answers on submissions, by question name.
  Update {
    form_id: String,
    #[arg(long, value_delimiter = ',', required = true)]
    ids:     Vec<String>,
    #[command(flatten)]
    answers: Answers,
  },

  /// Set one question on submissions, looked up by name or `$autoname`.
  SetQuestion {
    form_id:  String,
    #[arg(long, value_delimiter = ',', required = true)]
    ids:      Vec<String>,
    #[arg(long)]
    question: String,
    #[arg(long)]
    value:    String,
  },

  /// Change the validation status of submissions.
  Validate {
    form_id: String,
    #[arg(long, value_delimiter = ',', required = true)]
    ids:     Vec<String>,
    /// approved, not_approved, on_hold or no_status.
    #[arg(long)]
    status:  ValidationStatus,
  },

  /// Delete submissions.
  Delete {
    form_id: String,
    #[arg(long, value_delimiter = ',', required = true)]
    ids:     Vec<String>,
  },

  /// Print a browser link to edit a submission.
  EditLink {
    form_id:       String,
    submission_id: String,
  },

  /// Download one attachment of a submission.
  Attachment {
    form_id:       String,
    submission_id: String,
    attachment_id: String,
    #[arg(short, long, value_name = "FILE")]
    out:           PathBuf,
  },
}

#[derive(clap::Args, Debug, Default)]
struct Answers {
  /// An answer to set; repeatable.
  #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_assignment)]
  set:  Vec<(String, String)>,
  /// Answers as a JSON object, merged before `--set`.
  #[arg(long, value_name = "JSON")]
  data: Option<String>,
}

impl Answers {
  fn into_record(self) -> Result<Record> {
    let mut record = match self.data {
      Some(json) => {
        let value: serde_json::Value =
          serde_json::from_str(&json).context("--data is not valid JSON")?;
        Record::try_from(value).context("--data must be a JSON object")?
      }
      None => Record::new(),
    };
    for (name, value) in self.set {
      record.insert(name, value);
    }
    anyhow::ensure!(!record.is_empty(), "no answers; pass --set or --data");
    Ok(record)
  }
}

#[derive(clap::Args, Debug, Default)]
struct TimeRange {
  /// Only submissions received at or after this time (RFC 3339).
  #[arg(long)]
  after:  Option<DateTime<Utc>>,
  /// Only submissions received at or before this time (RFC 3339).
  #[arg(long)]
  before: Option<DateTime<Utc>>,
}

impl From<TimeRange> for SubmissionFilter {
  fn from(range: TimeRange) -> Self {
    Self {
      submitted_after:  range.after,
      submitted_before: range.before,
    }
  }
}

fn parse_assignment(s: &str) -> Result<(String, String), String> {
  s.split_once('=')
    .filter(|(name, _)| !name.is_empty())
    .map(|(name, value)| (name.to_string(), value.to_string()))
    .ok_or_else(|| format!("expected NAME=VALUE, got {s:?}"))
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let config = load_config(&cli)?;
  let client = KoboClient::new(config).context("failed to build HTTP client")?;

  run(&client, cli.command).await
}

/// File, then `KOBO_*` environment, then flags.
fn load_config(cli: &Cli) -> Result<ClientConfig> {
  let failure_policy = cli.continue_on_failure.then_some("continue_job");
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config.clone()).required(false))
    .add_source(config::Environment::with_prefix("KOBO").try_parsing(true))
    .set_override_option("url", cli.url.clone())?
    .set_override_option("token", cli.token.clone())?
    .set_override_option("chunk_size", cli.chunk_size.map(|n| n as u64))?
    .set_override_option("concurrency", cli.concurrency.map(|n| n as u64))?
    .set_override_option("failure_policy", failure_policy)?
    .set_override_option("strict", cli.strict.then_some(true))?
    .build()
    .context("failed to read configuration")?;

  settings
    .try_deserialize()
    .context("configuration needs at least `url` and `token`")
}

async fn run(client: &KoboClient, command: Command) -> Result<()> {
  match command {
    Command::Forms { limit } => {
      let forms = client.forms().list(limit).await?;
      for form in forms.results {
        println!(
          "{}\t{}\t{}",
          form.uid,
          form.submission_count.unwrap_or_default(),
          form.name
        );
      }
    }

    Command::Form { form_id, autoname, version } => {
      let form = match version {
        Some(version) => client.forms().get_version(&form_id, &version).await?,
        None => client.forms().get(&form_id, autoname).await?,
      };
      let index = form.question_index();
      let mut questions: Vec<_> = index.iter().collect();
      questions.sort_by(|a, b| a.full_path.cmp(&b.full_path));
      for q in questions {
        println!("{}\t{}\t{}", q.full_path, q.kind, q.label.as_deref().unwrap_or(""));
      }
    }

    Command::Versions { form_id } => {
      let versions = client.forms().versions(&form_id).await?;
      for version in versions.results {
        let deployed = version
          .date_deployed
          .map(|at| at.to_rfc3339())
          .unwrap_or_else(|| "-".to_string());
        println!("{}\t{}\t{}", version.uid, deployed, version.date_modified.to_rfc3339());
      }
    }

    Command::Deployment { form_id, active } => {
      client.forms().set_deployment_active(&form_id, active).await?;
      let state = if active { "open" } else { "closed" };
      println!("{form_id}: {state}");
    }

    Command::Submissions { form_id, range, raw } => {
      let filter = SubmissionFilter::from(range);
      let submissions = client.submissions();
      let json = if raw {
        serde_json::to_string_pretty(&submissions.fetch(&form_id, &filter).await?.results)?
      } else {
        serde_json::to_string_pretty(&submissions.answers(&form_id, &filter).await?)?
      };
      println!("{json}");
    }

    Command::Submit { form_id, answers, tag } => {
      let record = answers.into_record()?;
      let response = client
        .submissions()
        .submit(&form_id, &record, tag.as_deref())
        .await?;
      if let Some(error) = response.error {
        anyhow::bail!("{form_id}: submission refused: {error}");
      }
      println!(
        "{form_id}: {}",
        response.instance_id.as_deref().unwrap_or("submitted")
      );
    }

    Command::Update { form_id, ids, answers } => {
      let record = answers.into_record()?;
      let report = client
        .submissions()
        .update(UpdateJob {
          form_id,
          submission_ids: ids,
          data: record,
        })
        .await?;
      finish(report)?;
    }

    Command::SetQuestion { form_id, ids, question, value } => {
      let response = client
        .submissions()
        .update_by_question_name(&form_id, &ids, &question, value)
        .await?;
      println!(
        "{form_id}: {} updated, {} failed",
        response.successes, response.failures
      );
    }

    Command::Validate { form_id, ids, status } => {
      let report = client
        .submissions()
        .update_validation(&form_id, ids, status)
        .await?;
      finish(report)?;
    }

    Command::Delete { form_id, ids } => {
      let detail = client.submissions().delete(&form_id, &ids).await?;
      println!("{form_id}: {detail}");
    }

    Command::EditLink { form_id, submission_id } => {
      let url = client.submissions().edit_link(&form_id, &submission_id).await?;
      println!("{url}");
    }

    Command::Attachment { form_id, submission_id, attachment_id, out } => {
      let bytes = client
        .submissions()
        .attachment(&form_id, &submission_id, &attachment_id)
        .await?;
      tokio::fs::write(&out, &bytes)
        .await
        .with_context(|| format!("failed to write {}", out.display()))?;
      println!("{}: {} bytes", out.display(), bytes.len());
    }
  }
  Ok(())
}

/// Print a job report; an incomplete job is an error.
fn finish(report: JobReport<Error>) -> Result<()> {
  println!(
    "{}: {} submission(s), {}/{} chunk(s) applied",
    report.key, report.items, report.succeeded, report.chunks
  );
  for failure in &report.failures {
    eprintln!("  chunk {} ({} ids): {}", failure.index, failure.size, failure.error);
  }
  if report.skipped > 0 {
    eprintln!("  {} chunk(s) skipped", report.skipped);
  }
  report.into_result()?;
  Ok(())
}
