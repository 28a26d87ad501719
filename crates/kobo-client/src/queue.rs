//! A per-key job queue with chunked, bounded-concurrency execution.
//!
//! Jobs submitted under the same key run one after another, in submission
//! order. Each job is expanded into items (e.g. submission ids), split into
//! chunks, and the chunks are run with at most `concurrency` in flight.
//! Different keys drain independently.
//!
//! A key's state exists only while it has work: it is created on the first
//! submit, a drain task is spawned for it, and the drain task removes it
//! under the same lock once the pending list is empty. If the worker panics,
//! the drain task removes the state itself and every job still waiting on
//! that key resolves to [`QueueError::Closed`].

use std::{
  collections::{HashMap, VecDeque},
  fmt,
  panic::AssertUnwindSafe,
  future::Future,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use futures::{FutureExt, StreamExt, stream};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, oneshot};

// ─── Worker ──────────────────────────────────────────────────────────────────

/// The operation a [`KeyedQueue`] schedules.
pub trait Worker: Send + Sync + 'static {
  type Job: Send + Sync + 'static;
  type Item: Send + 'static;
  /// Built once per drain cycle by [`Worker::prepare`] and shared by every
  /// chunk of every job in that cycle.
  type Context: Send + Sync + 'static;
  type Error: fmt::Display + Send + 'static;

  /// The items a job is split over.
  fn items(&self, job: &Self::Job) -> Vec<Self::Item>;

  /// The job to run for one chunk of `job`'s items.
  fn reconcile(&self, chunk: Vec<Self::Item>, job: &Self::Job) -> Self::Job;

  /// Called before the first job of a drain cycle. On failure the job is
  /// reported as failed and the next job calls it again.
  fn prepare(
    &self,
    key: &str,
  ) -> impl Future<Output = Result<Self::Context, Self::Error>> + Send;

  /// Called once per job with the cycle's context, before the job is split.
  /// A failure rejects the whole job; none of its chunks run.
  fn prepare_job(
    &self,
    _context: &Self::Context,
    job: Self::Job,
  ) -> Result<Self::Job, Self::Error> {
    Ok(job)
  }

  /// Run one chunk.
  fn run(
    &self,
    context: Arc<Self::Context>,
    job: Self::Job,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

// ─── Configuration ───────────────────────────────────────────────────────────

/// What happens to a job's remaining chunks once one of them fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
  /// Chunks not started yet are skipped. Chunks already in flight finish.
  /// The key keeps draining its next job.
  #[default]
  AbandonJob,
  /// Every chunk is attempted.
  ContinueJob,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
  pub chunk_size:     usize,
  pub concurrency:    usize,
  pub failure_policy: FailurePolicy,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      chunk_size:     20,
      concurrency:    12,
      failure_policy: FailurePolicy::AbandonJob,
    }
  }
}

// ─── Reports ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ChunkFailure<E> {
  /// Position of the chunk within its job.
  pub index: usize,
  /// Number of items in the chunk.
  pub size:  usize,
  pub error: E,
}

/// The outcome of one job.
#[derive(Debug)]
pub struct JobReport<E> {
  pub key:       String,
  pub items:     usize,
  pub chunks:    usize,
  pub succeeded: usize,
  /// Failed chunks, ordered by index.
  pub failures:  Vec<ChunkFailure<E>>,
  /// Chunks never started because an earlier one failed.
  pub skipped:   usize,
}

impl<E> JobReport<E> {
  /// `true` when every chunk ran and succeeded.
  pub fn is_complete(&self) -> bool { self.succeeded == self.chunks }

  /// Chunks that failed or were skipped.
  pub fn incomplete(&self) -> usize { self.chunks - self.succeeded }
}

#[derive(Debug, Error)]
pub enum QueueError<E> {
  /// [`Worker::prepare`] or [`Worker::prepare_job`] failed; none of the
  /// job's chunks ran.
  #[error("preparing the job failed: {0}")]
  Prepare(E),

  /// The drain task went away without reporting on the job.
  #[error("queue for {0:?} closed before the job completed")]
  Closed(String),
}

type Outcome<E> = Result<JobReport<E>, QueueError<E>>;

/// A submitted job. Resolves once every chunk has been attempted or skipped.
pub struct JobHandle<E> {
  key:   String,
  reply: oneshot::Receiver<Outcome<E>>,
}

impl<E> JobHandle<E> {
  pub async fn wait(self) -> Outcome<E> {
    match self.reply.await {
      Ok(outcome) => outcome,
      Err(_) => Err(QueueError::Closed(self.key)),
    }
  }
}

// ─── Queue ───────────────────────────────────────────────────────────────────

struct KeyState<W: Worker> {
  pending:  VecDeque<(W::Job, oneshot::Sender<Outcome<W::Error>>)>,
  draining: bool,
}

impl<W: Worker> Default for KeyState<W> {
  fn default() -> Self {
    Self {
      pending:  VecDeque::new(),
      draining: false,
    }
  }
}

type Keys<W> = Arc<Mutex<HashMap<String, KeyState<W>>>>;

/// Serializes jobs per key and runs each job's chunks concurrently.
///
/// Drain tasks are spawned on the current tokio runtime.
pub struct KeyedQueue<W: Worker> {
  worker: Arc<W>,
  config: QueueConfig,
  keys:   Keys<W>,
}

impl<W: Worker> KeyedQueue<W> {
  pub fn new(worker: W, config: QueueConfig) -> Self {
    Self {
      worker: Arc::new(worker),
      config,
      keys: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  pub fn worker(&self) -> &W { &self.worker }

  pub fn config(&self) -> &QueueConfig { &self.config }

  /// Append `job` to `key`'s queue, starting a drain if the key is idle.
  pub async fn submit(
    &self,
    key: impl Into<String>,
    job: W::Job,
  ) -> JobHandle<W::Error> {
    let key = key.into();
    let (tx, rx) = oneshot::channel();

    let mut keys = self.keys.lock().await;
    let state = keys.entry(key.clone()).or_default();
    state.pending.push_back((job, tx));
    if !state.draining {
      state.draining = true;
      tokio::spawn(drain(
        self.worker.clone(),
        self.keys.clone(),
        self.config,
        key.clone(),
      ));
    }

    JobHandle { key, reply: rx }
  }

  /// Submit `job` and wait for its report.
  pub async fn enqueue(
    &self,
    key: impl Into<String>,
    job: W::Job,
  ) -> Outcome<W::Error> {
    self.submit(key, job).await.wait().await
  }

  /// Number of keys with a drain in progress.
  pub async fn active_keys(&self) -> usize { self.keys.lock().await.len() }
}

async fn drain<W: Worker>(
  worker: Arc<W>,
  keys: Keys<W>,
  config: QueueConfig,
  key: String,
) {
  tracing::debug!(%key, "drain started");
  let mut context: Option<Arc<W::Context>> = None;

  loop {
    let (job, reply) = {
      let mut keys = keys.lock().await;
      let next = keys.get_mut(&key).and_then(|s| s.pending.pop_front());
      match next {
        Some(next) => next,
        None => {
          keys.remove(&key);
          break;
        }
      }
    };

    let ctx = match context.clone() {
      Some(ctx) => ctx,
      None => match AssertUnwindSafe(worker.prepare(&key)).catch_unwind().await {
        Ok(Ok(ctx)) => {
          let ctx = Arc::new(ctx);
          context = Some(ctx.clone());
          ctx
        }
        Ok(Err(error)) => {
          tracing::warn!(%key, %error, "preparing the queue failed; job dropped");
          let _ = reply.send(Err(QueueError::Prepare(error)));
          continue;
        }
        Err(_) => return close(&keys, &key, reply).await,
      },
    };

    let run = async {
      let job = worker.prepare_job(&ctx, job)?;
      Ok::<_, W::Error>(run_job(&worker, &config, &key, ctx.clone(), job).await)
    };
    match AssertUnwindSafe(run).catch_unwind().await {
      Ok(Ok(report)) => {
        let _ = reply.send(Ok(report));
      }
      Ok(Err(error)) => {
        tracing::warn!(%key, %error, "job rejected before chunking");
        let _ = reply.send(Err(QueueError::Prepare(error)));
      }
      Err(_) => return close(&keys, &key, reply).await,
    }
  }

  tracing::debug!(%key, "drain finished");
}

/// Tear down `key` after its worker panicked: the current job and every job
/// still pending resolve to [`QueueError::Closed`], and the next submit
/// starts a fresh drain.
async fn close<W: Worker>(
  keys: &Keys<W>,
  key: &str,
  reply: oneshot::Sender<Outcome<W::Error>>,
) {
  let state = keys.lock().await.remove(key);
  let pending = state.map(|s| s.pending).unwrap_or_default();
  tracing::error!(key, pending = pending.len(), "worker panicked; queue closed");

  let _ = reply.send(Err(QueueError::Closed(key.to_string())));
  for (_, reply) in pending {
    let _ = reply.send(Err(QueueError::Closed(key.to_string())));
  }
}

enum ChunkOutcome<E> {
  Done,
  Failed(ChunkFailure<E>),
  Skipped,
}

async fn run_job<W: Worker>(
  worker: &Arc<W>,
  config: &QueueConfig,
  key: &str,
  context: Arc<W::Context>,
  job: W::Job,
) -> JobReport<W::Error> {
  let items = worker.items(&job);
  let item_count = items.len();
  let chunks = into_chunks(items, config.chunk_size.max(1));
  let chunk_count = chunks.len();
  let abandoned = Arc::new(AtomicBool::new(false));
  let policy = config.failure_policy;

  let outcomes: Vec<ChunkOutcome<W::Error>> = stream::iter(chunks.into_iter().enumerate())
    .map(|(index, chunk)| {
      let size = chunk.len();
      let unit = worker.reconcile(chunk, &job);
      let worker = worker.clone();
      let context = context.clone();
      let abandoned = abandoned.clone();
      let key = key.to_string();
      async move {
        if abandoned.load(Ordering::SeqCst) {
          return ChunkOutcome::Skipped;
        }
        match worker.run(context, unit).await {
          Ok(()) => ChunkOutcome::Done,
          Err(error) => {
            tracing::warn!(%key, chunk = index, size, %error, "chunk failed");
            if policy == FailurePolicy::AbandonJob {
              abandoned.store(true, Ordering::SeqCst);
            }
            ChunkOutcome::Failed(ChunkFailure { index, size, error })
          }
        }
      }
    })
    .buffer_unordered(config.concurrency.max(1))
    .collect()
    .await;

  let mut report = JobReport {
    key:       key.to_string(),
    items:     item_count,
    chunks:    chunk_count,
    succeeded: 0,
    failures:  Vec::new(),
    skipped:   0,
  };
  for outcome in outcomes {
    match outcome {
      ChunkOutcome::Done => report.succeeded += 1,
      ChunkOutcome::Failed(failure) => report.failures.push(failure),
      ChunkOutcome::Skipped => report.skipped += 1,
    }
  }
  report.failures.sort_by_key(|f| f.index);
  if report.skipped > 0 {
    tracing::warn!(key, skipped = report.skipped, "job abandoned after a failed chunk");
  }
  report
}

fn into_chunks<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
  let mut chunks = Vec::new();
  let mut iter = items.into_iter().peekable();
  while iter.peek().is_some() {
    chunks.push(iter.by_ref().take(size).collect());
  }
  chunks
}

// ─── Tests ───────────────────────────────────────────────────────────────────
