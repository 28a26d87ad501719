//! Async client for the KoboToolbox v2 API.
//!
//! Reads go straight to the [`Transport`]. Writes that touch many
//! submissions (bulk updates, validation changes) go through a
//! [`KeyedQueue`] keyed by form id, so each form receives them one job at a
//! time and in chunks of bounded concurrency.

pub mod config;
pub mod error;
pub mod forms;
pub mod queue;
mod retry;
pub mod submissions;
pub mod transport;
pub mod update;

use std::sync::Arc;

pub use self::{
  config::ClientConfig,
  error::{Error, Result},
  forms::Forms,
  queue::{FailurePolicy, JobReport, KeyedQueue, QueueConfig, Worker},
  submissions::{SubmissionFilter, Submissions, SubmitResponse, ValidationStatus},
  transport::{HttpTransport, Transport},
  update::{BulkUpdater, UpdateJob},
};
use self::submissions::ValidationWorker;

/// Entry point: holds the transport and the per-form write queues.
pub struct KoboClient<T: Transport = HttpTransport> {
  pub(crate) transport:  Arc<T>,
  pub(crate) config:     ClientConfig,
  pub(crate) updater:    BulkUpdater<T>,
  pub(crate) validation: KeyedQueue<ValidationWorker<T>>,
}

impl KoboClient {
  /// A client talking HTTP to `config.url`.
  pub fn new(config: ClientConfig) -> Result<Self> {
    let transport = HttpTransport::new(&config)?;
    Ok(Self::with_transport(transport, config))
  }
}

impl<T: Transport> KoboClient<T> {
  pub fn with_transport(transport: T, config: ClientConfig) -> Self {
    let transport = Arc::new(transport);
    let queue = config.queue();
    Self {
      updater: BulkUpdater::new(transport.clone(), queue, config.wire_options()),
      validation: KeyedQueue::new(
        ValidationWorker {
          transport: transport.clone(),
        },
        queue,
      ),
      transport,
      config,
    }
  }

  pub fn forms(&self) -> Forms<'_, T> {
    Forms {
      transport: &*self.transport,
    }
  }

  pub fn submissions(&self) -> Submissions<'_, T> { Submissions { client: self } }

  pub fn transport(&self) -> &T { &self.transport }

  pub fn config(&self) -> &ClientConfig { &self.config }
}

#[cfg(test)]
mod tests;
