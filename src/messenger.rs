//! The `Messenger` facade: configuration, construction, and teardown.

use crate::defaults;
use crate::dispatch::{self, DispatchItem};
use crate::error::{Error, Result};
use crate::naming;
use crate::packet::{ProcessId, HEADER_SIZE};
use crate::queue::{MessageQueue, QueueLimits};
use crate::registry::{FsRegistry, ReceiverRegistry};
use crate::table::{PortTable, SubscriptionRecord};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Deploy-time configuration for a messenger.
///
/// Every cooperating process on a host must agree on `registry_root`; the
/// remaining knobs are per-process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Shared filesystem root for the default receiver registry.
    pub registry_root: PathBuf,
    /// Maximum messages a queue holds before senders back off.
    pub queue_depth: usize,
    /// Upper bound on header plus payload for one message.
    pub max_message_size: usize,
    /// Receivers returned per registry read.
    pub registry_page_size: usize,
    /// Scheduling priority recorded alongside this process's registrations.
    pub receiver_priority: u32,
    /// Identity override; `None` uses this process's id. Overriding lets one
    /// process model several peers, mostly useful in tests.
    pub identity: Option<ProcessId>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry_root: PathBuf::from(defaults::REGISTRY_ROOT),
            queue_depth: defaults::QUEUE_DEPTH,
            max_message_size: defaults::MAX_MESSAGE_SIZE,
            registry_page_size: defaults::REGISTRY_PAGE_SIZE,
            receiver_priority: 0,
            identity: None,
        }
    }
}

pub(crate) struct Shared {
    pub config: Config,
    pub identity: ProcessId,
    pub registry: Box<dyn ReceiverRegistry>,
    pub table: Arc<PortTable>,
    pub dispatch: mpsc::Sender<DispatchItem>,
}

/// Handle to the messaging core. Cheap to clone; all clones share one
/// subscription table and dispatcher.
///
/// Must be created inside a Tokio runtime: construction spawns the dispatch
/// task that serializes all subscription callbacks.
#[derive(Clone)]
pub struct Messenger {
    pub(crate) shared: Arc<Shared>,
}

impl Messenger {
    /// Create a messenger backed by the filesystem registry rooted at
    /// `config.registry_root`.
    pub fn new(config: Config) -> Result<Self> {
        let registry = FsRegistry::new(config.registry_root.clone(), config.registry_page_size);
        Self::with_registry(config, Box::new(registry))
    }

    /// Create a messenger over a caller-supplied registry implementation.
    pub fn with_registry(config: Config, registry: Box<dyn ReceiverRegistry>) -> Result<Self> {
        if config.queue_depth == 0 {
            return Err(Error::InvalidArgument("queue depth is zero".to_owned()));
        }
        if config.max_message_size <= HEADER_SIZE {
            return Err(Error::InvalidArgument(format!(
                "max message size {} leaves no room for a payload",
                config.max_message_size
            )));
        }
        if config.registry_page_size == 0 {
            return Err(Error::InvalidArgument(
                "registry page size is zero".to_owned(),
            ));
        }
        let identity = config.identity.unwrap_or_else(std::process::id);
        let dispatch = dispatch::spawn_dispatcher();
        debug!("messenger created with identity {}", identity);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                identity,
                registry,
                table: Arc::new(PortTable::default()),
                dispatch,
            }),
        })
    }

    /// The identity this messenger registers and frames messages with.
    pub fn identity(&self) -> ProcessId {
        self.shared.identity
    }

    /// Live non-blocking subscriptions (receive and armed one-shot reply).
    pub fn active_subscriptions(&self) -> usize {
        self.shared.table.len()
    }

    pub(crate) fn limits(&self) -> QueueLimits {
        QueueLimits {
            depth: self.shared.config.queue_depth,
            msg_size: self.shared.config.max_message_size,
        }
    }

    /// Tear down everything this process created for `port`: the registry
    /// entry, any live subscription (receive or armed one-shot reply), and
    /// the receive-queue name.
    ///
    /// Required once per port after non-blocking receive or asynchronous
    /// send; calling it again, or for a port never used, is a successful
    /// no-op. The returned error, if any, is the registry deregistration
    /// failure; queue teardown is best-effort.
    pub fn cleanup(&self, port: &str) -> Result<()> {
        naming::validate(port)?;
        let outcome = self.shared.registry.remove(port, self.shared.identity);

        for record in self.shared.table.take_by_port(port, self.shared.identity) {
            teardown_record(&record);
        }
        // The name may outlive its record: a reader that died on a terminal
        // error removes the record but leaves the name linked.
        let queue_name = naming::receive_queue(port, self.shared.identity);
        if let Err(e) = MessageQueue::unlink(&queue_name) {
            warn!("failed to unlink '{}' during cleanup: {}", queue_name, e);
        }
        outcome
    }
}

pub(crate) fn teardown_record(record: &SubscriptionRecord) {
    debug!(
        "tearing down {:?} subscription on '{}'",
        record.kind, record.queue_name
    );
    // The reader owns the descriptor; it closes on cancellation.
    let _ = record.stop.send(true);
    if let Err(e) = MessageQueue::unlink(&record.queue_name) {
        warn!("failed to unlink '{}': {}", record.queue_name, e);
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        for record in self.table.drain_all() {
            let _ = self.registry.remove(&record.port, record.owner);
            teardown_record(&record);
        }
    }
}

/// A live non-blocking subscription.
///
/// Dropping the guard runs the cleanup sequence, so a forgotten subscription
/// cannot leak its queue, registry entry, or reader task. Use [`close`] to
/// observe the result instead.
///
/// [`close`]: Subscription::close
pub struct Subscription {
    messenger: Messenger,
    port: String,
    active: bool,
}

impl Subscription {
    pub(crate) fn new(messenger: Messenger, port: String) -> Self {
        Self {
            messenger,
            port,
            active: true,
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Tear down now and report the result.
    pub fn close(mut self) -> Result<()> {
        self.active = false;
        self.messenger.cleanup(&self.port)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = self.messenger.cleanup(&self.port) {
                warn!("cleanup of '{}' on drop failed: {}", self.port, e);
            }
        }
    }
}
