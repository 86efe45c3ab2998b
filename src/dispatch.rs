//! Asynchronous delivery.
//!
//! Arming a subscription spawns a reader task that owns the queue descriptor
//! and the user callback. Readers never invoke callbacks themselves: decoded
//! messages flow over a channel to a single dispatcher task, so no two
//! callbacks ever run concurrently. Cancellation arrives on a watch channel;
//! a cancelled reader closes its queue and leaves the name for cleanup to
//! unlink.

use crate::packet::{self, MsgType, ProcessId};
use crate::queue::MessageQueue;
use crate::table::PortTable;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

/// A decoded message handed to a subscription callback.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Logical port the message arrived on.
    pub port: String,
    /// Identity of the sending process.
    pub sender: ProcessId,
    pub msg_type: MsgType,
    pub payload: Vec<u8>,
}

/// User callback invoked by the dispatcher for each delivery.
pub type DeliveryHandler = Arc<dyn Fn(Delivery) + Send + Sync>;

pub(crate) struct DispatchItem {
    pub handler: DeliveryHandler,
    pub delivery: Delivery,
}

const DISPATCH_QUEUE_DEPTH: usize = 1000;
const IDLE_CAP: Duration = Duration::from_millis(10);

/// Start the dispatcher. It runs until the last sender (messenger or reader)
/// is gone.
pub(crate) fn spawn_dispatcher() -> mpsc::Sender<DispatchItem> {
    let (tx, mut rx) = mpsc::channel::<DispatchItem>(DISPATCH_QUEUE_DEPTH);
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            (item.handler)(item.delivery);
        }
        debug!("dispatcher stopped");
    });
    tx
}

pub(crate) struct ReaderConfig {
    pub port: String,
    pub queue: MessageQueue,
    pub handler: DeliveryHandler,
    /// True for reply subscriptions armed by an asynchronous send: the first
    /// `Reply` tears the subscription down.
    pub one_shot: bool,
    pub owner: ProcessId,
    pub dispatch: mpsc::Sender<DispatchItem>,
    pub stop: watch::Receiver<bool>,
    pub table: Arc<PortTable>,
}

pub(crate) fn spawn_reader(config: ReaderConfig) {
    tokio::spawn(reader_loop(config));
}

/// The armed wait: drain whatever is queued, hand each message to the
/// dispatcher, then back off until the next message or cancellation.
async fn reader_loop(mut config: ReaderConfig) {
    let mut idle_delay = Duration::from_millis(1);
    loop {
        match config.queue.try_recv_now() {
            Ok(Some((bytes, _priority))) => {
                idle_delay = Duration::from_millis(1);
                let packet = match packet::decode(&bytes) {
                    Ok(packet) => packet,
                    Err(e) => {
                        warn!(
                            "dropping undecodable message on '{}': {}",
                            config.queue.name(),
                            e
                        );
                        continue;
                    }
                };
                let ends_subscription = config.one_shot && packet.msg_type == MsgType::Reply;
                let item = DispatchItem {
                    handler: config.handler.clone(),
                    delivery: Delivery {
                        port: config.port.clone(),
                        sender: packet.sender,
                        msg_type: packet.msg_type,
                        payload: packet.payload,
                    },
                };
                if config.dispatch.send(item).await.is_err() {
                    // Dispatcher gone: the process is tearing down.
                    config.table.remove(config.queue.name(), config.owner);
                    return;
                }
                if ends_subscription {
                    config.table.remove(config.queue.name(), config.owner);
                    let name = config.queue.name().to_owned();
                    drop(config.queue);
                    if let Err(e) = MessageQueue::unlink(&name) {
                        warn!("failed to unlink reply queue '{}': {}", name, e);
                    }
                    debug!("one-shot reply subscription on '{}' completed", name);
                    return;
                }
            }
            Ok(None) => {
                tokio::select! {
                    changed = config.stop.changed() => {
                        if changed.is_err() || *config.stop.borrow() {
                            debug!("reader for '{}' cancelled", config.queue.name());
                            return;
                        }
                    }
                    _ = tokio::time::sleep(idle_delay) => {
                        idle_delay = (idle_delay * 2).min(IDLE_CAP);
                    }
                }
            }
            Err(e) => {
                // Terminal: the subscription silently stops receiving.
                error!(
                    "receive failed on '{}', subscription closed: {}",
                    config.queue.name(),
                    e
                );
                config.table.remove(config.queue.name(), config.owner);
                return;
            }
        }
        if *config.stop.borrow() {
            debug!("reader for '{}' cancelled", config.queue.name());
            return;
        }
    }
}
