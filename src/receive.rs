//! Receive engine: blocking receive, non-blocking subscribe, and arming.
//!
//! A subscription moves through Draining (messages already queued are handed
//! to the callback before anything is armed), Armed (a reader task watches
//! the queue), Delivering (the reader drains and forwards), and Closed.

use crate::dispatch::{self, Delivery, DeliveryHandler, ReaderConfig};
use crate::error::Result;
use crate::messenger::{Messenger, Subscription};
use crate::naming;
use crate::packet;
use crate::queue::MessageQueue;
use crate::registry::RegisteredReceiver;
use crate::table::{SubscriptionKind, SubscriptionRecord};
use tokio::sync::watch;
use tracing::{debug, warn};

impl Messenger {
    /// Block until one message arrives on `port`.
    ///
    /// Single-shot: the receive queue is created for this call and destroyed
    /// when it returns, success or failure. A caller that wants a standing
    /// subscription uses [`subscribe`](Messenger::subscribe) instead.
    pub async fn recv(&self, port: &str) -> Result<Delivery> {
        naming::validate(port)?;
        let queue_name = naming::receive_queue(port, self.shared.identity);
        let queue = MessageQueue::create_reader(&queue_name, self.limits(), false)?;

        if let Err(e) = self.register(port) {
            drop(queue);
            let _ = MessageQueue::unlink(&queue_name);
            return Err(e);
        }

        let outcome = queue.recv().await;

        // The queue and registration die with this call; the entry must not
        // advertise a receiver whose queue is gone.
        if let Err(e) = self.shared.registry.remove(port, self.shared.identity) {
            warn!("failed to deregister from '{}': {}", port, e);
        }
        drop(queue);
        if let Err(e) = MessageQueue::unlink(&queue_name) {
            warn!("failed to unlink '{}': {}", queue_name, e);
        }

        let (bytes, _priority) = outcome?;
        let packet = packet::decode(&bytes)?;
        debug!(
            "received {} bytes from {} on '{}'",
            packet.payload.len(),
            packet.sender,
            port
        );
        Ok(Delivery {
            port: port.to_owned(),
            sender: packet.sender,
            msg_type: packet.msg_type,
            payload: packet.payload,
        })
    }

    /// Begin a non-blocking subscription on `port`.
    ///
    /// Messages that arrived between queue creation and this call are drained
    /// into `callback` synchronously before the subscription is armed, so
    /// nothing is lost to the gap. Afterwards `callback` runs on the shared
    /// dispatch task, one delivery at a time, until the returned guard is
    /// dropped or [`cleanup`](Messenger::cleanup) runs.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn subscribe(
        &self,
        port: &str,
        callback: impl Fn(Delivery) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        naming::validate(port)?;
        let handler: DeliveryHandler = std::sync::Arc::new(callback);
        let queue_name = naming::receive_queue(port, self.shared.identity);
        // A second reader on the same queue would silently split messages
        // with the first; refuse before touching the queue or registry.
        if self.shared.table.contains(&queue_name, self.shared.identity) {
            return Err(crate::Error::InvalidArgument(format!(
                "port '{}' already has a live subscription for identity {}",
                port, self.shared.identity
            )));
        }
        let queue = MessageQueue::create_reader(&queue_name, self.limits(), true)?;

        if let Err(e) = self.register(port) {
            drop(queue);
            let _ = MessageQueue::unlink(&queue_name);
            return Err(e);
        }

        // Draining: the queue may predate this subscription.
        let backlog = queue.pending().unwrap_or(0);
        if backlog > 0 {
            debug!("draining {} queued message(s) on '{}'", backlog, queue_name);
        }
        loop {
            match queue.try_recv_now() {
                Ok(Some((bytes, _priority))) => match packet::decode(&bytes) {
                    Ok(packet) => handler(Delivery {
                        port: port.to_owned(),
                        sender: packet.sender,
                        msg_type: packet.msg_type,
                        payload: packet.payload,
                    }),
                    Err(e) => warn!("dropping undecodable message on '{}': {}", queue_name, e),
                },
                Ok(None) => break,
                Err(e) => {
                    self.unwind_subscription(port, &queue_name);
                    return Err(e);
                }
            }
        }

        // Armed.
        let (stop_tx, stop_rx) = watch::channel(false);
        let record = SubscriptionRecord {
            port: port.to_owned(),
            queue_name: queue_name.clone(),
            owner: self.shared.identity,
            kind: SubscriptionKind::Receive,
            stop: stop_tx,
        };
        if let Err(e) = self.shared.table.insert(record) {
            // A racing subscribe won the key: its queue and registration must
            // survive, so only this handle goes away.
            drop(queue);
            return Err(e);
        }
        dispatch::spawn_reader(ReaderConfig {
            port: port.to_owned(),
            queue,
            handler,
            one_shot: false,
            owner: self.shared.identity,
            dispatch: self.shared.dispatch.clone(),
            stop: stop_rx,
            table: self.shared.table.clone(),
        });
        debug!("subscribed to '{}' as {}", port, self.shared.identity);
        Ok(Subscription::new(self.clone(), port.to_owned()))
    }

    /// Arm a one-shot subscription on this process's reply queue for `port`.
    /// The first `Reply` message tears it down. Returns the queue name so a
    /// failed send can disarm it again.
    pub(crate) fn arm_one_shot_reply(
        &self,
        port: &str,
        handler: DeliveryHandler,
    ) -> Result<String> {
        let queue_name = naming::reply_queue(port, self.shared.identity);
        // One in-flight asynchronous request per port: a second armed reply
        // subscription would race the first for the same queue.
        if self.shared.table.contains(&queue_name, self.shared.identity) {
            return Err(crate::Error::InvalidArgument(format!(
                "port '{}' already has an asynchronous request in flight",
                port
            )));
        }
        let queue = MessageQueue::create_reader(&queue_name, self.limits(), true)?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let record = SubscriptionRecord {
            port: port.to_owned(),
            queue_name: queue_name.clone(),
            owner: self.shared.identity,
            kind: SubscriptionKind::OneShotReply,
            stop: stop_tx,
        };
        if let Err(e) = self.shared.table.insert(record) {
            drop(queue);
            return Err(e);
        }
        dispatch::spawn_reader(ReaderConfig {
            port: port.to_owned(),
            queue,
            handler,
            one_shot: true,
            owner: self.shared.identity,
            dispatch: self.shared.dispatch.clone(),
            stop: stop_rx,
            table: self.shared.table.clone(),
        });
        debug!("armed one-shot reply subscription '{}'", queue_name);
        Ok(queue_name)
    }

    /// Undo a just-armed one-shot reply subscription after a failed send.
    pub(crate) fn disarm_reply(&self, queue_name: &str) {
        if let Some(record) = self.shared.table.remove(queue_name, self.shared.identity) {
            let _ = record.stop.send(true);
        }
        if let Err(e) = MessageQueue::unlink(queue_name) {
            warn!("failed to unlink '{}': {}", queue_name, e);
        }
    }

    fn register(&self, port: &str) -> Result<()> {
        self.shared.registry.save(
            port,
            RegisteredReceiver {
                pid: self.shared.identity,
                priority: self.shared.config.receiver_priority,
            },
        )
    }

    fn unwind_subscription(&self, port: &str, queue_name: &str) {
        if let Err(e) = self.shared.registry.remove(port, self.shared.identity) {
            warn!("failed to deregister from '{}': {}", port, e);
        }
        if let Err(e) = MessageQueue::unlink(queue_name) {
            warn!("failed to unlink '{}': {}", queue_name, e);
        }
    }
}
