//! Send engine: receiver resolution, framing, fan-out, and transmit.

use crate::defaults;
use crate::dispatch::DeliveryHandler;
use crate::error::{Error, Result};
use crate::messenger::Messenger;
use crate::naming;
use crate::packet::{self, MsgType, ProcessId, HEADER_SIZE};
use crate::queue::MessageQueue;
use crate::registry::{ReceiverRegistry, RegisteredReceiver};
use nix::errno::Errno;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Delivery mode for [`Messenger::send`].
pub enum SendMode {
    /// Fire-and-forget to exactly one receiver.
    NoReply,
    /// Request half of a synchronous exchange. [`Messenger::send_sync`] is
    /// the usual entry point; sending `Sync` directly transmits the request
    /// without awaiting the reply.
    Sync,
    /// Request whose single reply is delivered to the callback, exactly once.
    Async(DeliveryHandler),
    /// Fan out to every receiver currently registered on the port.
    Multicast,
}

impl SendMode {
    fn label(&self) -> &'static str {
        match self {
            SendMode::NoReply => "no-reply",
            SendMode::Sync => "sync",
            SendMode::Async(_) => "async",
            SendMode::Multicast => "multicast",
        }
    }
}

impl fmt::Debug for SendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Page through the registry until it reports exhaustion, merging every page.
/// A single page is only a window; receivers beyond the first page are just
/// as much targets as those on it.
pub(crate) fn collect_receivers(
    registry: &dyn ReceiverRegistry,
    port: &str,
) -> Result<Vec<RegisteredReceiver>> {
    let mut receivers = Vec::new();
    let mut page = 0;
    loop {
        let batch = registry.read(port, page)?;
        receivers.extend(batch.receivers);
        if batch.exhausted {
            return Ok(receivers);
        }
        page += 1;
    }
}

fn check_send_args(port: &str, payload: &[u8], priority: u32, max_message_size: usize) -> Result<()> {
    naming::validate(port)?;
    if payload.is_empty() {
        return Err(Error::InvalidArgument("payload is empty".to_owned()));
    }
    if HEADER_SIZE + payload.len() > max_message_size {
        return Err(Error::InvalidArgument(format!(
            "payload of {} bytes exceeds the {}-byte message limit",
            payload.len(),
            max_message_size - HEADER_SIZE
        )));
    }
    if priority > defaults::MAX_PRIORITY {
        return Err(Error::InvalidArgument(format!(
            "priority {} exceeds the maximum of {}",
            priority,
            defaults::MAX_PRIORITY
        )));
    }
    Ok(())
}

impl Messenger {
    /// Deliver `payload` to the receivers of `port` and return the fan-out
    /// count.
    ///
    /// Unicast modes (everything but `Multicast`) require exactly one
    /// registered receiver: zero is [`Error::NoReceiver`], more than one is
    /// [`Error::TooManyReceivers`]. Multicast targets the full set registered
    /// at the moment of the send.
    pub async fn send(
        &self,
        port: &str,
        payload: &[u8],
        priority: u32,
        mode: SendMode,
    ) -> Result<usize> {
        check_send_args(port, payload, priority, self.shared.config.max_message_size)?;

        let receivers = collect_receivers(self.shared.registry.as_ref(), port)?;
        let multicast = matches!(mode, SendMode::Multicast);
        if !multicast && receivers.len() > 1 {
            return Err(Error::TooManyReceivers {
                port: port.to_owned(),
                count: receivers.len(),
            });
        }
        if receivers.is_empty() {
            return Err(Error::NoReceiver(port.to_owned()));
        }
        debug!(
            "sending {} bytes on '{}' ({}, {} receiver(s))",
            payload.len(),
            port,
            mode.label(),
            receivers.len()
        );

        let msg_type = match mode {
            SendMode::NoReply => MsgType::NoReply,
            _ => MsgType::ReplyRequired,
        };
        let frame = packet::encode(self.shared.identity, msg_type, payload)?;

        // Arm the reply subscription before the request leaves: a fast
        // responder must find the reply queue armed.
        let mut armed_reply = None;
        if let SendMode::Async(handler) = &mode {
            armed_reply = Some(self.arm_one_shot_reply(port, handler.clone())?);
        }

        let mut delivered = 0;
        for receiver in &receivers {
            if let Err(e) = self.transmit_to(port, receiver.pid, &frame, priority).await {
                if let Some(reply_queue) = armed_reply.as_deref() {
                    self.disarm_reply(reply_queue);
                }
                return Err(e);
            }
            delivered += 1;
        }
        Ok(delivered)
    }

    async fn transmit_to(
        &self,
        port: &str,
        target: ProcessId,
        frame: &[u8],
        priority: u32,
    ) -> Result<()> {
        let queue_name = naming::receive_queue(port, target);
        let queue = match MessageQueue::open_writer(&queue_name) {
            // A registered receiver without a live queue is the expected
            // "nobody is listening" outcome, not an I/O failure.
            Err(Error::Queue {
                source: Errno::ENOENT,
                ..
            }) => return Err(Error::NoReceiver(port.to_owned())),
            Err(e) => return Err(e),
            Ok(queue) => queue,
        };
        if let Err(e) = queue.send(frame, priority).await {
            warn!("transmit to '{}' failed: {}", queue_name, e);
            drop(queue);
            if let Err(unlink_err) = MessageQueue::unlink(&queue_name) {
                warn!(
                    "failed to unlink '{}' after send failure: {}",
                    queue_name, unlink_err
                );
            }
            return Err(Error::SendFailed(queue_name));
        }
        Ok(())
        // The write handle closes here; an armed reply subscription stays.
    }

    /// Send a request and block until the reply arrives on this process's
    /// reply queue, which exists only for the duration of the call.
    ///
    /// A `None` timeout waits forever, matching the historical behavior of
    /// synchronous messaging stacks of this shape; supplying one turns a
    /// silent responder into [`Error::Timeout`].
    pub async fn send_sync(
        &self,
        port: &str,
        payload: &[u8],
        priority: u32,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>> {
        check_send_args(port, payload, priority, self.shared.config.max_message_size)?;
        let reply_name = naming::reply_queue(port, self.shared.identity);
        let reply_queue = MessageQueue::create_reader(&reply_name, self.limits(), true)?;

        let outcome = self
            .sync_exchange(port, payload, priority, timeout, &reply_queue)
            .await;

        // The reply queue dies with this call, success or failure.
        drop(reply_queue);
        if let Err(e) = MessageQueue::unlink(&reply_name) {
            warn!("failed to unlink reply queue '{}': {}", reply_name, e);
        }
        outcome
    }

    async fn sync_exchange(
        &self,
        port: &str,
        payload: &[u8],
        priority: u32,
        timeout: Option<Duration>,
        reply_queue: &MessageQueue,
    ) -> Result<Vec<u8>> {
        self.send(port, payload, priority, SendMode::Sync).await?;
        let (bytes, _priority) = reply_queue
            .recv_polled(timeout)
            .await?
            .ok_or_else(|| Error::Timeout(port.to_owned()))?;
        let packet = packet::decode(&bytes)?;
        debug!(
            "reply of {} bytes from {} on '{}'",
            packet.payload.len(),
            packet.sender,
            port
        );
        Ok(packet.payload)
    }

    /// Send a request whose reply is delivered asynchronously to `callback`,
    /// exactly once. The caller must [`cleanup`](Messenger::cleanup) the port
    /// if it abandons the exchange before the reply arrives.
    pub async fn send_async(
        &self,
        port: &str,
        payload: &[u8],
        priority: u32,
        callback: impl Fn(crate::Delivery) + Send + Sync + 'static,
    ) -> Result<()> {
        let handler: DeliveryHandler = Arc::new(callback);
        self.send(port, payload, priority, SendMode::Async(handler))
            .await
            .map(|_| ())
    }

    /// Send a reply to the process that issued a `ReplyRequired` request.
    /// Fire-and-forget: replies ride at a fixed elevated priority and carry
    /// no delivery confirmation.
    pub async fn reply(&self, port: &str, requester: ProcessId, payload: &[u8]) -> Result<()> {
        naming::validate(port)?;
        if payload.is_empty() {
            return Err(Error::InvalidArgument("payload is empty".to_owned()));
        }
        if HEADER_SIZE + payload.len() > self.shared.config.max_message_size {
            return Err(Error::InvalidArgument(format!(
                "payload of {} bytes exceeds the {}-byte message limit",
                payload.len(),
                self.shared.config.max_message_size - HEADER_SIZE
            )));
        }
        let reply_name = naming::reply_queue(port, requester);
        // Created if absent: the requester may not have opened it yet.
        let queue = MessageQueue::create_writer(&reply_name, self.limits())?;
        let frame = packet::encode(self.shared.identity, MsgType::Reply, payload)?;
        queue.send(&frame, defaults::REPLY_PRIORITY).await?;
        debug!("replied to {} on '{}'", requester, port);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messenger::Config;
    use crate::registry::FsRegistry;

    fn messenger_with_entries(entries: &[ProcessId]) -> (tempfile::TempDir, Messenger) {
        let dir = tempfile::tempdir().unwrap();
        let registry = FsRegistry::new(dir.path(), 2);
        for &pid in entries {
            registry
                .save("svc", RegisteredReceiver { pid, priority: 0 })
                .unwrap();
        }
        let config = Config {
            registry_root: dir.path().to_path_buf(),
            registry_page_size: 2,
            identity: Some(1),
            ..Config::default()
        };
        let messenger = Messenger::with_registry(config, Box::new(registry)).unwrap();
        (dir, messenger)
    }

    #[test]
    fn receivers_accumulate_across_pages() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FsRegistry::new(dir.path(), 2);
        for pid in 1..=5 {
            registry
                .save("evt", RegisteredReceiver { pid, priority: 0 })
                .unwrap();
        }

        let receivers = collect_receivers(&registry, "evt").unwrap();
        let pids: Vec<_> = receivers.iter().map(|r| r.pid).collect();
        assert_eq!(pids, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn unicast_with_no_receiver_fails_fast() {
        let (_dir, messenger) = messenger_with_entries(&[]);
        let err = messenger
            .send("svc", b"hi", 0, SendMode::NoReply)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoReceiver(_)));
    }

    #[tokio::test]
    async fn unicast_with_two_receivers_is_rejected() {
        let (_dir, messenger) = messenger_with_entries(&[10, 11]);
        let err = messenger
            .send("svc", b"hi", 0, SendMode::Sync)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TooManyReceivers { count: 2, .. }));
    }

    #[tokio::test]
    async fn empty_payload_is_rejected_at_the_boundary() {
        let (_dir, messenger) = messenger_with_entries(&[10]);
        let err = messenger
            .send("svc", b"", 0, SendMode::NoReply)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn oversized_priority_is_rejected() {
        let (_dir, messenger) = messenger_with_entries(&[10]);
        let err = messenger
            .send("svc", b"hi", defaults::MAX_PRIORITY + 1, SendMode::NoReply)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
