//! Thin wrapper over POSIX message queues.
//!
//! Blocking `mq_*` syscalls only ever run inside `tokio::task::spawn_blocking`;
//! the descriptor crosses the boundary as a raw fd and is reconstructed with
//! `from_raw_fd` for the duration of the call. Queues are closed on drop;
//! unlinking the name is always the owner's explicit responsibility.

use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::mqueue::{
    mq_close, mq_getattr, mq_open, mq_receive, mq_send, mq_unlink, MQ_OFlag, MqAttr, MqdT,
};
use nix::sys::stat::Mode;
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Queue geometry fixed at creation time.
#[derive(Debug, Clone, Copy)]
pub struct QueueLimits {
    /// Maximum messages the queue holds before senders see `EAGAIN`.
    pub depth: usize,
    /// Maximum single-message size, header included.
    pub msg_size: usize,
}

/// Transmit retry budget when the destination queue is momentarily full.
const SEND_RETRIES: usize = 100;
const RETRY_CAP: Duration = Duration::from_millis(10);

/// An open POSIX message queue.
pub struct MessageQueue {
    name: String,
    mqd: Option<MqdT>,
    msg_size: usize,
}

impl MessageQueue {
    /// Open (creating if absent) the named queue for reading.
    pub fn create_reader(name: &str, limits: QueueLimits, nonblocking: bool) -> Result<Self> {
        let mut flags = MQ_OFlag::O_CREAT | MQ_OFlag::O_RDONLY;
        if nonblocking {
            flags |= MQ_OFlag::O_NONBLOCK;
        }
        let attr = MqAttr::new(0, limits.depth as i64, limits.msg_size as i64, 0);
        let mqd = mq_open(name, flags, Mode::S_IRUSR | Mode::S_IWUSR, Some(&attr))
            .map_err(|e| Error::queue(name, "open", e))?;
        // The queue may predate this open with different geometry; size the
        // receive buffer from what the kernel actually enforces.
        let msg_size = match mq_getattr(&mqd) {
            Ok(actual) => actual.msgsize() as usize,
            Err(_) => limits.msg_size,
        };
        debug!("opened receive queue '{}' with fd {:?}", name, mqd);
        Ok(Self {
            name: name.to_owned(),
            mqd: Some(mqd),
            msg_size,
        })
    }

    /// Open (creating if absent) the named queue for writing. Used for reply
    /// queues, where either end may arrive first.
    pub fn create_writer(name: &str, limits: QueueLimits) -> Result<Self> {
        let flags = MQ_OFlag::O_CREAT | MQ_OFlag::O_WRONLY | MQ_OFlag::O_NONBLOCK;
        let attr = MqAttr::new(0, limits.depth as i64, limits.msg_size as i64, 0);
        let mqd = mq_open(name, flags, Mode::S_IRUSR | Mode::S_IWUSR, Some(&attr))
            .map_err(|e| Error::queue(name, "open", e))?;
        debug!("opened reply queue '{}' for writing", name);
        Ok(Self {
            name: name.to_owned(),
            mqd: Some(mqd),
            msg_size: limits.msg_size,
        })
    }

    /// Open an existing queue write-only. Does not create: a missing name is
    /// reported as `ENOENT` for the caller to classify.
    pub fn open_writer(name: &str) -> Result<Self> {
        let flags = MQ_OFlag::O_WRONLY | MQ_OFlag::O_NONBLOCK;
        let mqd = mq_open(name, flags, Mode::empty(), None)
            .map_err(|e| Error::queue(name, "open", e))?;
        debug!("opened destination queue '{}'", name);
        Ok(Self {
            name: name.to_owned(),
            mqd: Some(mqd),
            msg_size: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn raw_fd(&self, op: &'static str) -> Result<i32> {
        self.mqd
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or_else(|| Error::queue(&self.name, op, Errno::EBADF))
    }

    /// Transmit one frame at the given priority, retrying briefly while the
    /// queue is full.
    pub async fn send(&self, frame: &[u8], priority: u32) -> Result<()> {
        let raw_fd = self.raw_fd("send")?;
        let name = self.name.clone();
        let data = frame.to_vec();
        let sent = tokio::task::spawn_blocking(move || {
            let fd = unsafe { MqdT::from_raw_fd(raw_fd) };
            let mut delay = Duration::from_millis(1);
            let mut outcome = Err(Errno::EAGAIN);
            for attempt in 0..SEND_RETRIES {
                outcome = mq_send(&fd, &data, priority);
                match outcome {
                    Err(Errno::EAGAIN) if attempt + 1 < SEND_RETRIES => {
                        std::thread::sleep(delay);
                        delay = (delay * 2).min(RETRY_CAP);
                    }
                    _ => break,
                }
            }
            std::mem::forget(fd); // the original descriptor stays open
            outcome
        })
        .await
        .map_err(|_| Error::queue(&self.name, "send", Errno::ECANCELED))?;
        sent.map_err(|e| Error::queue(&name, "send", e))?;
        debug!("sent {} bytes to '{}'", frame.len(), self.name);
        Ok(())
    }

    /// One blocking receive. The queue must have been opened blocking.
    pub async fn recv(&self) -> Result<(Vec<u8>, u32)> {
        let raw_fd = self.raw_fd("receive")?;
        let msg_size = self.msg_size;
        let name = self.name.clone();
        let received = tokio::task::spawn_blocking(move || {
            let fd = unsafe { MqdT::from_raw_fd(raw_fd) };
            let mut buffer = vec![0u8; msg_size];
            let mut priority = 0u32;
            let outcome = mq_receive(&fd, &mut buffer, &mut priority).map(|n| {
                buffer.truncate(n);
                (buffer, priority)
            });
            std::mem::forget(fd);
            outcome
        })
        .await
        .map_err(|_| Error::queue(&self.name, "receive", Errno::ECANCELED))?;
        received.map_err(|e| Error::queue(&name, "receive", e))
    }

    /// One non-blocking receive; `Ok(None)` when the queue is empty. The
    /// queue must have been opened non-blocking.
    pub fn try_recv_now(&self) -> Result<Option<(Vec<u8>, u32)>> {
        let raw_fd = self.raw_fd("receive")?;
        let fd = unsafe { MqdT::from_raw_fd(raw_fd) };
        let mut buffer = vec![0u8; self.msg_size];
        let mut priority = 0u32;
        let outcome = mq_receive(&fd, &mut buffer, &mut priority);
        std::mem::forget(fd);
        match outcome {
            Ok(n) => {
                buffer.truncate(n);
                Ok(Some((buffer, priority)))
            }
            Err(Errno::EAGAIN) => Ok(None),
            Err(e) => Err(Error::queue(&self.name, "receive", e)),
        }
    }

    /// Poll a non-blocking queue until a message arrives or the deadline
    /// passes. `Ok(None)` only on deadline expiry.
    pub async fn recv_polled(&self, limit: Option<Duration>) -> Result<Option<(Vec<u8>, u32)>> {
        let started = Instant::now();
        let mut delay = Duration::from_millis(1);
        loop {
            if let Some(message) = self.try_recv_now()? {
                return Ok(Some(message));
            }
            if let Some(limit) = limit {
                if started.elapsed() >= limit {
                    return Ok(None);
                }
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(RETRY_CAP);
        }
    }

    /// Messages currently queued.
    pub fn pending(&self) -> Result<i64> {
        let mqd = self
            .mqd
            .as_ref()
            .ok_or_else(|| Error::queue(&self.name, "getattr", Errno::EBADF))?;
        let attr = mq_getattr(mqd).map_err(|e| Error::queue(&self.name, "getattr", e))?;
        Ok(attr.curmsgs())
    }

    /// Remove a queue name. Unlinking a name that no longer exists succeeds;
    /// the queue itself lives on until every descriptor is closed.
    pub fn unlink(name: &str) -> Result<()> {
        match mq_unlink(name) {
            Ok(()) | Err(Errno::ENOENT) => Ok(()),
            Err(e) => Err(Error::queue(name, "unlink", e)),
        }
    }
}

impl Drop for MessageQueue {
    fn drop(&mut self) {
        if let Some(mqd) = self.mqd.take() {
            if let Err(e) = mq_close(mqd) {
                warn!("failed to close queue '{}': {}", self.name, e);
            } else {
                debug!("closed queue '{}'", self.name);
            }
        }
    }
}
