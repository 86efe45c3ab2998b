use nix::errno::Errno;
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong inside the messaging core.
///
/// The taxonomy separates expected, non-fatal outcomes (`NoReceiver`,
/// `TooManyReceivers`) from genuine I/O failures (`Queue`, `Registry`) so
/// callers can branch on them without string matching.
#[derive(Debug, Error)]
pub enum Error {
    /// Rejected at the call boundary; never reaches the queue layer.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No process is currently waiting on the target port. Expected and
    /// non-fatal, distinct from queue I/O failure.
    #[error("no receiver registered on port '{0}'")]
    NoReceiver(String),

    /// A unicast mode targeted a port with more than one waiter.
    #[error("port '{port}' has {count} receivers; unicast delivery requires exactly one")]
    TooManyReceivers { port: String, count: usize },

    /// The framing buffer could not be allocated.
    #[error("framing buffer allocation failed")]
    OutOfMemory,

    /// A receiver-registry save/read/remove failed. Not retried internally.
    #[error("receiver registry operation failed")]
    Registry(#[source] std::io::Error),

    /// A queue open/send/receive/close/unlink failed and is not otherwise
    /// classified.
    #[error("message queue '{name}': {op} failed")]
    Queue {
        name: String,
        op: &'static str,
        #[source]
        source: Errno,
    },

    /// The received bytes could not be decoded into a packet.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// Transmit failed after the destination queue was opened. The
    /// destination name has already been unlinked best-effort.
    #[error("transmit to queue '{0}' failed")]
    SendFailed(String),

    /// A synchronous request outlived its caller-supplied deadline.
    #[error("timed out waiting for a reply on port '{0}'")]
    Timeout(String),
}

impl Error {
    pub(crate) fn queue(name: &str, op: &'static str, source: Errno) -> Self {
        Error::Queue {
            name: name.to_owned(),
            op,
            source,
        }
    }
}
