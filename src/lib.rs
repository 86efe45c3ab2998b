//! # msgport
//!
//! Port-addressed asynchronous message passing over POSIX message queues.
//!
//! Processes rendezvous on named logical **ports** and exchange framed
//! messages in four delivery modes:
//!
//! - **Fire-and-forget**: one message to exactly one receiver, no reply.
//! - **Synchronous request/reply**: the sender blocks (optionally bounded by
//!   a timeout) until the responder's reply lands on a private reply queue.
//! - **Asynchronous request/reply**: the single reply is delivered to a
//!   callback, exactly once.
//! - **Multicast**: one message fans out to every receiver registered on the
//!   port at the moment of the send.
//!
//! Receiver discovery goes through a cross-process **receiver registry**
//! ([`ReceiverRegistry`]); the default implementation keeps one JSON document
//! per waiter under a shared filesystem root. Delivery for non-blocking
//! subscriptions runs on background Tokio tasks: one reader per armed queue,
//! all callbacks serialized through a single dispatch task.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use msgport::{Config, Messenger, SendMode};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let messenger = Messenger::new(Config::default())?;
//!
//!     // Standing subscription: the callback runs for every delivery until
//!     // the guard drops.
//!     let subscription = messenger.subscribe("events", |delivery| {
//!         println!("{} bytes from {}", delivery.payload.len(), delivery.sender);
//!     })?;
//!
//!     // Elsewhere: fan a message out to every subscriber of "events".
//!     let fanout = messenger.send("events", b"go", 0, SendMode::Multicast).await?;
//!     println!("reached {} receivers", fanout);
//!
//!     subscription.close()?;
//!     Ok(())
//! }
//! ```
//!
//! Queues, registry entries, and reader tasks created by a subscription are
//! torn down by [`Messenger::cleanup`], by dropping the [`Subscription`]
//! guard, or when the last messenger handle goes away - whichever comes
//! first; later teardowns are no-ops.

/// Command-line argument parsing for the `msgport` binary.
pub mod cli;

/// Colorized log formatting for interactive use.
pub mod logging;

/// Queue-name derivation for logical ports.
pub mod naming;

/// Receiver registry: the cross-process directory of waiting receivers.
pub mod registry;

mod dispatch;
mod error;
mod messenger;
mod packet;
mod queue;
mod receive;
mod send;
mod table;

pub use dispatch::{Delivery, DeliveryHandler};
pub use error::{Error, Result};
pub use messenger::{Config, Messenger, Subscription};
pub use packet::{MsgType, ProcessId, HEADER_SIZE};
pub use registry::{FsRegistry, ReceiverRegistry, RegisteredReceiver, RegistryPage};
pub use send::SendMode;

/// The current version of the crate, from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Deploy-time constants. [`Config`] starts from these; every cooperating
/// process must agree on the registry root and message geometry.
pub mod defaults {
    /// Maximum messages a queue holds before senders back off.
    pub const QUEUE_DEPTH: usize = 10;

    /// Upper bound on header plus payload for one message, in bytes.
    pub const MAX_MESSAGE_SIZE: usize = 8192;

    /// Longest accepted logical port name, in bytes.
    pub const MAX_PORT_NAME: usize = 63;

    /// Receivers returned per receiver-registry page.
    pub const REGISTRY_PAGE_SIZE: usize = 16;

    /// Highest caller-suppliable send priority. POSIX guarantees 32 levels;
    /// the top one is reserved for replies.
    pub const MAX_PRIORITY: u32 = 30;

    /// Replies ride above any request priority.
    pub const REPLY_PRIORITY: u32 = 31;

    /// Shared filesystem root for the default receiver registry.
    pub const REGISTRY_ROOT: &str = "/tmp/msgport-registry";
}
