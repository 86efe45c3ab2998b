//! Cross-process receiver registry.
//!
//! The registry is the directory senders consult to find which processes are
//! currently waiting on a port. The messaging core is only a client of it:
//! subscribe saves an entry, cleanup removes it, senders read pages.

use crate::error::Result;
use crate::packet::ProcessId;
use serde::{Deserialize, Serialize};

mod fs;

pub use fs::FsRegistry;

/// One registered receiver: who is waiting, and at what scheduling priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredReceiver {
    pub pid: ProcessId,
    pub priority: u32,
}

/// One page of a registry read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryPage {
    pub receivers: Vec<RegisteredReceiver>,
    /// False while further pages remain. Callers must keep reading,
    /// accumulating entries, until this is true.
    pub exhausted: bool,
}

/// The registry interface the messaging core consumes.
///
/// Implementations must be shareable across tasks and must page reads
/// deterministically: the same registry contents yield the same entries at
/// the same page indices. Failures surface as [`crate::Error::Registry`] and
/// are never retried by the core.
pub trait ReceiverRegistry: Send + Sync {
    /// Register `entry` as a waiter on `port`.
    fn save(&self, port: &str, entry: RegisteredReceiver) -> Result<()>;

    /// Read one page of registered receivers.
    fn read(&self, port: &str, page: usize) -> Result<RegistryPage>;

    /// Deregister `pid` from `port`. Removing an absent entry succeeds, which
    /// keeps cleanup idempotent.
    fn remove(&self, port: &str, pid: ProcessId) -> Result<()>;
}
