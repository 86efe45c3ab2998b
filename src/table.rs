//! Process-wide table of live subscriptions.
//!
//! Both foreground calls (subscribe, cleanup) and reader tasks touch this
//! table, so it lives behind a mutex that is safe from either context.
//! Membership is keyed by `(queue_name, owner)`.

use crate::error::{Error, Result};
use crate::packet::ProcessId;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubscriptionKind {
    /// A non-blocking receive subscription on a receive queue.
    Receive,
    /// A one-shot reply subscription armed by an asynchronous send.
    OneShotReply,
}

pub(crate) struct SubscriptionRecord {
    pub port: String,
    pub queue_name: String,
    pub owner: ProcessId,
    pub kind: SubscriptionKind,
    /// Cancels the reader task that owns the queue descriptor and callback.
    pub stop: watch::Sender<bool>,
}

#[derive(Default)]
pub(crate) struct PortTable {
    entries: Mutex<HashMap<(String, ProcessId), SubscriptionRecord>>,
}

impl PortTable {
    /// Insert a record; a second subscription on the same queue is rejected
    /// rather than silently splitting messages between two readers.
    pub fn insert(&self, record: SubscriptionRecord) -> Result<()> {
        let key = (record.queue_name.clone(), record.owner);
        let mut entries = self.entries.lock();
        if entries.contains_key(&key) {
            return Err(Error::InvalidArgument(format!(
                "port '{}' already has a live subscription for identity {}",
                record.port, record.owner
            )));
        }
        entries.insert(key, record);
        Ok(())
    }

    pub fn contains(&self, queue_name: &str, owner: ProcessId) -> bool {
        self.entries
            .lock()
            .contains_key(&(queue_name.to_owned(), owner))
    }

    pub fn remove(&self, queue_name: &str, owner: ProcessId) -> Option<SubscriptionRecord> {
        self.entries
            .lock()
            .remove(&(queue_name.to_owned(), owner))
    }

    /// Remove and return every record for `(port, owner)` — a receive
    /// subscription, an armed one-shot reply, or both.
    pub fn take_by_port(&self, port: &str, owner: ProcessId) -> Vec<SubscriptionRecord> {
        let mut entries = self.entries.lock();
        let keys: Vec<_> = entries
            .iter()
            .filter(|(_, r)| r.port == port && r.owner == owner)
            .map(|(k, _)| k.clone())
            .collect();
        keys.into_iter()
            .filter_map(|k| entries.remove(&k))
            .collect()
    }

    /// Remove and return everything. Used when the owning messenger goes away.
    pub fn drain_all(&self) -> Vec<SubscriptionRecord> {
        self.entries.lock().drain().map(|(_, r)| r).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(port: &str, queue_name: &str, owner: ProcessId, kind: SubscriptionKind) -> SubscriptionRecord {
        let (stop, _) = watch::channel(false);
        SubscriptionRecord {
            port: port.to_owned(),
            queue_name: queue_name.to_owned(),
            owner,
            kind,
            stop,
        }
    }

    #[test]
    fn insert_then_remove() {
        let table = PortTable::default();
        table
            .insert(record("svc", "/svc.1", 1, SubscriptionKind::Receive))
            .unwrap();
        assert_eq!(table.len(), 1);

        let removed = table.remove("/svc.1", 1).unwrap();
        assert_eq!(removed.port, "svc");
        assert!(table.remove("/svc.1", 1).is_none());
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let table = PortTable::default();
        table
            .insert(record("svc", "/svc.1", 1, SubscriptionKind::Receive))
            .unwrap();
        let err = table
            .insert(record("svc", "/svc.1", 1, SubscriptionKind::Receive))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn take_by_port_matches_only_that_owner() {
        let table = PortTable::default();
        table
            .insert(record("svc", "/svc.1", 1, SubscriptionKind::Receive))
            .unwrap();
        table
            .insert(record("svc", "/svc.1.r", 1, SubscriptionKind::OneShotReply))
            .unwrap();
        table
            .insert(record("svc", "/svc.2", 2, SubscriptionKind::Receive))
            .unwrap();

        let taken = table.take_by_port("svc", 1);
        assert_eq!(taken.len(), 2);
        assert_eq!(table.len(), 1);
        assert!(table.take_by_port("svc", 1).is_empty());
    }
}
