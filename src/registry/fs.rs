//! Filesystem-backed receiver registry.
//!
//! Layout: `<root>/<port>/<pid>.json`, one document per registered receiver.
//! Every cooperating process must point at the same root.

use super::{ReceiverRegistry, RegisteredReceiver, RegistryPage};
use crate::error::{Error, Result};
use crate::packet::ProcessId;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct FsRegistry {
    root: PathBuf,
    page_size: usize,
}

impl FsRegistry {
    pub fn new(root: impl Into<PathBuf>, page_size: usize) -> Self {
        Self {
            root: root.into(),
            page_size: page_size.max(1),
        }
    }

    fn port_dir(&self, port: &str) -> PathBuf {
        self.root.join(port)
    }

    fn entry_path(&self, port: &str, pid: ProcessId) -> PathBuf {
        self.port_dir(port).join(format!("{}.json", pid))
    }

    fn load_entries(dir: &Path) -> Result<Vec<RegisteredReceiver>> {
        let listing = match fs::read_dir(dir) {
            Ok(listing) => listing,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Registry(e)),
        };
        let mut receivers = Vec::new();
        for entry in listing {
            let path = entry.map_err(Error::Registry)?.path();
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                // A concurrent cleanup may remove entries mid-listing.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::Registry(e)),
            };
            match serde_json::from_slice::<RegisteredReceiver>(&bytes) {
                Ok(receiver) => receivers.push(receiver),
                Err(e) => warn!("skipping unreadable registry entry {:?}: {}", path, e),
            }
        }
        // Deterministic order keeps page boundaries stable across reads.
        receivers.sort_by_key(|r| r.pid);
        Ok(receivers)
    }
}

impl ReceiverRegistry for FsRegistry {
    fn save(&self, port: &str, entry: RegisteredReceiver) -> Result<()> {
        let dir = self.port_dir(port);
        fs::create_dir_all(&dir).map_err(Error::Registry)?;
        let doc = serde_json::to_vec(&entry)
            .map_err(|e| Error::Registry(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        fs::write(self.entry_path(port, entry.pid), doc).map_err(Error::Registry)?;
        debug!("registered pid {} on port '{}'", entry.pid, port);
        Ok(())
    }

    fn read(&self, port: &str, page: usize) -> Result<RegistryPage> {
        let receivers = Self::load_entries(&self.port_dir(port))?;
        let total = receivers.len();
        let start = page.saturating_mul(self.page_size).min(total);
        let end = (start + self.page_size).min(total);
        Ok(RegistryPage {
            receivers: receivers[start..end].to_vec(),
            exhausted: end == total,
        })
    }

    fn remove(&self, port: &str, pid: ProcessId) -> Result<()> {
        match fs::remove_file(self.entry_path(port, pid)) {
            Ok(()) => {
                // Drop the directory once the last waiter leaves; harmless if
                // another process raced a new registration in.
                let _ = fs::remove_dir(self.port_dir(port));
                debug!("deregistered pid {} from port '{}'", pid, port);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Registry(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(page_size: usize) -> (tempfile::TempDir, FsRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = FsRegistry::new(dir.path(), page_size);
        (dir, registry)
    }

    #[test]
    fn save_then_read_round_trips() {
        let (_dir, registry) = registry(16);
        registry
            .save("svc", RegisteredReceiver { pid: 42, priority: 3 })
            .unwrap();

        let page = registry.read("svc", 0).unwrap();
        assert!(page.exhausted);
        assert_eq!(
            page.receivers,
            vec![RegisteredReceiver { pid: 42, priority: 3 }]
        );
    }

    #[test]
    fn unknown_port_reads_empty_and_exhausted() {
        let (_dir, registry) = registry(16);
        let page = registry.read("nobody", 0).unwrap();
        assert!(page.receivers.is_empty());
        assert!(page.exhausted);
    }

    #[test]
    fn paging_covers_every_entry_exactly_once() {
        let (_dir, registry) = registry(2);
        for pid in 1..=5 {
            registry
                .save("evt", RegisteredReceiver { pid, priority: 0 })
                .unwrap();
        }

        let mut seen = Vec::new();
        let mut page = 0;
        loop {
            let batch = registry.read("evt", page).unwrap();
            assert!(batch.receivers.len() <= 2);
            seen.extend(batch.receivers.iter().map(|r| r.pid));
            if batch.exhausted {
                break;
            }
            page += 1;
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        assert_eq!(page, 2);
    }

    #[test]
    fn remove_is_idempotent() {
        let (_dir, registry) = registry(16);
        registry
            .save("svc", RegisteredReceiver { pid: 7, priority: 0 })
            .unwrap();
        registry.remove("svc", 7).unwrap();
        registry.remove("svc", 7).unwrap();
        assert!(registry.read("svc", 0).unwrap().receivers.is_empty());
    }

    #[test]
    fn save_overwrites_existing_registration() {
        let (_dir, registry) = registry(16);
        registry
            .save("svc", RegisteredReceiver { pid: 7, priority: 0 })
            .unwrap();
        registry
            .save("svc", RegisteredReceiver { pid: 7, priority: 9 })
            .unwrap();

        let page = registry.read("svc", 0).unwrap();
        assert_eq!(page.receivers, vec![RegisteredReceiver { pid: 7, priority: 9 }]);
    }
}
