//! Queue-name derivation for logical ports.
//!
//! A logical port maps to two OS-level queue names that must never collide:
//! the receive queue a subscriber owns, and the reply queue a requester owns
//! while it awaits exactly one reply. Both embed the owning identity; the
//! reply form carries a reserved `.r` suffix.

use crate::defaults;
use crate::error::{Error, Result};
use crate::packet::ProcessId;

/// Check a caller-supplied port name.
///
/// Names are 1..=`MAX_PORT_NAME` bytes from `[A-Za-z0-9_-]`. The restricted
/// charset keeps the derived queue names unambiguous: a `.` can only be a
/// separator, so `receive_queue` and `reply_queue` outputs cannot collide
/// across ports or identities.
pub fn validate(port: &str) -> Result<()> {
    if port.is_empty() {
        return Err(Error::InvalidArgument("port name is empty".to_owned()));
    }
    if port.len() > defaults::MAX_PORT_NAME {
        return Err(Error::InvalidArgument(format!(
            "port name is {} bytes, limit is {}",
            port.len(),
            defaults::MAX_PORT_NAME
        )));
    }
    if !port
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(Error::InvalidArgument(format!(
            "port name '{}' contains characters outside [A-Za-z0-9_-]",
            port
        )));
    }
    Ok(())
}

/// The OS-level queue a given process owns for a given logical port.
pub fn receive_queue(port: &str, owner: ProcessId) -> String {
    format!("/{}.{}", port, owner)
}

/// The OS-level queue a requester owns to await exactly one reply.
pub fn reply_queue(port: &str, requester: ProcessId) -> String {
    format!("/{}.{}.r", port, requester)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        assert_eq!(receive_queue("svc", 123), "/svc.123");
        assert_eq!(reply_queue("svc", 123), "/svc.123.r");
    }

    #[test]
    fn receive_and_reply_names_never_collide() {
        // The historical concatenation scheme confused ("svc1", 23) with
        // ("svc", 123); the separator keeps them apart.
        assert_ne!(receive_queue("svc1", 23), receive_queue("svc", 123));
        assert_ne!(receive_queue("svc", 123), reply_queue("svc", 123));
    }

    #[test]
    fn validation_accepts_reasonable_names() {
        assert!(validate("svc").is_ok());
        assert!(validate("audio-sink_2").is_ok());
    }

    #[test]
    fn validation_rejects_bad_names() {
        assert!(matches!(validate(""), Err(Error::InvalidArgument(_))));
        assert!(matches!(validate("a/b"), Err(Error::InvalidArgument(_))));
        assert!(matches!(validate("a.b"), Err(Error::InvalidArgument(_))));
        let long = "p".repeat(defaults::MAX_PORT_NAME + 1);
        assert!(matches!(validate(&long), Err(Error::InvalidArgument(_))));
    }
}
