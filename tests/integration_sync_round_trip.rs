#![cfg(target_os = "linux")]

use anyhow::Result;
use msgport::{Config, Messenger, MsgType};
use std::path::Path;
use std::time::Duration;

/// Note: POSIX message queues may require specific kernel config and
/// permissions (mounted /dev/mqueue, RLIMIT_MSGQUEUE). These tests auto-skip
/// unless explicitly enabled via the environment and the mount is present.
fn mqueue_available() -> bool {
    if std::env::var("MSGPORT_RUN_PMQ").unwrap_or_default() != "1" {
        eprintln!("Skipping PMQ test: set MSGPORT_RUN_PMQ=1 to enable in this env");
        return false;
    }
    if !Path::new("/dev/mqueue").is_dir() {
        eprintln!("Skipping PMQ test: /dev/mqueue not present");
        return false;
    }
    true
}

fn peer(root: &Path, identity: u32) -> Result<Messenger> {
    Ok(Messenger::new(Config {
        registry_root: root.to_path_buf(),
        identity: Some(identity),
        ..Config::default()
    })?)
}

/// Ride out the registration race: the responder registers from a spawned
/// task, so the first requests may find nobody listening yet.
async fn send_sync_when_ready(
    messenger: &Messenger,
    port: &str,
    payload: &[u8],
) -> Result<Vec<u8>> {
    for _ in 0..500 {
        match messenger
            .send_sync(port, payload, 5, Some(Duration::from_secs(10)))
            .await
        {
            Ok(reply) => return Ok(reply),
            Err(msgport::Error::NoReceiver(_)) => {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
    anyhow::bail!("responder never registered on '{}'", port);
}

#[tokio::test]
async fn sync_request_receives_the_reply() -> Result<()> {
    if !mqueue_available() {
        return Ok(());
    }
    let root = tempfile::tempdir()?;
    let port = format!("svc{}", std::process::id());
    let requester = peer(root.path(), 9101)?;
    let responder = peer(root.path(), 9102)?;

    let responder_task = {
        let responder = responder.clone();
        let port = port.clone();
        tokio::spawn(async move {
            let request = responder.recv(&port).await?;
            assert_eq!(request.payload, b"ping");
            assert_eq!(request.msg_type, MsgType::ReplyRequired);
            responder.reply(&port, request.sender, b"pong").await?;
            anyhow::Ok(())
        })
    };

    let reply = send_sync_when_ready(&requester, &port, b"ping").await?;
    assert_eq!(reply, b"pong");
    responder_task.await??;

    // The reply queue dies with the exchange.
    let reply_name = msgport::naming::reply_queue(&port, requester.identity());
    let mqueue_path = format!("/dev/mqueue{}", reply_name);
    assert!(
        !Path::new(&mqueue_path).exists(),
        "reply queue survived the exchange"
    );
    Ok(())
}

#[tokio::test]
async fn sync_request_times_out_without_a_responder_reply() -> Result<()> {
    if !mqueue_available() {
        return Ok(());
    }
    let root = tempfile::tempdir()?;
    let port = format!("mute{}", std::process::id());
    let requester = peer(root.path(), 9111)?;
    let responder = peer(root.path(), 9112)?;

    // A subscriber that accepts the request but never replies.
    let _subscription = responder.subscribe(&port, |_delivery| {})?;

    let err = requester
        .send_sync(&port, b"ping", 0, Some(Duration::from_millis(200)))
        .await
        .unwrap_err();
    assert!(matches!(err, msgport::Error::Timeout(_)));

    responder.cleanup(&port)?;
    Ok(())
}
