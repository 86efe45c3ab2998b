#![cfg(target_os = "linux")]

use anyhow::Result;
use msgport::{Config, Messenger, SendMode};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

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

#[tokio::test]
async fn multicast_reaches_every_subscriber_exactly_once() -> Result<()> {
    if !mqueue_available() {
        return Ok(());
    }
    let root = tempfile::tempdir()?;
    let port = format!("evt{}", std::process::id());
    let sender = peer(root.path(), 9200)?;

    // subscribe() returns only after the registry entry is saved, so once
    // all three guards exist the sender sees all three receivers.
    let mut receivers = Vec::new();
    let mut subscriptions = Vec::new();
    for identity in [9201, 9202, 9203] {
        let subscriber = peer(root.path(), identity)?;
        let (tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let subscription = subscriber.subscribe(&port, move |delivery| {
            let _ = tx.send(delivery.payload);
        })?;
        receivers.push(rx);
        subscriptions.push((subscriber, subscription));
    }

    let fanout = sender.send(&port, b"go", 0, SendMode::Multicast).await?;
    assert_eq!(fanout, 3);

    for rx in &mut receivers {
        let payload = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await?
            .expect("subscriber callback never fired");
        assert_eq!(payload, b"go");
    }

    // No duplicates: each callback fired exactly once.
    tokio::time::sleep(Duration::from_millis(200)).await;
    for rx in &mut receivers {
        assert!(rx.try_recv().is_err(), "subscriber saw a second delivery");
    }

    for (_, subscription) in subscriptions {
        subscription.close()?;
    }
    Ok(())
}

#[tokio::test]
async fn unicast_to_a_multicast_audience_is_rejected() -> Result<()> {
    if !mqueue_available() {
        return Ok(());
    }
    let root = tempfile::tempdir()?;
    let port = format!("dup{}", std::process::id());
    let sender = peer(root.path(), 9210)?;

    let first = peer(root.path(), 9211)?;
    let second = peer(root.path(), 9212)?;
    let _first_sub = first.subscribe(&port, |_| {})?;
    let _second_sub = second.subscribe(&port, |_| {})?;

    let err = sender
        .send(&port, b"hi", 0, SendMode::NoReply)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        msgport::Error::TooManyReceivers { count: 2, .. }
    ));
    Ok(())
}
