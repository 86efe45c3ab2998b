//! # msgport - Command-Line Interface
//!
//! Drives the messaging core from the shell: subscribe to a port, fire a
//! message at it, run a synchronous request, or serve one request and reply.
//! Every invocation is one peer; point several terminals at the same
//! `--registry-root` to watch messages cross process boundaries.

use anyhow::Result;
use clap::Parser;
use msgport::{
    cli::{Args, Command},
    logging::LevelTagFormatter,
    Config, Messenger, MsgType, SendMode,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_logging(args: &Args) {
    // RUST_LOG still wins unless -v asked for the crate's debug stream.
    let filter = if args.verbose {
        EnvFilter::new("msgport=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    if args.color {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .event_format(LevelTagFormatter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let config = Config {
        registry_root: args.registry_root.clone(),
        identity: args.identity,
        ..Config::default()
    };
    let messenger = Messenger::new(config)?;
    info!("peer identity {}", messenger.identity());

    match args.command {
        Command::Listen { port } => {
            let subscription = messenger.subscribe(&port, |delivery| {
                info!(
                    "[{}] {} bytes from {}: {}",
                    delivery.port,
                    delivery.payload.len(),
                    delivery.sender,
                    String::from_utf8_lossy(&delivery.payload)
                );
            })?;
            info!("listening on '{}', ctrl-c to stop", port);
            tokio::signal::ctrl_c().await?;
            subscription.close()?;
        }
        Command::Send {
            port,
            payload,
            priority,
            multicast,
        } => {
            let mode = if multicast {
                SendMode::Multicast
            } else {
                SendMode::NoReply
            };
            let fanout = messenger
                .send(&port, payload.as_bytes(), priority, mode)
                .await?;
            info!("delivered to {} receiver(s) on '{}'", fanout, port);
        }
        Command::Request {
            port,
            payload,
            priority,
            timeout,
        } => {
            let reply = messenger
                .send_sync(&port, payload.as_bytes(), priority, timeout)
                .await?;
            println!("{}", String::from_utf8_lossy(&reply));
        }
        Command::Respond { port, reply } => {
            info!("waiting for one request on '{}'", port);
            let delivery = messenger.recv(&port).await?;
            info!(
                "request from {}: {}",
                delivery.sender,
                String::from_utf8_lossy(&delivery.payload)
            );
            if delivery.msg_type == MsgType::ReplyRequired {
                messenger
                    .reply(&port, delivery.sender, reply.as_bytes())
                    .await?;
                info!("replied to {}", delivery.sender);
            } else {
                info!("sender did not ask for a reply");
            }
        }
    }
    Ok(())
}
