//! Wire framing for port messages.
//!
//! Every message carries a fixed 8-byte header followed by the opaque
//! payload. Both fields are host byte order: queues never leave the machine.

use crate::error::{Error, Result};

/// Fixed header size; independent of payload length.
pub const HEADER_SIZE: usize = 8;

/// Identity of a peer, normally its OS process id.
pub type ProcessId = u32;

/// Message-type tag carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MsgType {
    /// Fire-and-forget; the receiver must not reply.
    NoReply = 0,
    /// The sender expects exactly one reply on its reply queue.
    ReplyRequired = 1,
    /// A reply travelling back to a requester's reply queue.
    Reply = 2,
}

impl MsgType {
    fn from_wire(tag: u32) -> Result<Self> {
        match tag {
            0 => Ok(MsgType::NoReply),
            1 => Ok(MsgType::ReplyRequired),
            2 => Ok(MsgType::Reply),
            other => Err(Error::MalformedPacket(format!(
                "unknown message-type tag {}",
                other
            ))),
        }
    }
}

/// A decoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub sender: ProcessId,
    pub msg_type: MsgType,
    pub payload: Vec<u8>,
}

/// Frame a payload for transmission. Total length is `HEADER_SIZE` plus the
/// payload length.
pub fn encode(sender: ProcessId, msg_type: MsgType, payload: &[u8]) -> Result<Vec<u8>> {
    let mut frame = Vec::new();
    frame
        .try_reserve_exact(HEADER_SIZE + payload.len())
        .map_err(|_| Error::OutOfMemory)?;
    frame.extend_from_slice(&sender.to_ne_bytes());
    frame.extend_from_slice(&(msg_type as u32).to_ne_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Decode a received frame. Fails if the frame is shorter than the header
/// or carries an unknown type tag.
pub fn decode(bytes: &[u8]) -> Result<Packet> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::MalformedPacket(format!(
            "{} bytes is shorter than the {}-byte header",
            bytes.len(),
            HEADER_SIZE
        )));
    }
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[0..4]);
    let sender = u32::from_ne_bytes(word);
    word.copy_from_slice(&bytes[4..8]);
    let msg_type = MsgType::from_wire(u32::from_ne_bytes(word))?;
    Ok(Packet {
        sender,
        msg_type,
        payload: bytes[HEADER_SIZE..].to_vec(),
    })
}
