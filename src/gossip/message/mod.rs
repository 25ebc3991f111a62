//! Message identity, the wire message envelope, and the length-prefixed
//! framing used on top of a raw TCP byte stream.
//!
//! The wire format is a single length-prefixed `bincode` payload per
//! frame: a `Header` carrying a 4-byte big-endian length, followed by
//! that many bytes encoding `(sender_uid, destination_uid, Message)`.
//! This mirrors the teacher's `Header`/`WireMessage` split, minus the
//! signature field the BFT protocol needed and this one doesn't, since
//! there is no authenticated-channel requirement here.

use std::time::{SystemTime, UNIX_EPOCH};

use rand_core::{OsRng, RngCore};

#[cfg(feature = "serialize_serde")]
use serde::{Deserialize, Serialize};

use crate::gossip::error::*;
use crate::gossip::uid::Uid;

/// Globally unique message identifier: 128 bits drawn from the
/// process CSPRNG at first admission. Never reused.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[repr(transparent)]
pub struct MessageId(u128);

impl MessageId {
    /// Draws a fresh random id.
    pub fn fresh() -> Self {
        let mut buf = [0u8; 16];
        OsRng.fill_bytes(&mut buf);
        MessageId(u128::from_le_bytes(buf))
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// A verb names the action a `COMMAND` or `SOLICIT` message carries.
/// Kept as an owned string rather than a closed enum so that
/// application code can register verbs beyond the two built-ins.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
pub struct Verb(String);

impl Verb {
    pub fn new(name: impl Into<String>) -> Self {
        Verb(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub const COUNT_ALIVE: &'static str = "count-alive";
    pub const LIST_ALIVE: &'static str = "list-alive";
}

impl From<&str> for Verb {
    fn from(s: &str) -> Self {
        Verb::new(s)
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, ":{}", self.0)
    }
}

/// The kind-specific portion of a `Message`. Carries exactly the
/// fields relevant to its variant — `solicitation_id` only makes
/// sense on a `Reply`, so it isn't dragged along on the others.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
pub enum Kind {
    /// Fire-and-forget: execute the verb's side effect, no reply.
    Command { verb: Verb },
    /// Execute the verb's query; a `Reply` is eventually emitted.
    /// `direct_reply` causes intermediate nodes to address their
    /// `Reply` straight to `origin_uid` (set by `solicit_direct`).
    Solicit { verb: Verb, direct_reply: bool },
    /// Answers the solicitation named by `solicitation_id`.
    Reply { solicitation_id: MessageId },
}

/// An immutable gossip message.
///
/// `timestamp` and `ttl_seconds` are set once, at first admission to
/// the graph, and never modified afterwards.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
pub struct Message {
    pub id: MessageId,
    pub kind: Kind,
    pub origin_uid: Uid,
    pub timestamp: u64,
    pub ttl_seconds: u32,
    pub payload: Vec<u8>,
}

impl Message {
    /// Constructs a fresh message admitted "now": a fresh id, current
    /// timestamp, and the given kind/origin/ttl/payload.
    pub fn fresh(kind: Kind, origin_uid: Uid, ttl_seconds: u32, payload: Vec<u8>) -> Self {
        Message {
            id: MessageId::fresh(),
            kind,
            origin_uid,
            timestamp: now_unix(),
            ttl_seconds,
            payload,
        }
    }

    /// The absolute expiry instant, `timestamp + ttl_seconds`.
    pub fn expiry(&self) -> u64 {
        self.timestamp + self.ttl_seconds as u64
    }

    /// Builds a `Reply` answering this message, originated by
    /// `replier`. Panics if this message is not a `Solicit` — callers
    /// only do this from the solicit-admission path.
    pub fn reply(&self, replier: Uid, payload: Vec<u8>) -> Message {
        let Kind::Solicit { .. } = &self.kind else {
            panic!("reply() called on a non-Solicit message");
        };
        Message {
            id: MessageId::fresh(),
            kind: Kind::Reply {
                solicitation_id: self.id,
            },
            origin_uid: replier,
            timestamp: now_unix(),
            ttl_seconds: self.ttl_seconds,
            payload,
        }
    }
}

pub(crate) fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// The fixed-width frame header: a big-endian length prefix ahead of
/// the `bincode`-encoded `(destination_uid, Message)` payload.
#[derive(Copy, Clone, Debug)]
pub struct Header {
    pub length: u32,
}

impl Header {
    pub const LENGTH: usize = 4;

    pub fn serialize_into(self, buf: &mut [u8]) {
        buf[..Self::LENGTH].copy_from_slice(&self.length.to_be_bytes());
    }

    pub fn deserialize_from(buf: &[u8]) -> Self {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&buf[..Self::LENGTH]);
        Header {
            length: u32::from_be_bytes(raw),
        }
    }
}

/// A decoded wire object: the sending node's UID and the frame's
/// destination UID alongside the `Message` it carries. The sender is
/// what lets the receiving Gossip Node tell which neighbor a hop
/// arrived from, for loop suppression and neighbor-exclusion forwarding
/// — the `Message` itself only carries `origin_uid`, the node that
/// first injected it, which stays constant across every hop.
pub type WireObject = (Uid, Uid, Message);

/// Serializes `(sender, destination, message)` into a length-prefixed
/// frame ready to be written to a socket.
#[cfg(feature = "serialize_serde")]
pub fn encode_frame(sender: Uid, destination: Uid, message: &Message) -> Result<Vec<u8>> {
    let body = bincode::serialize(&(sender, destination, message))
        .wrapped(ErrorKind::DecodeFailed)?;
    let header = Header {
        length: body.len() as u32,
    };
    let mut out = vec![0u8; Header::LENGTH + body.len()];
    header.serialize_into(&mut out[..Header::LENGTH]);
    out[Header::LENGTH..].copy_from_slice(&body);
    Ok(out)
}

/// Attempts to decode one full frame from the front of `buf`.
///
/// Returns `Ok(None)` if `buf` does not yet hold a complete frame.
/// Callers are expected to only invoke this once they've confirmed
/// buffered bytes exist, but this function itself tolerates a short
/// buffer by reporting "not yet" rather than panicking. On success,
/// returns the decoded object and the number of bytes consumed from
/// `buf`.
#[cfg(feature = "serialize_serde")]
pub fn decode_frame(buf: &[u8]) -> Result<Option<(WireObject, usize)>> {
    if buf.len() < Header::LENGTH {
        return Ok(None);
    }
    let header = Header::deserialize_from(buf);
    let total = Header::LENGTH + header.length as usize;
    if buf.len() < total {
        return Ok(None);
    }
    let body = &buf[Header::LENGTH..total];
    let object: WireObject =
        bincode::deserialize(body).wrapped(ErrorKind::DecodeFailed)?;
    Ok(Some((object, total)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_are_unique() {
        let a = MessageId::fresh();
        let b = MessageId::fresh();
        assert_ne!(a, b);
    }

    #[test]
    fn expiry_adds_ttl_to_timestamp() {
        let m = Message::fresh(
            Kind::Command {
                verb: Verb::new(Verb::COUNT_ALIVE),
            },
            Uid::from_raw(1),
            10,
            Vec::new(),
        );
        assert_eq!(m.expiry(), m.timestamp + 10);
    }

    #[test]
    fn frame_roundtrips() {
        let msg = Message::fresh(
            Kind::Solicit {
                verb: Verb::new(Verb::LIST_ALIVE),
                direct_reply: false,
            },
            Uid::from_raw(7),
            30,
            b"payload".to_vec(),
        );
        let frame = encode_frame(Uid::from_raw(7), Uid::from_raw(42), &msg).unwrap();
        let (decoded, consumed) = decode_frame(&frame).unwrap().unwrap();
        assert_eq!(consumed, frame.len());
        assert_eq!(decoded.0, Uid::from_raw(7));
        assert_eq!(decoded.1, Uid::from_raw(42));
        assert_eq!(decoded.2.id, msg.id);
        assert_eq!(decoded.2.payload, msg.payload);
    }

    #[test]
    fn decode_reports_incomplete_frame() {
        let msg = Message::fresh(
            Kind::Command {
                verb: Verb::new(Verb::COUNT_ALIVE),
            },
            Uid::from_raw(1),
            10,
            Vec::new(),
        );
        let frame = encode_frame(Uid::from_raw(1), Uid::from_raw(1), &msg).unwrap();
        let short = &frame[..frame.len() - 1];
        assert!(decode_frame(short).unwrap().is_none());
    }
}
