//! Solicitation API: the three user-facing entry points on a local
//! Gossip Node. Each constructs a fresh message and feeds it through
//! admission with `source = null`; ttl and deadline come from the
//! node's own configuration, not from the caller.

use crate::gossip::error::Result;
use crate::gossip::message::Verb;
use crate::gossip::node::{Aggregate, NodeHandle};

/// Injects a fire-and-forget COMMAND message.
pub async fn broadcast(node: &NodeHandle, verb: impl Into<Verb>, payload: Vec<u8>) -> Result<()> {
    node.broadcast(verb.into(), payload).await
}

/// Injects a SOLICIT and blocks until tree aggregation completes or
/// the node's configured deadline fires.
pub async fn solicit_wait(node: &NodeHandle, verb: impl Into<Verb>, payload: Vec<u8>) -> Result<Aggregate> {
    node.solicit(verb.into(), payload, false).await
}

/// Injects a SOLICIT with the direct-reply flag: every reachable node
/// answers straight to this node instead of up the forwarding tree.
pub async fn solicit_direct(node: &NodeHandle, verb: impl Into<Verb>, payload: Vec<u8>) -> Result<Aggregate> {
    node.solicit(verb.into(), payload, true).await
}
