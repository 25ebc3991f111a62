//! Node Registry: a process-wide mapping from UID to either a local
//! Gossip Node or a Proxy Node standing in for a remote one.
//!
//! This module also implements the inbound half of the router: it is
//! the `socket::Outbox` that every Socket Owner delivers decoded
//! frames to. A frame addressed to UID `0` is routed to *every* local
//! Gossip Node (the anonymous-broadcast policy), each treating the
//! sending Proxy's `remote_uid` as its `source_neighbor_uid`.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::gossip::collections::{self, HashMap};
use crate::gossip::message::WireObject;
use crate::gossip::node::proxy::ProxyNode;
use crate::gossip::node::NodeHandle;
use crate::gossip::socket::{self, OwnerHandle};
use crate::gossip::uid::Uid;

/// What a UID maps to in the Node Registry.
#[derive(Clone)]
pub enum NodeEntry {
    Local(NodeHandle),
    Proxy(Arc<ProxyNode>),
}

static REGISTRY: RwLock<Option<HashMap<Uid, NodeEntry>>> = RwLock::new(None);

pub(crate) fn init() {
    *REGISTRY.write() = Some(collections::hash_map());
}

pub(crate) fn clear() {
    if let Some(map) = REGISTRY.write().as_mut() {
        map.clear();
    }
}

pub fn lookup(uid: Uid) -> Option<NodeEntry> {
    REGISTRY.read().as_ref().and_then(|map| map.get(&uid).cloned())
}

pub fn register_local(handle: NodeHandle) {
    REGISTRY
        .write()
        .get_or_insert_with(collections::hash_map)
        .insert(handle.uid(), NodeEntry::Local(handle));
}

pub fn register_proxy(proxy: Arc<ProxyNode>) {
    REGISTRY
        .write()
        .get_or_insert_with(collections::hash_map)
        .insert(proxy.uid, NodeEntry::Proxy(proxy));
}

pub fn remove(uid: Uid) {
    if let Some(map) = REGISTRY.write().as_mut() {
        map.remove(&uid);
    }
}

pub fn len() -> usize {
    REGISTRY.read().as_ref().map_or(0, |m| m.len())
}

/// Every locally-hosted Gossip Node, for anonymous-broadcast fanout.
pub fn all_local() -> Vec<NodeHandle> {
    REGISTRY
        .read()
        .as_ref()
        .map(|m| {
            m.values()
                .filter_map(|entry| match entry {
                    NodeEntry::Local(handle) => Some(handle.clone()),
                    NodeEntry::Proxy(_) => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Routes a decoded inbound frame to its destination(s). Installed as
/// the `Outbox` every Socket Owner delivers to.
pub struct Router;

impl Router {
    /// Boxes a fresh `Router` for installation as a Socket Owner's outbox.
    pub fn shared() -> socket::SharedOutbox {
        Arc::new(Router)
    }
}

impl socket::Outbox for Router {
    fn deliver(&self, from: OwnerHandle, object: WireObject) {
        let (sender, destination, message) = object;

        // First frame seen from a not-yet-registered sender: bind a
        // Proxy Node to the connection it arrived on, so propagation
        // back to it doesn't need a fresh outbound dial.
        if !sender.is_anonymous() && lookup(sender).is_none() {
            let peer = from.peer_addr();
            let proxy = Arc::new(ProxyNode::bound(
                sender,
                sender,
                peer.ip(),
                peer.port(),
                from.clone(),
                Router::shared(),
            ));
            register_proxy(proxy);
        }

        if destination.is_anonymous() {
            let targets = all_local();
            if targets.is_empty() {
                tracing::debug!("anonymous broadcast with no local nodes registered, dropping");
            }
            for node in targets {
                node.forward(sender, message.clone());
            }
            return;
        }
        match lookup(destination) {
            Some(NodeEntry::Local(node)) => node.forward(sender, message),
            Some(NodeEntry::Proxy(_)) => {
                tracing::warn!(%destination, "inbound frame addressed to a proxy uid, dropping");
            }
            None => {
                tracing::warn!(%destination, "inbound frame for unknown destination, dropping");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_uid_lookup_is_none() {
        init();
        assert!(lookup(Uid::from_raw(999)).is_none());
        clear();
    }
}
