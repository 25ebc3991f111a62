//! Proxy Node: a local stand-in for a remote Gossip Node, forwarding
//! outbound traffic through a Socket Owner.
//!
//! Rather than hold a direct reference to its Socket Owner, a Proxy
//! caches the handle it last used and drops it the moment a send
//! reports `Closed`; the next send either reuses a handle another
//! caller has since installed or dials fresh via `ensure_connection`.
//! A removed Owner therefore surfaces naturally as `Closed`, never as
//! a stale reference.

use std::net::IpAddr;

use parking_lot::Mutex;

use crate::gossip::error::*;
use crate::gossip::message::Message;
use crate::gossip::socket::{self, OwnerHandle, SharedOutbox};
use crate::gossip::uid::Uid;

pub struct ProxyNode {
    pub uid: Uid,
    pub remote_uid: Uid,
    pub remote_addr: IpAddr,
    pub remote_port: u16,
    owner: Mutex<Option<OwnerHandle>>,
    outbox: SharedOutbox,
}

impl PartialEq for ProxyNode {
    /// Equality on `(remote_address, remote_port, remote_uid)` — `uid`
    /// and the cached Owner are not part of identity.
    fn eq(&self, other: &Self) -> bool {
        self.remote_addr == other.remote_addr
            && self.remote_port == other.remote_port
            && self.remote_uid == other.remote_uid
    }
}

impl ProxyNode {
    /// A proxy that dials lazily on first send.
    pub fn new(uid: Uid, remote_uid: Uid, remote_addr: IpAddr, remote_port: u16, outbox: SharedOutbox) -> Self {
        ProxyNode {
            uid,
            remote_uid,
            remote_addr,
            remote_port,
            owner: Mutex::new(None),
            outbox,
        }
    }

    /// A proxy already bound to a live Owner, e.g. one adopted from an
    /// accepted inbound connection whose ephemeral remote port can't
    /// be dialed back.
    pub fn bound(
        uid: Uid,
        remote_uid: Uid,
        remote_addr: IpAddr,
        remote_port: u16,
        owner: OwnerHandle,
        outbox: SharedOutbox,
    ) -> Self {
        ProxyNode {
            uid,
            remote_uid,
            remote_addr,
            remote_port,
            owner: Mutex::new(Some(owner)),
            outbox,
        }
    }

    async fn owner_handle(&self) -> Result<OwnerHandle> {
        if let Some(handle) = self.owner.lock().clone() {
            return Ok(handle);
        }
        let handle = socket::ensure_connection(self.remote_addr, self.remote_port, self.outbox.clone())
            .await
            .map_err(|e| e.swap_kind(ErrorKind::Unreachable))?;
        *self.owner.lock() = Some(handle.clone());
        Ok(handle)
    }

    /// Blocking outbound send; surfaces `Closed`/`Unreachable` to the
    /// caller. `sender` is the local Gossip Node's own uid, carried on
    /// the wire so the remote side can populate its own
    /// `source_neighbor_uid`.
    pub async fn send(&self, sender: Uid, message: Message) -> Result<()> {
        let handle = self.owner_handle().await?;
        match handle.send(sender, self.remote_uid, message).await {
            Ok(()) => Ok(()),
            Err(error) => {
                *self.owner.lock() = None;
                Err(error)
            }
        }
    }

    /// Non-blocking propagation forward: the Gossip Node actor that
    /// calls this must never block on network I/O, so the send is
    /// detached and its failure only logged.
    pub fn forward(self: &std::sync::Arc<Self>, sender: Uid, message: Message) {
        let this = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            if let Err(error) = this.send(sender, message).await {
                tracing::warn!(uid = %this.remote_uid, %error, "gossip forward failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    struct NullOutbox;
    impl socket::Outbox for NullOutbox {
        fn deliver(&self, _from: OwnerHandle, _object: crate::gossip::message::WireObject) {}
    }

    #[test]
    fn equality_ignores_local_uid() {
        let outbox: SharedOutbox = std::sync::Arc::new(NullOutbox);
        let addr = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let a = ProxyNode::new(Uid::from_raw(1), Uid::from_raw(9), addr, 4000, outbox.clone());
        let b = ProxyNode::new(Uid::from_raw(2), Uid::from_raw(9), addr, 4000, outbox);
        assert!(a == b);
    }
}
