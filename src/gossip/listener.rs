//! The inbound half of the administrative surface: start/stop a TCP
//! listener that adopts every accepted connection as a Socket Owner
//! routed through the Node Registry.

use std::net::SocketAddr;

use crate::gossip::error::*;
use crate::gossip::registry::node::Router;
use crate::gossip::socket;

/// A running listener. Dropping or calling `stop` tears down the
/// accept loop; already-adopted connections are unaffected.
pub struct ListenerHandle {
    local_addr: SocketAddr,
    task: tokio::task::JoinHandle<()>,
}

impl ListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

/// Binds `addr` and spawns the accept loop. Each accepted connection
/// is adopted as a Socket Owner whose outbox is the Node Registry's
/// `Router`.
pub async fn start(addr: SocketAddr) -> Result<ListenerHandle> {
    let listener = socket::bind(addr).await.wrapped(ErrorKind::Io)?;
    let local_addr = listener.local_addr().wrapped(ErrorKind::Io)?;
    let task = tokio::spawn(accept_loop(listener));
    Ok(ListenerHandle { local_addr, task })
}

async fn accept_loop(listener: socket::Listener) {
    loop {
        match listener.accept().await {
            Ok((conn, peer)) => {
                if let Err(error) = socket::adopt_accepted(conn, peer, Router::shared()) {
                    tracing::warn!(%peer, %error, "failed to adopt accepted connection");
                }
            }
            Err(error) => {
                tracing::warn!(%error, "accept failed, retrying");
            }
        }
    }
}
