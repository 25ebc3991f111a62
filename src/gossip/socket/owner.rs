//! The Socket Owner and its Readiness Monitor, plus outbound
//! connection establishment.
//!
//! The Owner is a single-threaded cooperative actor: a Tokio task
//! consuming a mailbox serially, the only task allowed to touch its
//! socket. The Monitor is a second task that only waits for
//! readiness and posts events back into the Owner's mailbox — it
//! never reads or writes the socket itself.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use crate::gossip::channel::{self, MailboxRx, MailboxTx};
use crate::gossip::error::*;
use crate::gossip::message::{self, Message, WireObject};
use crate::gossip::registry::connection;
use crate::gossip::socket::tcp;
use crate::gossip::uid::Uid;

/// How long the Readiness Monitor waits for activity before treating
/// silence as a cleanly-closed peer.
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

const MAILBOX_BOUND: usize = 64;

/// Receives `(source_owner, destination_uid, message)` once a frame
/// has been fully decoded off the wire. Implementations must not
/// block: this is called from inside the Owner's actor loop.
pub trait Outbox: Send + Sync {
    fn deliver(&self, from: OwnerHandle, object: WireObject);
}

pub type SharedOutbox = Arc<dyn Outbox>;

enum Command {
    Send(Uid, Uid, Message, oneshot::Sender<Result<()>>),
    ReceiveReady,
    Shutdown,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum Lifecycle {
    Open,
    Closed,
}

/// A cheap, cloneable reference to a live (or recently-live) Socket
/// Owner. Cloning does not duplicate the underlying connection; every
/// clone shares the same mailbox.
#[derive(Clone)]
pub struct OwnerHandle {
    tx: MailboxTx<Command>,
    peer_addr: SocketAddr,
}

impl OwnerHandle {
    /// Enqueues a frame from `sender` addressed to `destination` and
    /// awaits the outcome. Fails with `Closed` if the Owner has shut
    /// down, and with whatever I/O error caused a shutdown mid-send.
    pub async fn send(&self, sender: Uid, destination: Uid, message: Message) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let mut tx = self.tx.clone();
        tx.post(Command::Send(sender, destination, message, reply_tx))
            .await
            .map_err(|_| Error::simple(ErrorKind::Closed))?;
        reply_rx.await.map_err(|_| Error::simple(ErrorKind::Closed))?
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// A handle whose mailbox has no running actor behind it. Used
    /// only to exercise the Connection Registry in isolation in
    /// tests; any `send` against it fails with `Closed`.
    #[cfg(test)]
    pub fn dangling_for_test() -> Self {
        let (tx, _rx) = channel::mailbox(1);
        OwnerHandle {
            tx,
            peer_addr: "127.0.0.1:1".parse().unwrap(),
        }
    }
}

struct OwnerState {
    socket: tcp::Socket,
    peer_addr: SocketAddr,
    buf: Vec<u8>,
    outbox: SharedOutbox,
    monitor: tokio::task::JoinHandle<()>,
    lifecycle: Lifecycle,
}

fn spawn_owner(socket: tcp::Socket, peer_addr: SocketAddr, outbox: SharedOutbox) -> OwnerHandle {
    let (tx, rx) = channel::mailbox(MAILBOX_BOUND);
    let handle = OwnerHandle {
        tx: tx.clone(),
        peer_addr,
    };

    let monitor_socket = socket.clone();
    let monitor_tx = tx.clone();
    let monitor = tokio::spawn(readiness_monitor(monitor_socket, monitor_tx));

    let state = OwnerState {
        socket,
        peer_addr,
        buf: Vec::new(),
        outbox,
        monitor,
        lifecycle: Lifecycle::Open,
    };
    tokio::spawn(run(rx, state, handle.clone()));
    handle
}

/// Dedicated Readiness Monitor task: waits on the socket for
/// readability or a read-side hangup, and posts the corresponding
/// event into the Owner's mailbox. Never touches the socket's bytes.
async fn readiness_monitor(socket: tcp::Socket, mut tx: MailboxTx<Command>) {
    loop {
        let ready = match tokio::time::timeout(IDLE_TIMEOUT, socket.ready_readable()).await {
            Ok(Ok(ready)) => ready,
            Ok(Err(error)) => {
                tracing::warn!(%error, "readiness monitor error, retrying");
                continue;
            }
            Err(_elapsed) => {
                let _ = tx.try_post(Command::Shutdown);
                return;
            }
        };
        if ready.is_read_closed() {
            let _ = tx.try_post(Command::Shutdown);
            return;
        }
        if ready.is_readable() && tx.post(Command::ReceiveReady).await.is_err() {
            // owner is gone; nothing left to notify
            return;
        }
    }
}

async fn run(mut rx: MailboxRx<Command>, mut state: OwnerState, self_handle: OwnerHandle) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Send(sender, destination, message, reply) => {
                let result = handle_send(&mut state, sender, destination, &message).await;
                let _ = reply.send(result);
            }
            Command::ReceiveReady => {
                handle_receive_ready(&mut state, &self_handle).await;
            }
            Command::Shutdown => {
                do_shutdown(&mut state).await;
                break;
            }
        }
        if state.lifecycle == Lifecycle::Closed {
            break;
        }
    }
}

async fn handle_send(state: &mut OwnerState, sender: Uid, destination: Uid, message: &Message) -> Result<()> {
    if state.lifecycle != Lifecycle::Open {
        return Err(Error::simple(ErrorKind::Closed));
    }
    let frame = message::encode_frame(sender, destination, message)?;
    match state.socket.write_all(&frame).await {
        Ok(()) => Ok(()),
        Err(e) => {
            do_shutdown(state).await;
            Err(Error::wrapped(ErrorKind::Closed, e))
        }
    }
}

async fn handle_receive_ready(state: &mut OwnerState, self_handle: &OwnerHandle) {
    if state.lifecycle != Lifecycle::Open {
        return;
    }

    // Drain whatever is currently buffered in the kernel socket.
    let mut scratch = [0u8; 4096];
    loop {
        match state.socket.try_read(&mut scratch) {
            Ok(0) => {
                do_shutdown(state).await;
                return;
            }
            Ok(n) => state.buf.extend_from_slice(&scratch[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(_) => {
                do_shutdown(state).await;
                return;
            }
        }
    }

    // Never call the decoder without first confirming a full frame is
    // buffered. `decode_frame` reports `None` rather than blocking when
    // the buffer is short, which is what makes repeated `ReceiveReady`
    // events (queued while a prior one already drained the stream)
    // harmless no-ops here.
    loop {
        match message::decode_frame(&state.buf) {
            Ok(Some((object, consumed))) => {
                state.buf.drain(..consumed);
                state.outbox.deliver(self_handle.clone(), object);
            }
            Ok(None) => break,
            Err(error) => {
                tracing::warn!(%error, peer = %state.peer_addr, "dropping out-of-sync connection");
                do_shutdown(state).await;
                return;
            }
        }
    }
}

async fn do_shutdown(state: &mut OwnerState) {
    if state.lifecycle == Lifecycle::Closed {
        return;
    }
    state.lifecycle = Lifecycle::Closed;
    state.monitor.abort();
    connection::remove(state.peer_addr.ip(), state.peer_addr.port());
    tracing::debug!(peer = %state.peer_addr, "socket owner shut down");
}

// Serializes the lookup-or-connect sequence in `ensure_connection` so
// concurrent callers racing on the same peer converge on one Owner. A
// single global lock is coarser than necessary (it serializes
// unrelated peers too) but keeps the race-freedom argument trivial,
// which matters more here than connect throughput.
static CONNECT_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Returns the live Socket Owner for `(address, port)`, connecting if
/// necessary.
pub async fn ensure_connection(
    address: IpAddr,
    port: u16,
    outbox: SharedOutbox,
) -> Result<OwnerHandle> {
    if let Some(handle) = connection::lookup(address, port) {
        return Ok(handle);
    }
    let _guard = CONNECT_LOCK.lock().await;
    if let Some(handle) = connection::lookup(address, port) {
        return Ok(handle);
    }
    let addr = SocketAddr::new(address, port);
    let socket = tcp::connect(addr).await.wrapped(ErrorKind::ConnectFailed)?;
    let handle = spawn_owner(socket, addr, outbox);
    connection::insert(address, port, handle.clone())?;
    Ok(handle)
}

/// Adopts an already-accepted inbound socket as a new Socket Owner,
/// registering it under the peer's observed address.
pub fn adopt_accepted(socket: tcp::Socket, peer_addr: SocketAddr, outbox: SharedOutbox) -> Result<OwnerHandle> {
    let handle = spawn_owner(socket, peer_addr, outbox);
    connection::insert(peer_addr.ip(), peer_addr.port(), handle.clone())?;
    Ok(handle)
}
