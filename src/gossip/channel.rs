//! Actor mailboxes.
//!
//! Every actor in this crate (Socket Owners, Gossip Nodes) is driven
//! by a bounded `futures::channel::mpsc` queue consumed serially by a
//! single Tokio task: this is what gives "message handling order
//! equals enqueue order" for free, with no locking inside the actor
//! itself.

use futures::channel::mpsc;
use futures::SinkExt;

use crate::gossip::error::*;

/// Sending half of an actor's mailbox.
pub struct MailboxTx<M>(mpsc::Sender<M>);

impl<M> Clone for MailboxTx<M> {
    fn clone(&self) -> Self {
        MailboxTx(self.0.clone())
    }
}

/// Receiving half of an actor's mailbox.
pub struct MailboxRx<M>(mpsc::Receiver<M>);

/// Creates a bounded mailbox with room for `bound` queued commands
/// before senders start backpressuring.
pub fn mailbox<M>(bound: usize) -> (MailboxTx<M>, MailboxRx<M>) {
    let (tx, rx) = mpsc::channel(bound);
    (MailboxTx(tx), MailboxRx(rx))
}

impl<M> MailboxTx<M> {
    /// Enqueues a command, awaiting room if the mailbox is full.
    pub async fn post(&mut self, cmd: M) -> Result<()> {
        self.0
            .send(cmd)
            .await
            .simple(ErrorKind::Closed)
    }

    /// Enqueues a command without waiting, failing if the mailbox is
    /// full or the actor has shut down. Used from non-async shutdown
    /// paths that can't await.
    pub fn try_post(&mut self, cmd: M) -> Result<()> {
        self.0.try_send(cmd).simple(ErrorKind::Closed)
    }
}

impl<M> MailboxRx<M> {
    /// Receives the next command, or `None` once every `MailboxTx`
    /// clone has been dropped.
    pub async fn recv(&mut self) -> Option<M> {
        use futures::StreamExt;
        self.0.next().await
    }
}
