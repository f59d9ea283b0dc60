// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Mailbox
//!
//! Every actor owns exactly one mailbox: an unbounded FIFO queue written by any number of
//! senders and drained by the actor's own loop. Enqueueing never blocks; it only fails once
//! the mailbox has been closed, which happens when the owning actor terminates.
//!

use crate::{ActorId, Error, actor::Actor};

use tokio::{
    select,
    sync::{mpsc, oneshot},
};
use tokio_util::sync::CancellationToken;

use tracing::debug;

use std::time::Duration;

/// Message delivered to an actor.
///
/// The reply channel of a `Call` is owned by the actor once dequeued. Dropping it without
/// answering (stop without reply, handler fault, mailbox drained on close) is observed by the
/// caller as [`Error::ActorUnavailable`].
pub enum Envelope<A: Actor> {
    /// Request expecting exactly one reply.
    Call {
        payload: A::Call,
        reply: oneshot::Sender<A::Reply>,
    },
    /// Fire-and-forget request.
    Cast { payload: A::Cast },
    /// Out-of-band message: timers, monitors, system notifications.
    Info { payload: A::Info },
}

impl<A: Actor> Envelope<A> {
    /// Short tag used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Call { .. } => "call",
            Envelope::Cast { .. } => "cast",
            Envelope::Info { .. } => "info",
        }
    }
}

/// Result of a dequeue attempt.
#[derive(Debug, PartialEq)]
pub enum Dequeue<M> {
    /// Next message in arrival order.
    Message(M),
    /// Nothing arrived before the timeout elapsed.
    Timeout,
    /// The mailbox was closed. Terminal.
    Closed,
}

/// Creates the mailbox of the actor identified by `id`.
///
/// # Returns
///
/// Returns a tuple of (sender, receiver). The sender is cloned into every reference to the
/// actor; the receiver stays with the actor's loop.
///
pub fn mailbox<M>(id: ActorId) -> (MailboxSender<M>, MailboxReceiver<M>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let closed = CancellationToken::new();
    (
        MailboxSender {
            id,
            sender,
            closed: closed.clone(),
        },
        MailboxReceiver {
            id,
            receiver,
            closed,
        },
    )
}

/// Sending side of a mailbox.
pub struct MailboxSender<M> {
    id: ActorId,
    sender: mpsc::UnboundedSender<M>,
    closed: CancellationToken,
}

impl<M> MailboxSender<M> {
    /// Appends a message to the queue without blocking.
    ///
    /// # Errors
    ///
    /// Returns `Error::ActorUnavailable` if the mailbox is closed.
    ///
    pub fn enqueue(&self, message: M) -> Result<(), Error> {
        if self.closed.is_cancelled() {
            debug!("Mailbox of actor {} is closed.", self.id);
            return Err(Error::ActorUnavailable(self.id));
        }
        self.sender.send(message).map_err(|_| {
            debug!("Mailbox of actor {} was dropped.", self.id);
            Error::ActorUnavailable(self.id)
        })
    }

    /// Closes the mailbox from the sending side. Further enqueues fail and a dequeue blocked
    /// on the receiving side wakes up with [`Dequeue::Closed`].
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// True once the mailbox no longer accepts messages.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.sender.is_closed()
    }

    /// Id of the owning actor.
    pub fn id(&self) -> ActorId {
        self.id
    }
}

impl<M> Clone for MailboxSender<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            sender: self.sender.clone(),
            closed: self.closed.clone(),
        }
    }
}

/// Receiving side of a mailbox, owned by the actor's loop.
pub struct MailboxReceiver<M> {
    id: ActorId,
    receiver: mpsc::UnboundedReceiver<M>,
    closed: CancellationToken,
}

impl<M> MailboxReceiver<M> {
    /// Waits for the next message.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Maximum wait; `None` waits until a message arrives or the mailbox closes.
    ///
    pub async fn dequeue(&mut self, timeout: Option<Duration>) -> Dequeue<M> {
        let Self {
            receiver, closed, ..
        } = self;
        let next = async {
            select! {
                biased;
                _ = closed.cancelled() => None,
                message = receiver.recv() => message,
            }
        };
        let message = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, next).await {
                Ok(message) => message,
                Err(_) => return Dequeue::Timeout,
            },
            None => next.await,
        };
        match message {
            Some(message) => Dequeue::Message(message),
            None => Dequeue::Closed,
        }
    }

    /// Closes the mailbox and drops every message still queued.
    ///
    /// # Returns
    ///
    /// Returns the number of discarded messages.
    ///
    pub fn close(&mut self) -> usize {
        self.closed.cancel();
        self.receiver.close();
        let mut dropped = 0;
        while self.receiver.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(
                "Discarded {} pending messages of actor {}.",
                dropped, self.id
            );
        }
        dropped
    }

    /// True once the mailbox no longer accepts messages.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    fn test_mailbox() -> (MailboxSender<u32>, MailboxReceiver<u32>) {
        mailbox::<u32>(ActorId::next())
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (sender, mut receiver) = test_mailbox();
        for i in 0..10 {
            sender.enqueue(i).unwrap();
        }
        for i in 0..10 {
            assert_eq!(receiver.dequeue(None).await, Dequeue::Message(i));
        }
    }

    #[tokio::test]
    async fn test_dequeue_timeout() {
        let (_sender, mut receiver) = test_mailbox();
        let result = receiver.dequeue(Some(Duration::from_millis(20))).await;
        assert_eq!(result, Dequeue::Timeout);
    }

    #[tokio::test]
    async fn test_close_rejects_and_drains() {
        let (sender, mut receiver) = test_mailbox();
        sender.enqueue(1).unwrap();
        sender.enqueue(2).unwrap();
        assert_eq!(receiver.close(), 2);
        assert!(sender.is_closed());
        assert_eq!(
            sender.enqueue(3),
            Err(Error::ActorUnavailable(sender.id()))
        );
        assert_eq!(receiver.dequeue(None).await, Dequeue::Closed);
    }

    #[tokio::test]
    async fn test_remote_close_wakes_receiver() {
        let (sender, mut receiver) = test_mailbox();
        let waiter =
            tokio::spawn(async move { receiver.dequeue(None).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        sender.close();
        assert_eq!(waiter.await.unwrap(), Dequeue::Closed);
        assert!(sender.enqueue(1).is_err());
    }
}
