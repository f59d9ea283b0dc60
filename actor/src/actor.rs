// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor
//!
//! The `actor` module defines the [`Actor`] trait implemented by user handlers, the values
//! handlers return to drive the loop ([`Step`], [`CallStep`]), the [`ActorRef`] used to address
//! a running actor and the [`ActorContext`] handed to every hook.
//!
//! An actor is a handler value plus a state value. The handler is immutable configuration; the
//! state is owned by the actor's loop and *replaced* on every message: each hook receives the
//! current state by value and returns the next one. Only the actor's own task ever touches the
//! state, so no locking is needed around it.
//!
//! Messages are typed per actor: `Call` expects a `Reply`, `Cast` is fire-and-forget and `Info`
//! carries out-of-band notifications (timers, monitors).
//!

use crate::{
    Error,
    mailbox::{Envelope, MailboxSender},
    runner::Lifeline,
};

use async_trait::async_trait;

use serde::{Deserialize, Serialize};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::debug;

use std::{
    fmt::{Debug, Display, Formatter},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

/// Unique identifier of an actor incarnation. A restarted actor gets a new id.
#[derive(
    Clone,
    Copy,
    Debug,
    Hash,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Serialize,
    Deserialize,
)]
pub struct ActorId(u64);

impl ActorId {
    /// Allocates the next process-wide id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ActorId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for ActorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}>", self.0)
    }
}

/// Why an actor terminated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ExitReason {
    /// The actor chose to stop, or was asked to.
    Normal,
    /// Stopped by its supervisor or by system shutdown.
    Shutdown,
    /// Torn down without running `terminate`.
    Killed,
    /// Terminated by an error: handler fault, failed init, linked exit, escalation.
    Fault(Error),
}

impl ExitReason {
    /// Abnormal exits are the ones a `Transient` child is restarted for.
    pub fn is_abnormal(&self) -> bool {
        matches!(self, ExitReason::Killed | ExitReason::Fault(_))
    }
}

impl Display for ExitReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::Normal => write!(f, "normal"),
            ExitReason::Shutdown => write!(f, "shutdown"),
            ExitReason::Killed => write!(f, "killed"),
            ExitReason::Fault(error) => write!(f, "fault: {}", error),
        }
    }
}

/// Lifecycle of an actor, published by its loop.
///
/// `Starting → Running → Stopping → Terminated`. An actor whose `init` fails goes straight
/// from `Starting` to `Terminated`.
#[derive(Clone, Debug, PartialEq)]
pub enum ActorLifecycle {
    /// Running `init`.
    Starting,
    /// Processing messages.
    Running,
    /// Mailbox closed, running `terminate`.
    Stopping,
    /// Gone, with the reason.
    Terminated(ExitReason),
}

/// Outcome of `handle_cast` and `handle_info`.
#[derive(Debug)]
pub enum Step<S> {
    /// Keep running with the next state.
    Continue(S),
    /// Stop with the given reason; the state is handed to `terminate`.
    Stop(ExitReason, S),
}

/// Outcome of `handle_call`.
#[derive(Debug)]
pub enum CallStep<R, S> {
    /// Answer the caller and keep running with the next state.
    Reply(R, S),
    /// Stop, optionally answering the caller first. Without a reply the caller observes
    /// `Error::ActorUnavailable`.
    Stop(ExitReason, Option<R>, S),
}

/// The capability set of a generic server.
///
/// Only `init` and `handle_call` are required. Unhandled casts and infos are logged and
/// ignored; `terminate` does nothing by default.
///
/// Handlers run on the actor's task and stall its whole mailbox while they run: avoid blocking
/// I/O inside them. Returning `Err` or panicking from any handler is a fault that terminates
/// the actor with `ExitReason::Fault(Error::HandlerFault(_))`.
///
/// # Example
///
/// ```ignore
/// struct Counter;
///
/// #[async_trait]
/// impl Actor for Counter {
///     type Args = u64;
///     type State = u64;
///     type Call = ();
///     type Reply = u64;
///     type Cast = u64;
///     type Info = ();
///
///     async fn init(&self, start: u64, _ctx: &mut ActorContext<Self>) -> Result<u64, Error> {
///         Ok(start)
///     }
///
///     async fn handle_call(
///         &self,
///         _msg: (),
///         state: u64,
///         _ctx: &mut ActorContext<Self>,
///     ) -> Result<CallStep<u64, u64>, Error> {
///         Ok(CallStep::Reply(state, state))
///     }
///
///     async fn handle_cast(
///         &self,
///         delta: u64,
///         state: u64,
///         _ctx: &mut ActorContext<Self>,
///     ) -> Result<Step<u64>, Error> {
///         Ok(Step::Continue(state + delta))
///     }
/// }
/// ```
#[async_trait]
pub trait Actor: Send + Sync + Sized + 'static {
    /// Arguments given to `init`.
    type Args: Send + 'static;
    /// State owned by the loop.
    type State: Send + 'static;
    /// Request payload of `call`.
    type Call: Send + 'static;
    /// Answer to a `Call`.
    type Reply: Send + 'static;
    /// Payload of `cast`.
    type Cast: Send + 'static;
    /// Out-of-band payload.
    type Info: Send + 'static;

    /// Upper bound for `terminate`. Past it the hook is abandoned.
    fn shutdown_grace() -> Duration {
        Duration::from_secs(5)
    }

    /// Builds the first state. An error aborts the start and is returned to the starter as
    /// `Error::InitFailed`.
    async fn init(
        &self,
        args: Self::Args,
        ctx: &mut ActorContext<Self>,
    ) -> Result<Self::State, Error>;

    /// Handles a request that expects a reply.
    async fn handle_call(
        &self,
        msg: Self::Call,
        state: Self::State,
        ctx: &mut ActorContext<Self>,
    ) -> Result<CallStep<Self::Reply, Self::State>, Error>;

    /// Handles a fire-and-forget request.
    async fn handle_cast(
        &self,
        _msg: Self::Cast,
        state: Self::State,
        ctx: &mut ActorContext<Self>,
    ) -> Result<Step<Self::State>, Error> {
        debug!("Actor {} ignored a cast.", ctx.id());
        Ok(Step::Continue(state))
    }

    /// Handles an out-of-band message.
    async fn handle_info(
        &self,
        _msg: Self::Info,
        state: Self::State,
        ctx: &mut ActorContext<Self>,
    ) -> Result<Step<Self::State>, Error> {
        debug!("Actor {} ignored an info message.", ctx.id());
        Ok(Step::Continue(state))
    }

    /// Last hook before the actor is gone. `state` is `None` when a faulting handler consumed
    /// it.
    async fn terminate(
        &self,
        _reason: &ExitReason,
        _state: Option<Self::State>,
        _ctx: &mut ActorContext<Self>,
    ) {
    }
}

/// Handle of a one-shot timer created with [`ActorContext::send_after`].
pub struct Timer {
    handle: JoinHandle<()>,
}

impl Timer {
    /// Cancels the timer. No effect once it fired.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// True once the timer fired or was cancelled.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Context handed to every hook of an actor.
pub struct ActorContext<A: Actor> {
    myself: ActorRef<A>,
}

impl<A: Actor> ActorContext<A> {
    pub(crate) fn new(myself: ActorRef<A>) -> Self {
        Self { myself }
    }

    /// Id of the running actor.
    pub fn id(&self) -> ActorId {
        self.myself.id()
    }

    /// Reference to the running actor.
    pub fn myself(&self) -> ActorRef<A> {
        self.myself.clone()
    }

    /// Asks the actor's own loop to stop once the current handler returns. Stop requests are
    /// served before any message still queued.
    pub fn stop(&self, reason: ExitReason) {
        self.myself.lifeline().request_stop(reason);
    }

    /// Delivers `info` to this actor after `delay`. If the actor terminated in the meantime
    /// the message is dropped.
    pub fn send_after(&self, info: A::Info, delay: Duration) -> Timer {
        let myself = self.myself.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if myself.info(info).is_err() {
                debug!("Timer fired for terminated actor {}.", myself.id());
            }
        });
        Timer { handle }
    }

    /// Delivers the `Info` built by `on_exit` when `target` terminates. If `target` is already
    /// gone the notification arrives right away.
    pub fn monitor<F>(&self, target: &Lifeline, on_exit: F)
    where
        F: FnOnce(ActorId, ExitReason) -> A::Info + Send + 'static,
    {
        let myself = self.myself.clone();
        let target = target.clone();
        tokio::spawn(async move {
            let reason = target.wait().await;
            if myself.info(on_exit(target.id(), reason)).is_err() {
                debug!(
                    "Monitor of {} outlived actor {}.",
                    target.id(),
                    myself.id()
                );
            }
        });
    }

    /// Links this actor with `target`: when either exits abnormally the other is stopped with
    /// `Error::LinkedExit`.
    pub fn link(&self, target: &Lifeline) {
        let me = self.myself.lifeline().clone();
        tokio::spawn(propagate_exit(target.clone(), me.clone()));
        tokio::spawn(propagate_exit(me, target.clone()));
    }
}

async fn propagate_exit(from: Lifeline, to: Lifeline) {
    let reason = from.wait().await;
    if reason.is_abnormal() {
        debug!("Propagating exit of {} to {}.", from.id(), to.id());
        to.request_stop(ExitReason::Fault(Error::LinkedExit(from.id())));
    }
}

/// Reference to a running actor.
///
/// Cheap to clone and safe to share between tasks. A reference does not keep the actor alive;
/// once it terminates every send fails with `Error::ActorUnavailable`.
pub struct ActorRef<A: Actor> {
    mailbox: MailboxSender<Envelope<A>>,
    lifeline: Lifeline,
}

impl<A: Actor> ActorRef<A> {
    pub(crate) fn new(
        mailbox: MailboxSender<Envelope<A>>,
        lifeline: Lifeline,
    ) -> Self {
        Self { mailbox, lifeline }
    }

    /// Id of the referenced actor.
    pub fn id(&self) -> ActorId {
        self.lifeline.id()
    }

    /// Untyped control handle of the referenced actor.
    pub fn lifeline(&self) -> &Lifeline {
        &self.lifeline
    }

    /// True while the actor accepts messages.
    pub fn is_alive(&self) -> bool {
        !self.mailbox.is_closed() && self.lifeline.is_alive()
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> ActorLifecycle {
        self.lifeline.lifecycle()
    }

    /// Sends a request and waits for the reply.
    ///
    /// # Arguments
    ///
    /// * `payload` - The request.
    /// * `timeout` - Wait budget. `Some(Duration::ZERO)` does not wait at all; `None` waits
    ///   until the actor replies or terminates.
    ///
    /// # Errors
    ///
    /// * `Error::ActorUnavailable` - The actor terminated before accepting or answering the
    ///   request.
    /// * `Error::Timeout` - No reply within `timeout`. The request stays queued and may still
    ///   be executed; its reply is then discarded. Treat the outcome as unknown.
    ///
    pub async fn call(
        &self,
        payload: A::Call,
        timeout: Option<Duration>,
    ) -> Result<A::Reply, Error> {
        let (reply, mut response) = oneshot::channel();
        self.mailbox.enqueue(Envelope::Call { payload, reply })?;
        match timeout {
            None => response
                .await
                .map_err(|_| Error::ActorUnavailable(self.id())),
            Some(timeout) if timeout.is_zero() => match response.try_recv() {
                Ok(reply) => Ok(reply),
                Err(oneshot::error::TryRecvError::Empty) => {
                    Err(Error::Timeout(timeout))
                }
                Err(oneshot::error::TryRecvError::Closed) => {
                    Err(Error::ActorUnavailable(self.id()))
                }
            },
            Some(timeout) => {
                match tokio::time::timeout(timeout, response).await {
                    Ok(Ok(reply)) => Ok(reply),
                    Ok(Err(_)) => Err(Error::ActorUnavailable(self.id())),
                    Err(_) => {
                        debug!(
                            "Call to actor {} timed out after {:?}.",
                            self.id(),
                            timeout
                        );
                        Err(Error::Timeout(timeout))
                    }
                }
            }
        }
    }

    /// Sends a fire-and-forget request. Returns as soon as it is queued.
    pub fn cast(&self, payload: A::Cast) -> Result<(), Error> {
        self.mailbox.enqueue(Envelope::Cast { payload })
    }

    /// Sends an out-of-band message.
    pub fn info(&self, payload: A::Info) -> Result<(), Error> {
        self.mailbox.enqueue(Envelope::Info { payload })
    }

    /// Asks the actor to stop with `ExitReason::Normal` and waits until it terminated.
    ///
    /// # Returns
    ///
    /// Returns the actual exit reason, which differs from `Normal` if the actor was already
    /// gone or faulted in between.
    ///
    pub async fn stop(&self) -> ExitReason {
        self.lifeline.stop(ExitReason::Normal).await
    }

    /// Stops the actor with `ExitReason::Shutdown`, killing it if it did not terminate within
    /// `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> ExitReason {
        self.lifeline.shutdown(timeout).await
    }

    /// Tears the actor down immediately. `terminate` is not run.
    pub fn kill(&self) {
        self.lifeline.kill();
    }

    /// Waits until the actor terminated.
    pub async fn wait(&self) -> ExitReason {
        self.lifeline.wait().await
    }
}

impl<A: Actor> Clone for ActorRef<A> {
    fn clone(&self) -> Self {
        Self {
            mailbox: self.mailbox.clone(),
            lifeline: self.lifeline.clone(),
        }
    }
}

impl<A: Actor> PartialEq for ActorRef<A> {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl<A: Actor> Eq for ActorRef<A> {}

impl<A: Actor> Debug for ActorRef<A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRef").field("id", &self.id()).finish()
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use crate::runner::start;

    use tracing_test::traced_test;

    struct Echo;

    #[derive(Debug)]
    enum EchoInfo {
        Tick,
        Down(ActorId, ExitReason),
    }

    #[async_trait]
    impl Actor for Echo {
        type Args = ();
        type State = Vec<String>;
        type Call = String;
        type Reply = Vec<String>;
        type Cast = ();
        type Info = EchoInfo;

        async fn init(
            &self,
            _args: (),
            _ctx: &mut ActorContext<Self>,
        ) -> Result<Vec<String>, Error> {
            Ok(Vec::new())
        }

        async fn handle_call(
            &self,
            msg: String,
            mut state: Vec<String>,
            _ctx: &mut ActorContext<Self>,
        ) -> Result<CallStep<Vec<String>, Vec<String>>, Error> {
            if msg == "log" {
                return Ok(CallStep::Reply(state.clone(), state));
            }
            state.push(msg);
            Ok(CallStep::Reply(state.clone(), state))
        }

        async fn handle_info(
            &self,
            msg: EchoInfo,
            mut state: Vec<String>,
            _ctx: &mut ActorContext<Self>,
        ) -> Result<Step<Vec<String>>, Error> {
            match msg {
                EchoInfo::Tick => state.push("tick".to_owned()),
                EchoInfo::Down(_, reason) => {
                    state.push(format!("down {}", reason))
                }
            }
            Ok(Step::Continue(state))
        }
    }

    #[test]
    fn test_actor_id_is_unique() {
        let a = ActorId::next();
        let b = ActorId::next();
        assert_ne!(a, b);
        assert_eq!(format!("{}", ActorId(7)), "<7>");
    }

    #[test]
    fn test_exit_reason_classification() {
        assert!(!ExitReason::Normal.is_abnormal());
        assert!(!ExitReason::Shutdown.is_abnormal());
        assert!(ExitReason::Killed.is_abnormal());
        assert!(
            ExitReason::Fault(Error::HandlerFault("boom".to_owned()))
                .is_abnormal()
        );
    }

    #[tokio::test]
    async fn test_send_after_delivers_info() {
        let echo = start(Echo, ()).await.unwrap();
        let ctx = ActorContext::new(echo.clone());
        ctx.send_after(EchoInfo::Tick, Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(80)).await;
        let log = echo.call("log".to_owned(), None).await.unwrap();
        assert_eq!(log, vec!["tick".to_owned()]);
    }

    #[tokio::test]
    async fn test_cancelled_timer_never_fires() {
        let echo = start(Echo, ()).await.unwrap();
        let ctx = ActorContext::new(echo.clone());
        let timer = ctx.send_after(EchoInfo::Tick, Duration::from_millis(50));
        timer.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(timer.is_finished());
        let log = echo.call("log".to_owned(), None).await.unwrap();
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_monitor_reports_exit() {
        let watcher = start(Echo, ()).await.unwrap();
        let target = start(Echo, ()).await.unwrap();
        let ctx = ActorContext::new(watcher.clone());
        ctx.monitor(target.lifeline(), EchoInfo::Down);
        target.kill();
        assert_eq!(target.wait().await, ExitReason::Killed);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let log = watcher.call("log".to_owned(), None).await.unwrap();
        assert_eq!(log, vec!["down killed".to_owned()]);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_link_propagates_abnormal_exit() {
        let left = start(Echo, ()).await.unwrap();
        let right = start(Echo, ()).await.unwrap();
        let ctx = ActorContext::new(left.clone());
        ctx.link(right.lifeline());
        right.kill();
        let reason = left.wait().await;
        assert_eq!(reason, ExitReason::Fault(Error::LinkedExit(right.id())));
        assert!(logs_contain("Propagating exit"));
    }

    #[tokio::test]
    async fn test_link_ignores_normal_exit() {
        let left = start(Echo, ()).await.unwrap();
        let right = start(Echo, ()).await.unwrap();
        let ctx = ActorContext::new(left.clone());
        ctx.link(right.lifeline());
        assert_eq!(right.stop().await, ExitReason::Normal);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(left.is_alive());
    }
}
