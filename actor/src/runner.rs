// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor Internal Execution System
//!
//! Each actor is driven by one `ActorRunner` on its own tokio task. The runner owns the
//! handler, the state, the receiving side of the mailbox and the stop channel, and walks the
//! actor through its lifecycle:
//!
//! - **Starting**: `init` builds the first state. Failure (error or panic) is reported to the
//!   starter as `Error::InitFailed` and the actor terminates without ever running.
//! - **Running**: a select loop serves stop requests first, then mailbox messages one at a
//!   time. The state is moved into each handler and the returned state replaces it.
//! - **Stopping**: the mailbox is closed and drained, so pending callers observe
//!   `Error::ActorUnavailable`. `terminate` runs, bounded by [`Actor::shutdown_grace`].
//! - **Terminated**: the exit reason is published to every [`Lifeline`] watcher.
//!
//! Every user hook is raced against the kill token and wrapped in `catch_unwind`, so a panic
//! or a kill never leaves the lifecycle unpublished.
//!

use crate::{
    ActorId, Error,
    actor::{
        Actor, ActorContext, ActorLifecycle, ActorRef, CallStep, ExitReason,
        Step,
    },
    mailbox::{Dequeue, Envelope, MailboxReceiver, mailbox},
};

use futures::FutureExt;
use tokio::{
    select,
    sync::{mpsc, oneshot, watch},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use std::{
    any::Any,
    fmt::{Display, Formatter},
    future::Future,
    panic::AssertUnwindSafe,
    time::Duration,
};

/// Channel sender for stop requests. Stop requests carry the exit reason and are served
/// before any queued message.
pub(crate) type StopSender = mpsc::Sender<ExitReason>;

/// Channel receiver for stop requests.
pub(crate) type StopReceiver = mpsc::Receiver<ExitReason>;

/// Untyped control handle of an actor.
///
/// A `Lifeline` can stop, kill and watch an actor without knowing its message types. The
/// registry and supervisors keep lifelines of actors of any type.
#[derive(Clone)]
pub struct Lifeline {
    id: ActorId,
    stop: StopSender,
    status: watch::Receiver<ActorLifecycle>,
    kill: CancellationToken,
}

impl Lifeline {
    /// Id of the actor.
    pub fn id(&self) -> ActorId {
        self.id
    }

    /// Current lifecycle state. An actor whose task vanished without publishing an exit is
    /// reported as killed.
    pub fn lifecycle(&self) -> ActorLifecycle {
        let lifecycle = self.status.borrow().clone();
        match lifecycle {
            ActorLifecycle::Terminated(_) => lifecycle,
            _ if self.status.has_changed().is_err() => {
                ActorLifecycle::Terminated(ExitReason::Killed)
            }
            _ => lifecycle,
        }
    }

    /// True while the actor is starting or running.
    pub fn is_alive(&self) -> bool {
        matches!(
            self.lifecycle(),
            ActorLifecycle::Starting | ActorLifecycle::Running
        )
    }

    /// Waits until the actor terminated and returns why.
    pub async fn wait(&self) -> ExitReason {
        let mut status = self.status.clone();
        let terminated = status
            .wait_for(|lifecycle| {
                matches!(lifecycle, ActorLifecycle::Terminated(_))
            })
            .await;
        match terminated {
            Ok(lifecycle) => match &*lifecycle {
                ActorLifecycle::Terminated(reason) => reason.clone(),
                _ => ExitReason::Killed,
            },
            Err(_) => ExitReason::Killed,
        }
    }

    /// Queues a stop request without waiting.
    pub(crate) fn request_stop(&self, reason: ExitReason) {
        if let Err(error) = self.stop.try_send(reason) {
            debug!("Stop request for actor {} not sent: {}", self.id, error);
        }
    }

    /// Asks the actor to stop with `reason` and waits until it terminated.
    pub async fn stop(&self, reason: ExitReason) -> ExitReason {
        debug!("Stopping actor {}.", self.id);
        if self.stop.send(reason).await.is_err() {
            debug!("Actor {} was already stopped.", self.id);
        }
        self.wait().await
    }

    /// Stops the actor with `ExitReason::Shutdown`; kills it if it is still running after
    /// `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> ExitReason {
        match tokio::time::timeout(timeout, self.stop(ExitReason::Shutdown))
            .await
        {
            Ok(reason) => reason,
            Err(_) => {
                warn!(
                    "Actor {} did not stop within {:?}, killing it.",
                    self.id, timeout
                );
                self.kill();
                self.wait().await
            }
        }
    }

    /// Tears the actor down at the next await point of its task. `terminate` is not run.
    pub fn kill(&self) {
        self.kill.cancel();
    }
}

/// Starts an actor on a new task.
///
/// Waits until `init` completed, so a returned reference always points to a running actor.
///
/// # Errors
///
/// Returns `Error::InitFailed` if `init` returned an error or panicked.
///
pub async fn start<A: Actor>(
    actor: A,
    args: A::Args,
) -> Result<ActorRef<A>, Error> {
    let (runner, actor_ref) = ActorRunner::create(actor);
    let (started_sender, started_receiver) = oneshot::channel();
    let ctx = ActorContext::new(actor_ref.clone());
    tokio::spawn(runner.init(args, ctx, started_sender));
    match started_receiver.await {
        Ok(Ok(())) => Ok(actor_ref),
        Ok(Err(error)) => Err(error),
        Err(_) => Err(Error::InitFailed(
            "runner dropped before reporting start".to_owned(),
        )),
    }
}

/// Why a user hook did not complete.
enum Interrupt {
    Killed,
    Fault(String),
}

impl Display for Interrupt {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Interrupt::Killed => write!(f, "killed"),
            Interrupt::Fault(reason) => write!(f, "{}", reason),
        }
    }
}

/// Result of dispatching one message.
enum Dispatched<S> {
    Continue(S),
    Stop(ExitReason, Option<S>),
}

/// Runs a user hook, converting errors and panics into faults and giving up when the actor is
/// killed.
async fn guarded<T, F>(
    kill: &CancellationToken,
    hook: F,
) -> Result<T, Interrupt>
where
    F: Future<Output = Result<T, Error>>,
{
    select! {
        biased;
        _ = kill.cancelled() => Err(Interrupt::Killed),
        outcome = AssertUnwindSafe(hook).catch_unwind() => match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(Interrupt::Fault(error.to_string())),
            Err(panic) => Err(Interrupt::Fault(panic_message(panic))),
        },
    }
}

pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_owned()
    }
}

/// Execution engine of a single actor.
pub(crate) struct ActorRunner<A: Actor> {
    /// Id of the actor.
    id: ActorId,
    /// The handler.
    actor: A,
    /// Receiving side of the mailbox.
    receiver: MailboxReceiver<Envelope<A>>,
    /// Stop requests, served before messages.
    stop_receiver: StopReceiver,
    /// Lifecycle publisher.
    status: watch::Sender<ActorLifecycle>,
    /// Cancelled to kill the actor.
    kill: CancellationToken,
}

impl<A: Actor> ActorRunner<A> {
    /// Creates the runner and the reference to its actor.
    pub(crate) fn create(actor: A) -> (Self, ActorRef<A>) {
        let id = ActorId::next();
        debug!("Creating actor {} runner.", id);
        let (sender, receiver) = mailbox(id);
        let (stop_sender, stop_receiver) = mpsc::channel(100);
        let (status, status_receiver) =
            watch::channel(ActorLifecycle::Starting);
        let kill = CancellationToken::new();
        let lifeline = Lifeline {
            id,
            stop: stop_sender,
            status: status_receiver,
            kill: kill.clone(),
        };
        let runner = ActorRunner {
            id,
            actor,
            receiver,
            stop_receiver,
            status,
            kill,
        };
        (runner, ActorRef::new(sender, lifeline))
    }

    fn transition(&self, lifecycle: ActorLifecycle) {
        debug!("Actor {} is {:?}.", self.id, lifecycle);
        self.status.send_replace(lifecycle);
    }

    /// Runs the whole lifecycle of the actor.
    pub(crate) async fn init(
        mut self,
        args: A::Args,
        mut ctx: ActorContext<A>,
        started: oneshot::Sender<Result<(), Error>>,
    ) {
        let kill = self.kill.clone();

        // State: STARTING
        let state = match guarded(&kill, self.actor.init(args, &mut ctx)).await
        {
            Ok(state) => state,
            Err(interrupt) => {
                let error = Error::InitFailed(interrupt.to_string());
                error!("Actor {} failed to start: {}", self.id, error);
                self.receiver.close();
                self.transition(ActorLifecycle::Terminated(ExitReason::Fault(
                    error.clone(),
                )));
                if started.send(Err(error)).is_err() {
                    debug!("Starter of actor {} is gone.", self.id);
                }
                return;
            }
        };

        // State: RUNNING
        self.transition(ActorLifecycle::Running);
        if started.send(Ok(())).is_err() {
            debug!("Starter of actor {} is gone.", self.id);
        }
        let (mut reason, state) = self.run(state, &mut ctx).await;

        // State: STOPPING
        self.transition(ActorLifecycle::Stopping);
        self.receiver.close();
        if reason.is_abnormal() {
            error!("Actor {} is stopping: {}", self.id, reason);
        } else {
            debug!("Actor {} is stopping: {}", self.id, reason);
        }

        if reason != ExitReason::Killed {
            let grace = A::shutdown_grace();
            let terminate = guarded(&kill, async {
                self.actor.terminate(&reason, state, &mut ctx).await;
                Ok(())
            });
            let outcome = tokio::time::timeout(grace, terminate).await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(Interrupt::Killed)) => reason = ExitReason::Killed,
                Ok(Err(Interrupt::Fault(fault))) => {
                    error!("Actor {} failed to terminate: {}", self.id, fault);
                }
                Err(_) => {
                    error!(
                        "Actor {} did not terminate within {:?}.",
                        self.id, grace
                    );
                }
            }
        }

        // State: TERMINATED
        self.transition(ActorLifecycle::Terminated(reason));
    }

    /// Message loop. Returns the exit reason and the last state, if any survived.
    async fn run(
        &mut self,
        mut state: A::State,
        ctx: &mut ActorContext<A>,
    ) -> (ExitReason, Option<A::State>) {
        debug!("Running actor {}.", self.id);
        loop {
            let next = select! {
                biased;
                _ = self.kill.cancelled() => return (ExitReason::Killed, None),
                Some(reason) = self.stop_receiver.recv() => {
                    debug!("Actor {} received a stop request.", self.id);
                    return (reason, Some(state));
                }
                next = self.receiver.dequeue(None) => next,
            };
            match next {
                Dequeue::Message(envelope) => {
                    match self.dispatch(envelope, state, ctx).await {
                        Dispatched::Continue(next) => state = next,
                        Dispatched::Stop(reason, last) => return (reason, last),
                    }
                }
                Dequeue::Closed => return (ExitReason::Shutdown, Some(state)),
                Dequeue::Timeout => {}
            }
        }
    }

    async fn dispatch(
        &self,
        envelope: Envelope<A>,
        state: A::State,
        ctx: &mut ActorContext<A>,
    ) -> Dispatched<A::State> {
        let kind = envelope.kind();
        match envelope {
            Envelope::Call { payload, reply } => {
                let outcome = guarded(
                    &self.kill,
                    self.actor.handle_call(payload, state, ctx),
                )
                .await;
                match outcome {
                    Ok(CallStep::Reply(response, next)) => {
                        if reply.send(response).is_err() {
                            debug!(
                                "Caller of actor {} left, reply discarded.",
                                self.id
                            );
                        }
                        Dispatched::Continue(next)
                    }
                    Ok(CallStep::Stop(reason, response, last)) => {
                        if let Some(response) = response {
                            if reply.send(response).is_err() {
                                debug!(
                                    "Caller of actor {} left, reply discarded.",
                                    self.id
                                );
                            }
                        }
                        Dispatched::Stop(reason, Some(last))
                    }
                    Err(interrupt) => self.interrupted(kind, interrupt),
                }
            }
            Envelope::Cast { payload } => {
                let outcome = guarded(
                    &self.kill,
                    self.actor.handle_cast(payload, state, ctx),
                )
                .await;
                self.stepped(kind, outcome)
            }
            Envelope::Info { payload } => {
                let outcome = guarded(
                    &self.kill,
                    self.actor.handle_info(payload, state, ctx),
                )
                .await;
                self.stepped(kind, outcome)
            }
        }
    }

    fn stepped(
        &self,
        kind: &str,
        outcome: Result<Step<A::State>, Interrupt>,
    ) -> Dispatched<A::State> {
        match outcome {
            Ok(Step::Continue(next)) => Dispatched::Continue(next),
            Ok(Step::Stop(reason, last)) => {
                Dispatched::Stop(reason, Some(last))
            }
            Err(interrupt) => self.interrupted(kind, interrupt),
        }
    }

    fn interrupted(
        &self,
        kind: &str,
        interrupt: Interrupt,
    ) -> Dispatched<A::State> {
        match interrupt {
            Interrupt::Killed => Dispatched::Stop(ExitReason::Killed, None),
            Interrupt::Fault(fault) => {
                error!(
                    "Actor {} faulted while handling a {}: {}",
                    self.id, kind, fault
                );
                Dispatched::Stop(
                    ExitReason::Fault(Error::HandlerFault(fault)),
                    None,
                )
            }
        }
    }
}
