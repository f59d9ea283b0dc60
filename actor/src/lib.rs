// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Rush Generic Server
//!
//! A typed generic-server runtime built on tokio. An actor is a handler value plus a private
//! state value, driven by its own task. Other tasks reach it only through messages, so the
//! state needs no locking: exactly one handler invocation runs at a time.
//!
//! ## Messaging
//!
//! Every actor declares three message channels, all delivered through one FIFO mailbox:
//!
//! - **Call**: request/reply. The caller waits for the answer, bounded by an optional timeout.
//!   Every call ends in a reply, [`Error::Timeout`] or [`Error::ActorUnavailable`]; it never
//!   hangs on a dead actor.
//! - **Cast**: fire-and-forget. Returns as soon as the message is queued.
//! - **Info**: out-of-band notifications such as timers ([`ActorContext::send_after`]) and
//!   monitors ([`ActorContext::monitor`]).
//!
//! Messages from one sender are handled in send order. Stop requests bypass the mailbox and are
//! served before anything still queued; whatever is left is dropped, and waiting callers see
//! [`Error::ActorUnavailable`].
//!
//! ## Faults
//!
//! A handler that returns `Err` or panics terminates its actor with
//! `ExitReason::Fault(Error::HandlerFault(_))`. The fault never escapes the actor's task:
//! monitors, links and supervisors decide what happens next.
//!
//! ## Supervision
//!
//! A [`Supervisor`] starts a list of [`ChildSpec`]s and restarts them when they terminate,
//! following each child's [`RestartPolicy`] and its own [`Strategy`]. A child that fails more
//! often than its [`RestartIntensity`] allows makes the supervisor give up with
//! [`Error::RestartLimitExceeded`], which its own supervisor then handles.
//!
//! ## Getting Started
//!
//! ```ignore
//! use actor::{Actor, ActorContext, CallStep, Error, Step, start};
//! use async_trait::async_trait;
//!
//! struct Counter;
//!
//! enum Request {
//!     Get,
//! }
//!
//! #[async_trait]
//! impl Actor for Counter {
//!     type Args = u64;
//!     type State = u64;
//!     type Call = Request;
//!     type Reply = u64;
//!     type Cast = u64;
//!     type Info = ();
//!
//!     async fn init(&self, start: u64, _ctx: &mut ActorContext<Self>) -> Result<u64, Error> {
//!         Ok(start)
//!     }
//!
//!     async fn handle_call(
//!         &self,
//!         _msg: Request,
//!         state: u64,
//!         _ctx: &mut ActorContext<Self>,
//!     ) -> Result<CallStep<u64, u64>, Error> {
//!         Ok(CallStep::Reply(state, state))
//!     }
//!
//!     async fn handle_cast(
//!         &self,
//!         delta: u64,
//!         state: u64,
//!         _ctx: &mut ActorContext<Self>,
//!     ) -> Result<Step<u64>, Error> {
//!         Ok(Step::Continue(state + delta))
//!     }
//! }
//!
//! let counter = start(Counter, 0).await?;
//! counter.cast(1)?;
//! assert_eq!(counter.call(Request::Get, None).await?, 1);
//! ```
//!

// Private modules containing the implementation
mod actor;
mod error;
mod mailbox;
mod registry;
mod runner;
mod supervision;
mod supervisor;
mod system;

//
// Core Actor Types
//

/// The handler trait of a generic server: `init`, `handle_call`, `handle_cast`,
/// `handle_info` and `terminate`.
pub use actor::Actor;

/// Context handed to every hook: self reference, stop, timers, monitors and links.
pub use actor::ActorContext;

/// Unique id of an actor incarnation.
pub use actor::ActorId;

/// Lifecycle states published by every actor.
pub use actor::ActorLifecycle;

/// Typed, cloneable reference used to call, cast, info and stop an actor.
pub use actor::ActorRef;

/// Outcome of `handle_call`.
pub use actor::CallStep;

/// Why an actor terminated.
pub use actor::ExitReason;

/// Outcome of `handle_cast` and `handle_info`.
pub use actor::Step;

/// Handle of a one-shot timer.
pub use actor::Timer;

/// Untyped control handle used to stop, kill and watch an actor of any type.
pub use runner::Lifeline;

/// Starts an actor and waits for its `init` to complete.
pub use runner::start;

//
// Mailbox
//

/// Message envelope: call, cast or info.
pub use mailbox::Envelope;

/// Outcome of a dequeue attempt.
pub use mailbox::Dequeue;

/// Creates a standalone mailbox.
pub use mailbox::mailbox;

/// Sending side of a mailbox.
pub use mailbox::MailboxSender;

/// Receiving side of a mailbox.
pub use mailbox::MailboxReceiver;

//
// Error Handling
//

/// Error type shared by the whole runtime.
pub use error::Error;

//
// Naming
//

/// Name table mapping logical names to actor references.
pub use registry::Registry;

//
// Supervision
//

/// Child restart policy: permanent, transient or temporary.
pub use supervision::RestartPolicy;

/// Which siblings restart together with a failed child.
pub use supervision::Strategy;

/// Maximum restarts tolerated within a sliding window.
pub use supervision::RestartIntensity;

/// Delay before restarting a child.
pub use supervision::RestartBackoff;

/// Restart immediately.
pub use supervision::NoBackoff;

/// Fixed delay before every restart.
pub use supervision::FixedBackoff;

/// Exponentially growing delay before every restart.
pub use supervision::ExponentialBackoff;

/// Specification of one supervised child.
pub use supervisor::ChildSpec;

/// Snapshot of a supervised child.
pub use supervisor::ChildInfo;

/// The supervisor actor.
pub use supervisor::Supervisor;

/// Supervisor messages.
pub use supervisor::{
    SupervisorCall, SupervisorInfo, SupervisorReply, SupervisorState,
};

/// Configuration of a supervisor.
pub use supervisor::SupervisorSpec;

/// Starts a supervisor.
pub use supervisor::start_supervisor;

//
// System Management
//

/// Factory of actor systems.
pub use system::ActorSystem;

/// System-level events.
pub use system::SystemEvent;

/// Reference to an actor system: root actors, supervisors and name lookup.
pub use system::SystemRef;

/// Drives an actor system until it stopped.
///
/// Execute using `runner.run().await` in a dedicated async task.
pub use system::SystemRunner;
