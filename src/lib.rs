// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Core library for the Rush generic server runtime.
//! Re-exports the actor runtime: typed call/cast/info messaging, a name registry, supervisors
//! with restart strategies and the actor system that owns them.

pub use actor::{
    Actor, ActorContext, ActorId, ActorLifecycle, ActorRef, ActorSystem,
    CallStep, ChildInfo, ChildSpec, Error as ActorError, ExitReason,
    ExponentialBackoff, FixedBackoff, Lifeline, NoBackoff, Registry,
    RestartBackoff, RestartIntensity, RestartPolicy, Step, Strategy,
    Supervisor, SupervisorSpec, SystemEvent, SystemRef, SystemRunner, Timer,
    start, start_supervisor,
};
