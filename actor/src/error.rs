// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Errors module
//!

use crate::ActorId;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::time::Duration;

/// Error type for the actor runtime.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// The target actor is not running: it terminated before the message was
    /// enqueued, or before it could reply.
    #[error("Actor {0} is not available.")]
    ActorUnavailable(ActorId),
    /// A call was not answered within its wait budget. The request may still
    /// be processed by the actor; the outcome is unknown.
    #[error("Call timed out after {0:?}.")]
    Timeout(Duration),
    /// A name is already registered to a live actor.
    #[error("Name '{0}' is already registered.")]
    NameTaken(String),
    /// No entry under the given name.
    #[error("Name '{0}' not found.")]
    NotFound(String),
    /// An entry exists but refers to an actor of another type.
    #[error("Name '{0}' refers to an actor of another type.")]
    TypeMismatch(String),
    /// A supervised child exists but is currently stopped.
    #[error("Child '{0}' is not running.")]
    NotRunning(String),
    /// Two child specifications share the same name.
    #[error("Duplicate child name '{0}'.")]
    DuplicateChild(String),
    /// The `init` hook failed; the actor never started.
    #[error("Actor failed to initialize: {0}")]
    InitFailed(String),
    /// A handler returned an error or panicked.
    #[error("Handler fault: {0}")]
    HandlerFault(String),
    /// A linked actor terminated abnormally.
    #[error("Linked actor {0} exited abnormally.")]
    LinkedExit(ActorId),
    /// A supervised child restarted too often; the supervisor gave up.
    #[error(
        "Child '{child}' exceeded {max_restarts} restarts within {window:?}."
    )]
    RestartLimitExceeded {
        child: String,
        max_restarts: usize,
        window: Duration,
    },
    /// Error that does not compromise the operation of the system.
    #[error("Error: {0}")]
    Functional(String),
}
