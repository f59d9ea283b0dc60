// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Supervisor
//!
//! A supervisor is an actor whose state is a list of supervised children. It starts them in
//! declared order, monitors them and restarts the ones that terminate according to their
//! [`RestartPolicy`] and its own [`Strategy`].
//!
//! Every restart is counted against the [`RestartIntensity`] of the failed child. When a child
//! fails once more than the intensity allows, the supervisor stops all its children in reverse
//! order and terminates with `Error::RestartLimitExceeded`. Since a supervisor is an actor,
//! it can be supervised itself: the parent then sees the escalation as an abnormal exit.
//!

use crate::{
    ActorId, Error,
    actor::{Actor, ActorContext, ActorRef, CallStep, ExitReason, Step},
    runner::{Lifeline, panic_message, start},
    supervision::{
        NoBackoff, RestartBackoff, RestartIntensity, RestartPolicy,
        RestartWindow, Strategy,
    },
};

use async_trait::async_trait;
use futures::{FutureExt, future::BoxFuture};
use tokio::select;
use tracing::{debug, error, warn};

use std::{
    any::Any,
    collections::HashSet,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::{Duration, Instant},
};

/// Wait budget of supervisor queries.
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

type StartFn =
    Box<dyn Fn() -> BoxFuture<'static, Result<Child, Error>> + Send + Sync>;

/// A started child, type-erased.
pub(crate) struct Child {
    lifeline: Lifeline,
    reference: Arc<dyn Any + Send + Sync>,
}

/// How to (re)create one child.
pub struct ChildSpec {
    name: String,
    start: StartFn,
    restart: RestartPolicy,
    shutdown: Duration,
    backoff: Box<dyn RestartBackoff>,
}

impl ChildSpec {
    /// Child named `name`, built by `factory` on every (re)start. A panicking factory counts
    /// as a failed start.
    ///
    /// Defaults to a permanent child, restarted without delay, given `A::shutdown_grace()` to
    /// stop before it is killed.
    pub fn new<A, F>(name: &str, factory: F) -> Self
    where
        A: Actor,
        F: Fn() -> (A, A::Args) + Send + Sync + 'static,
    {
        let starter: StartFn = Box::new(move || {
            let built = panic::catch_unwind(AssertUnwindSafe(&factory))
                .map_err(|panic| Error::InitFailed(panic_message(panic)));
            async move {
                let (actor, args) = built?;
                let actor_ref = start(actor, args).await?;
                Ok(Child {
                    lifeline: actor_ref.lifeline().clone(),
                    reference: Arc::new(actor_ref),
                })
            }
            .boxed()
        });
        Self {
            name: name.to_owned(),
            start: starter,
            restart: RestartPolicy::default(),
            shutdown: A::shutdown_grace(),
            backoff: Box::new(NoBackoff),
        }
    }

    pub fn restart(mut self, policy: RestartPolicy) -> Self {
        self.restart = policy;
        self
    }

    /// Time given to the child to stop before it is killed.
    pub fn shutdown(mut self, timeout: Duration) -> Self {
        self.shutdown = timeout;
        self
    }

    pub fn backoff<B: RestartBackoff + 'static>(mut self, backoff: B) -> Self {
        self.backoff = Box::new(backoff);
        self
    }
}

/// Configuration of a supervisor.
#[derive(Default)]
pub struct SupervisorSpec {
    strategy: Strategy,
    intensity: RestartIntensity,
    children: Vec<ChildSpec>,
}

impl SupervisorSpec {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    pub fn intensity(mut self, intensity: RestartIntensity) -> Self {
        self.intensity = intensity;
        self
    }

    /// Appends a child. Children start in the order they are added.
    pub fn child(mut self, child: ChildSpec) -> Self {
        self.children.push(child);
        self
    }

    fn validate(&self) -> Result<(), Error> {
        let mut names = HashSet::new();
        for child in &self.children {
            if !names.insert(child.name.as_str()) {
                return Err(Error::DuplicateChild(child.name.clone()));
            }
        }
        Ok(())
    }
}

/// Bookkeeping of one child.
pub(crate) struct SupervisionRecord {
    spec: ChildSpec,
    child: Option<Child>,
    restarts: usize,
    last_restart: Option<Instant>,
    window: RestartWindow,
}

impl SupervisionRecord {
    fn new(spec: ChildSpec) -> Self {
        Self {
            spec,
            child: None,
            restarts: 0,
            last_restart: None,
            window: RestartWindow::default(),
        }
    }

    fn child_id(&self) -> Option<ActorId> {
        self.child.as_ref().map(|child| child.lifeline.id())
    }

    fn info(&self) -> ChildInfo {
        ChildInfo {
            name: self.spec.name.clone(),
            id: self.child_id(),
            restarts: self.restarts,
            last_restart: self.last_restart,
        }
    }
}

/// Snapshot of a supervised child.
#[derive(Clone, Debug, PartialEq)]
pub struct ChildInfo {
    pub name: String,
    /// Id of the running incarnation, `None` while stopped.
    pub id: Option<ActorId>,
    /// Restarts since the supervisor started.
    pub restarts: usize,
    pub last_restart: Option<Instant>,
}

/// Requests served by a supervisor.
pub enum SupervisorCall {
    WhichChildren,
    Child(String),
}

pub enum SupervisorReply {
    Children(Vec<ChildInfo>),
    Child(Result<Arc<dyn Any + Send + Sync>, Error>),
}

/// Notifications delivered to a supervisor.
pub enum SupervisorInfo {
    /// A monitored child terminated.
    ChildExited { id: ActorId, reason: ExitReason },
    /// Backoff of the listed children elapsed.
    Restart(Vec<usize>),
}

/// State of a running supervisor.
pub struct SupervisorState {
    strategy: Strategy,
    intensity: RestartIntensity,
    records: Vec<SupervisionRecord>,
}

/// The supervisor actor. Start it with [`start_supervisor`] or as a child of another
/// supervisor.
pub struct Supervisor;

#[async_trait]
impl Actor for Supervisor {
    type Args = SupervisorSpec;
    type State = SupervisorState;
    type Call = SupervisorCall;
    type Reply = SupervisorReply;
    type Cast = ();
    type Info = SupervisorInfo;

    fn shutdown_grace() -> Duration {
        Duration::from_secs(60)
    }

    async fn init(
        &self,
        spec: SupervisorSpec,
        ctx: &mut ActorContext<Self>,
    ) -> Result<SupervisorState, Error> {
        spec.validate()?;
        let mut state = SupervisorState {
            strategy: spec.strategy,
            intensity: spec.intensity,
            records: spec
                .children
                .into_iter()
                .map(SupervisionRecord::new)
                .collect(),
        };
        for idx in 0..state.records.len() {
            if let Err(error) = start_child(&mut state.records[idx], ctx).await
            {
                error!(
                    "Supervisor {} failed to start child '{}': {}",
                    ctx.id(),
                    state.records[idx].spec.name,
                    error
                );
                stop_children(&mut state.records).await;
                return Err(error);
            }
        }
        debug!(
            "Supervisor {} started {} children.",
            ctx.id(),
            state.records.len()
        );
        Ok(state)
    }

    async fn handle_call(
        &self,
        msg: SupervisorCall,
        state: SupervisorState,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<CallStep<SupervisorReply, SupervisorState>, Error> {
        let reply = match msg {
            SupervisorCall::WhichChildren => SupervisorReply::Children(
                state.records.iter().map(SupervisionRecord::info).collect(),
            ),
            SupervisorCall::Child(name) => {
                let found = state
                    .records
                    .iter()
                    .find(|record| record.spec.name == name);
                SupervisorReply::Child(match found {
                    None => Err(Error::NotFound(name)),
                    Some(record) => match &record.child {
                        Some(child) if child.lifeline.is_alive() => {
                            Ok(child.reference.clone())
                        }
                        _ => Err(Error::NotRunning(name)),
                    },
                })
            }
        };
        Ok(CallStep::Reply(reply, state))
    }

    async fn handle_info(
        &self,
        msg: SupervisorInfo,
        mut state: SupervisorState,
        ctx: &mut ActorContext<Self>,
    ) -> Result<Step<SupervisorState>, Error> {
        let escalation = match msg {
            SupervisorInfo::ChildExited { id, reason } => {
                child_exited(&mut state, id, reason, ctx).await
            }
            SupervisorInfo::Restart(indices) => {
                restart_children(&mut state, &indices, ctx).await
            }
        };
        match escalation {
            None => Ok(Step::Continue(state)),
            Some(error) => {
                error!("Supervisor {} is giving up: {}", ctx.id(), error);
                Ok(Step::Stop(ExitReason::Fault(error), state))
            }
        }
    }

    async fn terminate(
        &self,
        reason: &ExitReason,
        state: Option<SupervisorState>,
        ctx: &mut ActorContext<Self>,
    ) {
        debug!("Supervisor {} terminating: {}", ctx.id(), reason);
        if let Some(mut state) = state {
            stop_children(&mut state.records).await;
        }
    }
}

/// Starts the child of `record` and monitors it.
async fn start_child(
    record: &mut SupervisionRecord,
    ctx: &ActorContext<Supervisor>,
) -> Result<(), Error> {
    let child = (record.spec.start)().await?;
    debug!(
        "Supervisor {} started child '{}' as {}.",
        ctx.id(),
        record.spec.name,
        child.lifeline.id()
    );
    ctx.monitor(&child.lifeline, |id, reason| SupervisorInfo::ChildExited {
        id,
        reason,
    });
    // No child outlives its supervisor, whatever became of its terminate.
    let supervisor = ctx.myself().lifeline().clone();
    let orphan = child.lifeline.clone();
    tokio::spawn(async move {
        select! {
            reason = supervisor.wait() => {
                if orphan.is_alive() {
                    warn!(
                        "Supervisor {} exited ({}), killing child {}.",
                        supervisor.id(),
                        reason,
                        orphan.id()
                    );
                    orphan.kill();
                }
            }
            _ = orphan.wait() => {}
        }
    });
    record.child = Some(child);
    Ok(())
}

/// Stops the child of `record`, if running, and waits until it terminated.
async fn stop_child(record: &mut SupervisionRecord) {
    if let Some(child) = record.child.take() {
        let reason = child.lifeline.shutdown(record.spec.shutdown).await;
        debug!("Child '{}' stopped: {}", record.spec.name, reason);
    }
}

/// Stops every child in reverse declared order.
async fn stop_children(records: &mut [SupervisionRecord]) {
    for record in records.iter_mut().rev() {
        stop_child(record).await;
    }
}

/// Applies restart policy and strategy to the exit of child `id`.
///
/// # Returns
///
/// Returns the error to escalate with, if the restart intensity was exceeded.
///
async fn child_exited(
    state: &mut SupervisorState,
    id: ActorId,
    reason: ExitReason,
    ctx: &ActorContext<Supervisor>,
) -> Option<Error> {
    let Some(failed) = state
        .records
        .iter()
        .position(|record| record.child_id() == Some(id))
    else {
        debug!("Ignoring exit of former child {}.", id);
        return None;
    };
    let record = &mut state.records[failed];
    record.child = None;
    if !record.spec.restart.restarts(reason.is_abnormal()) {
        debug!(
            "Child '{}' exited ({}) and stays stopped.",
            record.spec.name, reason
        );
        return None;
    }
    warn!("Child '{}' exited: {}", record.spec.name, reason);

    let now = Instant::now();
    if !record.window.record(&state.intensity, now) {
        stop_children(&mut state.records).await;
        return Some(limit_exceeded(state, failed));
    }
    if record.window.len() == 1 {
        record.spec.backoff.reset();
    }
    record.restarts += 1;
    record.last_restart = Some(now);
    let delay = record.spec.backoff.next_backoff();

    // Running siblings go down before anything comes back up. Temporary ones stay down.
    let affected = state.strategy.affected(failed, state.records.len());
    let mut restart = Vec::with_capacity(affected.len());
    for &idx in affected.iter().rev() {
        let record = &mut state.records[idx];
        if idx != failed {
            if record.child.is_none() {
                continue;
            }
            stop_child(record).await;
            if record.spec.restart == RestartPolicy::Temporary {
                continue;
            }
        }
        restart.push(idx);
    }
    restart.reverse();

    match delay {
        Some(delay) if !delay.is_zero() => {
            debug!(
                "Restarting children {:?} of supervisor {} in {:?}.",
                restart,
                ctx.id(),
                delay
            );
            ctx.send_after(SupervisorInfo::Restart(restart), delay);
            None
        }
        _ => restart_children(state, &restart, ctx).await,
    }
}

/// Starts the listed children in declared order. A child that fails to start counts as a
/// failed restart and is retried.
async fn restart_children(
    state: &mut SupervisorState,
    indices: &[usize],
    ctx: &ActorContext<Supervisor>,
) -> Option<Error> {
    for &idx in indices {
        let Some(record) = state.records.get_mut(idx) else {
            continue;
        };
        if record.child.is_some() {
            continue;
        }
        if let Err(error) = start_child(record, ctx).await {
            error!("Restart of child '{}' failed: {}", record.spec.name, error);
            let now = Instant::now();
            if !record.window.record(&state.intensity, now) {
                stop_children(&mut state.records).await;
                return Some(limit_exceeded(state, idx));
            }
            record.restarts += 1;
            record.last_restart = Some(now);
            let retry = SupervisorInfo::Restart(vec![idx]);
            match record.spec.backoff.next_backoff() {
                Some(delay) => {
                    ctx.send_after(retry, delay);
                }
                None => {
                    if ctx.myself().info(retry).is_err() {
                        debug!("Supervisor {} is stopping.", ctx.id());
                    }
                }
            }
        }
    }
    None
}

fn limit_exceeded(state: &SupervisorState, failed: usize) -> Error {
    Error::RestartLimitExceeded {
        child: state.records[failed].spec.name.clone(),
        max_restarts: state.intensity.max_restarts,
        window: state.intensity.window,
    }
}

/// Starts a supervisor.
///
/// # Errors
///
/// * `Error::DuplicateChild` - Two children share a name.
/// * `Error::InitFailed` - A child failed to start. Children already started are stopped.
///
pub async fn start_supervisor(
    spec: SupervisorSpec,
) -> Result<ActorRef<Supervisor>, Error> {
    spec.validate()?;
    start(Supervisor, spec).await
}

impl ActorRef<Supervisor> {
    /// Snapshot of every child, in declared order.
    pub async fn which_children(&self) -> Result<Vec<ChildInfo>, Error> {
        match self
            .call(SupervisorCall::WhichChildren, Some(QUERY_TIMEOUT))
            .await?
        {
            SupervisorReply::Children(children) => Ok(children),
            SupervisorReply::Child(_) => Err(Error::Functional(
                "unexpected supervisor reply".to_owned(),
            )),
        }
    }

    /// Reference to the running child `name`.
    ///
    /// # Errors
    ///
    /// * `Error::NotFound` - No child is named `name`.
    /// * `Error::NotRunning` - The child is stopped or waiting for a restart.
    /// * `Error::TypeMismatch` - The child is not an `A`.
    ///
    pub async fn child<A: Actor>(
        &self,
        name: &str,
    ) -> Result<ActorRef<A>, Error> {
        let msg = SupervisorCall::Child(name.to_owned());
        match self.call(msg, Some(QUERY_TIMEOUT)).await? {
            SupervisorReply::Child(Ok(reference)) => reference
                .downcast_ref::<ActorRef<A>>()
                .cloned()
                .ok_or_else(|| Error::TypeMismatch(name.to_owned())),
            SupervisorReply::Child(Err(error)) => Err(error),
            SupervisorReply::Children(_) => Err(Error::Functional(
                "unexpected supervisor reply".to_owned(),
            )),
        }
    }
}
