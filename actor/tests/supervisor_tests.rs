// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

// Integration tests for supervision strategies and restart policies.

use actor::{
    Actor, ActorContext, ActorId, ActorRef, CallStep, ChildSpec, Error,
    ExitReason, RestartIntensity, RestartPolicy, Step, Strategy, Supervisor,
    SupervisorSpec, start_supervisor,
};
use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

type Journal = Arc<Mutex<Vec<String>>>;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Worker that journals its starts and stops.
pub struct Worker {
    name: &'static str,
    journal: Journal,
}

pub enum WorkerCast {
    Crash,
}

impl Worker {
    fn note(&self, event: &str) {
        if let Ok(mut journal) = self.journal.lock() {
            journal.push(format!("{} {}", event, self.name));
        }
    }
}

#[async_trait]
impl Actor for Worker {
    type Args = ();
    type State = ();
    type Call = ();
    type Reply = &'static str;
    type Cast = WorkerCast;
    type Info = ();

    async fn init(
        &self,
        _args: (),
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        self.note("start");
        Ok(())
    }

    async fn handle_call(
        &self,
        _msg: (),
        state: (),
        _ctx: &mut ActorContext<Self>,
    ) -> Result<CallStep<&'static str, ()>, Error> {
        Ok(CallStep::Reply(self.name, state))
    }

    async fn handle_cast(
        &self,
        msg: WorkerCast,
        _state: (),
        _ctx: &mut ActorContext<Self>,
    ) -> Result<Step<()>, Error> {
        match msg {
            WorkerCast::Crash => {
                Err(Error::Functional(format!("{} crashed", self.name)))
            }
        }
    }

    async fn terminate(
        &self,
        _reason: &ExitReason,
        _state: Option<()>,
        _ctx: &mut ActorContext<Self>,
    ) {
        self.note("stop");
    }
}

fn worker(name: &'static str, journal: &Journal) -> ChildSpec {
    let journal = journal.clone();
    ChildSpec::new(name, move || {
        (
            Worker {
                name,
                journal: journal.clone(),
            },
            (),
        )
    })
}

fn three_workers(strategy: Strategy, journal: &Journal) -> SupervisorSpec {
    SupervisorSpec::new(strategy)
        .child(worker("a", journal))
        .child(worker("b", journal))
        .child(worker("c", journal))
}

/// Journal entries after the first `skip`.
fn journal_since(journal: &Journal, skip: usize) -> Vec<String> {
    journal.lock().unwrap().iter().skip(skip).cloned().collect()
}

/// Waits until child `name` runs as an incarnation other than `old`.
async fn next_incarnation(
    supervisor: &ActorRef<Supervisor>,
    name: &str,
    old: ActorId,
) -> ActorRef<Worker> {
    for _ in 0..200 {
        if let Ok(child) = supervisor.child::<Worker>(name).await {
            if child.id() != old {
                return child;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("child '{}' was not restarted", name);
}

async fn crash(worker: &ActorRef<Worker>) -> ExitReason {
    worker.cast(WorkerCast::Crash).unwrap();
    worker.wait().await
}

#[tokio::test]
async fn test_one_for_one_restarts_only_the_failed_child() {
    init_logging();
    let journal = Journal::default();
    let supervisor =
        start_supervisor(three_workers(Strategy::OneForOne, &journal))
            .await
            .unwrap();
    let a: ActorRef<Worker> = supervisor.child("a").await.unwrap();
    let b: ActorRef<Worker> = supervisor.child("b").await.unwrap();
    let c: ActorRef<Worker> = supervisor.child("c").await.unwrap();

    let reason = crash(&b).await;
    assert_eq!(
        reason,
        ExitReason::Fault(Error::HandlerFault("Error: b crashed".to_owned()))
    );
    let new_b = next_incarnation(&supervisor, "b", b.id()).await;
    assert_eq!(new_b.call((), None).await.unwrap(), "b");

    assert_eq!(supervisor.child::<Worker>("a").await.unwrap(), a);
    assert_eq!(supervisor.child::<Worker>("c").await.unwrap(), c);
    assert!(a.is_alive() && c.is_alive());

    let children = supervisor.which_children().await.unwrap();
    let restarts: Vec<usize> =
        children.iter().map(|child| child.restarts).collect();
    assert_eq!(restarts, vec![0, 1, 0]);
}

#[tokio::test]
async fn test_one_for_all_restarts_every_child() {
    init_logging();
    let journal = Journal::default();
    let supervisor =
        start_supervisor(three_workers(Strategy::OneForAll, &journal))
            .await
            .unwrap();
    let old: Vec<ActorRef<Worker>> = vec![
        supervisor.child("a").await.unwrap(),
        supervisor.child("b").await.unwrap(),
        supervisor.child("c").await.unwrap(),
    ];
    let started = journal.lock().unwrap().len();

    crash(&old[1]).await;
    let new_c = next_incarnation(&supervisor, "c", old[2].id()).await;

    // Every old incarnation is gone before any new one starts.
    assert!(old.iter().all(|child| !child.is_alive()));
    assert_eq!(
        journal_since(&journal, started),
        vec!["stop b", "stop c", "stop a", "start a", "start b", "start c"]
    );

    let new_a: ActorRef<Worker> = supervisor.child("a").await.unwrap();
    let new_b: ActorRef<Worker> = supervisor.child("b").await.unwrap();
    for (old, new) in old.iter().zip([&new_a, &new_b, &new_c]) {
        assert_ne!(old.id(), new.id());
        assert!(new.is_alive());
    }
}

#[tokio::test]
async fn test_rest_for_one_restarts_later_children() {
    init_logging();
    let journal = Journal::default();
    let supervisor =
        start_supervisor(three_workers(Strategy::RestForOne, &journal))
            .await
            .unwrap();
    let a: ActorRef<Worker> = supervisor.child("a").await.unwrap();
    let b: ActorRef<Worker> = supervisor.child("b").await.unwrap();
    let c: ActorRef<Worker> = supervisor.child("c").await.unwrap();
    let started = journal.lock().unwrap().len();

    crash(&b).await;
    next_incarnation(&supervisor, "c", c.id()).await;

    assert_eq!(
        journal_since(&journal, started),
        vec!["stop b", "stop c", "start b", "start c"]
    );
    assert_eq!(supervisor.child::<Worker>("a").await.unwrap(), a);
    assert!(a.is_alive());
    assert_ne!(supervisor.child::<Worker>("b").await.unwrap(), b);
}

#[tokio::test]
async fn test_restart_limit_escalates() {
    init_logging();
    let journal = Journal::default();
    let spec = SupervisorSpec::new(Strategy::OneForOne)
        .intensity(RestartIntensity::new(3, Duration::from_secs(5)))
        .child(worker("a", &journal))
        .child(worker("b", &journal));
    let supervisor = start_supervisor(spec).await.unwrap();
    let b: ActorRef<Worker> = supervisor.child("b").await.unwrap();

    let mut current: ActorRef<Worker> = supervisor.child("a").await.unwrap();
    for _ in 0..3 {
        crash(&current).await;
        current = next_incarnation(&supervisor, "a", current.id()).await;
    }
    let children = supervisor.which_children().await.unwrap();
    assert_eq!(children[0].restarts, 3);

    crash(&current).await;
    assert_eq!(
        supervisor.wait().await,
        ExitReason::Fault(Error::RestartLimitExceeded {
            child: "a".to_owned(),
            max_restarts: 3,
            window: Duration::from_secs(5),
        })
    );
    assert!(!b.is_alive());
    assert_eq!(
        supervisor.which_children().await.unwrap_err(),
        Error::ActorUnavailable(supervisor.id())
    );
}

#[tokio::test]
async fn test_transient_and_temporary_policies() {
    init_logging();
    let journal = Journal::default();
    let spec = SupervisorSpec::default()
        .child(worker("transient", &journal).restart(RestartPolicy::Transient))
        .child(worker("temporary", &journal).restart(RestartPolicy::Temporary))
        .child(worker("permanent", &journal));
    let supervisor = start_supervisor(spec).await.unwrap();

    // A transient child is restarted after a crash, not after a normal stop.
    let transient: ActorRef<Worker> =
        supervisor.child("transient").await.unwrap();
    crash(&transient).await;
    let transient =
        next_incarnation(&supervisor, "transient", transient.id()).await;
    assert_eq!(transient.stop().await, ExitReason::Normal);

    // A temporary child is never restarted.
    let temporary: ActorRef<Worker> =
        supervisor.child("temporary").await.unwrap();
    crash(&temporary).await;

    // A permanent child comes back even after a normal stop.
    let permanent: ActorRef<Worker> =
        supervisor.child("permanent").await.unwrap();
    permanent.stop().await;
    next_incarnation(&supervisor, "permanent", permanent.id()).await;

    assert_eq!(
        supervisor.child::<Worker>("transient").await.unwrap_err(),
        Error::NotRunning("transient".to_owned())
    );
    assert_eq!(
        supervisor.child::<Worker>("temporary").await.unwrap_err(),
        Error::NotRunning("temporary".to_owned())
    );
    assert!(supervisor.is_alive());
}

#[tokio::test]
async fn test_nested_supervisor_escalation() {
    init_logging();
    let journal = Journal::default();
    let inner_journal = journal.clone();
    let outer = start_supervisor(SupervisorSpec::default().child(
        ChildSpec::new("inner", move || {
            (
                Supervisor,
                SupervisorSpec::default()
                    .intensity(RestartIntensity::new(0, Duration::from_secs(5)))
                    .child(worker("w", &inner_journal)),
            )
        }),
    ))
    .await
    .unwrap();

    let inner: ActorRef<Supervisor> = outer.child("inner").await.unwrap();
    let w: ActorRef<Worker> = inner.child("w").await.unwrap();
    crash(&w).await;
    assert_eq!(
        inner.wait().await,
        ExitReason::Fault(Error::RestartLimitExceeded {
            child: "w".to_owned(),
            max_restarts: 0,
            window: Duration::from_secs(5),
        })
    );

    let mut restarted = None;
    for _ in 0..200 {
        if let Ok(next) = outer.child::<Supervisor>("inner").await {
            if next.id() != inner.id() {
                restarted = Some(next);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let inner = restarted.expect("inner supervisor was not restarted");
    let w: ActorRef<Worker> = inner.child("w").await.unwrap();
    assert_eq!(w.call((), None).await.unwrap(), "w");
    assert_eq!(outer.which_children().await.unwrap()[0].restarts, 1);
}
