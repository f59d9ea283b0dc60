// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

// Integration tests for the registry and the actor system.

use actor::{
    Actor, ActorContext, ActorRef, ActorSystem, CallStep, ChildSpec, Error,
    Registry, Supervisor, SupervisorSpec, start,
};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use tracing_test::traced_test;

use std::time::Duration;

pub struct Named(pub u32);

#[async_trait]
impl Actor for Named {
    type Args = ();
    type State = ();
    type Call = ();
    type Reply = u32;
    type Cast = ();
    type Info = ();

    async fn init(
        &self,
        _args: (),
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn handle_call(
        &self,
        _msg: (),
        state: (),
        _ctx: &mut ActorContext<Self>,
    ) -> Result<CallStep<u32, ()>, Error> {
        Ok(CallStep::Reply(self.0, state))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_register_has_one_winner() {
    let registry = Registry::start().await.unwrap();
    let mut tasks = Vec::new();
    for i in 0..16 {
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            let actor = start(Named(i), ()).await.unwrap();
            registry.register("shared", &actor).await.map(|_| actor)
        }));
    }

    let mut winners = Vec::new();
    let mut taken = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(actor) => winners.push(actor),
            Err(Error::NameTaken(name)) => {
                assert_eq!(name, "shared");
                taken += 1;
            }
            Err(error) => panic!("unexpected error: {}", error),
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(taken, 15);

    let found: ActorRef<Named> = registry.lookup("shared").await.unwrap();
    assert_eq!(found, winners[0]);
}

#[tokio::test]
async fn test_registered_child_is_released_on_restart() {
    let registry = Registry::start().await.unwrap();
    let supervisor = actor::start_supervisor(
        SupervisorSpec::default()
            .child(ChildSpec::new("named", || (Named(1), ()))),
    )
    .await
    .unwrap();
    let child: ActorRef<Named> = supervisor.child("named").await.unwrap();
    registry.register("named", &child).await.unwrap();

    child.kill();
    child.wait().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        registry.lookup::<Named>("named").await.unwrap_err(),
        Error::NotFound("named".to_owned())
    );

    let next: ActorRef<Named> = supervisor.child("named").await.unwrap();
    registry.register("named", &next).await.unwrap();
    assert_eq!(
        registry
            .lookup::<Named>("named")
            .await
            .unwrap()
            .call((), None)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
#[traced_test]
async fn test_actor_system_lifecycle() {
    let token = CancellationToken::new();
    let (system, mut runner) =
        ActorSystem::create(token.clone()).await.unwrap();
    let named = system.start_named("one", Named(1), ()).await.unwrap();
    let supervisor = system
        .start_supervisor(
            Some("tree"),
            SupervisorSpec::default()
                .child(ChildSpec::new("two", || (Named(2), ()))),
        )
        .await
        .unwrap();

    let tree: ActorRef<Supervisor> = system.lookup("tree").await.unwrap();
    let two: ActorRef<Named> = tree.child("two").await.unwrap();
    assert_eq!(two.call((), None).await.unwrap(), 2);
    assert_eq!(
        system.registry().names().await.unwrap(),
        vec!["one".to_owned(), "tree".to_owned()]
    );

    let running = tokio::spawn(async move { runner.run().await });
    token.cancel();
    running.await.unwrap();

    assert!(!named.is_alive());
    assert!(!supervisor.is_alive());
    assert!(!two.is_alive());
}
