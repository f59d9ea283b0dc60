// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor system
//!
//! The `system` module provides the `ActorSystem` type. The `ActorSystem` owns a registry and
//! the top level (root) actors, and tears them down in reverse start order when its
//! cancellation token fires.
//!

use crate::{
    Error,
    actor::{Actor, ActorRef},
    registry::Registry,
    runner::{Lifeline, start},
    supervisor::{Supervisor, SupervisorSpec, start_supervisor},
};

use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use tracing::{debug, error};

use std::{sync::Arc, time::Duration};

/// Actor system.
///
pub struct ActorSystem {}

impl ActorSystem {
    /// Create a new actor system.
    ///
    /// # Returns
    ///
    /// Returns a tuple with the system reference and the system runner.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry could not be started.
    ///
    pub async fn create(
        token: CancellationToken,
    ) -> Result<(SystemRef, SystemRunner), Error> {
        let registry = Registry::start().await?;
        let (event_sender, event_receiver) = mpsc::channel(100);
        let system = SystemRef::new(event_sender, registry, token);
        let runner = SystemRunner::new(event_receiver);
        Ok((system, runner))
    }
}

/// System event.
///
#[derive(Debug, Clone)]
pub enum SystemEvent {
    /// Stop the actor system.
    StopSystem,
}

/// Root actor with the time it is given to stop.
type RootEntry = (Lifeline, Duration);

/// System reference.
///
#[derive(Clone)]
pub struct SystemRef {
    /// Name table of the system.
    registry: Registry,

    /// Root actors, in start order.
    roots: Arc<RwLock<Vec<RootEntry>>>,

    token: CancellationToken,
}

impl SystemRef {
    fn new(
        event_sender: mpsc::Sender<SystemEvent>,
        registry: Registry,
        token: CancellationToken,
    ) -> Self {
        let roots = Arc::new(RwLock::new(Vec::<RootEntry>::new()));
        let roots_clone = roots.clone();
        let registry_clone = registry.clone();
        let token_clone = token.clone();

        tokio::spawn(async move {
            token_clone.cancelled().await;
            debug!("Stopping actor system...");
            let mut roots = roots_clone.write().await;
            while let Some((lifeline, grace)) = roots.pop() {
                let reason = lifeline.shutdown(grace).await;
                debug!("Root actor {} stopped: {}", lifeline.id(), reason);
            }
            registry_clone.stop().await;
            if event_sender.send(SystemEvent::StopSystem).await.is_err() {
                debug!("System runner is gone.");
            }
        });

        SystemRef {
            registry,
            roots,
            token,
        }
    }

    /// Tracks a started root actor. Roots that already terminated are forgotten. Once the
    /// system is stopping the actor is shut down again instead.
    async fn add_root(
        &self,
        lifeline: Lifeline,
        grace: Duration,
    ) -> Result<(), Error> {
        let mut roots = self.roots.write().await;
        // The shutdown task drains roots under this lock.
        if let Err(error) = self.check_running() {
            drop(roots);
            lifeline.shutdown(grace).await;
            return Err(error);
        }
        roots.retain(|(root, _)| root.is_alive());
        roots.push((lifeline, grace));
        Ok(())
    }

    fn check_running(&self) -> Result<(), Error> {
        if self.token.is_cancelled() {
            error!("Actor system is stopping, start refused.");
            return Err(Error::Functional(
                "actor system is stopping".to_owned(),
            ));
        }
        Ok(())
    }

    /// Launches a new root actor. Root actors are stopped, newest first, when the system
    /// stops.
    ///
    /// # Errors
    ///
    /// * `Error::InitFailed` - The actor failed to initialize.
    /// * `Error::Functional` - The system is stopping.
    ///
    pub async fn start_actor<A: Actor>(
        &self,
        actor: A,
        args: A::Args,
    ) -> Result<ActorRef<A>, Error> {
        self.check_running()?;
        let actor_ref = start(actor, args).await?;
        self.add_root(actor_ref.lifeline().clone(), A::shutdown_grace())
            .await?;
        Ok(actor_ref)
    }

    /// Launches a new root actor registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NameTaken` if `name` is in use; the actor is stopped again.
    ///
    pub async fn start_named<A: Actor>(
        &self,
        name: &str,
        actor: A,
        args: A::Args,
    ) -> Result<ActorRef<A>, Error> {
        self.check_running()?;
        let actor_ref = start(actor, args).await?;
        if let Err(error) = self.registry.register(name, &actor_ref).await {
            error!("Can not register actor '{}': {}", name, error);
            actor_ref.shutdown(A::shutdown_grace()).await;
            return Err(error);
        }
        self.add_root(actor_ref.lifeline().clone(), A::shutdown_grace())
            .await?;
        Ok(actor_ref)
    }

    /// Launches a root supervisor, registered under `name` if given.
    pub async fn start_supervisor(
        &self,
        name: Option<&str>,
        spec: SupervisorSpec,
    ) -> Result<ActorRef<Supervisor>, Error> {
        self.check_running()?;
        let supervisor = start_supervisor(spec).await?;
        if let Some(name) = name {
            if let Err(error) = self.registry.register(name, &supervisor).await
            {
                error!("Can not register supervisor '{}': {}", name, error);
                supervisor.shutdown(Supervisor::shutdown_grace()).await;
                return Err(error);
            }
        }
        self.add_root(
            supervisor.lifeline().clone(),
            Supervisor::shutdown_grace(),
        )
        .await?;
        Ok(supervisor)
    }

    /// Retrieves an actor registered in this actor system.
    pub async fn lookup<A: Actor>(
        &self,
        name: &str,
    ) -> Result<ActorRef<A>, Error> {
        self.registry.lookup(name).await
    }

    /// Registry of this system.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn stop_system(&self) {
        self.token.cancel();
    }
}

/// System runner.
pub struct SystemRunner {
    /// The event receiver.
    event_receiver: mpsc::Receiver<SystemEvent>,
}

impl SystemRunner {
    /// Create a new system runner.
    pub(crate) fn new(event_receiver: mpsc::Receiver<SystemEvent>) -> Self {
        Self { event_receiver }
    }

    /// Run the actor system. Returns once every root actor stopped.
    pub async fn run(&mut self) {
        debug!("Running actor system...");
        match self.event_receiver.recv().await {
            Some(SystemEvent::StopSystem) => debug!("Actor system stopped."),
            None => debug!("Actor system dropped."),
        }
    }
}
