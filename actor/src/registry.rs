// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Registry
//!
//! Maps logical names to actor references. The name table is the state of a dedicated actor,
//! so every access is serialized by its mailbox: two concurrent registrations of one name
//! resolve to exactly one success and one `Error::NameTaken`.
//!
//! The registry monitors every registered actor and drops the entry as soon as it terminates.
//!

use crate::{
    ActorId, Error,
    actor::{Actor, ActorContext, ActorRef, CallStep, ExitReason, Step},
    runner::{Lifeline, start},
};

use async_trait::async_trait;
use tracing::debug;

use std::{any::Any, collections::HashMap, sync::Arc, time::Duration};

/// Wait budget of registry calls.
const REGISTRY_TIMEOUT: Duration = Duration::from_secs(5);

/// Registered reference, type-erased.
pub(crate) struct Entry {
    reference: Arc<dyn Any + Send + Sync>,
    lifeline: Lifeline,
}

pub(crate) enum RegistryCall {
    Register { name: String, entry: Entry },
    Unregister(String),
    Lookup(String),
    Names,
}

pub(crate) enum RegistryReply {
    Done(Result<(), Error>),
    Found(Option<Arc<dyn Any + Send + Sync>>),
    Names(Vec<String>),
}

pub(crate) enum RegistryInfo {
    Down { name: String, id: ActorId },
}

/// Actor owning the name table.
pub(crate) struct NameServer;

#[async_trait]
impl Actor for NameServer {
    type Args = ();
    type State = HashMap<String, Entry>;
    type Call = RegistryCall;
    type Reply = RegistryReply;
    type Cast = ();
    type Info = RegistryInfo;

    async fn init(
        &self,
        _args: (),
        ctx: &mut ActorContext<Self>,
    ) -> Result<Self::State, Error> {
        debug!("Registry {} started.", ctx.id());
        Ok(HashMap::new())
    }

    async fn handle_call(
        &self,
        msg: RegistryCall,
        mut names: Self::State,
        ctx: &mut ActorContext<Self>,
    ) -> Result<CallStep<RegistryReply, Self::State>, Error> {
        let reply = match msg {
            RegistryCall::Register { name, entry } => {
                register(&mut names, name, entry, ctx)
            }
            RegistryCall::Unregister(name) => match names.remove(&name) {
                Some(_) => {
                    debug!("Name '{}' unregistered.", name);
                    RegistryReply::Done(Ok(()))
                }
                None => RegistryReply::Done(Err(Error::NotFound(name))),
            },
            RegistryCall::Lookup(name) => RegistryReply::Found(
                names
                    .get(&name)
                    .filter(|entry| entry.lifeline.is_alive())
                    .map(|entry| entry.reference.clone()),
            ),
            RegistryCall::Names => {
                let mut list: Vec<String> = names.keys().cloned().collect();
                list.sort();
                RegistryReply::Names(list)
            }
        };
        Ok(CallStep::Reply(reply, names))
    }

    async fn handle_info(
        &self,
        msg: RegistryInfo,
        mut names: Self::State,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<Step<Self::State>, Error> {
        match msg {
            RegistryInfo::Down { name, id } => {
                // A newer registration under the same name must survive.
                let current = names.get(&name).map(|entry| entry.lifeline.id());
                if current == Some(id) {
                    names.remove(&name);
                    debug!(
                        "Name '{}' released, actor {} terminated.",
                        name, id
                    );
                }
            }
        }
        Ok(Step::Continue(names))
    }
}

fn register(
    names: &mut HashMap<String, Entry>,
    name: String,
    entry: Entry,
    ctx: &ActorContext<NameServer>,
) -> RegistryReply {
    if let Some(existing) = names.get(&name) {
        if existing.lifeline.is_alive() {
            return RegistryReply::Done(Err(Error::NameTaken(name)));
        }
        debug!("Replacing stale registration of '{}'.", name);
    }
    if !entry.lifeline.is_alive() {
        return RegistryReply::Done(Err(Error::ActorUnavailable(
            entry.lifeline.id(),
        )));
    }
    let monitored = name.clone();
    ctx.monitor(&entry.lifeline, move |id, _| RegistryInfo::Down {
        name: monitored,
        id,
    });
    debug!("Name '{}' registered to actor {}.", name, entry.lifeline.id());
    names.insert(name, entry);
    RegistryReply::Done(Ok(()))
}

fn unexpected() -> Error {
    Error::Functional("unexpected registry reply".to_owned())
}

/// Handle to a running registry. Cheap to clone.
#[derive(Clone)]
pub struct Registry {
    server: ActorRef<NameServer>,
}

impl Registry {
    /// Starts an empty registry.
    pub async fn start() -> Result<Self, Error> {
        let server = start(NameServer, ()).await?;
        Ok(Self { server })
    }

    /// Registers `actor` under `name`.
    ///
    /// # Errors
    ///
    /// * `Error::NameTaken` - The name belongs to a live actor.
    /// * `Error::ActorUnavailable` - `actor` already terminated, or the registry is down.
    ///
    pub async fn register<A: Actor>(
        &self,
        name: &str,
        actor: &ActorRef<A>,
    ) -> Result<(), Error> {
        let entry = Entry {
            reference: Arc::new(actor.clone()),
            lifeline: actor.lifeline().clone(),
        };
        let msg = RegistryCall::Register {
            name: name.to_owned(),
            entry,
        };
        match self.server.call(msg, Some(REGISTRY_TIMEOUT)).await? {
            RegistryReply::Done(result) => result,
            _ => Err(unexpected()),
        }
    }

    /// Removes `name`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if nothing is registered under `name`.
    ///
    pub async fn unregister(&self, name: &str) -> Result<(), Error> {
        let msg = RegistryCall::Unregister(name.to_owned());
        match self.server.call(msg, Some(REGISTRY_TIMEOUT)).await? {
            RegistryReply::Done(result) => result,
            _ => Err(unexpected()),
        }
    }

    /// Resolves `name` to a reference of type `A`.
    ///
    /// # Errors
    ///
    /// * `Error::NotFound` - Nothing live is registered under `name`.
    /// * `Error::TypeMismatch` - The registered actor is not an `A`.
    ///
    pub async fn lookup<A: Actor>(
        &self,
        name: &str,
    ) -> Result<ActorRef<A>, Error> {
        let msg = RegistryCall::Lookup(name.to_owned());
        match self.server.call(msg, Some(REGISTRY_TIMEOUT)).await? {
            RegistryReply::Found(Some(reference)) => reference
                .downcast_ref::<ActorRef<A>>()
                .cloned()
                .ok_or_else(|| Error::TypeMismatch(name.to_owned())),
            RegistryReply::Found(None) => Err(Error::NotFound(name.to_owned())),
            _ => Err(unexpected()),
        }
    }

    /// Registered names, sorted.
    pub async fn names(&self) -> Result<Vec<String>, Error> {
        match self
            .server
            .call(RegistryCall::Names, Some(REGISTRY_TIMEOUT))
            .await?
        {
            RegistryReply::Names(names) => Ok(names),
            _ => Err(unexpected()),
        }
    }

    /// Control handle of the registry actor.
    pub fn lifeline(&self) -> &Lifeline {
        self.server.lifeline()
    }

    /// Stops the registry.
    pub async fn stop(&self) -> ExitReason {
        self.server.stop().await
    }
}
