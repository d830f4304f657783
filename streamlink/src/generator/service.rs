/********************************************************************************
 * Copyright (c) 2026 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

use crate::error::{Result, StreamError};
use crate::member_def::GeneratorMemberDef;
use crate::observability::{events, fields};
use crate::transport::{
    CallReply, CallRequest, MemberAddress, MemberCall, MemberListener, MemberMessage,
    MemberTransport,
};
use crate::types::{ConnectionId, Payload, Role};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;
use tracing::{debug, info, warn};

const COMPONENT: &str = "generator_service";

/// Service-side producer behind one client cursor.
#[async_trait]
pub trait GeneratorSource: Send {
    /// Returns the next value, or `Err(StopIteration)` once exhausted.
    async fn next(&mut self, param: Option<Payload>) -> Result<Payload>;

    /// The client aborted, or its connection went away.
    async fn abort(&mut self) {}

    async fn close(&mut self) {}
}

/// Creates a source for each `GeneratorStart`. An error refuses the start.
pub type GeneratorFactory =
    Arc<dyn Fn(Payload, ConnectionId) -> Result<Box<dyn GeneratorSource>> + Send + Sync>;

/// Source draining an iterator; ignores per-step parameters.
pub struct IterGenerator<I> {
    iter: I,
}

impl<I> IterGenerator<I>
where
    I: Iterator<Item = Payload> + Send,
{
    pub fn new(iter: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            iter: iter.into_iter(),
        }
    }
}

#[async_trait]
impl<I> GeneratorSource for IterGenerator<I>
where
    I: Iterator<Item = Payload> + Send,
{
    async fn next(&mut self, _param: Option<Payload>) -> Result<Payload> {
        self.iter.next().ok_or(StreamError::StopIteration)
    }
}

struct InstanceSlot {
    source: tokio::sync::Mutex<Box<dyn GeneratorSource>>,
    // Flipped on abort; an in-flight step loses the race against it.
    aborted: watch::Sender<bool>,
}

impl InstanceSlot {
    fn new(source: Box<dyn GeneratorSource>) -> Self {
        let (aborted, _) = watch::channel(false);
        Self {
            source: tokio::sync::Mutex::new(source),
            aborted,
        }
    }

    /// Cancels any in-flight step, then runs the source's abort hook.
    async fn abort(&self) {
        self.aborted.send_replace(true);
        self.source.lock().await.abort().await;
    }
}

type Instance = Arc<InstanceSlot>;

struct ServiceShared {
    def: GeneratorMemberDef,
    address: MemberAddress,
    transport: Arc<dyn MemberTransport>,
    factory: Mutex<Option<GeneratorFactory>>,
    instances: Mutex<HashMap<(ConnectionId, i32), Instance>>,
    next_id: AtomicI32,
    closed: AtomicBool,
}

/// Hosts the generator instances of one generator member.
#[derive(Clone)]
pub struct GeneratorService {
    inner: Arc<ServiceShared>,
}

impl GeneratorService {
    pub async fn new(
        def: GeneratorMemberDef,
        transport: Arc<dyn MemberTransport>,
        service_path: &str,
    ) -> Result<GeneratorService> {
        let address = MemberAddress::new(service_path, &def.name);
        let inner = Arc::new(ServiceShared {
            def,
            address: address.clone(),
            transport: transport.clone(),
            factory: Mutex::new(None),
            instances: Mutex::new(HashMap::new()),
            next_id: AtomicI32::new(1),
            closed: AtomicBool::new(false),
        });
        let listener = Arc::new(GeneratorListener {
            shared: Arc::downgrade(&inner),
        });
        transport.register_listener(&address, listener).await?;
        Ok(GeneratorService { inner })
    }

    pub fn member_name(&self) -> &str {
        &self.inner.def.name
    }

    pub fn role(&self) -> Role {
        Role::Service
    }

    pub fn set_factory(&self, factory: GeneratorFactory) {
        *self.inner.factory.lock().unwrap_or_else(|p| p.into_inner()) = Some(factory);
    }

    pub fn active_generator_count(&self) -> usize {
        self.inner.table().len()
    }

    /// Aborts every running instance and detaches from the transport.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let instances: Vec<_> = self.inner.table().drain().collect();
        for ((peer, id), instance) in instances {
            instance.abort().await;
            self.inner.log_released(peer, id, "service closed");
        }
        self.inner
            .transport
            .unregister_listener(&self.inner.address)
            .await
    }
}

impl ServiceShared {
    fn table(&self) -> MutexGuard<'_, HashMap<(ConnectionId, i32), Instance>> {
        self.instances.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn start(&self, peer: ConnectionId, args: Payload) -> Result<CallReply> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamError::invalid_operation(format!(
                "generator {} is closed",
                self.address
            )));
        }
        let factory = self
            .factory
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or_else(|| {
                StreamError::invalid_operation(format!(
                    "generator {} has no factory",
                    self.address
                ))
            })?;
        let source = factory(args, peer).map_err(|err| {
            warn!(
                event = events::GENERATOR_START_FAILED,
                component = COMPONENT,
                member = fields::format_address(&self.address).as_str(),
                peer = %peer,
                err = %err,
                "generator factory refused the start"
            );
            err
        })?;

        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        self.table()
            .insert((peer, id), Arc::new(InstanceSlot::new(source)));
        info!(
            event = events::GENERATOR_START,
            component = COMPONENT,
            member = fields::format_address(&self.address).as_str(),
            peer = %peer,
            generator_id = id,
            "generator instance created"
        );
        Ok(CallReply::Generator { id })
    }

    async fn next(&self, peer: ConnectionId, id: i32, param: Option<Payload>) -> Result<CallReply> {
        if self.def.takes_param != param.is_some() {
            return Err(StreamError::invalid_argument(format!(
                "generator {} parameter mismatch",
                self.address
            )));
        }
        let instance = self.instance(peer, id)?;
        let mut aborted = instance.aborted.subscribe();
        let res = tokio::select! {
            res = async { instance.source.lock().await.next(param).await } => res,
            _ = aborted.wait_for(|aborted| *aborted) => {
                return Err(StreamError::aborted(format!(
                    "generator {id} of {} was aborted",
                    self.address
                )));
            }
        };
        match res {
            Ok(value) => Ok(CallReply::Next(value)),
            Err(err) => {
                // Any failure ends the sequence.
                self.table().remove(&(peer, id));
                self.log_released(peer, id, err.kind());
                Err(err)
            }
        }
    }

    async fn finish(&self, peer: ConnectionId, id: i32, abort: bool) -> Result<CallReply> {
        let instance = self.table().remove(&(peer, id)).ok_or_else(|| {
            StreamError::not_found(format!("generator {id} of {} not found", self.address))
        })?;
        if abort {
            // Replies at once; the hook runs after the cancelled step lets go.
            instance.aborted.send_replace(true);
            tokio::spawn(async move { instance.source.lock().await.abort().await });
            self.log_released(peer, id, "aborted");
        } else {
            instance.source.lock().await.close().await;
            self.log_released(peer, id, "closed");
        }
        Ok(CallReply::Ack)
    }

    async fn release_peer(&self, peer: ConnectionId) {
        let released: Vec<_> = {
            let mut table = self.table();
            let keys: Vec<_> = table.keys().filter(|(p, _)| *p == peer).copied().collect();
            keys.into_iter()
                .filter_map(|key| table.remove(&key).map(|instance| (key, instance)))
                .collect()
        };
        for ((peer, id), instance) in released {
            instance.abort().await;
            self.log_released(peer, id, "peer closed");
        }
    }

    fn instance(&self, peer: ConnectionId, id: i32) -> Result<Instance> {
        self.table().get(&(peer, id)).cloned().ok_or_else(|| {
            StreamError::not_found(format!("generator {id} of {} not found", self.address))
        })
    }

    fn log_released(&self, peer: ConnectionId, id: i32, reason: &str) {
        debug!(
            event = events::GENERATOR_RELEASED,
            component = COMPONENT,
            member = fields::format_address(&self.address).as_str(),
            peer = %peer,
            generator_id = id,
            reason,
            "generator instance released"
        );
    }
}

struct GeneratorListener {
    shared: Weak<ServiceShared>,
}

#[async_trait]
impl MemberListener for GeneratorListener {
    async fn on_receive(&self, _message: MemberMessage) {}

    async fn on_call(&self, call: MemberCall) -> Result<CallReply> {
        let shared = self.shared.upgrade().ok_or_else(|| {
            StreamError::not_found(format!("generator {} is gone", call.address))
        })?;
        match call.request {
            CallRequest::GeneratorStart { args } => shared.start(call.peer, args),
            CallRequest::GeneratorNext { id, param } => shared.next(call.peer, id, param).await,
            CallRequest::GeneratorAbort { id } => shared.finish(call.peer, id, true).await,
            CallRequest::GeneratorClose { id } => shared.finish(call.peer, id, false).await,
            request => Err(StreamError::invalid_operation(format!(
                "generator {} cannot handle {request:?}",
                shared.address
            ))),
        }
    }

    async fn on_peer_closed(&self, peer: ConnectionId) {
        if let Some(shared) = self.shared.upgrade() {
            shared.release_peer(peer).await;
        }
    }
}
