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

//! Pipe member facade: creates, routes and forgets endpoints of one member.

use crate::error::{Result, StreamError};
use crate::member_def::PipeMemberDef;
use crate::observability::{events, fields};
use crate::pipe::endpoint::{EndpointOwner, EndpointParams, PipeEndpoint};
use crate::transport::{
    unexpected_reply, CallReply, CallRequest, MemberAddress, MemberCall, MemberListener,
    MemberMessage, MemberTransport, MessageBody,
};
use crate::types::{ConnectionId, MemberDirection, Role, ANY_INDEX};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info, warn};

const COMPONENT: &str = "pipe";

/// Service-side hook run for every incoming connect request.
///
/// Returning an error rejects the request; the error is logged and handed
/// back to the client.
pub type PipeConnectCallback =
    Arc<dyn Fn(PipeEndpoint) -> BoxFuture<'static, Result<()>> + Send + Sync>;

type EndpointTable = HashMap<(ConnectionId, i32), PipeEndpoint>;

struct PipeShared {
    def: PipeMemberDef,
    role: Role,
    address: MemberAddress,
    transport: Arc<dyn MemberTransport>,
    service_peer: Option<ConnectionId>,
    event_capacity: usize,
    endpoints: Mutex<EndpointTable>,
    connect_callback: Mutex<Option<PipeConnectCallback>>,
    closed: AtomicBool,
    self_weak: Weak<PipeShared>,
}

#[derive(Clone)]
pub struct Pipe {
    inner: Arc<PipeShared>,
}

impl Pipe {
    /// Client facade for a pipe on the object reached through `service_peer`.
    pub async fn client(
        def: PipeMemberDef,
        transport: Arc<dyn MemberTransport>,
        service_peer: ConnectionId,
        service_path: &str,
        event_capacity: usize,
    ) -> Result<Pipe> {
        Self::create(
            def,
            Role::Client,
            transport,
            Some(service_peer),
            service_path,
            event_capacity,
        )
        .await
    }

    /// Service facade accepting connections from any client.
    pub async fn service(
        def: PipeMemberDef,
        transport: Arc<dyn MemberTransport>,
        service_path: &str,
        event_capacity: usize,
    ) -> Result<Pipe> {
        Self::create(
            def,
            Role::Service,
            transport,
            None,
            service_path,
            event_capacity,
        )
        .await
    }

    async fn create(
        def: PipeMemberDef,
        role: Role,
        transport: Arc<dyn MemberTransport>,
        service_peer: Option<ConnectionId>,
        service_path: &str,
        event_capacity: usize,
    ) -> Result<Pipe> {
        let address = MemberAddress::new(service_path, &def.name);
        let inner = Arc::new_cyclic(|self_weak| PipeShared {
            def,
            role,
            address: address.clone(),
            transport: transport.clone(),
            service_peer,
            event_capacity,
            endpoints: Mutex::new(HashMap::new()),
            connect_callback: Mutex::new(None),
            closed: AtomicBool::new(false),
            self_weak: self_weak.clone(),
        });
        let listener = Arc::new(PipeListener {
            shared: Arc::downgrade(&inner),
        });
        transport.register_listener(&address, listener).await?;
        Ok(Pipe { inner })
    }

    pub fn member_name(&self) -> &str {
        &self.inner.def.name
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn direction(&self) -> MemberDirection {
        self.inner.def.direction
    }

    pub fn is_unreliable(&self) -> bool {
        self.inner.def.unreliable
    }

    /// Connects a new endpoint pair. Client side only.
    ///
    /// [`ANY_INDEX`] picks the lowest free index starting at 1.
    pub async fn connect(&self, index: i32) -> Result<PipeEndpoint> {
        let Some(service_peer) = self.inner.service_peer else {
            return Err(StreamError::invalid_operation(
                "connect is only available on the client side of a pipe",
            ));
        };
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(StreamError::invalid_operation(format!(
                "pipe {} is closed",
                self.inner.address
            )));
        }

        let endpoint = {
            let mut table = self.inner.table();
            let index = if index == ANY_INDEX {
                (1..)
                    .find(|i| !table.contains_key(&(service_peer, *i)))
                    .unwrap_or(1)
            } else if index < 0 {
                return Err(StreamError::invalid_argument(format!(
                    "pipe index {index} is not valid"
                )));
            } else if table.contains_key(&(service_peer, index)) {
                return Err(StreamError::invalid_argument(format!(
                    "pipe index {index} already connected"
                )));
            } else {
                index
            };
            // Registered before the call so packets sent right after the
            // service accepts are routed.
            let endpoint = self.inner.new_endpoint(service_peer, index);
            table.insert((service_peer, index), endpoint.clone());
            endpoint
        };

        debug!(
            event = events::PIPE_CONNECT_START,
            component = COMPONENT,
            member = fields::format_address(&self.inner.address).as_str(),
            index = endpoint.index(),
            "connecting pipe endpoint"
        );
        let call = MemberCall {
            address: self.inner.address.clone(),
            peer: service_peer,
            request: CallRequest::PipeConnect {
                index: endpoint.index(),
                unreliable: self.inner.def.unreliable,
            },
        };
        let res = match self.inner.transport.call(call).await {
            Ok(CallReply::PipeConnected { index }) if index == endpoint.index() => Ok(()),
            Ok(other) => Err(unexpected_reply("pipe connect", &other)),
            Err(err) => Err(err),
        };

        match res {
            Ok(()) => {
                info!(
                    event = events::PIPE_CONNECT_OK,
                    component = COMPONENT,
                    member = fields::format_address(&self.inner.address).as_str(),
                    index = endpoint.index(),
                    "pipe endpoint connected"
                );
                Ok(endpoint)
            }
            Err(err) => {
                warn!(
                    event = events::PIPE_CONNECT_FAILED,
                    component = COMPONENT,
                    member = fields::format_address(&self.inner.address).as_str(),
                    index = endpoint.index(),
                    err = %err,
                    "pipe connect failed"
                );
                endpoint.close_local();
                Err(err)
            }
        }
    }

    /// Installs the connect callback. Service side only.
    pub fn set_connect_callback(&self, callback: PipeConnectCallback) -> Result<()> {
        if self.inner.role != Role::Service {
            return Err(StreamError::invalid_operation(
                "connect callbacks are only available on the service side of a pipe",
            ));
        }
        *self
            .inner
            .connect_callback
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(callback);
        Ok(())
    }

    pub fn endpoints(&self) -> Vec<PipeEndpoint> {
        let mut endpoints: Vec<_> = self.inner.table().values().cloned().collect();
        endpoints.sort_by_key(|e| (e.peer(), e.index()));
        endpoints
    }

    pub fn endpoint(&self, peer: ConnectionId, index: i32) -> Option<PipeEndpoint> {
        self.inner.table().get(&(peer, index)).cloned()
    }

    pub fn active_endpoint_count(&self) -> usize {
        self.inner.table().len()
    }

    /// Closes every endpoint and detaches from the transport.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        for endpoint in self.endpoints() {
            endpoint.close().await?;
        }
        self.inner
            .transport
            .unregister_listener(&self.inner.address)
            .await
    }
}

impl PipeShared {
    fn table(&self) -> MutexGuard<'_, EndpointTable> {
        self.endpoints.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn new_endpoint(&self, peer: ConnectionId, index: i32) -> PipeEndpoint {
        let owner: Weak<dyn EndpointOwner> = self.self_weak.clone();
        PipeEndpoint::new(EndpointParams {
            index,
            peer,
            address: self.address.clone(),
            role: self.role,
            direction: self.def.direction,
            unreliable: self.def.unreliable,
            transport: self.transport.clone(),
            owner,
            event_capacity: self.event_capacity,
        })
    }

    async fn accept_connect(
        &self,
        peer: ConnectionId,
        index: i32,
        unreliable: bool,
    ) -> Result<CallReply> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamError::invalid_operation(format!(
                "pipe {} is closed",
                self.address
            )));
        }
        if index < 0 {
            return Err(StreamError::invalid_argument(format!(
                "pipe index {index} is not valid"
            )));
        }
        if unreliable != self.def.unreliable {
            return Err(StreamError::invalid_argument(format!(
                "pipe {} reliability mismatch",
                self.address
            )));
        }

        let endpoint = {
            let mut table = self.table();
            if table.contains_key(&(peer, index)) {
                return Err(StreamError::invalid_argument(format!(
                    "pipe index {index} already connected"
                )));
            }
            let endpoint = self.new_endpoint(peer, index);
            table.insert((peer, index), endpoint.clone());
            endpoint
        };

        let callback = self
            .connect_callback
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        if let Some(callback) = callback {
            if let Err(err) = callback(endpoint.clone()).await {
                warn!(
                    event = events::PIPE_CONNECT_REJECTED,
                    component = COMPONENT,
                    member = fields::format_address(&self.address).as_str(),
                    peer = %peer,
                    index,
                    reason = fields::REASON_CALLBACK_REJECTED,
                    err = %err,
                    "pipe connect rejected"
                );
                endpoint.close_local();
                return Err(err);
            }
        }

        info!(
            event = events::PIPE_CONNECT_OK,
            component = COMPONENT,
            member = fields::format_address(&self.address).as_str(),
            peer = %peer,
            index,
            "pipe endpoint accepted"
        );
        Ok(CallReply::PipeConnected { index })
    }

    fn peer_endpoints(&self, peer: ConnectionId) -> Vec<PipeEndpoint> {
        self.table()
            .iter()
            .filter(|((p, _), _)| *p == peer)
            .map(|(_, e)| e.clone())
            .collect()
    }
}

impl EndpointOwner for PipeShared {
    fn endpoint_closed(&self, peer: ConnectionId, index: i32) {
        self.table().remove(&(peer, index));
    }
}

struct PipeListener {
    shared: Weak<PipeShared>,
}

#[async_trait]
impl MemberListener for PipeListener {
    async fn on_receive(&self, message: MemberMessage) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let index = match &message.body {
            MessageBody::PipePacket { index, .. }
            | MessageBody::PipePacketAck { index, .. }
            | MessageBody::PipeClose { index } => *index,
            _ => return,
        };
        let endpoint = shared.table().get(&(message.peer, index)).cloned();
        let Some(endpoint) = endpoint else {
            debug!(
                event = events::PIPE_PACKET_UNROUTED,
                component = COMPONENT,
                member = fields::format_address(&shared.address).as_str(),
                peer = %message.peer,
                index,
                reason = fields::REASON_UNKNOWN_ENDPOINT,
                "dropping message for unknown endpoint"
            );
            return;
        };

        match message.body {
            MessageBody::PipePacket {
                seq,
                request_ack,
                payload,
                ..
            } => endpoint.handle_packet(seq, request_ack, payload).await,
            MessageBody::PipePacketAck { seq, .. } => endpoint.handle_ack(seq),
            MessageBody::PipeClose { .. } => endpoint.close_local(),
            _ => {}
        }
    }

    async fn on_call(&self, call: MemberCall) -> Result<CallReply> {
        let shared = self
            .shared
            .upgrade()
            .ok_or_else(|| StreamError::not_found(format!("pipe {} is gone", call.address)))?;
        match (shared.role, call.request) {
            (Role::Service, CallRequest::PipeConnect { index, unreliable }) => {
                shared.accept_connect(call.peer, index, unreliable).await
            }
            (_, request) => Err(StreamError::invalid_operation(format!(
                "pipe {} cannot handle {request:?}",
                shared.address
            ))),
        }
    }

    async fn on_peer_closed(&self, peer: ConnectionId) {
        if let Some(shared) = self.shared.upgrade() {
            for endpoint in shared.peer_endpoints(peer) {
                endpoint.close_local();
            }
        }
    }
}
