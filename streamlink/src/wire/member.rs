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

//! Wire member facade: one connection per peer plus peek/poke.

use crate::error::{Result, StreamError};
use crate::member_def::WireMemberDef;
use crate::observability::{events, fields};
use crate::transport::{
    unexpected_reply, CallReply, CallRequest, MemberAddress, MemberCall, MemberListener,
    MemberMessage, MemberTransport, MessageBody,
};
use crate::types::{ConnectionId, MemberDirection, Payload, Role};
use crate::wire::connection::{ConnectionOwner, ConnectionParams, WireConnection};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::SystemTime;
use tracing::{info, warn};

const COMPONENT: &str = "wire";

/// Service-side hook run for every incoming connect request. An error
/// rejects the connection.
pub type WireConnectCallback =
    Arc<dyn Fn(WireConnection) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Answers a client peek with the value and its timestamp.
pub type PeekValueCallback =
    Arc<dyn Fn(ConnectionId) -> Result<(Payload, SystemTime)> + Send + Sync>;

/// Receives a client poke.
pub type PokeValueCallback =
    Arc<dyn Fn(Payload, SystemTime, ConnectionId) -> Result<()> + Send + Sync>;

#[derive(Default)]
struct WireCallbacks {
    connect: Option<WireConnectCallback>,
    peek_in: Option<PeekValueCallback>,
    peek_out: Option<PeekValueCallback>,
    poke_out: Option<PokeValueCallback>,
}

struct WireShared {
    def: WireMemberDef,
    role: Role,
    address: MemberAddress,
    transport: Arc<dyn MemberTransport>,
    service_peer: Option<ConnectionId>,
    event_capacity: usize,
    connections: Mutex<HashMap<ConnectionId, WireConnection>>,
    callbacks: Mutex<WireCallbacks>,
    closed: AtomicBool,
    self_weak: Weak<WireShared>,
}

#[derive(Clone)]
pub struct Wire {
    inner: Arc<WireShared>,
}

impl Wire {
    pub async fn client(
        def: WireMemberDef,
        transport: Arc<dyn MemberTransport>,
        service_peer: ConnectionId,
        service_path: &str,
        event_capacity: usize,
    ) -> Result<Wire> {
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

    pub async fn service(
        def: WireMemberDef,
        transport: Arc<dyn MemberTransport>,
        service_path: &str,
        event_capacity: usize,
    ) -> Result<Wire> {
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
        def: WireMemberDef,
        role: Role,
        transport: Arc<dyn MemberTransport>,
        service_peer: Option<ConnectionId>,
        service_path: &str,
        event_capacity: usize,
    ) -> Result<Wire> {
        let address = MemberAddress::new(service_path, &def.name);
        let inner = Arc::new_cyclic(|self_weak| WireShared {
            def,
            role,
            address: address.clone(),
            transport: transport.clone(),
            service_peer,
            event_capacity,
            connections: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(WireCallbacks::default()),
            closed: AtomicBool::new(false),
            self_weak: self_weak.clone(),
        });
        let listener = Arc::new(WireListener {
            shared: Arc::downgrade(&inner),
        });
        transport.register_listener(&address, listener).await?;
        Ok(Wire { inner })
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

    /// Connects the wire. Client side only; a second connect while the
    /// first connection is open fails with `InvalidOperation`.
    pub async fn connect(&self) -> Result<WireConnection> {
        let service_peer = self.client_peer("connect")?;
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(StreamError::invalid_operation(format!(
                "wire {} is closed",
                self.inner.address
            )));
        }

        let connection = {
            let mut table = self.inner.table();
            if table.get(&service_peer).is_some_and(|c| !c.is_closed()) {
                return Err(StreamError::invalid_operation(format!(
                    "wire {} already connected",
                    self.inner.address
                )));
            }
            let connection = self.inner.new_connection(service_peer);
            table.insert(service_peer, connection.clone());
            connection
        };

        let call = MemberCall {
            address: self.inner.address.clone(),
            peer: service_peer,
            request: CallRequest::WireConnect,
        };
        let res = match self.inner.transport.call(call).await {
            Ok(CallReply::Ack) => Ok(()),
            Ok(other) => Err(unexpected_reply("wire connect", &other)),
            Err(err) => Err(err),
        };
        match res {
            Ok(()) => {
                info!(
                    event = events::WIRE_CONNECT_OK,
                    component = COMPONENT,
                    member = fields::format_address(&self.inner.address).as_str(),
                    "wire connected"
                );
                Ok(connection)
            }
            Err(err) => {
                warn!(
                    event = events::WIRE_CONNECT_FAILED,
                    component = COMPONENT,
                    member = fields::format_address(&self.inner.address).as_str(),
                    err = %err,
                    "wire connect failed"
                );
                connection.close_local();
                Err(err)
            }
        }
    }

    /// Reads the service's current value for this client without connecting.
    pub async fn peek_in_value(&self) -> Result<(Payload, SystemTime)> {
        let peer = self.client_peer("peek_in_value")?;
        self.require(self.inner.def.direction.can_receive(Role::Client), "peek_in_value")?;
        self.peek(peer, CallRequest::PeekInValue).await
    }

    /// Reads the service's view of this client's out value.
    pub async fn peek_out_value(&self) -> Result<(Payload, SystemTime)> {
        let peer = self.client_peer("peek_out_value")?;
        self.require(self.inner.def.direction.can_send(Role::Client), "peek_out_value")?;
        self.peek(peer, CallRequest::PeekOutValue).await
    }

    /// Sets the service-side value once, reliably.
    pub async fn poke_out_value(&self, value: Payload) -> Result<()> {
        let peer = self.client_peer("poke_out_value")?;
        self.require(self.inner.def.direction.can_send(Role::Client), "poke_out_value")?;
        let call = MemberCall {
            address: self.inner.address.clone(),
            peer,
            request: CallRequest::PokeOutValue {
                value,
                timestamp: SystemTime::now(),
            },
        };
        match self.inner.transport.call(call).await? {
            CallReply::Ack => Ok(()),
            other => Err(unexpected_reply("poke_out_value", &other)),
        }
    }

    pub fn set_connect_callback(&self, callback: WireConnectCallback) -> Result<()> {
        self.service_only("set_connect_callback")?;
        self.inner.callbacks().connect = Some(callback);
        Ok(())
    }

    pub fn set_peek_in_value_callback(&self, callback: PeekValueCallback) -> Result<()> {
        self.service_only("set_peek_in_value_callback")?;
        self.inner.callbacks().peek_in = Some(callback);
        Ok(())
    }

    pub fn set_peek_out_value_callback(&self, callback: PeekValueCallback) -> Result<()> {
        self.service_only("set_peek_out_value_callback")?;
        self.inner.callbacks().peek_out = Some(callback);
        Ok(())
    }

    pub fn set_poke_out_value_callback(&self, callback: PokeValueCallback) -> Result<()> {
        self.service_only("set_poke_out_value_callback")?;
        self.inner.callbacks().poke_out = Some(callback);
        Ok(())
    }

    pub fn connections(&self) -> Vec<WireConnection> {
        let mut connections: Vec<_> = self.inner.table().values().cloned().collect();
        connections.sort_by_key(|c| c.peer());
        connections
    }

    pub fn connection(&self, peer: ConnectionId) -> Option<WireConnection> {
        self.inner.table().get(&peer).cloned()
    }

    pub fn active_connection_count(&self) -> usize {
        self.inner.table().len()
    }

    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        for connection in self.connections() {
            connection.close().await?;
        }
        self.inner
            .transport
            .unregister_listener(&self.inner.address)
            .await
    }

    async fn peek(&self, peer: ConnectionId, request: CallRequest) -> Result<(Payload, SystemTime)> {
        let call = MemberCall {
            address: self.inner.address.clone(),
            peer,
            request,
        };
        match self.inner.transport.call(call).await? {
            CallReply::Value { value, timestamp } => Ok((value, timestamp)),
            other => Err(unexpected_reply("peek", &other)),
        }
    }

    fn client_peer(&self, operation: &str) -> Result<ConnectionId> {
        self.inner.service_peer.ok_or_else(|| {
            StreamError::invalid_operation(format!(
                "{operation} is only available on the client side of a wire"
            ))
        })
    }

    fn service_only(&self, operation: &str) -> Result<()> {
        if self.inner.role == Role::Service {
            Ok(())
        } else {
            Err(StreamError::invalid_operation(format!(
                "{operation} is only available on the service side of a wire"
            )))
        }
    }

    fn require(&self, allowed: bool, operation: &str) -> Result<()> {
        if allowed {
            Ok(())
        } else {
            Err(StreamError::invalid_operation(format!(
                "{operation} not allowed on {:?} wire {}",
                self.inner.def.direction, self.inner.address
            )))
        }
    }
}

impl WireShared {
    fn table(&self) -> MutexGuard<'_, HashMap<ConnectionId, WireConnection>> {
        self.connections.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn callbacks(&self) -> MutexGuard<'_, WireCallbacks> {
        self.callbacks.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn new_connection(&self, peer: ConnectionId) -> WireConnection {
        let owner: Weak<dyn ConnectionOwner> = self.self_weak.clone();
        WireConnection::new(ConnectionParams {
            peer,
            address: self.address.clone(),
            role: self.role,
            direction: self.def.direction,
            transport: self.transport.clone(),
            owner,
            event_capacity: self.event_capacity,
        })
    }

    async fn accept_connect(&self, peer: ConnectionId) -> Result<CallReply> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamError::invalid_operation(format!(
                "wire {} is closed",
                self.address
            )));
        }
        let (connection, replaced) = {
            let mut table = self.table();
            let connection = self.new_connection(peer);
            let replaced = table.insert(peer, connection.clone());
            (connection, replaced)
        };
        if let Some(old) = replaced {
            old.close_local();
        }

        let callback = self.callbacks().connect.clone();
        if let Some(callback) = callback {
            if let Err(err) = callback(connection.clone()).await {
                warn!(
                    event = events::WIRE_CONNECT_REJECTED,
                    component = COMPONENT,
                    member = fields::format_address(&self.address).as_str(),
                    peer = %peer,
                    reason = fields::REASON_CALLBACK_REJECTED,
                    err = %err,
                    "wire connect rejected"
                );
                connection.close_local();
                return Err(err);
            }
        }
        info!(
            event = events::WIRE_CONNECT_OK,
            component = COMPONENT,
            member = fields::format_address(&self.address).as_str(),
            peer = %peer,
            "wire connection accepted"
        );
        Ok(CallReply::Ack)
    }

    fn handle_call(&self, peer: ConnectionId, request: CallRequest) -> Result<CallReply> {
        let direction = self.def.direction;
        let (allowed, name) = match &request {
            CallRequest::PeekInValue => (direction.can_send(Role::Service), "peek_in_value"),
            CallRequest::PeekOutValue => (direction.can_receive(Role::Service), "peek_out_value"),
            CallRequest::PokeOutValue { .. } => {
                (direction.can_receive(Role::Service), "poke_out_value")
            }
            other => {
                return Err(StreamError::invalid_operation(format!(
                    "wire {} cannot handle {other:?}",
                    self.address
                )))
            }
        };
        if !allowed {
            return Err(StreamError::invalid_operation(format!(
                "{name} not allowed on {direction:?} wire {}",
                self.address
            )));
        }

        let (peek_in, peek_out, poke_out) = {
            let callbacks = self.callbacks();
            (
                callbacks.peek_in.clone(),
                callbacks.peek_out.clone(),
                callbacks.poke_out.clone(),
            )
        };
        // Callbacks run without the lock held so they may use this wire.
        let res = match request {
            CallRequest::PeekInValue => peek_in.map(|cb| {
                cb(peer).map(|(value, timestamp)| CallReply::Value { value, timestamp })
            }),
            CallRequest::PeekOutValue => peek_out.map(|cb| {
                cb(peer).map(|(value, timestamp)| CallReply::Value { value, timestamp })
            }),
            CallRequest::PokeOutValue { value, timestamp } => {
                poke_out.map(|cb| cb(value, timestamp, peer).map(|()| CallReply::Ack))
            }
            _ => None,
        };
        match res {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(err)) => {
                warn!(
                    event = events::WIRE_CALLBACK_FAILED,
                    component = COMPONENT,
                    member = fields::format_address(&self.address).as_str(),
                    peer = %peer,
                    err = %err,
                    "{name} callback failed"
                );
                Err(err)
            }
            None => Err(StreamError::invalid_operation(format!(
                "{name} is not supported by wire {}",
                self.address
            ))),
        }
    }
}

impl ConnectionOwner for WireShared {
    fn connection_closed(&self, connection: &WireConnection) {
        let mut table = self.table();
        if table.get(&connection.peer()) == Some(connection) {
            table.remove(&connection.peer());
        }
    }
}

struct WireListener {
    shared: Weak<WireShared>,
}

#[async_trait]
impl MemberListener for WireListener {
    async fn on_receive(&self, message: MemberMessage) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let connection = shared.table().get(&message.peer).cloned();
        let Some(connection) = connection else {
            warn!(
                event = events::WIRE_VALUE_UNROUTED,
                component = COMPONENT,
                member = fields::format_address(&shared.address).as_str(),
                peer = %message.peer,
                reason = fields::REASON_UNKNOWN_ENDPOINT,
                "dropping message for unknown wire connection"
            );
            return;
        };
        match message.body {
            MessageBody::WireValue { value, timestamp } => {
                connection.handle_value(value, timestamp)
            }
            MessageBody::WireClose => connection.close_local(),
            _ => {}
        }
    }

    async fn on_call(&self, call: MemberCall) -> Result<CallReply> {
        let shared = self
            .shared
            .upgrade()
            .ok_or_else(|| StreamError::not_found(format!("wire {} is gone", call.address)))?;
        if shared.role != Role::Service {
            return Err(StreamError::invalid_operation(format!(
                "client wire {} does not accept calls",
                shared.address
            )));
        }
        match call.request {
            CallRequest::WireConnect => shared.accept_connect(call.peer).await,
            request => shared.handle_call(call.peer, request),
        }
    }

    async fn on_peer_closed(&self, peer: ConnectionId) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let connection = shared.table().get(&peer).cloned();
        if let Some(connection) = connection {
            connection.close_local();
        }
    }
}
