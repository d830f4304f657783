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

//! Boundary with the object-connection transport.
//!
//! The transport owns sockets, framing and marshalling. It moves
//! [`MemberMessage`]s in order between the two ends of a connection, answers
//! [`MemberCall`]s with a [`CallReply`], and drives the registered
//! [`MemberListener`]s from its own notification tasks.

use crate::error::{Result, StreamError};
use crate::member_def::ObjectTypeDef;
use crate::types::{ConnectionId, NodeId, Payload};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::broadcast;

/// Routing key of one member of one (sub-)object.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct MemberAddress {
    pub service_path: String,
    pub member: String,
}

impl MemberAddress {
    pub fn new(service_path: &str, member: &str) -> Self {
        Self {
            service_path: service_path.to_string(),
            member: member.to_string(),
        }
    }
}

impl Display for MemberAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.service_path, self.member)
    }
}

/// One-way streaming message body.
#[derive(Clone, Debug, PartialEq)]
pub enum MessageBody {
    PipePacket {
        index: i32,
        seq: u32,
        request_ack: bool,
        payload: Payload,
    },
    PipePacketAck {
        index: i32,
        seq: u32,
    },
    PipeClose {
        index: i32,
    },
    WireValue {
        value: Payload,
        timestamp: SystemTime,
    },
    WireClose,
}

/// Ordered one-way message addressed to a member.
///
/// `peer` is the destination when sending and the origin when received.
#[derive(Clone, Debug, PartialEq)]
pub struct MemberMessage {
    pub address: MemberAddress,
    pub peer: ConnectionId,
    pub body: MessageBody,
}

/// Unary request carried by the transport's call primitive.
#[derive(Clone, Debug, PartialEq)]
pub enum CallRequest {
    PipeConnect { index: i32, unreliable: bool },
    WireConnect,
    PeekInValue,
    PeekOutValue,
    PokeOutValue { value: Payload, timestamp: SystemTime },
    GeneratorStart { args: Payload },
    GeneratorNext { id: i32, param: Option<Payload> },
    GeneratorAbort { id: i32 },
    GeneratorClose { id: i32 },
}

/// Successful reply to a [`CallRequest`].
#[derive(Clone, Debug, PartialEq)]
pub enum CallReply {
    Ack,
    PipeConnected { index: i32 },
    Value { value: Payload, timestamp: SystemTime },
    Generator { id: i32 },
    Next(Payload),
}

/// Unary call addressed to a member.
#[derive(Clone, Debug, PartialEq)]
pub struct MemberCall {
    pub address: MemberAddress,
    pub peer: ConnectionId,
    pub request: CallRequest,
}

/// Event-dispatch interface the transport drives for a registered member.
#[async_trait]
pub trait MemberListener: Send + Sync {
    async fn on_receive(&self, message: MemberMessage);

    async fn on_call(&self, call: MemberCall) -> Result<CallReply> {
        Err(StreamError::invalid_operation(format!(
            "member {} does not accept calls",
            call.address
        )))
    }

    /// The remote end identified by `peer` is gone.
    async fn on_peer_closed(&self, _peer: ConnectionId) {}
}

/// Ordered point-to-point connection plus the unary call primitive.
#[async_trait]
pub trait MemberTransport: Send + Sync {
    async fn send(&self, message: MemberMessage) -> Result<()>;

    async fn call(&self, call: MemberCall) -> Result<CallReply>;

    async fn register_listener(
        &self,
        address: &MemberAddress,
        listener: Arc<dyn MemberListener>,
    ) -> Result<()>;

    async fn unregister_listener(&self, address: &MemberAddress) -> Result<()>;
}

/// Username and opaque credential map handed to the connector.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeCredentials {
    pub username: String,
    #[serde(default)]
    pub credentials: HashMap<String, Payload>,
}

/// One service advertised by the discovery collaborator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceInfo {
    pub node_id: NodeId,
    pub node_name: String,
    pub service_name: String,
    pub root_object_type: String,
    #[serde(default)]
    pub root_object_implements: Vec<String>,
    pub connection_urls: Vec<String>,
    #[serde(default)]
    pub attributes: HashMap<String, Payload>,
}

impl ServiceInfo {
    /// Returns `true` when the root object is, or implements, `type_name`.
    pub fn provides_type(&self, type_name: &str) -> bool {
        self.root_object_type == type_name
            || self.root_object_implements.iter().any(|t| t == type_name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DiscoveryEvent {
    Detected(ServiceInfo),
    Lost { node_id: NodeId, service_name: String },
}

/// Object handle returned by [`ServiceConnector::connect`].
#[async_trait]
pub trait ObjectConnection: Send + Sync {
    fn transport(&self) -> Arc<dyn MemberTransport>;

    /// Id of the service end, as addressed through [`Self::transport`].
    fn service_peer(&self) -> ConnectionId;

    fn node_id(&self) -> NodeId;

    fn node_name(&self) -> &str;

    fn service_name(&self) -> &str;

    /// Dotted path of this object, starting with the service name.
    fn service_path(&self) -> &str;

    fn object_type(&self) -> Arc<ObjectTypeDef>;

    fn is_closed(&self) -> bool;

    /// Resolves once the connection is gone, whoever closed it.
    async fn wait_closed(&self);

    async fn close(&self) -> Result<()>;

    /// Follows an object reference member to a sub-object.
    async fn object_ref(
        &self,
        name: &str,
        index: Option<&str>,
    ) -> Result<Arc<dyn ObjectConnection>>;
}

#[async_trait]
pub trait ServiceConnector: Send + Sync {
    /// Connects to the first reachable URL of an equivalent set.
    async fn connect(
        &self,
        urls: &[String],
        credentials: Option<&NodeCredentials>,
    ) -> Result<Arc<dyn ObjectConnection>>;
}

pub trait ServiceDiscovery: Send + Sync {
    fn detected_services(&self) -> Vec<ServiceInfo>;

    /// Events fired after this call; pair with [`Self::detected_services`].
    fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent>;
}

pub(crate) fn unexpected_reply(request: &str, reply: &CallReply) -> StreamError {
    StreamError::transport(format!("unexpected reply to {request}: {reply:?}"))
}
