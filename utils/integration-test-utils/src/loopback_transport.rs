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

//! One object connection over a pair of `async_broadcast` channels.
//!
//! Each direction has its own channel and its own pump task, so messages
//! stay in send order and listeners never run on the sender's stack.
//! Calls skip the channels and go straight to the remote listener.

use async_broadcast::{broadcast, Receiver, Sender};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use streamlink::transport::{
    CallReply, MemberAddress, MemberCall, MemberListener, MemberMessage, MemberTransport,
};
use streamlink::{ConnectionId, NodeId, ObjectConnection, ObjectTypeDef, Result, StreamError};
use tokio::sync::watch;
use tracing::debug;

/// Id under which every client sees the service end.
pub const SERVICE_PEER: ConnectionId = ConnectionId(0);

const LINK_CAPACITY: usize = 1024;

type ListenerMap = Mutex<HashMap<MemberAddress, Arc<dyn MemberListener>>>;

#[derive(Clone, Debug)]
enum Frame {
    Message(MemberMessage),
    Closed,
}

fn listener_for(listeners: &ListenerMap, address: &MemberAddress) -> Option<Arc<dyn MemberListener>> {
    listeners
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .get(address)
        .cloned()
}

fn all_listeners(listeners: &ListenerMap) -> Vec<Arc<dyn MemberListener>> {
    listeners
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .values()
        .cloned()
        .collect()
}

/// Static description of a hosted service.
pub(crate) struct HostIdentity {
    pub node_id: NodeId,
    pub node_name: String,
    pub service_name: String,
    pub root_type: Arc<ObjectTypeDef>,
}

/// Service end shared by every connection to one hosted service.
pub(crate) struct HostShared {
    pub identity: HostIdentity,
    listeners: ListenerMap,
    links: Mutex<HashMap<ConnectionId, Arc<Link>>>,
    sub_objects: Mutex<HashMap<String, Arc<ObjectTypeDef>>>,
    next_connection: AtomicU32,
}

struct Link {
    connection_id: ConnectionId,
    to_service: Sender<Frame>,
    to_client: Sender<Frame>,
    closed: watch::Sender<bool>,
}

impl Link {
    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Tells both pumps to wind down after what is already queued.
    async fn shut(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let _ = self.to_service.broadcast(Frame::Closed).await;
        let _ = self.to_client.broadcast(Frame::Closed).await;
    }
}

impl HostShared {
    pub(crate) fn new(identity: HostIdentity) -> Arc<HostShared> {
        Arc::new(HostShared {
            identity,
            listeners: Mutex::new(HashMap::new()),
            links: Mutex::new(HashMap::new()),
            sub_objects: Mutex::new(HashMap::new()),
            next_connection: AtomicU32::new(1),
        })
    }

    pub(crate) fn add_sub_object(&self, service_path: &str, type_def: Arc<ObjectTypeDef>) {
        self.sub_objects
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(service_path.to_string(), type_def);
    }

    fn sub_object(&self, service_path: &str) -> Option<Arc<ObjectTypeDef>> {
        self.sub_objects
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(service_path)
            .cloned()
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.links.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Opens a new connection and starts both pumps.
    pub(crate) fn accept(self: &Arc<Self>) -> Arc<dyn ObjectConnection> {
        let connection_id = ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed));
        let (to_service, service_rx) = broadcast(LINK_CAPACITY);
        let (to_client, client_rx) = broadcast(LINK_CAPACITY);
        let (closed, _) = watch::channel(false);
        let link = Arc::new(Link {
            connection_id,
            to_service,
            to_client,
            closed,
        });
        self.links
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(connection_id, link.clone());

        let client_listeners: Arc<ListenerMap> = Arc::new(Mutex::new(HashMap::new()));
        tokio::spawn(service_pump(self.clone(), connection_id, service_rx));
        tokio::spawn(client_pump(link.clone(), client_listeners.clone(), client_rx));
        debug!(
            service = self.identity.service_name.as_str(),
            peer = %connection_id,
            "loopback connection accepted"
        );

        let transport = Arc::new(ClientTransport {
            host: self.clone(),
            link: link.clone(),
            listeners: client_listeners,
        });
        Arc::new(LoopbackConnection::new(
            self.clone(),
            link,
            transport,
            self.identity.service_name.clone(),
            self.identity.root_type.clone(),
        ))
    }

    /// Drops every connection, as a crashed service would.
    pub(crate) async fn shut_all(&self) {
        let links: Vec<_> = self
            .links
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect();
        for link in links {
            link.shut().await;
        }
    }

    fn link(&self, peer: ConnectionId) -> Option<Arc<Link>> {
        self.links
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&peer)
            .cloned()
    }
}

async fn service_pump(host: Arc<HostShared>, connection_id: ConnectionId, mut rx: Receiver<Frame>) {
    while let Ok(frame) = rx.recv().await {
        match frame {
            Frame::Message(message) => {
                match listener_for(&host.listeners, &message.address) {
                    Some(listener) => listener.on_receive(message).await,
                    None => debug!(address = %message.address, "no service member; message dropped"),
                }
            }
            Frame::Closed => break,
        }
    }
    host.links
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .remove(&connection_id);
    for listener in all_listeners(&host.listeners) {
        listener.on_peer_closed(connection_id).await;
    }
}

async fn client_pump(link: Arc<Link>, listeners: Arc<ListenerMap>, mut rx: Receiver<Frame>) {
    while let Ok(frame) = rx.recv().await {
        match frame {
            Frame::Message(message) => match listener_for(&listeners, &message.address) {
                Some(listener) => listener.on_receive(message).await,
                None => debug!(address = %message.address, "no client member; message dropped"),
            },
            Frame::Closed => break,
        }
    }
    link.closed.send_replace(true);
    for listener in all_listeners(&listeners) {
        listener.on_peer_closed(SERVICE_PEER).await;
    }
}

fn closed_error() -> StreamError {
    StreamError::connection_failed("loopback connection closed")
}

/// Service-side transport; one per hosted service, shared by every link.
pub(crate) struct HostTransport {
    pub host: Arc<HostShared>,
}

#[async_trait]
impl MemberTransport for HostTransport {
    async fn send(&self, message: MemberMessage) -> Result<()> {
        let link = self
            .host
            .link(message.peer)
            .filter(|link| !link.is_closed())
            .ok_or_else(closed_error)?;
        let delivered = MemberMessage {
            peer: SERVICE_PEER,
            ..message
        };
        link.to_client
            .broadcast(Frame::Message(delivered))
            .await
            .map(|_| ())
            .map_err(|_| closed_error())
    }

    async fn call(&self, call: MemberCall) -> Result<CallReply> {
        Err(StreamError::invalid_operation(format!(
            "service side cannot call {}",
            call.address
        )))
    }

    async fn register_listener(
        &self,
        address: &MemberAddress,
        listener: Arc<dyn MemberListener>,
    ) -> Result<()> {
        self.host
            .listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(address.clone(), listener);
        Ok(())
    }

    async fn unregister_listener(&self, address: &MemberAddress) -> Result<()> {
        self.host
            .listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(address);
        Ok(())
    }
}

/// Client-side transport of one link.
struct ClientTransport {
    host: Arc<HostShared>,
    link: Arc<Link>,
    listeners: Arc<ListenerMap>,
}

#[async_trait]
impl MemberTransport for ClientTransport {
    async fn send(&self, message: MemberMessage) -> Result<()> {
        if self.link.is_closed() {
            return Err(closed_error());
        }
        let delivered = MemberMessage {
            peer: self.link.connection_id,
            ..message
        };
        self.link
            .to_service
            .broadcast(Frame::Message(delivered))
            .await
            .map(|_| ())
            .map_err(|_| closed_error())
    }

    async fn call(&self, call: MemberCall) -> Result<CallReply> {
        if self.link.is_closed() {
            return Err(closed_error());
        }
        let listener = listener_for(&self.host.listeners, &call.address)
            .ok_or_else(|| StreamError::not_found(format!("no member {}", call.address)))?;
        listener
            .on_call(MemberCall {
                peer: self.link.connection_id,
                ..call
            })
            .await
    }

    async fn register_listener(
        &self,
        address: &MemberAddress,
        listener: Arc<dyn MemberListener>,
    ) -> Result<()> {
        self.listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(address.clone(), listener);
        Ok(())
    }

    async fn unregister_listener(&self, address: &MemberAddress) -> Result<()> {
        self.listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(address);
        Ok(())
    }
}

/// Root object or sub-object handle over one link. Sub-objects share the
/// link; closing one only closes that handle.
pub struct LoopbackConnection {
    host: Arc<HostShared>,
    link: Arc<Link>,
    transport: Arc<ClientTransport>,
    service_path: String,
    object_type: Arc<ObjectTypeDef>,
    local_closed: watch::Sender<bool>,
}

impl LoopbackConnection {
    fn new(
        host: Arc<HostShared>,
        link: Arc<Link>,
        transport: Arc<ClientTransport>,
        service_path: String,
        object_type: Arc<ObjectTypeDef>,
    ) -> Self {
        let (local_closed, _) = watch::channel(false);
        Self {
            host,
            link,
            transport,
            service_path,
            object_type,
            local_closed,
        }
    }

    fn is_root(&self) -> bool {
        self.service_path == self.host.identity.service_name
    }

    /// Id the service uses for this connection.
    pub fn connection_id(&self) -> ConnectionId {
        self.link.connection_id
    }
}

#[async_trait]
impl ObjectConnection for LoopbackConnection {
    fn transport(&self) -> Arc<dyn MemberTransport> {
        self.transport.clone()
    }

    fn service_peer(&self) -> ConnectionId {
        SERVICE_PEER
    }

    fn node_id(&self) -> NodeId {
        self.host.identity.node_id
    }

    fn node_name(&self) -> &str {
        &self.host.identity.node_name
    }

    fn service_name(&self) -> &str {
        &self.host.identity.service_name
    }

    fn service_path(&self) -> &str {
        &self.service_path
    }

    fn object_type(&self) -> Arc<ObjectTypeDef> {
        self.object_type.clone()
    }

    fn is_closed(&self) -> bool {
        self.link.is_closed() || *self.local_closed.borrow()
    }

    async fn wait_closed(&self) {
        let mut link_closed = self.link.closed.subscribe();
        let mut local_closed = self.local_closed.subscribe();
        tokio::select! {
            _ = link_closed.wait_for(|closed| *closed) => {}
            _ = local_closed.wait_for(|closed| *closed) => {}
        }
    }

    async fn close(&self) -> Result<()> {
        if self.is_root() {
            self.link.shut().await;
        }
        self.local_closed.send_replace(true);
        Ok(())
    }

    async fn object_ref(
        &self,
        name: &str,
        index: Option<&str>,
    ) -> Result<Arc<dyn ObjectConnection>> {
        if self.is_closed() {
            return Err(closed_error());
        }
        let service_path = match index {
            Some(index) => format!("{}.{name}[{index}]", self.service_path),
            None => format!("{}.{name}", self.service_path),
        };
        let object_type = self
            .host
            .sub_object(&service_path)
            .ok_or_else(|| StreamError::not_found(format!("no object at {service_path}")))?;
        Ok(Arc::new(LoopbackConnection::new(
            self.host.clone(),
            self.link.clone(),
            self.transport.clone(),
            service_path,
            object_type,
        )))
    }
}

