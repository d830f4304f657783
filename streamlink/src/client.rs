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

//! Client handle for one connected (sub-)object.

use crate::error::Result;
use crate::generator::Generator;
use crate::member_def::ObjectTypeDef;
use crate::observability::events;
use crate::pipe::Pipe;
use crate::transport::ObjectConnection;
use crate::types::{NodeId, Payload};
use crate::wire::Wire;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

const COMPONENT: &str = "service_client";

struct ClientInner {
    connection: Arc<dyn ObjectConnection>,
    event_capacity: usize,
    pipes: Mutex<HashMap<String, Pipe>>,
    wires: Mutex<HashMap<String, Wire>>,
    sub_objects: Mutex<HashMap<(String, Option<String>), ServiceClient>>,
}

/// An object connection plus lazily created member facades.
///
/// Facades are created once per member name and shared by every caller.
/// Clones refer to the same client.
#[derive(Clone)]
pub struct ServiceClient {
    inner: Arc<ClientInner>,
}

impl ServiceClient {
    pub fn new(connection: Arc<dyn ObjectConnection>, event_capacity: usize) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                connection,
                event_capacity,
                pipes: Mutex::new(HashMap::new()),
                wires: Mutex::new(HashMap::new()),
                sub_objects: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn connection(&self) -> &Arc<dyn ObjectConnection> {
        &self.inner.connection
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.connection.node_id()
    }

    pub fn node_name(&self) -> &str {
        self.inner.connection.node_name()
    }

    pub fn service_name(&self) -> &str {
        self.inner.connection.service_name()
    }

    pub fn service_path(&self) -> &str {
        self.inner.connection.service_path()
    }

    pub fn object_type(&self) -> Arc<ObjectTypeDef> {
        self.inner.connection.object_type()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.connection.is_closed()
    }

    pub async fn pipe(&self, name: &str) -> Result<Pipe> {
        let mut pipes = self.inner.pipes.lock().await;
        if let Some(pipe) = pipes.get(name) {
            return Ok(pipe.clone());
        }
        let def = self.object_type().pipe(name)?.clone();
        let pipe = Pipe::client(
            def,
            self.inner.connection.transport(),
            self.inner.connection.service_peer(),
            self.service_path(),
            self.inner.event_capacity,
        )
        .await?;
        pipes.insert(name.to_string(), pipe.clone());
        Ok(pipe)
    }

    pub async fn wire(&self, name: &str) -> Result<Wire> {
        let mut wires = self.inner.wires.lock().await;
        if let Some(wire) = wires.get(name) {
            return Ok(wire.clone());
        }
        let def = self.object_type().wire(name)?.clone();
        let wire = Wire::client(
            def,
            self.inner.connection.transport(),
            self.inner.connection.service_peer(),
            self.service_path(),
            self.inner.event_capacity,
        )
        .await?;
        wires.insert(name.to_string(), wire.clone());
        Ok(wire)
    }

    /// Starts a new generator sequence; every call returns a fresh cursor.
    pub async fn generator(&self, name: &str, args: Payload) -> Result<Generator> {
        let def = self.object_type().generator(name)?.clone();
        Generator::start(
            def,
            self.inner.connection.transport(),
            self.inner.connection.service_peer(),
            self.service_path(),
            args,
        )
        .await
    }

    /// Follows the object reference `name` (optionally indexed or keyed).
    ///
    /// The sub-object client is cached, so its member facades are shared
    /// by every caller following the same reference.
    pub async fn sub_object(&self, name: &str, index: Option<&str>) -> Result<ServiceClient> {
        let key = (name.to_string(), index.map(str::to_string));
        let mut sub_objects = self.inner.sub_objects.lock().await;
        if let Some(client) = sub_objects.get(&key) {
            if !client.is_closed() {
                return Ok(client.clone());
            }
        }
        let connection = self.inner.connection.object_ref(name, index).await?;
        let client = ServiceClient::new(connection, self.inner.event_capacity);
        sub_objects.insert(key, client.clone());
        Ok(client)
    }

    pub async fn wait_closed(&self) {
        self.inner.connection.wait_closed().await
    }

    /// Closes the member facades, then the connection.
    pub async fn close(&self) -> Result<()> {
        let sub_objects: Vec<ServiceClient> = self
            .inner
            .sub_objects
            .lock()
            .await
            .drain()
            .map(|(_, c)| c)
            .collect();
        for sub_object in sub_objects {
            // Sub-object connections share this connection; only their
            // facades need releasing.
            sub_object.close_members().await;
        }
        self.close_members().await;
        self.inner.connection.close().await
    }

    async fn close_members(&self) {
        let pipes: Vec<Pipe> = self.inner.pipes.lock().await.drain().map(|(_, p)| p).collect();
        for pipe in pipes {
            if let Err(err) = pipe.close().await {
                warn!(
                    event = events::CLIENT_MEMBER_CLOSE_FAILED,
                    component = COMPONENT,
                    member = pipe.member_name(),
                    err = %err,
                    "closing pipe failed"
                );
            }
        }
        let wires: Vec<Wire> = self.inner.wires.lock().await.drain().map(|(_, w)| w).collect();
        for wire in wires {
            if let Err(err) = wire.close().await {
                warn!(
                    event = events::CLIENT_MEMBER_CLOSE_FAILED,
                    component = COMPONENT,
                    member = wire.member_name(),
                    err = %err,
                    "closing wire failed"
                );
            }
        }
    }

    pub fn ptr_eq(&self, other: &ServiceClient) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for ServiceClient {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ServiceClient {}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("service_path", &self.service_path())
            .field("node_id", &self.node_id())
            .field("closed", &self.is_closed())
            .finish()
    }
}
