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

//! Value fan-out for service wires.

use crate::error::{Result, StreamError};
use crate::observability::events;
use crate::types::{ConnectionId, Payload, Role};
use crate::wire::value_slot::ValueSlot;
use crate::wire::{PeekValueCallback, Wire, WireConnectCallback, WireConnection};
use futures::future::join_all;
use futures::FutureExt;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

const COMPONENT: &str = "wire_broadcaster";

/// Decides per update whether a connection gets the value.
pub type WireBroadcastPredicate = Arc<dyn Fn(ConnectionId) -> bool + Send + Sync>;

struct BroadcasterInner {
    wire: Wire,
    out_value: ValueSlot,
    predicate: Mutex<Option<WireBroadcastPredicate>>,
}

/// Sends every out value to every connected client of a service wire.
///
/// New connections receive the current value right away, and client peeks
/// answer with it unless another peek callback is installed.
#[derive(Clone)]
pub struct WireBroadcaster {
    inner: Arc<BroadcasterInner>,
}

impl WireBroadcaster {
    pub fn new(wire: Wire) -> Result<WireBroadcaster> {
        if wire.role() != Role::Service {
            return Err(StreamError::invalid_operation(
                "wire broadcasters are only available on the service side",
            ));
        }
        if !wire.direction().can_send(Role::Service) {
            return Err(StreamError::invalid_operation(format!(
                "wire {} cannot send from the service side",
                wire.member_name()
            )));
        }

        let inner = Arc::new(BroadcasterInner {
            wire: wire.clone(),
            out_value: ValueSlot::new("out"),
            predicate: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let on_connect: WireConnectCallback = Arc::new(move |connection: WireConnection| {
            let weak: Weak<BroadcasterInner> = weak.clone();
            async move {
                let inner = weak.upgrade().ok_or_else(|| {
                    StreamError::invalid_operation("wire broadcaster was dropped")
                })?;
                inner.replay(&connection).await;
                Ok(())
            }
            .boxed()
        });
        wire.set_connect_callback(on_connect)?;

        let weak = Arc::downgrade(&inner);
        let peek_in: PeekValueCallback =
            Arc::new(move |_client: ConnectionId| -> Result<(Payload, SystemTime)> {
                weak.upgrade()
                    .ok_or_else(|| StreamError::invalid_operation("wire broadcaster was dropped"))?
                    .out_value
                    .get()
            });
        wire.set_peek_in_value_callback(peek_in)?;

        Ok(WireBroadcaster { inner })
    }

    pub fn wire(&self) -> &Wire {
        &self.inner.wire
    }

    /// Stores `value` and sends it to every eligible connection. Returns
    /// how many connections accepted it.
    pub async fn set_out_value(&self, value: Payload) -> Result<usize> {
        let timestamp = SystemTime::now();
        self.inner.out_value.set(value.clone(), timestamp);

        let targets: Vec<WireConnection> = self
            .inner
            .wire
            .connections()
            .into_iter()
            .filter(|connection| !connection.is_closed() && self.inner.allows(connection.peer()))
            .collect();
        let sends = targets.iter().map(|connection| {
            let value = value.clone();
            async move { (connection, connection.send_out_value(value, timestamp).await) }
        });

        let mut delivered = 0;
        for (connection, res) in join_all(sends).await {
            match res {
                Ok(()) => delivered += 1,
                Err(err) => warn!(
                    event = events::BROADCAST_SEND_FAILED,
                    component = COMPONENT,
                    member = self.inner.wire.member_name(),
                    peer = %connection.peer(),
                    err = %err,
                    "broadcast value send failed"
                ),
            }
        }
        Ok(delivered)
    }

    pub fn out_value(&self) -> Result<Payload> {
        self.inner.out_value.get().map(|(value, _)| value)
    }

    pub fn try_get_out_value(&self) -> Option<(Payload, SystemTime)> {
        self.inner.out_value.try_get()
    }

    pub fn out_value_lifespan(&self) -> Option<Duration> {
        self.inner.out_value.lifespan()
    }

    /// Limits how long the current value is replayed to new connections
    /// and served to peeks.
    pub fn set_out_value_lifespan(&self, lifespan: Option<Duration>) {
        self.inner.out_value.set_lifespan(lifespan);
    }

    pub fn set_predicate(&self, predicate: Option<WireBroadcastPredicate>) {
        *self.inner.predicate.lock().unwrap_or_else(|p| p.into_inner()) = predicate;
    }

    /// Replaces the default peek handler, which answers with the out value.
    pub fn set_peek_in_value_callback(&self, callback: PeekValueCallback) -> Result<()> {
        self.inner.wire.set_peek_in_value_callback(callback)
    }

    pub fn active_connection_count(&self) -> usize {
        self.inner.wire.active_connection_count()
    }
}

impl BroadcasterInner {
    fn allows(&self, peer: ConnectionId) -> bool {
        let predicate = self
            .predicate
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        predicate.map_or(true, |allow| allow(peer))
    }

    async fn replay(&self, connection: &WireConnection) {
        let Some((value, timestamp)) = self.out_value.try_get() else {
            return;
        };
        if !self.allows(connection.peer()) {
            return;
        }
        if let Err(err) = connection.send_out_value(value, timestamp).await {
            debug!(
                event = events::BROADCAST_SEND_FAILED,
                component = COMPONENT,
                member = self.wire.member_name(),
                peer = %connection.peer(),
                err = %err,
                "could not replay current value to new connection"
            );
        }
    }
}
