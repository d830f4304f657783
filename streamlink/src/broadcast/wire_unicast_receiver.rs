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

//! In value of the most recently connected client.
//!
//! Every connect supersedes the previous connection: older connections stay
//! open, but their updates no longer reach [`WireUnicastReceiver::in_value`].
//! Pokes always land, whichever client sends them.

use crate::config::DEFAULT_EVENT_CAPACITY;
use crate::error::{Result, StreamError};
use crate::event_hook::{EventHook, EventListenerHandle};
use crate::observability::events;
use crate::types::{ConnectionId, Payload, Role};
use crate::wire::value_slot::ValueSlot;
use crate::wire::{
    PeekValueCallback, PokeValueCallback, Wire, WireConnectCallback, WireConnection,
    WireConnectionEvent,
};
use futures::FutureExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tracing::info;

const COMPONENT: &str = "wire_unicast_receiver";

#[derive(Clone, Debug, PartialEq)]
pub enum UnicastEvent {
    InValueChanged {
        value: Payload,
        timestamp: SystemTime,
        peer: ConnectionId,
    },
}

struct ActiveConnection {
    generation: u64,
    peer: ConnectionId,
    listener: EventListenerHandle,
}

struct ReceiverInner {
    wire: Wire,
    in_value: ValueSlot,
    active: Mutex<Option<ActiveConnection>>,
    generation: AtomicU64,
    events: EventHook<UnicastEvent>,
    self_weak: Weak<ReceiverInner>,
}

#[derive(Clone)]
pub struct WireUnicastReceiver {
    inner: Arc<ReceiverInner>,
}

impl WireUnicastReceiver {
    pub fn new(wire: Wire) -> Result<WireUnicastReceiver> {
        if wire.role() != Role::Service {
            return Err(StreamError::invalid_operation(
                "wire unicast receivers are only available on the service side",
            ));
        }
        if !wire.direction().can_receive(Role::Service) {
            return Err(StreamError::invalid_operation(format!(
                "wire {} cannot receive on the service side",
                wire.member_name()
            )));
        }

        let inner = Arc::new_cyclic(|self_weak| ReceiverInner {
            wire: wire.clone(),
            in_value: ValueSlot::new("in"),
            active: Mutex::new(None),
            generation: AtomicU64::new(0),
            events: EventHook::new(COMPONENT, DEFAULT_EVENT_CAPACITY),
            self_weak: self_weak.clone(),
        });

        let weak = Arc::downgrade(&inner);
        let on_connect: WireConnectCallback = Arc::new(move |connection: WireConnection| {
            let weak: Weak<ReceiverInner> = weak.clone();
            async move {
                let inner = weak.upgrade().ok_or_else(|| {
                    StreamError::invalid_operation("wire unicast receiver was dropped")
                })?;
                inner.activate(&connection);
                Ok(())
            }
            .boxed()
        });
        wire.set_connect_callback(on_connect)?;

        let weak = Arc::downgrade(&inner);
        let poke: PokeValueCallback = Arc::new(
            move |value: Payload, timestamp: SystemTime, peer: ConnectionId| -> Result<()> {
                let inner = weak.upgrade().ok_or_else(|| {
                    StreamError::invalid_operation("wire unicast receiver was dropped")
                })?;
                inner.store(value, timestamp, peer);
                Ok(())
            },
        );
        wire.set_poke_out_value_callback(poke)?;

        // A client's out value is this side's in value.
        let weak = Arc::downgrade(&inner);
        let peek_out: PeekValueCallback =
            Arc::new(move |_peer: ConnectionId| -> Result<(Payload, SystemTime)> {
                weak.upgrade()
                    .ok_or_else(|| {
                        StreamError::invalid_operation("wire unicast receiver was dropped")
                    })?
                    .in_value
                    .get()
            });
        wire.set_peek_out_value_callback(peek_out)?;

        Ok(WireUnicastReceiver { inner })
    }

    pub fn wire(&self) -> &Wire {
        &self.inner.wire
    }

    pub fn in_value(&self) -> Result<Payload> {
        self.inner.in_value.get().map(|(value, _)| value)
    }

    pub fn in_value_with_timestamp(&self) -> Result<(Payload, SystemTime)> {
        self.inner.in_value.get()
    }

    pub fn try_get_in_value(&self) -> Option<(Payload, SystemTime)> {
        self.inner.in_value.try_get()
    }

    pub fn in_value_lifespan(&self) -> Option<Duration> {
        self.inner.in_value.lifespan()
    }

    pub fn set_in_value_lifespan(&self, lifespan: Option<Duration>) {
        self.inner.in_value.set_lifespan(lifespan);
    }

    pub async fn wait_in_value_valid(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.in_value.wait_valid(timeout).await
    }

    /// Peer of the connection whose updates currently count.
    pub fn active_peer(&self) -> Option<ConnectionId> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map(|active| active.peer)
    }

    pub fn active_connection_count(&self) -> usize {
        self.inner.wire.active_connection_count()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UnicastEvent> {
        self.inner.events.subscribe()
    }

    pub fn add_listener<F>(&self, listener: F) -> EventListenerHandle
    where
        F: FnMut(UnicastEvent) + Send + 'static,
    {
        self.inner.events.add_listener(listener)
    }
}

impl ReceiverInner {
    fn activate(&self, connection: &WireConnection) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let peer = connection.peer();
        let weak = self.self_weak.clone();
        let listener = connection.add_listener(move |event| {
            if let WireConnectionEvent::ValueChanged { value, timestamp } = event {
                if let Some(inner) = weak.upgrade() {
                    inner.accept(generation, peer, value, timestamp);
                }
            }
        });

        let previous = self
            .active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .replace(ActiveConnection {
                generation,
                peer,
                listener,
            });
        if let Some(previous) = previous {
            info!(
                event = events::UNICAST_CONNECTION_SUPERSEDED,
                component = COMPONENT,
                member = self.wire.member_name(),
                previous_peer = %previous.peer,
                peer = %peer,
                "newer connection supersedes the active one"
            );
            previous.listener.remove();
        }
    }

    fn accept(&self, generation: u64, peer: ConnectionId, value: Payload, timestamp: SystemTime) {
        {
            let active = self.active.lock().unwrap_or_else(|p| p.into_inner());
            if active.as_ref().map(|a| a.generation) != Some(generation) {
                return;
            }
            self.in_value.replace(value.clone(), timestamp);
        }
        self.events.fire(UnicastEvent::InValueChanged {
            value,
            timestamp,
            peer,
        });
    }

    fn store(&self, value: Payload, timestamp: SystemTime, peer: ConnectionId) {
        self.in_value.replace(value.clone(), timestamp);
        self.events.fire(UnicastEvent::InValueChanged {
            value,
            timestamp,
            peer,
        });
    }
}
