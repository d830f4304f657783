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

//! One half of a most-recent-value channel.

use crate::error::{Result, StreamError};
use crate::event_hook::{EventHook, EventListenerHandle};
use crate::observability::{events, fields};
use crate::transport::{MemberAddress, MemberMessage, MemberTransport, MessageBody};
use crate::types::{ConnectionId, MemberDirection, Payload, Role};
use crate::wire::value_slot::ValueSlot;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

const COMPONENT: &str = "wire_connection";

#[derive(Clone, Debug, PartialEq)]
pub enum WireConnectionEvent {
    /// A newer in value was accepted.
    ValueChanged {
        value: Payload,
        timestamp: SystemTime,
    },
    Closed,
}

pub(crate) trait ConnectionOwner: Send + Sync {
    fn connection_closed(&self, connection: &WireConnection);
}

pub(crate) struct ConnectionParams {
    pub peer: ConnectionId,
    pub address: MemberAddress,
    pub role: Role,
    pub direction: MemberDirection,
    pub transport: Arc<dyn MemberTransport>,
    pub owner: Weak<dyn ConnectionOwner>,
    pub event_capacity: usize,
}

struct ConnectionInner {
    peer: ConnectionId,
    address: MemberAddress,
    role: Role,
    direction: MemberDirection,
    transport: Arc<dyn MemberTransport>,
    owner: Weak<dyn ConnectionOwner>,
    in_value: ValueSlot,
    out_value: ValueSlot,
    ignore_in_value: AtomicBool,
    closed: watch::Sender<bool>,
    events: EventHook<WireConnectionEvent>,
}

#[derive(Clone)]
pub struct WireConnection {
    inner: Arc<ConnectionInner>,
}

impl WireConnection {
    pub(crate) fn new(params: ConnectionParams) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(ConnectionInner {
                peer: params.peer,
                address: params.address,
                role: params.role,
                direction: params.direction,
                transport: params.transport,
                owner: params.owner,
                in_value: ValueSlot::new("in"),
                out_value: ValueSlot::new("out"),
                ignore_in_value: AtomicBool::new(false),
                closed,
                events: EventHook::new(COMPONENT, params.event_capacity),
            }),
        }
    }

    pub fn peer(&self) -> ConnectionId {
        self.inner.peer
    }

    pub fn member_name(&self) -> &str {
        &self.inner.address.member
    }

    pub fn direction(&self) -> MemberDirection {
        self.inner.direction
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Stamps `value` with the local clock, stores it as the out value and
    /// sends it to the peer.
    pub async fn set_out_value(&self, value: Payload) -> Result<()> {
        self.send_out_value(value, SystemTime::now()).await
    }

    pub(crate) async fn send_out_value(&self, value: Payload, timestamp: SystemTime) -> Result<()> {
        if !self.inner.direction.can_send(self.inner.role) {
            return Err(StreamError::invalid_operation(format!(
                "wire {} is {:?} and cannot send from the {:?} side",
                self.inner.address, self.inner.direction, self.inner.role
            )));
        }
        if self.is_closed() {
            return Err(self.closed_error());
        }
        self.inner.out_value.set(value.clone(), timestamp);
        self.inner
            .transport
            .send(MemberMessage {
                address: self.inner.address.clone(),
                peer: self.inner.peer,
                body: MessageBody::WireValue { value, timestamp },
            })
            .await
    }

    /// Last value received from the peer. Fails with `ValueNotSet` if none
    /// arrived yet or the in value lifespan elapsed.
    pub fn in_value(&self) -> Result<Payload> {
        self.inner.in_value.get().map(|(value, _)| value)
    }

    pub fn in_value_with_timestamp(&self) -> Result<(Payload, SystemTime)> {
        self.inner.in_value.get()
    }

    pub fn out_value(&self) -> Result<Payload> {
        self.inner.out_value.get().map(|(value, _)| value)
    }

    pub fn out_value_with_timestamp(&self) -> Result<(Payload, SystemTime)> {
        self.inner.out_value.get()
    }

    pub fn try_get_in_value(&self) -> Option<(Payload, SystemTime)> {
        self.inner.in_value.try_get()
    }

    pub fn try_get_out_value(&self) -> Option<(Payload, SystemTime)> {
        self.inner.out_value.try_get()
    }

    pub fn in_value_valid(&self) -> bool {
        self.inner.in_value.is_valid()
    }

    pub fn out_value_valid(&self) -> bool {
        self.inner.out_value.is_valid()
    }

    /// `None` means the value never expires.
    pub fn in_value_lifespan(&self) -> Option<Duration> {
        self.inner.in_value.lifespan()
    }

    pub fn set_in_value_lifespan(&self, lifespan: Option<Duration>) {
        self.inner.in_value.set_lifespan(lifespan);
    }

    pub fn out_value_lifespan(&self) -> Option<Duration> {
        self.inner.out_value.lifespan()
    }

    pub fn set_out_value_lifespan(&self, lifespan: Option<Duration>) {
        self.inner.out_value.set_lifespan(lifespan);
    }

    pub async fn wait_in_value_valid(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.in_value.wait_valid(timeout).await
    }

    pub async fn wait_out_value_valid(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.out_value.wait_valid(timeout).await
    }

    pub fn ignore_in_value(&self) -> bool {
        self.inner.ignore_in_value.load(Ordering::Acquire)
    }

    /// Drops incoming values instead of storing them.
    pub fn set_ignore_in_value(&self, ignore: bool) {
        self.inner.ignore_in_value.store(ignore, Ordering::Release);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WireConnectionEvent> {
        self.inner.events.subscribe()
    }

    pub fn add_listener<F>(&self, listener: F) -> EventListenerHandle
    where
        F: FnMut(WireConnectionEvent) + Send + 'static,
    {
        self.inner.events.add_listener(listener)
    }

    pub async fn wait_closed(&self) {
        let mut closed = self.inner.closed.subscribe();
        // Only errors if the sender is gone, which means we are gone too.
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Closes both halves. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if !self.mark_closed() {
            return Ok(());
        }
        let res = self
            .inner
            .transport
            .send(MemberMessage {
                address: self.inner.address.clone(),
                peer: self.inner.peer,
                body: MessageBody::WireClose,
            })
            .await;
        if let Err(err) = &res {
            debug!(
                event = events::WIRE_CLOSE_SEND_FAILED,
                component = COMPONENT,
                member = fields::format_address(&self.inner.address).as_str(),
                peer = %self.inner.peer,
                err = %err,
                "peer did not get the close notice"
            );
        }
        self.finish_close();
        Ok(())
    }

    pub(crate) fn handle_value(&self, value: Payload, timestamp: SystemTime) {
        if self.is_closed() {
            return;
        }
        if !self.inner.direction.can_receive(self.inner.role) {
            warn!(
                event = events::WIRE_VALUE_WRONG_DIRECTION,
                component = COMPONENT,
                member = fields::format_address(&self.inner.address).as_str(),
                peer = %self.inner.peer,
                "dropping value sent against the member direction"
            );
            return;
        }
        if self.ignore_in_value() {
            return;
        }
        if self.inner.in_value.set(value.clone(), timestamp) {
            self.inner
                .events
                .fire(WireConnectionEvent::ValueChanged { value, timestamp });
        } else {
            debug!(
                event = events::WIRE_VALUE_STALE,
                component = COMPONENT,
                member = fields::format_address(&self.inner.address).as_str(),
                peer = %self.inner.peer,
                "dropping value older than the current one"
            );
        }
    }

    pub(crate) fn close_local(&self) {
        if self.mark_closed() {
            self.finish_close();
        }
    }

    fn mark_closed(&self) -> bool {
        self.inner.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    fn finish_close(&self) {
        debug!(
            event = events::WIRE_CONNECTION_CLOSED,
            component = COMPONENT,
            member = fields::format_address(&self.inner.address).as_str(),
            peer = %self.inner.peer,
            "wire connection closed"
        );
        self.inner.events.fire(WireConnectionEvent::Closed);
        if let Some(owner) = self.inner.owner.upgrade() {
            owner.connection_closed(self);
        }
    }

    fn closed_error(&self) -> StreamError {
        StreamError::invalid_operation(format!(
            "wire connection {} to {} is closed",
            self.inner.address, self.inner.peer
        ))
    }
}

impl PartialEq for WireConnection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for WireConnection {}

impl Debug for WireConnection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireConnection")
            .field("member", &self.inner.address)
            .field("peer", &self.inner.peer)
            .finish()
    }
}
