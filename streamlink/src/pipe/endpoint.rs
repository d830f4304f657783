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

//! One half of an indexed packet stream.

use crate::error::{Result, StreamError};
use crate::event_hook::{EventHook, EventListenerHandle};
use crate::observability::{events, fields};
use crate::pipe::packet_queue::{PacketQueue, PushOutcome, QueuedPacket, FIRST_SEQ};
use crate::runtime::wait_with_timeout;
use crate::transport::{MemberAddress, MemberMessage, MemberTransport, MessageBody};
use crate::types::{ConnectionId, MemberDirection, Payload, Role};
use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

const COMPONENT: &str = "pipe_endpoint";

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PipeEndpointEvent {
    /// The receive queue grew. Drain it in a loop; one event may cover
    /// several packets.
    PacketReceived,
    /// The peer consumed the packet with this sequence number.
    PacketAckReceived(u32),
    Closed,
}

/// Member facade that owns endpoints and must forget closed ones.
pub(crate) trait EndpointOwner: Send + Sync {
    fn endpoint_closed(&self, peer: ConnectionId, index: i32);
}

pub(crate) struct EndpointParams {
    pub index: i32,
    pub peer: ConnectionId,
    pub address: MemberAddress,
    pub role: Role,
    pub direction: MemberDirection,
    pub unreliable: bool,
    pub transport: Arc<dyn MemberTransport>,
    pub owner: Weak<dyn EndpointOwner>,
    pub event_capacity: usize,
}

#[derive(Debug)]
struct EndpointState {
    queue: PacketQueue,
    next_send_seq: u32,
    unacked: BTreeSet<u32>,
    closed: bool,
    request_packet_ack: bool,
    ignore_received: bool,
}

struct EndpointInner {
    index: i32,
    peer: ConnectionId,
    address: MemberAddress,
    role: Role,
    direction: MemberDirection,
    unreliable: bool,
    transport: Arc<dyn MemberTransport>,
    owner: Weak<dyn EndpointOwner>,
    state: Mutex<EndpointState>,
    send_lock: tokio::sync::Mutex<()>,
    // Bumped on every queue growth and on close.
    signal: watch::Sender<u64>,
    events: EventHook<PipeEndpointEvent>,
    // Acks from the sync receive calls may be issued on threads without a
    // runtime.
    runtime: Handle,
}

#[derive(Clone)]
pub struct PipeEndpoint {
    inner: Arc<EndpointInner>,
}

impl PipeEndpoint {
    pub(crate) fn new(params: EndpointParams) -> Self {
        let (signal, _) = watch::channel(0);
        Self {
            inner: Arc::new(EndpointInner {
                index: params.index,
                peer: params.peer,
                address: params.address,
                role: params.role,
                direction: params.direction,
                unreliable: params.unreliable,
                transport: params.transport,
                owner: params.owner,
                state: Mutex::new(EndpointState {
                    queue: PacketQueue::new(!params.unreliable),
                    next_send_seq: FIRST_SEQ,
                    unacked: BTreeSet::new(),
                    closed: false,
                    request_packet_ack: false,
                    ignore_received: false,
                }),
                send_lock: tokio::sync::Mutex::new(()),
                signal,
                events: EventHook::new(COMPONENT, params.event_capacity),
                runtime: Handle::current(),
            }),
        }
    }

    pub fn index(&self) -> i32 {
        self.inner.index
    }

    /// Connection id of the remote end.
    pub fn peer(&self) -> ConnectionId {
        self.inner.peer
    }

    pub fn member_name(&self) -> &str {
        &self.inner.address.member
    }

    pub fn direction(&self) -> MemberDirection {
        self.inner.direction
    }

    pub fn is_unreliable(&self) -> bool {
        self.inner.unreliable
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Packets ready to be received.
    pub fn available(&self) -> usize {
        self.state().queue.len()
    }

    /// Sent packets that asked for an ack and have not been acked yet.
    pub fn unacked_packet_count(&self) -> usize {
        self.state().unacked.len()
    }

    pub fn request_packet_ack(&self) -> bool {
        self.state().request_packet_ack
    }

    pub fn set_request_packet_ack(&self, enabled: bool) {
        self.state().request_packet_ack = enabled;
    }

    pub fn ignore_received(&self) -> bool {
        self.state().ignore_received
    }

    /// Drops incoming packets instead of queueing them. Packets already
    /// queued stay readable.
    pub fn set_ignore_received(&self, ignore: bool) {
        self.state().ignore_received = ignore;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipeEndpointEvent> {
        self.inner.events.subscribe()
    }

    pub fn add_listener<F>(&self, listener: F) -> EventListenerHandle
    where
        F: FnMut(PipeEndpointEvent) + Send + 'static,
    {
        self.inner.events.add_listener(listener)
    }

    /// Sends one packet and returns its sequence number once the transport
    /// accepted it.
    pub async fn send_packet(&self, payload: Payload) -> Result<u32> {
        self.send_packet_within_backlog(payload, None)
            .await?
            .ok_or_else(|| StreamError::invalid_operation("pipe send refused"))
    }

    /// Sends unless `max_backlog` packets are already unacknowledged, in
    /// which case nothing is sent and `Ok(None)` comes back. The check and
    /// the sequence number claim happen under one lock.
    pub(crate) async fn send_packet_within_backlog(
        &self,
        payload: Payload,
        max_backlog: Option<usize>,
    ) -> Result<Option<u32>> {
        if !self.inner.direction.can_send(self.inner.role) {
            return Err(StreamError::invalid_operation(format!(
                "pipe {} is {:?} and cannot send from the {:?} side",
                self.inner.address, self.inner.direction, self.inner.role
            )));
        }

        // Serializes sends so sequence numbers reach the transport in order.
        let _send_guard = self.inner.send_lock.lock().await;
        let (seq, request_ack) = {
            let mut state = self.state();
            if state.closed {
                return Err(self.closed_error());
            }
            if max_backlog.is_some_and(|max| state.unacked.len() >= max) {
                return Ok(None);
            }
            let seq = state.next_send_seq;
            state.next_send_seq = seq.wrapping_add(1);
            if state.request_packet_ack {
                state.unacked.insert(seq);
            }
            (seq, state.request_packet_ack)
        };

        let message = self.message(MessageBody::PipePacket {
            index: self.inner.index,
            seq,
            request_ack,
            payload,
        });
        if let Err(err) = self.inner.transport.send(message).await {
            let mut state = self.state();
            state.unacked.remove(&seq);
            state.next_send_seq = seq;
            return Err(err);
        }
        Ok(Some(seq))
    }

    /// Pops the head of the receive queue.
    pub fn receive_packet(&self) -> Result<Payload> {
        self.try_receive_packet().ok_or_else(|| self.empty_error())
    }

    /// Returns a copy of the head of the receive queue.
    pub fn peek_next_packet(&self) -> Result<Payload> {
        self.try_peek_next_packet()
            .ok_or_else(|| self.empty_error())
    }

    pub fn try_receive_packet(&self) -> Option<Payload> {
        let packet = self.state().queue.pop()?;
        if packet.request_ack {
            self.spawn_ack(packet.seq);
        }
        Some(packet.payload)
    }

    pub fn try_peek_next_packet(&self) -> Option<Payload> {
        self.state().queue.peek().map(|p| p.payload.clone())
    }

    /// Waits until a packet is available and pops it.
    ///
    /// `None` waits forever. Fails with `Timeout` when the limit elapses and
    /// with `InvalidOperation` if the endpoint closes while empty.
    pub async fn receive_packet_wait(&self, timeout: Option<Duration>) -> Result<Payload> {
        wait_with_timeout(timeout, "receive_packet_wait", self.wait_packet(false)).await
    }

    pub async fn peek_next_packet_wait(&self, timeout: Option<Duration>) -> Result<Payload> {
        wait_with_timeout(timeout, "peek_next_packet_wait", self.wait_packet(true)).await
    }

    /// Non-failing variant of the waits: `None` on timeout or close.
    pub async fn try_receive_packet_wait(
        &self,
        timeout: Option<Duration>,
        peek: bool,
    ) -> Option<Payload> {
        wait_with_timeout(timeout, "try_receive_packet_wait", self.wait_packet(peek))
            .await
            .ok()
    }

    /// Resolves once this endpoint is closed from either side.
    pub async fn wait_closed(&self) {
        let mut signal = self.inner.signal.subscribe();
        loop {
            if self.is_closed() {
                return;
            }
            if signal.changed().await.is_err() {
                return;
            }
        }
    }

    /// Closes both halves. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if !self.mark_closed() {
            return Ok(());
        }
        let message = self.message(MessageBody::PipeClose {
            index: self.inner.index,
        });
        let res = self.inner.transport.send(message).await;
        if let Err(err) = &res {
            debug!(
                event = events::PIPE_CLOSE_SEND_FAILED,
                component = COMPONENT,
                member = fields::format_address(&self.inner.address).as_str(),
                index = self.inner.index,
                err = %err,
                "peer did not get the close notice"
            );
        }
        self.finish_close();
        Ok(())
    }

    pub(crate) async fn handle_packet(&self, seq: u32, request_ack: bool, payload: Payload) {
        if !self.inner.direction.can_receive(self.inner.role) {
            warn!(
                event = events::PIPE_PACKET_WRONG_DIRECTION,
                component = COMPONENT,
                member = fields::format_address(&self.inner.address).as_str(),
                index = self.inner.index,
                seq,
                "dropping packet sent against the member direction"
            );
            return;
        }

        let (outcome, ack_now) = {
            let mut state = self.state();
            if state.closed {
                return;
            }
            if state.ignore_received {
                let outcome = state.queue.skip(seq);
                let fresh = outcome != PushOutcome::Duplicate;
                (outcome, fresh && request_ack)
            } else {
                let outcome = state.queue.push(QueuedPacket {
                    seq,
                    request_ack,
                    payload,
                });
                (outcome, false)
            }
        };

        match outcome {
            PushOutcome::Released(n) if n > 0 => {
                self.inner.signal.send_modify(|v| *v = v.wrapping_add(1));
                self.inner.events.fire(PipeEndpointEvent::PacketReceived);
            }
            PushOutcome::Duplicate => {
                debug!(
                    event = events::PIPE_PACKET_DUPLICATE,
                    component = COMPONENT,
                    member = fields::format_address(&self.inner.address).as_str(),
                    index = self.inner.index,
                    seq,
                    "dropping duplicate packet"
                );
            }
            PushOutcome::Released(_) | PushOutcome::Held => {}
        }

        if ack_now {
            self.send_ack(seq).await;
        }
    }

    pub(crate) fn handle_ack(&self, seq: u32) {
        self.state().unacked.remove(&seq);
        self.inner
            .events
            .fire(PipeEndpointEvent::PacketAckReceived(seq));
    }

    /// Closes without notifying the peer, for when the peer is the one
    /// that closed or is already gone.
    pub(crate) fn close_local(&self) {
        if self.mark_closed() {
            self.finish_close();
        }
    }

    fn mark_closed(&self) -> bool {
        let mut state = self.state();
        if state.closed {
            return false;
        }
        state.closed = true;
        state.unacked.clear();
        true
    }

    fn finish_close(&self) {
        debug!(
            event = events::PIPE_ENDPOINT_CLOSED,
            component = COMPONENT,
            member = fields::format_address(&self.inner.address).as_str(),
            index = self.inner.index,
            peer = %self.inner.peer,
            "pipe endpoint closed"
        );
        self.inner.signal.send_modify(|v| *v = v.wrapping_add(1));
        self.inner.events.fire(PipeEndpointEvent::Closed);
        if let Some(owner) = self.inner.owner.upgrade() {
            owner.endpoint_closed(self.inner.peer, self.inner.index);
        }
    }

    async fn wait_packet(&self, peek: bool) -> Result<Payload> {
        let mut signal = self.inner.signal.subscribe();
        loop {
            let ready = if peek {
                self.try_peek_next_packet()
            } else {
                self.try_receive_packet()
            };
            if let Some(payload) = ready {
                return Ok(payload);
            }
            if self.is_closed() {
                return Err(self.closed_error());
            }
            if signal.changed().await.is_err() {
                return Err(self.closed_error());
            }
        }
    }

    fn spawn_ack(&self, seq: u32) {
        let endpoint = self.clone();
        self.inner
            .runtime
            .spawn(async move { endpoint.send_ack(seq).await });
    }

    async fn send_ack(&self, seq: u32) {
        let message = self.message(MessageBody::PipePacketAck {
            index: self.inner.index,
            seq,
        });
        if let Err(err) = self.inner.transport.send(message).await {
            debug!(
                event = events::PIPE_ACK_SEND_FAILED,
                component = COMPONENT,
                member = fields::format_address(&self.inner.address).as_str(),
                index = self.inner.index,
                seq,
                err = %err,
                "packet ack not sent"
            );
        }
    }

    fn message(&self, body: MessageBody) -> MemberMessage {
        MemberMessage {
            address: self.inner.address.clone(),
            peer: self.inner.peer,
            body,
        }
    }

    fn state(&self) -> MutexGuard<'_, EndpointState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn closed_error(&self) -> StreamError {
        StreamError::invalid_operation(format!(
            "pipe endpoint {}[{}] is closed",
            self.inner.address, self.inner.index
        ))
    }

    fn empty_error(&self) -> StreamError {
        StreamError::invalid_operation(format!(
            "pipe endpoint {}[{}] has no packets",
            self.inner.address, self.inner.index
        ))
    }
}

impl PartialEq for PipeEndpoint {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for PipeEndpoint {}

impl Debug for PipeEndpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeEndpoint")
            .field("member", &self.inner.address)
            .field("index", &self.inner.index)
            .field("peer", &self.inner.peer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{EndpointOwner, EndpointParams, PipeEndpoint, PipeEndpointEvent};
    use crate::error::StreamError;
    use crate::transport::{
        CallReply, MemberAddress, MemberCall, MemberMessage, MemberTransport, MessageBody,
    };
    use crate::types::{ConnectionId, MemberDirection, Role};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex, Weak};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<MessageBody>>,
    }

    #[async_trait]
    impl MemberTransport for RecordingTransport {
        async fn send(&self, message: MemberMessage) -> crate::error::Result<()> {
            self.sent.lock().unwrap().push(message.body);
            Ok(())
        }

        async fn call(&self, _call: MemberCall) -> crate::error::Result<CallReply> {
            Ok(CallReply::Ack)
        }

        async fn register_listener(
            &self,
            _address: &MemberAddress,
            _listener: Arc<dyn crate::transport::MemberListener>,
        ) -> crate::error::Result<()> {
            Ok(())
        }

        async fn unregister_listener(&self, _address: &MemberAddress) -> crate::error::Result<()> {
            Ok(())
        }
    }

    struct NoOwner;

    impl EndpointOwner for NoOwner {
        fn endpoint_closed(&self, _peer: ConnectionId, _index: i32) {}
    }

    fn endpoint(
        role: Role,
        direction: MemberDirection,
    ) -> (PipeEndpoint, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let owner: Weak<dyn EndpointOwner> = Weak::<NoOwner>::new();
        let endpoint = PipeEndpoint::new(EndpointParams {
            index: 1,
            peer: ConnectionId(3),
            address: MemberAddress::new("svc", "samples"),
            role,
            direction,
            unreliable: false,
            transport: transport.clone(),
            owner,
            event_capacity: 16,
        });
        (endpoint, transport)
    }

    #[tokio::test]
    async fn sequence_numbers_increase_from_one() {
        let (endpoint, transport) = endpoint(Role::Client, MemberDirection::Both);
        assert_eq!(endpoint.send_packet(json!("a")).await, Ok(1));
        assert_eq!(endpoint.send_packet(json!("b")).await, Ok(2));
        assert_eq!(transport.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_queue_fails_with_invalid_operation() {
        let (endpoint, _) = endpoint(Role::Client, MemberDirection::Both);
        assert!(matches!(
            endpoint.receive_packet(),
            Err(StreamError::InvalidOperation(_))
        ));
        assert!(matches!(
            endpoint.peek_next_packet(),
            Err(StreamError::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn received_packets_come_out_in_order() {
        let (endpoint, _) = endpoint(Role::Client, MemberDirection::Both);
        endpoint.handle_packet(2, false, json!("b")).await;
        endpoint.handle_packet(1, false, json!("a")).await;
        endpoint.handle_packet(3, false, json!("c")).await;

        assert_eq!(endpoint.available(), 3);
        assert_eq!(endpoint.peek_next_packet(), Ok(json!("a")));
        assert_eq!(endpoint.receive_packet(), Ok(json!("a")));
        assert_eq!(endpoint.receive_packet(), Ok(json!("b")));
        assert_eq!(endpoint.receive_packet(), Ok(json!("c")));
    }

    #[tokio::test]
    async fn wait_times_out_without_consuming() {
        let (endpoint, _) = endpoint(Role::Client, MemberDirection::Both);
        let res = endpoint
            .receive_packet_wait(Some(Duration::from_millis(20)))
            .await;
        assert!(res.unwrap_err().is_timeout());
        assert_eq!(
            endpoint
                .try_receive_packet_wait(Some(Duration::from_millis(5)), false)
                .await,
            None
        );
    }

    #[tokio::test]
    async fn wait_wakes_on_arrival() {
        let (endpoint, _) = endpoint(Role::Client, MemberDirection::Both);
        let waiter = endpoint.clone();
        let task =
            tokio::spawn(async move { waiter.receive_packet_wait(Some(Duration::from_secs(2))).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        endpoint.handle_packet(1, false, json!(42)).await;
        assert_eq!(task.await.unwrap(), Ok(json!(42)));
    }

    #[tokio::test]
    async fn dequeue_acks_packets_that_asked_for_it() {
        let (endpoint, transport) = endpoint(Role::Client, MemberDirection::Both);
        endpoint.handle_packet(1, true, json!("a")).await;
        assert!(transport.sent.lock().unwrap().is_empty());

        endpoint.receive_packet().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            *transport.sent.lock().unwrap(),
            vec![MessageBody::PipePacketAck { index: 1, seq: 1 }]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn receiving_on_a_plain_thread_still_acks() {
        let (endpoint, transport) = endpoint(Role::Client, MemberDirection::Both);
        endpoint.handle_packet(1, true, json!("a")).await;

        let receiver = endpoint.clone();
        let received = std::thread::spawn(move || receiver.receive_packet())
            .join()
            .expect("receive panicked off the runtime");
        assert_eq!(received, Ok(json!("a")));

        for _ in 0..200 {
            if !transport.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            *transport.sent.lock().unwrap(),
            vec![MessageBody::PipePacketAck { index: 1, seq: 1 }]
        );
    }

    #[tokio::test]
    async fn ignored_packets_are_acked_immediately() {
        let (endpoint, transport) = endpoint(Role::Client, MemberDirection::Both);
        endpoint.set_ignore_received(true);
        endpoint.handle_packet(1, true, json!("a")).await;
        assert_eq!(endpoint.available(), 0);
        assert_eq!(
            *transport.sent.lock().unwrap(),
            vec![MessageBody::PipePacketAck { index: 1, seq: 1 }]
        );
    }

    #[tokio::test]
    async fn packet_ignored_ahead_of_a_gap_does_not_stall_the_stream() {
        let (endpoint, _) = endpoint(Role::Client, MemberDirection::Both);
        endpoint.set_ignore_received(true);
        endpoint.handle_packet(2, false, json!("b")).await;
        endpoint.set_ignore_received(false);

        endpoint.handle_packet(1, false, json!("a")).await;
        endpoint.handle_packet(3, false, json!("c")).await;
        assert_eq!(endpoint.receive_packet(), Ok(json!("a")));
        assert_eq!(endpoint.receive_packet(), Ok(json!("c")));
        assert_eq!(endpoint.available(), 0);
    }

    #[tokio::test]
    async fn acks_clear_unacked_set_and_fire_event() {
        let (endpoint, _) = endpoint(Role::Service, MemberDirection::Readonly);
        endpoint.set_request_packet_ack(true);
        let mut events = endpoint.subscribe();
        endpoint.send_packet(json!(1)).await.unwrap();
        endpoint.send_packet(json!(2)).await.unwrap();
        assert_eq!(endpoint.unacked_packet_count(), 2);

        endpoint.handle_ack(1);
        assert_eq!(endpoint.unacked_packet_count(), 1);
        assert_eq!(
            events.recv().await.unwrap(),
            PipeEndpointEvent::PacketAckReceived(1)
        );
    }

    #[tokio::test]
    async fn direction_is_enforced_on_send() {
        let (endpoint, _) = endpoint(Role::Client, MemberDirection::Readonly);
        assert!(matches!(
            endpoint.send_packet(json!(1)).await,
            Err(StreamError::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn closed_endpoint_rejects_sends_and_wakes_waiters() {
        let (endpoint, transport) = endpoint(Role::Client, MemberDirection::Both);
        let waiter = endpoint.clone();
        let task = tokio::spawn(async move { waiter.receive_packet_wait(None).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        endpoint.close().await.unwrap();
        assert!(endpoint.is_closed());
        assert!(matches!(
            task.await.unwrap(),
            Err(StreamError::InvalidOperation(_))
        ));
        assert!(matches!(
            endpoint.send_packet(json!(1)).await,
            Err(StreamError::InvalidOperation(_))
        ));
        assert_eq!(
            *transport.sent.lock().unwrap(),
            vec![MessageBody::PipeClose { index: 1 }]
        );
        // Second close is a no-op.
        endpoint.close().await.unwrap();
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }
}
