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

//! One pipe member followed across every service of a subscription.
//!
//! Each endpoint's dispatch loop drains its queue into one merged queue,
//! so packets from one service keep their order and packets from
//! different services are interleaved by arrival.

use crate::client::ServiceClient;
use crate::error::{Result, StreamError};
use crate::event_hook::{EventHook, EventListenerHandle};
use crate::observability::events;
use crate::pipe::{PipeEndpoint, PipeEndpointEvent};
use crate::runtime::wait_with_timeout;
use crate::service_path::ServicePath;
use crate::subscription::client_id::SubscriptionClientId;
use crate::subscription::member_tracker::{MemberAttach, MemberLink, MemberTracker};
use crate::subscription::service_subscription::{ChildSubscription, ServiceSubscription};
use crate::types::{Payload, ANY_INDEX};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

const COMPONENT: &str = "pipe_subscription";

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PipeSubscriptionEvent {
    /// The merged queue grew; drain it in a loop.
    PacketReceived,
}

struct LinkedEndpoint {
    generation: u64,
    endpoint: PipeEndpoint,
    listener: EventListenerHandle,
}

struct MergedPacket {
    payload: Payload,
    client_id: SubscriptionClientId,
    endpoint: PipeEndpoint,
}

struct MergedQueue {
    packets: VecDeque<MergedPacket>,
    max_recv_packets: Option<usize>,
}

struct PipeSubscriptionInner {
    member: String,
    tracker: Arc<MemberTracker>,
    endpoints: Mutex<BTreeMap<SubscriptionClientId, LinkedEndpoint>>,
    queue: Mutex<MergedQueue>,
    arrivals: watch::Sender<u64>,
    ignore_received: AtomicBool,
    closed: AtomicBool,
    events: EventHook<PipeSubscriptionEvent>,
    self_weak: Weak<PipeSubscriptionInner>,
}

/// Subscription to one pipe member on every connected service.
#[derive(Clone)]
pub struct PipeSubscription {
    inner: Arc<PipeSubscriptionInner>,
}

impl PipeSubscription {
    pub(crate) fn start(
        parent: ServiceSubscription,
        member: &str,
        service_path: Option<&str>,
        max_recv_packets: Option<usize>,
    ) -> Result<PipeSubscription> {
        let service_path = service_path.map(str::parse::<ServicePath>).transpose()?;
        let event_capacity = parent.config().event_capacity;
        let (arrivals, _) = watch::channel(0);
        let inner = Arc::new_cyclic(|self_weak: &Weak<PipeSubscriptionInner>| {
            let target: Weak<dyn MemberAttach> = self_weak.clone();
            PipeSubscriptionInner {
                member: member.to_string(),
                tracker: MemberTracker::new(
                    parent.clone(),
                    service_path,
                    member,
                    COMPONENT,
                    target,
                ),
                endpoints: Mutex::new(BTreeMap::new()),
                queue: Mutex::new(MergedQueue {
                    packets: VecDeque::new(),
                    max_recv_packets,
                }),
                arrivals,
                ignore_received: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                events: EventHook::new(COMPONENT, event_capacity),
                self_weak: self_weak.clone(),
            }
        });
        let child: Weak<dyn ChildSubscription> = Arc::downgrade(&inner) as Weak<dyn ChildSubscription>;
        parent.register_child(child);
        inner.tracker.start();
        Ok(PipeSubscription { inner })
    }

    pub fn member_name(&self) -> &str {
        &self.inner.member
    }

    /// Packets waiting in the merged queue.
    pub fn available(&self) -> usize {
        self.inner.lock_queue().packets.len()
    }

    /// Pops the oldest merged packet. Fails with `InvalidOperation` when
    /// the queue is empty.
    pub fn receive_packet(&self) -> Result<Payload> {
        self.try_receive_packet()
            .map(|(payload, _, _)| payload)
            .ok_or_else(|| StreamError::invalid_operation("no packet available"))
    }

    /// Pops the oldest merged packet with the client and endpoint it came
    /// from.
    pub fn try_receive_packet(&self) -> Option<(Payload, SubscriptionClientId, PipeEndpoint)> {
        let packet = self.inner.lock_queue().packets.pop_front()?;
        Some((packet.payload, packet.client_id, packet.endpoint))
    }

    /// Waits for a packet. Fails with `Timeout` when the limit elapses and
    /// with `InvalidOperation` once the subscription is closed.
    pub async fn receive_packet_wait(&self, timeout: Option<Duration>) -> Result<Payload> {
        wait_with_timeout(timeout, "pipe subscription receive", async {
            let mut arrivals = self.inner.arrivals.subscribe();
            loop {
                if let Some((payload, _, _)) = self.try_receive_packet() {
                    return Ok(payload);
                }
                if self.is_closed() || arrivals.changed().await.is_err() {
                    return Err(closed_error());
                }
            }
        })
        .await
    }

    pub async fn try_receive_packet_wait(
        &self,
        timeout: Option<Duration>,
    ) -> Option<(Payload, SubscriptionClientId, PipeEndpoint)> {
        wait_with_timeout(timeout, "pipe subscription receive", async {
            let mut arrivals = self.inner.arrivals.subscribe();
            loop {
                if let Some(packet) = self.try_receive_packet() {
                    return Ok(packet);
                }
                if self.is_closed() || arrivals.changed().await.is_err() {
                    return Err(closed_error());
                }
            }
        })
        .await
        .ok()
    }

    pub fn max_recv_packets(&self) -> Option<usize> {
        self.inner.lock_queue().max_recv_packets
    }

    /// Limits the merged queue; the oldest packets are dropped first.
    pub fn set_max_recv_packets(&self, max_recv_packets: Option<usize>) {
        let dropped = {
            let mut queue = self.inner.lock_queue();
            queue.max_recv_packets = max_recv_packets;
            queue.trim()
        };
        self.inner.log_dropped(dropped);
    }

    pub fn ignore_received(&self) -> bool {
        self.inner.ignore_received.load(Ordering::Acquire)
    }

    /// Drops incoming packets on every endpoint. Packets already merged
    /// stay readable.
    pub fn set_ignore_received(&self, ignore: bool) {
        self.inner.ignore_received.store(ignore, Ordering::Release);
        for endpoint in self.inner.endpoints_snapshot() {
            endpoint.set_ignore_received(ignore);
        }
    }

    pub fn active_pipe_endpoint_count(&self) -> usize {
        self.inner.lock_endpoints().len()
    }

    /// Sends `payload` on every connected endpoint and returns how many
    /// accepted it.
    pub async fn async_send_packet_all(&self, payload: Payload) -> Result<usize> {
        if self.is_closed() {
            return Err(closed_error());
        }
        let endpoints = self.inner.endpoints_snapshot();
        let results = join_all(
            endpoints
                .iter()
                .map(|endpoint| endpoint.send_packet(payload.clone())),
        )
        .await;
        let mut sent = 0;
        for (endpoint, res) in endpoints.iter().zip(results) {
            match res {
                Ok(_) => sent += 1,
                Err(err) => warn!(
                    event = events::MEMBER_SUBSCRIPTION_SEND_FAILED,
                    component = COMPONENT,
                    member = self.inner.member.as_str(),
                    peer = %endpoint.peer(),
                    index = endpoint.index(),
                    err = %err,
                    "send failed on one endpoint"
                ),
            }
        }
        Ok(sent)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipeSubscriptionEvent> {
        self.inner.events.subscribe()
    }

    pub fn add_listener<F>(&self, listener: F) -> EventListenerHandle
    where
        F: FnMut(PipeSubscriptionEvent) + Send + 'static,
    {
        self.inner.events.add_listener(listener)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Closes every endpoint. The parent subscription stays open.
    pub async fn close(&self) {
        self.inner.shutdown().await
    }
}

impl std::fmt::Debug for PipeSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeSubscription")
            .field("member", &self.inner.member)
            .field("endpoints", &self.active_pipe_endpoint_count())
            .field("available", &self.available())
            .finish()
    }
}

fn closed_error() -> StreamError {
    StreamError::invalid_operation("pipe subscription is closed")
}

impl MergedQueue {
    /// Drops the oldest packets beyond the limit and returns how many.
    fn trim(&mut self) -> usize {
        let Some(max) = self.max_recv_packets else {
            return 0;
        };
        let excess = self.packets.len().saturating_sub(max);
        self.packets.drain(..excess);
        excess
    }
}

impl PipeSubscriptionInner {
    fn lock_endpoints(&self) -> MutexGuard<'_, BTreeMap<SubscriptionClientId, LinkedEndpoint>> {
        self.endpoints.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_queue(&self) -> MutexGuard<'_, MergedQueue> {
        self.queue.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn endpoints_snapshot(&self) -> Vec<PipeEndpoint> {
        self.lock_endpoints()
            .values()
            .map(|linked| linked.endpoint.clone())
            .collect()
    }

    /// Moves everything queued on `endpoint` into the merged queue.
    fn drain(&self, id: &SubscriptionClientId, generation: u64, endpoint: &PipeEndpoint) {
        if self
            .lock_endpoints()
            .get(id)
            .map(|linked| linked.generation)
            != Some(generation)
        {
            return;
        }
        let (received, dropped) = {
            let mut queue = self.lock_queue();
            let mut received = 0;
            while let Some(payload) = endpoint.try_receive_packet() {
                queue.packets.push_back(MergedPacket {
                    payload,
                    client_id: id.clone(),
                    endpoint: endpoint.clone(),
                });
                received += 1;
            }
            (received, queue.trim())
        };
        self.log_dropped(dropped);
        if received > 0 {
            self.arrivals.send_modify(|v| *v = v.wrapping_add(1));
            self.events.fire(PipeSubscriptionEvent::PacketReceived);
        }
    }

    fn log_dropped(&self, dropped: usize) {
        if dropped > 0 {
            debug!(
                event = events::MEMBER_SUBSCRIPTION_PACKET_DROPPED,
                component = COMPONENT,
                member = self.member.as_str(),
                dropped,
                "receive limit reached; oldest packets dropped"
            );
        }
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.tracker.stop();
        let linked: Vec<_> = std::mem::take(&mut *self.lock_endpoints())
            .into_values()
            .collect();
        for entry in linked {
            entry.listener.remove();
            if let Err(err) = entry.endpoint.close().await {
                debug!(
                    event = events::MEMBER_SUBSCRIPTION_CLIENT_DROPPED,
                    component = COMPONENT,
                    member = self.member.as_str(),
                    err = %err,
                    "closing pipe endpoint failed"
                );
            }
        }
        // Wake receivers so they observe the close.
        self.arrivals.send_modify(|v| *v = v.wrapping_add(1));
    }
}

#[async_trait]
impl MemberAttach for PipeSubscriptionInner {
    async fn attach(
        &self,
        id: &SubscriptionClientId,
        client: &ServiceClient,
        generation: u64,
    ) -> Result<Box<dyn MemberLink>> {
        let pipe = client.pipe(&self.member).await?;
        let endpoint = pipe.connect(ANY_INDEX).await?;
        if self.ignore_received.load(Ordering::Acquire) {
            endpoint.set_ignore_received(true);
        }

        let weak = self.self_weak.clone();
        let source = id.clone();
        let drained = endpoint.clone();
        let listener = endpoint.add_listener(move |event| {
            if event == PipeEndpointEvent::PacketReceived {
                if let Some(inner) = weak.upgrade() {
                    inner.drain(&source, generation, &drained);
                }
            }
        });

        let rejected = {
            let mut endpoints = self.lock_endpoints();
            if self.closed.load(Ordering::Acquire) {
                Some(listener)
            } else {
                let linked = LinkedEndpoint {
                    generation,
                    endpoint: endpoint.clone(),
                    listener,
                };
                if let Some(previous) = endpoints.insert(id.clone(), linked) {
                    previous.listener.remove();
                }
                None
            }
        };
        if let Some(listener) = rejected {
            listener.remove();
            let _ = endpoint.close().await;
            return Err(closed_error());
        }
        // Packets that beat the listener registration.
        self.drain(id, generation, &endpoint);

        info!(
            event = events::MEMBER_SUBSCRIPTION_CONNECT_OK,
            component = COMPONENT,
            client_id = %id,
            member = self.member.as_str(),
            index = endpoint.index(),
            "pipe subscription connected"
        );
        Ok(Box::new(endpoint))
    }

    fn detach(&self, id: &SubscriptionClientId, generation: u64) {
        let mut endpoints = self.lock_endpoints();
        if endpoints
            .get(id)
            .is_some_and(|linked| linked.generation == generation)
        {
            if let Some(linked) = endpoints.remove(id) {
                linked.listener.remove();
            }
        }
    }
}

#[async_trait]
impl ChildSubscription for PipeSubscriptionInner {
    async fn parent_closed(&self) {
        self.shutdown().await
    }
}

