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

//! One wire member followed across every service of a subscription.
//!
//! The aggregate in value is whichever update arrived last, from any
//! service. Arrival order is fixed while holding the aggregate lock.

use crate::client::ServiceClient;
use crate::error::{Result, StreamError};
use crate::event_hook::{EventHook, EventListenerHandle};
use crate::observability::events;
use crate::service_path::ServicePath;
use crate::subscription::client_id::SubscriptionClientId;
use crate::subscription::member_tracker::{MemberAttach, MemberLink, MemberTracker};
use crate::subscription::service_subscription::{ChildSubscription, ServiceSubscription};
use crate::types::Payload;
use crate::wire::value_slot::ValueSlot;
use crate::wire::{WireConnection, WireConnectionEvent};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const COMPONENT: &str = "wire_subscription";

#[derive(Clone, Debug, PartialEq)]
pub enum WireSubscriptionEvent {
    ValueChanged {
        value: Payload,
        timestamp: SystemTime,
        client_id: SubscriptionClientId,
    },
}

struct LinkedWire {
    generation: u64,
    connection: WireConnection,
    listener: EventListenerHandle,
}

struct WireSubscriptionInner {
    member: String,
    tracker: Arc<MemberTracker>,
    connections: Mutex<BTreeMap<SubscriptionClientId, LinkedWire>>,
    in_value: ValueSlot,
    // Source of the value in `in_value`; also serializes aggregate updates.
    in_source: Mutex<Option<SubscriptionClientId>>,
    ignore_in_value: AtomicBool,
    closed: AtomicBool,
    events: EventHook<WireSubscriptionEvent>,
    self_weak: Weak<WireSubscriptionInner>,
}

/// Subscription to one wire member on every connected service.
#[derive(Clone)]
pub struct WireSubscription {
    inner: Arc<WireSubscriptionInner>,
}

impl WireSubscription {
    pub(crate) fn start(
        parent: ServiceSubscription,
        member: &str,
        service_path: Option<&str>,
    ) -> Result<WireSubscription> {
        let service_path = service_path.map(str::parse::<ServicePath>).transpose()?;
        let event_capacity = parent.config().event_capacity;
        let inner = Arc::new_cyclic(|self_weak: &Weak<WireSubscriptionInner>| {
            let target: Weak<dyn MemberAttach> = self_weak.clone();
            WireSubscriptionInner {
                member: member.to_string(),
                tracker: MemberTracker::new(
                    parent.clone(),
                    service_path,
                    member,
                    COMPONENT,
                    target,
                ),
                connections: Mutex::new(BTreeMap::new()),
                in_value: ValueSlot::new("subscription in"),
                in_source: Mutex::new(None),
                ignore_in_value: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                events: EventHook::new(COMPONENT, event_capacity),
                self_weak: self_weak.clone(),
            }
        });
        let child: Weak<dyn ChildSubscription> = Arc::downgrade(&inner) as Weak<dyn ChildSubscription>;
        parent.register_child(child);
        inner.tracker.start();
        Ok(WireSubscription { inner })
    }

    pub fn member_name(&self) -> &str {
        &self.inner.member
    }

    /// Most recent in value from any service.
    pub fn in_value(&self) -> Result<Payload> {
        self.in_value_with_timestamp().map(|(value, _)| value)
    }

    pub fn in_value_with_timestamp(&self) -> Result<(Payload, SystemTime)> {
        self.inner.in_value.get()
    }

    /// Most recent in value with the client it came from.
    pub fn try_get_in_value(&self) -> Option<(Payload, SystemTime, SubscriptionClientId)> {
        let source = self.inner.lock_source();
        let (value, timestamp) = self.inner.in_value.try_get()?;
        Some((value, timestamp, source.clone()?))
    }

    pub fn in_value_lifespan(&self) -> Option<Duration> {
        self.inner.in_value.lifespan()
    }

    pub fn set_in_value_lifespan(&self, lifespan: Option<Duration>) {
        self.inner.in_value.set_lifespan(lifespan)
    }

    pub async fn wait_in_value_valid(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.in_value.wait_valid(timeout).await
    }

    pub fn ignore_in_value(&self) -> bool {
        self.inner.ignore_in_value.load(Ordering::Acquire)
    }

    /// Stops receiving in values on every connection. Useful when the
    /// subscription only writes.
    pub fn set_ignore_in_value(&self, ignore: bool) {
        self.inner.ignore_in_value.store(ignore, Ordering::Release);
        for connection in self.inner.connections_snapshot() {
            connection.set_ignore_in_value(ignore);
        }
    }

    pub fn active_wire_connection_count(&self) -> usize {
        self.inner.lock_connections().len()
    }

    /// Sets the out value on every connected wire and returns how many
    /// accepted it.
    pub async fn set_out_value_all(&self, value: Payload) -> Result<usize> {
        if self.is_closed() {
            return Err(closed_error());
        }
        let connections = self.inner.connections_snapshot();
        let results = join_all(
            connections
                .iter()
                .map(|connection| connection.set_out_value(value.clone())),
        )
        .await;
        let mut sent = 0;
        for (connection, res) in connections.iter().zip(results) {
            match res {
                Ok(()) => sent += 1,
                Err(err) => warn!(
                    event = events::MEMBER_SUBSCRIPTION_SEND_FAILED,
                    component = COMPONENT,
                    member = self.inner.member.as_str(),
                    peer = %connection.peer(),
                    err = %err,
                    "set out value failed on one connection"
                ),
            }
        }
        Ok(sent)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WireSubscriptionEvent> {
        self.inner.events.subscribe()
    }

    pub fn add_listener<F>(&self, listener: F) -> EventListenerHandle
    where
        F: FnMut(WireSubscriptionEvent) + Send + 'static,
    {
        self.inner.events.add_listener(listener)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Closes every wire connection. The parent subscription stays open.
    pub async fn close(&self) {
        self.inner.shutdown().await
    }
}

impl std::fmt::Debug for WireSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireSubscription")
            .field("member", &self.inner.member)
            .field("connections", &self.active_wire_connection_count())
            .finish()
    }
}

fn closed_error() -> StreamError {
    StreamError::invalid_operation("wire subscription is closed")
}

impl WireSubscriptionInner {
    fn lock_connections(&self) -> MutexGuard<'_, BTreeMap<SubscriptionClientId, LinkedWire>> {
        self.connections.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_source(&self) -> MutexGuard<'_, Option<SubscriptionClientId>> {
        self.in_source.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn connections_snapshot(&self) -> Vec<WireConnection> {
        self.lock_connections()
            .values()
            .map(|linked| linked.connection.clone())
            .collect()
    }

    fn accept(
        &self,
        id: &SubscriptionClientId,
        generation: u64,
        value: Payload,
        timestamp: SystemTime,
        seed: bool,
    ) {
        if self.ignore_in_value.load(Ordering::Acquire) {
            return;
        }
        if self
            .lock_connections()
            .get(id)
            .map(|linked| linked.generation)
            != Some(generation)
        {
            return;
        }
        if !self.store(id, &value, timestamp, seed) {
            return;
        }
        self.events.fire(WireSubscriptionEvent::ValueChanged {
            value,
            timestamp,
            client_id: id.clone(),
        });
    }

    /// Updates the aggregate value. Delivered values always win; a seed
    /// read at attach time never replaces a newer value. Returns whether
    /// the value changed.
    fn store(
        &self,
        id: &SubscriptionClientId,
        value: &Payload,
        timestamp: SystemTime,
        seed: bool,
    ) -> bool {
        let mut source = self.lock_source();
        // The seed read in `attach` may repeat the first listener event.
        let repeat = source.as_ref() == Some(id)
            && self
                .in_value
                .try_get()
                .is_some_and(|(current, ts)| ts == timestamp && current == *value);
        if repeat {
            return false;
        }
        if seed {
            if !self.in_value.set(value.clone(), timestamp) {
                return false;
            }
        } else {
            self.in_value.replace(value.clone(), timestamp);
        }
        *source = Some(id.clone());
        true
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.tracker.stop();
        let linked: Vec<_> = std::mem::take(&mut *self.lock_connections())
            .into_values()
            .collect();
        for entry in linked {
            entry.listener.remove();
            if let Err(err) = entry.connection.close().await {
                debug!(
                    event = events::MEMBER_SUBSCRIPTION_CLIENT_DROPPED,
                    component = COMPONENT,
                    member = self.member.as_str(),
                    err = %err,
                    "closing wire connection failed"
                );
            }
        }
    }
}

#[async_trait]
impl MemberAttach for WireSubscriptionInner {
    async fn attach(
        &self,
        id: &SubscriptionClientId,
        client: &ServiceClient,
        generation: u64,
    ) -> Result<Box<dyn MemberLink>> {
        let wire = client.wire(&self.member).await?;
        let connection = wire.connect().await?;
        if self.ignore_in_value.load(Ordering::Acquire) {
            connection.set_ignore_in_value(true);
        }

        let weak = self.self_weak.clone();
        let source = id.clone();
        let listener = connection.add_listener(move |event| {
            if let WireConnectionEvent::ValueChanged { value, timestamp } = event {
                if let Some(inner) = weak.upgrade() {
                    inner.accept(&source, generation, value, timestamp, false);
                }
            }
        });

        let rejected = {
            let mut connections = self.lock_connections();
            if self.closed.load(Ordering::Acquire) {
                Some(listener)
            } else {
                let linked = LinkedWire {
                    generation,
                    connection: connection.clone(),
                    listener,
                };
                if let Some(previous) = connections.insert(id.clone(), linked) {
                    previous.listener.remove();
                }
                None
            }
        };
        if let Some(listener) = rejected {
            listener.remove();
            let _ = connection.close().await;
            return Err(closed_error());
        }
        if let Some((value, timestamp)) = connection.try_get_in_value() {
            self.accept(id, generation, value, timestamp, true);
        }

        info!(
            event = events::MEMBER_SUBSCRIPTION_CONNECT_OK,
            component = COMPONENT,
            client_id = %id,
            member = self.member.as_str(),
            "wire subscription connected"
        );
        Ok(Box::new(connection))
    }

    fn detach(&self, id: &SubscriptionClientId, generation: u64) {
        let mut connections = self.lock_connections();
        if connections
            .get(id)
            .is_some_and(|linked| linked.generation == generation)
        {
            if let Some(linked) = connections.remove(id) {
                linked.listener.remove();
            }
        }
    }
}

#[async_trait]
impl ChildSubscription for WireSubscriptionInner {
    async fn parent_closed(&self) {
        self.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::WireSubscription;
    use crate::config::StreamlinkConfig;
    use crate::error::{Result, StreamError};
    use crate::subscription::{ServiceSubscription, SubscriptionClientId};
    use crate::transport::{NodeCredentials, ObjectConnection, ServiceConnector};
    use crate::types::NodeId;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    struct RefusingConnector;

    #[async_trait]
    impl ServiceConnector for RefusingConnector {
        async fn connect(
            &self,
            _urls: &[String],
            _credentials: Option<&NodeCredentials>,
        ) -> Result<Arc<dyn ObjectConnection>> {
            Err(StreamError::connection_failed("refused"))
        }
    }

    async fn subscription() -> (ServiceSubscription, WireSubscription) {
        let parent = ServiceSubscription::for_urls(
            Arc::new(RefusingConnector),
            vec!["loopback://node-a/?service=reporter".to_string()],
            StreamlinkConfig::default(),
        )
        .unwrap();
        let wire = parent.subscribe_wire("status", None).unwrap();
        (parent, wire)
    }

    #[tokio::test]
    async fn attach_seed_does_not_replace_a_newer_delivered_value() {
        let (parent, wire) = subscription().await;
        let left = SubscriptionClientId::new(NodeId::new_random(), "left");
        let now = SystemTime::now();

        assert!(wire.inner.store(&left, &json!("fresh"), now, false));
        assert!(!wire.inner.store(&left, &json!("stale"), now - Duration::from_secs(1), true));
        let (value, timestamp, source) = wire.try_get_in_value().unwrap();
        assert_eq!(value, json!("fresh"));
        assert_eq!(timestamp, now);
        assert_eq!(source, left);

        // A newer seed is still taken.
        let later = now + Duration::from_millis(5);
        assert!(wire.inner.store(&left, &json!("newer"), later, true));
        assert_eq!(wire.in_value().unwrap(), json!("newer"));
        parent.close().await.unwrap();
    }

    #[tokio::test]
    async fn delivered_values_win_across_services_regardless_of_timestamp() {
        let (parent, wire) = subscription().await;
        let left = SubscriptionClientId::new(NodeId::new_random(), "left");
        let right = SubscriptionClientId::new(NodeId::new_random(), "right");
        let now = SystemTime::now();

        assert!(wire.inner.store(&left, &json!(1), now, false));
        assert!(wire.inner.store(&right, &json!(2), now - Duration::from_secs(1), false));
        let (value, _, source) = wire.try_get_in_value().unwrap();
        assert_eq!(value, json!(2));
        assert_eq!(source, right);
        parent.close().await.unwrap();
    }
}
