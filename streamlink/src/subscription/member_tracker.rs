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

//! Keeps one member connection per connected service of a subscription.

use crate::client::ServiceClient;
use crate::error::Result;
use crate::event_hook::EventListenerHandle;
use crate::observability::events;
use crate::pipe::PipeEndpoint;
use crate::service_path::ServicePath;
use crate::subscription::client_id::SubscriptionClientId;
use crate::subscription::service_subscription::{ServiceSubscription, SubscriptionEvent};
use crate::wire::WireConnection;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;
use tracing::{debug, warn};

/// A live member connection the tracker can watch and tear down.
#[async_trait]
pub(crate) trait MemberLink: Send + Sync {
    async fn wait_closed(&self);
    async fn close(&self) -> Result<()>;
}

#[async_trait]
impl MemberLink for WireConnection {
    async fn wait_closed(&self) {
        WireConnection::wait_closed(self).await
    }

    async fn close(&self) -> Result<()> {
        WireConnection::close(self).await
    }
}

#[async_trait]
impl MemberLink for PipeEndpoint {
    async fn wait_closed(&self) {
        PipeEndpoint::wait_closed(self).await
    }

    async fn close(&self) -> Result<()> {
        PipeEndpoint::close(self).await
    }
}

/// Implemented by member subscriptions. `generation` tells a stale
/// detach apart from the current attachment of the same client id.
#[async_trait]
pub(crate) trait MemberAttach: Send + Sync {
    async fn attach(
        &self,
        id: &SubscriptionClientId,
        client: &ServiceClient,
        generation: u64,
    ) -> Result<Box<dyn MemberLink>>;

    fn detach(&self, id: &SubscriptionClientId, generation: u64);
}

struct Tracked {
    client: ServiceClient,
    cancel: watch::Sender<bool>,
}

#[derive(Default)]
struct TrackerState {
    tracked: BTreeMap<SubscriptionClientId, Tracked>,
    listener: Option<EventListenerHandle>,
    next_generation: u64,
    stopped: bool,
}

pub(crate) struct MemberTracker {
    parent: ServiceSubscription,
    service_path: Option<ServicePath>,
    member: String,
    component: &'static str,
    target: Weak<dyn MemberAttach>,
    state: Mutex<TrackerState>,
    self_weak: Weak<MemberTracker>,
}

impl MemberTracker {
    pub(crate) fn new(
        parent: ServiceSubscription,
        service_path: Option<ServicePath>,
        member: &str,
        component: &'static str,
        target: Weak<dyn MemberAttach>,
    ) -> Arc<MemberTracker> {
        Arc::new_cyclic(|self_weak| MemberTracker {
            parent,
            service_path,
            member: member.to_string(),
            component,
            target,
            state: Mutex::new(TrackerState::default()),
            self_weak: self_weak.clone(),
        })
    }

    /// Follows the parent's client events, then picks up the clients that
    /// are already connected.
    pub(crate) fn start(&self) {
        let weak = self.self_weak.clone();
        let listener = self.parent.add_listener(move |event| {
            let Some(tracker) = weak.upgrade() else {
                return;
            };
            match event {
                SubscriptionEvent::ClientConnected { id, client } => tracker.track(id, client),
                SubscriptionEvent::ClientDisconnected { id, client } => {
                    tracker.untrack(&id, &client)
                }
                SubscriptionEvent::ClientConnectFailed { .. } => {}
            }
        });
        self.lock_state().listener = Some(listener);
        for (id, client) in self.parent.connected_clients() {
            self.track(id, client);
        }
    }

    /// Stops following the parent and cancels every member task.
    pub(crate) fn stop(&self) {
        let (listener, tracked) = {
            let mut state = self.lock_state();
            state.stopped = true;
            (state.listener.take(), std::mem::take(&mut state.tracked))
        };
        if let Some(listener) = listener {
            listener.remove();
        }
        for tracked in tracked.into_values() {
            tracked.cancel.send_replace(true);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn track(&self, id: SubscriptionClientId, client: ServiceClient) {
        if let Some(path) = &self.service_path {
            if !path.matches_service(client.service_name()) {
                return;
            }
        }
        let mut state = self.lock_state();
        if state.stopped {
            return;
        }
        if let Some(existing) = state.tracked.get(&id) {
            if existing.client.ptr_eq(&client) {
                return;
            }
            existing.cancel.send_replace(true);
        }
        state.next_generation += 1;
        let generation = state.next_generation;
        let (cancel, cancel_rx) = watch::channel(false);
        state.tracked.insert(
            id.clone(),
            Tracked {
                client: client.clone(),
                cancel,
            },
        );
        tokio::spawn(run_member(
            self.self_weak.clone(),
            id,
            client,
            generation,
            cancel_rx,
        ));
    }

    fn untrack(&self, id: &SubscriptionClientId, client: &ServiceClient) {
        let mut state = self.lock_state();
        if state
            .tracked
            .get(id)
            .is_some_and(|tracked| tracked.client.ptr_eq(client))
        {
            if let Some(tracked) = state.tracked.remove(id) {
                tracked.cancel.send_replace(true);
            }
        }
    }

    async fn attach(
        &self,
        id: &SubscriptionClientId,
        client: &ServiceClient,
        generation: u64,
    ) -> Result<Option<Box<dyn MemberLink>>> {
        let member_client = resolve_service_path(client, self.service_path.as_ref()).await?;
        let Some(target) = self.target.upgrade() else {
            return Ok(None);
        };
        target.attach(id, &member_client, generation).await.map(Some)
    }

    fn detach(&self, id: &SubscriptionClientId, generation: u64) {
        if let Some(target) = self.target.upgrade() {
            target.detach(id, generation);
        }
    }
}

/// Walks the object-reference hops of `service_path` starting at `client`.
pub(crate) async fn resolve_service_path(
    client: &ServiceClient,
    service_path: Option<&ServicePath>,
) -> Result<ServiceClient> {
    let mut current = client.clone();
    if let Some(path) = service_path {
        for segment in path.object_refs() {
            current = current
                .sub_object(&segment.name, segment.index.as_deref())
                .await?;
        }
    }
    Ok(current)
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|cancelled| *cancelled).await;
}

async fn run_member(
    weak: Weak<MemberTracker>,
    id: SubscriptionClientId,
    client: ServiceClient,
    generation: u64,
    mut cancel: watch::Receiver<bool>,
) {
    while !client.is_closed() {
        let Some(tracker) = weak.upgrade() else {
            return;
        };
        let retry_delay = tracker.parent.connect_retry_delay();
        let component = tracker.component;
        let res = tokio::select! {
            res = tracker.attach(&id, &client, generation) => res,
            _ = cancelled(&mut cancel) => return,
        };
        match res {
            Ok(Some(link)) => {
                drop(tracker);
                let cancelled_while_linked = tokio::select! {
                    _ = link.wait_closed() => false,
                    _ = cancelled(&mut cancel) => true,
                };
                if cancelled_while_linked {
                    let _ = link.close().await;
                }
                let Some(tracker) = weak.upgrade() else {
                    return;
                };
                tracker.detach(&id, generation);
                if cancelled_while_linked {
                    return;
                }
                debug!(
                    event = events::MEMBER_SUBSCRIPTION_CLIENT_DROPPED,
                    component,
                    client_id = %id,
                    member = tracker.member.as_str(),
                    "member connection closed"
                );
            }
            Ok(None) => return,
            Err(err) => {
                if client.is_closed() {
                    return;
                }
                warn!(
                    event = events::MEMBER_SUBSCRIPTION_CONNECT_FAILED,
                    component,
                    client_id = %id,
                    member = tracker.member.as_str(),
                    err = %err,
                    "member connect failed; retrying"
                );
                drop(tracker);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(retry_delay) => {}
            _ = cancelled(&mut cancel) => return,
        }
    }
}
