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

//! Auto-reconnecting set of service connections.
//!
//! Every target service gets a slot. A slot owns one task that connects,
//! watches the connection and retries after the configured delay until the
//! slot is retired. Slot tasks only hold a weak reference to the
//! subscription between steps, so dropping every handle stops them.

use crate::client::ServiceClient;
use crate::config::StreamlinkConfig;
use crate::error::{Result, StreamError};
use crate::event_hook::{EventHook, EventListenerHandle};
use crate::observability::{events, fields};
use crate::runtime::wait_with_timeout;
use crate::subscription::client_id::SubscriptionClientId;
use crate::subscription::filter::ServiceSubscriptionFilter;
use crate::subscription::pipe_subscription::PipeSubscription;
use crate::subscription::sub_object_subscription::SubObjectSubscription;
use crate::subscription::wire_subscription::WireSubscription;
use crate::transport::{
    DiscoveryEvent, NodeCredentials, ServiceConnector, ServiceDiscovery, ServiceInfo,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const COMPONENT: &str = "service_subscription";

#[derive(Clone, Debug)]
pub enum SubscriptionEvent {
    ClientConnected {
        id: SubscriptionClientId,
        client: ServiceClient,
    },
    ClientDisconnected {
        id: SubscriptionClientId,
        client: ServiceClient,
    },
    ClientConnectFailed {
        id: SubscriptionClientId,
        urls: Vec<String>,
        error: StreamError,
    },
}

#[derive(Clone, Debug)]
enum Target {
    Urls(Vec<String>),
    ByType {
        service_types: Vec<String>,
        filter: ServiceSubscriptionFilter,
    },
}

impl Target {
    fn label(&self) -> String {
        match self {
            Target::Urls(urls) => format!("urls:{}", fields::format_urls(urls)),
            Target::ByType { service_types, .. } => format!("types:{}", service_types.join(",")),
        }
    }
}

struct Slot {
    slot_id: u64,
    urls: Vec<String>,
    credentials: Option<NodeCredentials>,
    client: Option<ServiceClient>,
    claimed: bool,
    cancel: watch::Sender<bool>,
}

struct SubscriptionState {
    target: Target,
    slots: BTreeMap<SubscriptionClientId, Slot>,
    detected: BTreeMap<SubscriptionClientId, ServiceInfo>,
    next_slot_id: u64,
    closed: bool,
}

/// Member subscriptions closed together with their parent.
#[async_trait]
pub(crate) trait ChildSubscription: Send + Sync {
    async fn parent_closed(&self);
}

struct SubscriptionInner {
    connector: Arc<dyn ServiceConnector>,
    discovery: Option<Arc<dyn ServiceDiscovery>>,
    config: StreamlinkConfig,
    state: Mutex<SubscriptionState>,
    events: EventHook<SubscriptionEvent>,
    clients_changed: watch::Sender<u64>,
    discovery_task: Mutex<Option<JoinHandle<()>>>,
    children: Mutex<Vec<Weak<dyn ChildSubscription>>>,
    self_weak: Weak<SubscriptionInner>,
}

/// Managed connections to one service (by URL) or to every discovered
/// service of some types (by type and filter).
///
/// Connection loss never surfaces as an error here: it shows up as a
/// `ClientDisconnected` event and the client leaving
/// [`ServiceSubscription::connected_clients`] until the retry succeeds.
#[derive(Clone)]
pub struct ServiceSubscription {
    inner: Arc<SubscriptionInner>,
}

impl ServiceSubscription {
    /// Connects to one service through a list of equivalent URLs.
    pub fn for_urls(
        connector: Arc<dyn ServiceConnector>,
        urls: Vec<String>,
        config: StreamlinkConfig,
    ) -> Result<ServiceSubscription> {
        let id = SubscriptionClientId::from_urls(&urls)?;
        let subscription = Self::create(connector, None, Target::Urls(urls.clone()), config);
        {
            let inner = &subscription.inner;
            let mut state = inner.lock_state();
            inner.add_slot(&mut state, id, urls, None);
        }
        Ok(subscription)
    }

    /// Connects to every discovered service providing one of
    /// `service_types` and accepted by `filter`.
    pub fn for_type(
        connector: Arc<dyn ServiceConnector>,
        discovery: Arc<dyn ServiceDiscovery>,
        service_types: Vec<String>,
        filter: Option<ServiceSubscriptionFilter>,
        config: StreamlinkConfig,
    ) -> Result<ServiceSubscription> {
        if service_types.is_empty() {
            return Err(StreamError::invalid_argument(
                "a type subscription needs at least one service type",
            ));
        }
        let target = Target::ByType {
            service_types,
            filter: filter.unwrap_or_default(),
        };
        let subscription = Self::create(connector, Some(discovery), target, config);
        subscription.inner.start_discovery();
        Ok(subscription)
    }

    fn create(
        connector: Arc<dyn ServiceConnector>,
        discovery: Option<Arc<dyn ServiceDiscovery>>,
        target: Target,
        config: StreamlinkConfig,
    ) -> ServiceSubscription {
        let (clients_changed, _) = watch::channel(0);
        let events = EventHook::new(COMPONENT, config.event_capacity);
        let inner = Arc::new_cyclic(|self_weak| SubscriptionInner {
            connector,
            discovery,
            config,
            state: Mutex::new(SubscriptionState {
                target,
                slots: BTreeMap::new(),
                detected: BTreeMap::new(),
                next_slot_id: 1,
                closed: false,
            }),
            events,
            clients_changed,
            discovery_task: Mutex::new(None),
            children: Mutex::new(Vec::new()),
            self_weak: self_weak.clone(),
        });
        ServiceSubscription { inner }
    }

    pub fn config(&self) -> &StreamlinkConfig {
        &self.inner.config
    }

    pub fn connect_retry_delay(&self) -> Duration {
        self.inner.config.connect_retry_delay()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock_state().closed
    }

    /// Connected clients, ordered by id. Claimed clients stay listed while
    /// connected.
    pub fn connected_clients(&self) -> BTreeMap<SubscriptionClientId, ServiceClient> {
        self.inner
            .lock_state()
            .slots
            .iter()
            .filter_map(|(id, slot)| slot.client.clone().map(|client| (id.clone(), client)))
            .collect()
    }

    /// First connected client. Meant for the single-service case; do not
    /// keep the result across reconnects.
    pub fn default_client(&self) -> Result<ServiceClient> {
        let state = self.inner.lock_state();
        if state.closed {
            return Err(closed_error());
        }
        state
            .slots
            .values()
            .find_map(|slot| slot.client.clone())
            .ok_or_else(|| StreamError::connection_failed("no service connected"))
    }

    /// Waits for a connected client. Fails with `ConnectionFailed` when the
    /// timeout elapses first.
    pub async fn default_client_wait(&self, timeout: Option<Duration>) -> Result<ServiceClient> {
        let mut changed = self.inner.clients_changed.subscribe();
        let res = wait_with_timeout(timeout, "waiting for a connected service", async {
            loop {
                match self.default_client() {
                    Ok(client) => return Ok(client),
                    Err(StreamError::ConnectionFailed(_)) => {}
                    Err(err) => return Err(err),
                }
                if changed.changed().await.is_err() {
                    return Err(closed_error());
                }
            }
        })
        .await;
        res.map_err(|err| match err {
            StreamError::Timeout(msg) => StreamError::connection_failed(msg),
            other => other,
        })
    }

    /// Takes `client` out of lifecycle management: it is no longer closed
    /// by the subscription and is not reconnected once it drops.
    pub fn claim_client(&self, client: &ServiceClient) -> Result<()> {
        self.inner.set_claimed(client, true)
    }

    /// Hands a claimed client back to the subscription.
    pub fn release_client(&self, client: &ServiceClient) -> Result<()> {
        self.inner.set_claimed(client, false)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SubscriptionEvent> {
        self.inner.events.subscribe()
    }

    pub fn add_listener<F>(&self, listener: F) -> EventListenerHandle
    where
        F: FnMut(SubscriptionEvent) + Send + 'static,
    {
        self.inner.events.add_listener(listener)
    }

    /// Switches to a new URL set. Existing connections to the same service
    /// are kept unless `close_connected` is set.
    pub async fn update_service_urls(&self, urls: Vec<String>, close_connected: bool) -> Result<()> {
        let id = SubscriptionClientId::from_urls(&urls)?;
        let retired = {
            let inner = &self.inner;
            let mut state = inner.lock_state();
            if state.closed {
                return Err(closed_error());
            }
            state.target = Target::Urls(urls.clone());
            state.detected.clear();
            let retired = retire_slots(&mut state, |slot_id, slot| {
                *slot_id != id || (close_connected && slot.client.is_some())
            });
            match state.slots.get_mut(&id) {
                Some(slot) => {
                    slot.urls = urls;
                    slot.credentials = None;
                }
                None => inner.add_slot(&mut state, id, urls, None),
            }
            retired
        };
        self.inner.log_target_updated(close_connected);
        self.inner.retire(retired).await;
        Ok(())
    }

    /// Switches to a type and filter target. Connections to services that
    /// still match are kept unless `close_connected` is set.
    pub async fn update_service_by_type(
        &self,
        service_types: Vec<String>,
        filter: Option<ServiceSubscriptionFilter>,
        close_connected: bool,
    ) -> Result<()> {
        let Some(discovery) = self.inner.discovery.clone() else {
            return Err(StreamError::invalid_operation(
                "subscription was created without service discovery",
            ));
        };
        if service_types.is_empty() {
            return Err(StreamError::invalid_argument(
                "a type subscription needs at least one service type",
            ));
        }
        let filter = filter.unwrap_or_default();
        let accepted: BTreeMap<SubscriptionClientId, ServiceInfo> = discovery
            .detected_services()
            .into_iter()
            .filter(|info| {
                service_types.iter().any(|t| info.provides_type(t)) && filter.matches(info)
            })
            .map(|info| (SubscriptionClientId::from_service_info(&info), info))
            .collect();

        let retired = {
            let inner = &self.inner;
            let mut state = inner.lock_state();
            if state.closed {
                return Err(closed_error());
            }
            let retired = retire_slots(&mut state, |id, slot| {
                !accepted.contains_key(id) || (close_connected && slot.client.is_some())
            });
            for (id, slot) in state.slots.iter_mut() {
                if let Some(info) = accepted.get(id) {
                    slot.urls = filter.filter_urls(&info.connection_urls);
                    slot.credentials = filter.credentials_for(info);
                }
            }
            state.target = Target::ByType {
                service_types,
                filter,
            };
            state.detected = accepted;
            inner.fill_from_detected(&mut state);
            retired
        };
        self.inner.log_target_updated(close_connected);
        self.inner.retire(retired).await;
        self.inner.start_discovery();
        Ok(())
    }

    /// Most recent value of wire `member` across every connected service.
    pub fn subscribe_wire(
        &self,
        member: &str,
        service_path: Option<&str>,
    ) -> Result<WireSubscription> {
        self.ensure_open()?;
        WireSubscription::start(self.clone(), member, service_path)
    }

    /// Merged packets of pipe `member` from every connected service.
    pub fn subscribe_pipe(
        &self,
        member: &str,
        service_path: Option<&str>,
        max_recv_packets: Option<usize>,
    ) -> Result<PipeSubscription> {
        self.ensure_open()?;
        let max_recv_packets = max_recv_packets.or(self.inner.config.pipe_max_recv_packets);
        PipeSubscription::start(self.clone(), member, service_path, max_recv_packets)
    }

    /// Default client of the sub-object reached through `service_path`.
    pub fn subscribe_sub_object(&self, service_path: &str) -> Result<SubObjectSubscription> {
        self.ensure_open()?;
        SubObjectSubscription::new(self.clone(), service_path)
    }

    /// Stops every slot, closes member subscriptions and every unclaimed
    /// client.
    pub async fn close(&self) -> Result<()> {
        let retired = {
            let mut state = self.inner.lock_state();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            retire_slots(&mut state, |_, _| true)
        };
        if let Some(task) = self
            .inner
            .discovery_task
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            task.abort();
        }

        let children: Vec<_> = self
            .inner
            .children
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain(..)
            .filter_map(|child| child.upgrade())
            .collect();
        for child in children {
            child.parent_closed().await;
        }

        self.inner.retire(retired).await;
        // Wakes waiters so they see the close.
        self.inner.bump_clients_changed();
        info!(
            event = events::SUBSCRIPTION_CLOSED,
            component = COMPONENT,
            subscription = %self.inner.label(),
            "subscription closed"
        );
        Ok(())
    }

    pub fn ptr_eq(&self, other: &ServiceSubscription) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn register_child(&self, child: Weak<dyn ChildSubscription>) {
        let mut children = self.inner.children.lock().unwrap_or_else(|p| p.into_inner());
        children.retain(|c| c.strong_count() > 0);
        children.push(child);
    }

    pub(crate) fn clients_changed(&self) -> watch::Receiver<u64> {
        self.inner.clients_changed.subscribe()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(closed_error())
        } else {
            Ok(())
        }
    }
}

impl PartialEq for ServiceSubscription {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl std::fmt::Debug for ServiceSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceSubscription")
            .field("target", &self.inner.label())
            .field("connected", &self.connected_clients().len())
            .finish()
    }
}

fn closed_error() -> StreamError {
    StreamError::invalid_operation("subscription is closed")
}

/// Removes every slot for which `retire` holds and cancels its task.
fn retire_slots<F>(state: &mut SubscriptionState, mut retire: F) -> Vec<(SubscriptionClientId, Slot)>
where
    F: FnMut(&SubscriptionClientId, &Slot) -> bool,
{
    let ids: Vec<_> = state
        .slots
        .iter()
        .filter(|(id, slot)| retire(id, slot))
        .map(|(id, _)| id.clone())
        .collect();
    ids.into_iter()
        .filter_map(|id| {
            let slot = state.slots.remove(&id)?;
            slot.cancel.send_replace(true);
            Some((id, slot))
        })
        .collect()
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    // A dropped sender means the slot is gone as well.
    let _ = cancel.wait_for(|cancelled| *cancelled).await;
}

impl SubscriptionInner {
    fn lock_state(&self) -> MutexGuard<'_, SubscriptionState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn label(&self) -> String {
        self.lock_state().target.label()
    }

    fn bump_clients_changed(&self) {
        self.clients_changed.send_modify(|v| *v = v.wrapping_add(1));
    }

    fn add_slot(
        &self,
        state: &mut SubscriptionState,
        id: SubscriptionClientId,
        urls: Vec<String>,
        credentials: Option<NodeCredentials>,
    ) {
        let slot_id = state.next_slot_id;
        state.next_slot_id += 1;
        let (cancel, cancel_rx) = watch::channel(false);
        state.slots.insert(
            id.clone(),
            Slot {
                slot_id,
                urls,
                credentials,
                client: None,
                claimed: false,
                cancel,
            },
        );
        tokio::spawn(run_slot(self.self_weak.clone(), id, slot_id, cancel_rx));
    }

    /// Gives pending detected services a slot while the connection limit
    /// allows.
    fn fill_from_detected(&self, state: &mut SubscriptionState) {
        let Target::ByType { filter, .. } = &state.target else {
            return;
        };
        let filter = filter.clone();
        let pending: Vec<_> = state
            .detected
            .iter()
            .filter(|(id, _)| !state.slots.contains_key(*id))
            .map(|(id, info)| (id.clone(), info.clone()))
            .collect();
        for (id, info) in pending {
            if filter
                .max_connections
                .is_some_and(|max| state.slots.len() >= max)
            {
                debug!(
                    event = events::SUBSCRIPTION_MAX_CONNECTIONS,
                    component = COMPONENT,
                    client_id = %id,
                    "connection limit reached; service left pending"
                );
                break;
            }
            let urls = filter.filter_urls(&info.connection_urls);
            let credentials = filter.credentials_for(&info);
            self.add_slot(state, id, urls, credentials);
        }
    }

    fn start_discovery(&self) {
        let Some(discovery) = self.discovery.clone() else {
            return;
        };
        let mut task = self.discovery_task.lock().unwrap_or_else(|p| p.into_inner());
        if task.is_some() {
            return;
        }
        let receiver = discovery.subscribe();
        self.resync(discovery.detected_services());
        *task = Some(tokio::spawn(discovery_loop(self.self_weak.clone(), receiver)));
    }

    fn resync(&self, services: Vec<ServiceInfo>) {
        let current: Vec<_> = services
            .iter()
            .map(SubscriptionClientId::from_service_info)
            .collect();
        let stale: Vec<_> = self
            .lock_state()
            .detected
            .keys()
            .filter(|id| !current.contains(id))
            .cloned()
            .collect();
        for id in stale {
            self.service_lost(id);
        }
        for info in services {
            self.service_detected(info);
        }
    }

    fn service_detected(&self, info: ServiceInfo) {
        let id = SubscriptionClientId::from_service_info(&info);
        let mut state = self.lock_state();
        if state.closed {
            return;
        }
        let Target::ByType {
            service_types,
            filter,
        } = &state.target
        else {
            return;
        };
        if !service_types.iter().any(|t| info.provides_type(t)) {
            return;
        }
        if !filter.matches(&info) {
            debug!(
                event = events::SUBSCRIPTION_FILTER_REJECTED,
                component = COMPONENT,
                client_id = %id,
                "service rejected by filter"
            );
            return;
        }
        let urls = filter.filter_urls(&info.connection_urls);
        let credentials = filter.credentials_for(&info);
        let newly_detected = state.detected.insert(id.clone(), info).is_none();
        if let Some(slot) = state.slots.get_mut(&id) {
            slot.urls = urls;
            slot.credentials = credentials;
            return;
        }
        if newly_detected {
            info!(
                event = events::SUBSCRIPTION_SERVICE_DETECTED,
                component = COMPONENT,
                client_id = %id,
                urls = %fields::format_urls(&urls),
                "matching service detected"
            );
        }
        self.fill_from_detected(&mut state);
    }

    fn service_lost(&self, id: SubscriptionClientId) {
        let cancelled = {
            let mut state = self.lock_state();
            if state.detected.remove(&id).is_none() {
                return;
            }
            info!(
                event = events::SUBSCRIPTION_SERVICE_LOST,
                component = COMPONENT,
                client_id = %id,
                "service no longer detected"
            );
            // A live connection is kept until it drops on its own.
            let pending = state.slots.get(&id).is_some_and(|slot| slot.client.is_none());
            if !pending {
                return;
            }
            let slot = state.slots.remove(&id);
            self.fill_from_detected(&mut state);
            slot
        };
        if let Some(slot) = cancelled {
            slot.cancel.send_replace(true);
            debug!(
                event = events::SUBSCRIPTION_SLOT_CANCELLED,
                component = COMPONENT,
                client_id = %id,
                "pending connect cancelled"
            );
        }
    }

    fn slot_target(
        &self,
        id: &SubscriptionClientId,
        slot_id: u64,
    ) -> Option<(Vec<String>, Option<NodeCredentials>)> {
        let state = self.lock_state();
        if state.closed {
            return None;
        }
        state
            .slots
            .get(id)
            .filter(|slot| slot.slot_id == slot_id)
            .map(|slot| (slot.urls.clone(), slot.credentials.clone()))
    }

    fn attach_client(&self, id: &SubscriptionClientId, slot_id: u64, client: &ServiceClient) -> bool {
        {
            let mut state = self.lock_state();
            if state.closed {
                return false;
            }
            match state.slots.get_mut(id) {
                Some(slot) if slot.slot_id == slot_id => slot.client = Some(client.clone()),
                _ => return false,
            }
        }
        info!(
            event = events::SUBSCRIPTION_CONNECT_OK,
            component = COMPONENT,
            client_id = %id,
            "service connected"
        );
        self.events.fire(SubscriptionEvent::ClientConnected {
            id: id.clone(),
            client: client.clone(),
        });
        self.bump_clients_changed();
        true
    }

    /// Handles a connection that dropped by itself. Returns whether the
    /// slot should retry.
    fn client_lost(&self, id: &SubscriptionClientId, slot_id: u64, client: &ServiceClient) -> bool {
        let retry = {
            let mut state = self.lock_state();
            let by_type = matches!(state.target, Target::ByType { .. });
            let still_detected = state.detected.contains_key(id);
            let Some(slot) = state.slots.get_mut(id) else {
                return false;
            };
            if slot.slot_id != slot_id || !slot.client.as_ref().is_some_and(|c| c.ptr_eq(client)) {
                return false;
            }
            slot.client = None;
            if slot.claimed {
                state.slots.remove(id);
                state.detected.remove(id);
                false
            } else if by_type && !still_detected {
                state.slots.remove(id);
                self.fill_from_detected(&mut state);
                false
            } else {
                true
            }
        };
        warn!(
            event = events::SUBSCRIPTION_CLIENT_LOST,
            component = COMPONENT,
            client_id = %id,
            retry,
            "service connection lost"
        );
        self.events.fire(SubscriptionEvent::ClientDisconnected {
            id: id.clone(),
            client: client.clone(),
        });
        self.bump_clients_changed();
        retry
    }

    /// Reports a failed attempt. Returns whether the slot should retry.
    fn connect_failed(
        &self,
        id: &SubscriptionClientId,
        slot_id: u64,
        urls: &[String],
        error: StreamError,
    ) -> bool {
        let retry = {
            let mut state = self.lock_state();
            if state.closed || !state.slots.get(id).is_some_and(|s| s.slot_id == slot_id) {
                return false;
            }
            let by_type = matches!(state.target, Target::ByType { .. });
            if by_type && !state.detected.contains_key(id) {
                state.slots.remove(id);
                self.fill_from_detected(&mut state);
                false
            } else {
                true
            }
        };
        warn!(
            event = events::SUBSCRIPTION_CONNECT_FAILED,
            component = COMPONENT,
            client_id = %id,
            urls = %fields::format_urls(urls),
            err = %error,
            retry,
            "service connect failed"
        );
        self.events.fire(SubscriptionEvent::ClientConnectFailed {
            id: id.clone(),
            urls: urls.to_vec(),
            error,
        });
        retry
    }

    fn set_claimed(&self, client: &ServiceClient, claimed: bool) -> Result<()> {
        let mut state = self.lock_state();
        let slot = state
            .slots
            .values_mut()
            .find(|slot| slot.client.as_ref().is_some_and(|c| c.ptr_eq(client)))
            .ok_or_else(|| StreamError::not_found("client is not managed by this subscription"))?;
        slot.claimed = claimed;
        Ok(())
    }

    /// Closes the unclaimed clients of retired slots.
    async fn retire(&self, retired: Vec<(SubscriptionClientId, Slot)>) {
        let mut any_client = false;
        for (id, slot) in retired {
            debug!(
                event = events::SUBSCRIPTION_SLOT_CANCELLED,
                component = COMPONENT,
                client_id = %id,
                "slot retired"
            );
            let Some(client) = slot.client else {
                continue;
            };
            any_client = true;
            if !slot.claimed {
                if let Err(err) = client.close().await {
                    debug!(
                        event = events::SUBSCRIPTION_CLIENT_LOST,
                        component = COMPONENT,
                        client_id = %id,
                        err = %err,
                        "closing retired client failed"
                    );
                }
            }
            self.events
                .fire(SubscriptionEvent::ClientDisconnected { id, client });
        }
        if any_client {
            self.bump_clients_changed();
        }
    }

    fn log_target_updated(&self, close_connected: bool) {
        info!(
            event = events::SUBSCRIPTION_TARGET_UPDATED,
            component = COMPONENT,
            subscription = %self.label(),
            close_connected,
            "subscription target updated"
        );
    }
}

async fn run_slot(
    weak: Weak<SubscriptionInner>,
    id: SubscriptionClientId,
    slot_id: u64,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let Some((urls, credentials)) = inner.slot_target(&id, slot_id) else {
            return;
        };
        let retry_delay = inner.config.connect_retry_delay();
        let connector = inner.connector.clone();
        drop(inner);

        debug!(
            event = events::SUBSCRIPTION_CONNECT_ATTEMPT,
            component = COMPONENT,
            client_id = %id,
            urls = %fields::format_urls(&urls),
            "connecting"
        );
        let res = tokio::select! {
            res = connector.connect(&urls, credentials.as_ref()) => res,
            _ = cancelled(&mut cancel) => return,
        };

        let Some(inner) = weak.upgrade() else {
            if let Ok(connection) = res {
                let _ = connection.close().await;
            }
            return;
        };
        let retry = match res {
            Ok(connection) => {
                let client = ServiceClient::new(connection, inner.config.event_capacity);
                if !inner.attach_client(&id, slot_id, &client) {
                    drop(inner);
                    let _ = client.close().await;
                    return;
                }
                drop(inner);
                tokio::select! {
                    _ = client.wait_closed() => {}
                    _ = cancelled(&mut cancel) => return,
                }
                match weak.upgrade() {
                    Some(inner) => inner.client_lost(&id, slot_id, &client),
                    None => false,
                }
            }
            Err(err) => inner.connect_failed(&id, slot_id, &urls, err),
        };
        if !retry {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(retry_delay) => {}
            _ = cancelled(&mut cancel) => return,
        }
    }
}

async fn discovery_loop(
    weak: Weak<SubscriptionInner>,
    mut receiver: broadcast::Receiver<DiscoveryEvent>,
) {
    loop {
        let res = receiver.recv().await;
        let Some(inner) = weak.upgrade() else {
            break;
        };
        match res {
            Ok(DiscoveryEvent::Detected(info)) => inner.service_detected(info),
            Ok(DiscoveryEvent::Lost {
                node_id,
                service_name,
            }) => inner.service_lost(SubscriptionClientId::new(node_id, &service_name)),
            Err(RecvError::Lagged(skipped)) => {
                warn!(
                    event = events::SUBSCRIPTION_DISCOVERY_LAGGED,
                    component = COMPONENT,
                    skipped,
                    "discovery events dropped; resyncing from snapshot"
                );
                if let Some(discovery) = inner.discovery.clone() {
                    inner.resync(discovery.detected_services());
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
}
