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

//! Named table of service subscriptions that can be switched on and off.

use crate::config::{ManagerConfig, StreamlinkConfig};
use crate::error::{Result, StreamError};
use crate::observability::events;
use crate::subscription::filter::ServiceSubscriptionFilter;
use crate::subscription::service_subscription::ServiceSubscription;
use crate::transport::{ServiceConnector, ServiceDiscovery};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

const COMPONENT: &str = "subscription_manager";

fn default_enabled() -> bool {
    true
}

/// One named entry: either `urls` for a single service or
/// `service_types` (plus optional `filter`) for discovered services.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceSubscriptionManagerDetails {
    pub name: String,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub service_types: Vec<String>,
    #[serde(default)]
    pub filter: Option<ServiceSubscriptionFilter>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ServiceSubscriptionManagerDetails {
    pub fn for_urls(name: &str, urls: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            urls,
            service_types: Vec::new(),
            filter: None,
            enabled: true,
        }
    }

    pub fn for_types(
        name: &str,
        service_types: Vec<String>,
        filter: Option<ServiceSubscriptionFilter>,
    ) -> Self {
        Self {
            name: name.to_string(),
            urls: Vec::new(),
            service_types,
            filter,
            enabled: true,
        }
    }
}

/// Failures turning details into a live subscription.
#[derive(Debug)]
pub(crate) enum CreateSubscriptionError {
    MissingTarget,
    DiscoveryUnavailable,
    Subscription(StreamError),
}

impl Display for CreateSubscriptionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CreateSubscriptionError::MissingTarget => {
                write!(f, "subscription needs urls or service types")
            }
            CreateSubscriptionError::DiscoveryUnavailable => {
                write!(f, "type subscriptions need a service discovery")
            }
            CreateSubscriptionError::Subscription(err) => {
                write!(f, "failed to create subscription: {err}")
            }
        }
    }
}

impl Error for CreateSubscriptionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CreateSubscriptionError::Subscription(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CreateSubscriptionError> for StreamError {
    fn from(err: CreateSubscriptionError) -> Self {
        let message = err.to_string();
        match err {
            CreateSubscriptionError::MissingTarget => StreamError::invalid_argument(message),
            CreateSubscriptionError::DiscoveryUnavailable => StreamError::invalid_operation(message),
            CreateSubscriptionError::Subscription(inner) => inner,
        }
    }
}

struct ManagedEntry {
    details: ServiceSubscriptionManagerDetails,
    subscription: Option<ServiceSubscription>,
}

#[derive(Default)]
struct ManagerState {
    entries: BTreeMap<String, ManagedEntry>,
    closed: bool,
}

/// Owns named subscriptions built from [`ServiceSubscriptionManagerDetails`].
///
/// Disabling with `close` closes and drops the subscription; without it
/// the subscription stays owned by the entry and enabling picks it up
/// again. Enabling builds a fresh one only when none is left open.
pub struct ServiceSubscriptionManager {
    connector: Arc<dyn ServiceConnector>,
    discovery: Option<Arc<dyn ServiceDiscovery>>,
    config: StreamlinkConfig,
    state: Mutex<ManagerState>,
}

impl ServiceSubscriptionManager {
    pub fn new(
        connector: Arc<dyn ServiceConnector>,
        discovery: Option<Arc<dyn ServiceDiscovery>>,
        config: StreamlinkConfig,
    ) -> Self {
        Self {
            connector,
            discovery,
            config,
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// Builds a manager and adds every configured subscription.
    pub async fn from_config(
        config: ManagerConfig,
        connector: Arc<dyn ServiceConnector>,
        discovery: Option<Arc<dyn ServiceDiscovery>>,
    ) -> Result<Self> {
        let manager = Self::new(connector, discovery, config.runtime);
        for details in config.subscriptions {
            manager.add_subscription(details).await?;
        }
        Ok(manager)
    }

    pub fn config(&self) -> &StreamlinkConfig {
        &self.config
    }

    /// Adds `details`, replacing and closing an entry of the same name.
    pub async fn add_subscription(&self, details: ServiceSubscriptionManagerDetails) -> Result<()> {
        if details.name.is_empty() {
            return Err(StreamError::invalid_argument(
                "subscription name must not be empty",
            ));
        }
        let subscription = if details.enabled {
            Some(self.create(&details)?)
        } else {
            self.validate(&details)?;
            None
        };
        let name = details.name.clone();
        let outcome = {
            let mut state = self.lock_state();
            if state.closed {
                Err(subscription)
            } else {
                let entry = ManagedEntry {
                    details,
                    subscription,
                };
                Ok(state.entries.insert(name.clone(), entry))
            }
        };
        let replaced = match outcome {
            Ok(replaced) => replaced,
            Err(rejected) => {
                if let Some(subscription) = rejected {
                    let _ = subscription.close().await;
                }
                return Err(closed_error());
            }
        };
        info!(
            event = events::MANAGER_SUBSCRIPTION_ADD,
            component = COMPONENT,
            subscription = name.as_str(),
            replaced = replaced.is_some(),
            "subscription added"
        );
        if let Some(subscription) = replaced.and_then(|entry| entry.subscription) {
            subscription.close().await?;
        }
        Ok(())
    }

    /// Drops the entry; its subscription is closed when `close` is set.
    pub async fn remove_subscription(&self, name: &str, close: bool) -> Result<()> {
        let removed = {
            let mut state = self.lock_state();
            state.entries.remove(name).ok_or_else(|| not_found(name))?
        };
        info!(
            event = events::MANAGER_SUBSCRIPTION_REMOVE,
            component = COMPONENT,
            subscription = name,
            close,
            "subscription removed"
        );
        match removed.subscription {
            Some(subscription) if close => subscription.close().await,
            _ => Ok(()),
        }
    }

    /// Enables the entry, connecting again if it was disabled.
    pub fn enable_subscription(&self, name: &str) -> Result<()> {
        let mut state = self.lock_state();
        if state.closed {
            return Err(closed_error());
        }
        let entry = state.entries.get_mut(name).ok_or_else(|| not_found(name))?;
        let reusable = entry
            .subscription
            .as_ref()
            .is_some_and(|subscription| !subscription.is_closed());
        if !reusable {
            entry.subscription = Some(self.create(&entry.details)?);
        }
        entry.details.enabled = true;
        info!(
            event = events::MANAGER_SUBSCRIPTION_ENABLE,
            component = COMPONENT,
            subscription = name,
            "subscription enabled"
        );
        Ok(())
    }

    /// Disables the entry. With `close` its subscription is closed and
    /// dropped; otherwise it stays with the entry, still connected, until
    /// the entry is enabled again, removed or the manager closes.
    pub async fn disable_subscription(&self, name: &str, close: bool) -> Result<()> {
        let detached = {
            let mut state = self.lock_state();
            let entry = state.entries.get_mut(name).ok_or_else(|| not_found(name))?;
            entry.details.enabled = false;
            if close {
                entry.subscription.take()
            } else {
                None
            }
        };
        info!(
            event = events::MANAGER_SUBSCRIPTION_DISABLE,
            component = COMPONENT,
            subscription = name,
            close,
            "subscription disabled"
        );
        match detached {
            Some(subscription) => subscription.close().await,
            None => Ok(()),
        }
    }

    /// Live subscription for `name`. A disabled entry yields `None` unless
    /// `force_create` is set, which enables it.
    pub fn get_subscription(
        &self,
        name: &str,
        force_create: bool,
    ) -> Result<Option<ServiceSubscription>> {
        {
            let state = self.lock_state();
            let entry = state.entries.get(name).ok_or_else(|| not_found(name))?;
            if entry.details.enabled {
                return Ok(entry.subscription.clone());
            }
            if !force_create {
                return Ok(None);
            }
        }
        self.enable_subscription(name)?;
        let state = self.lock_state();
        Ok(state
            .entries
            .get(name)
            .and_then(|entry| entry.subscription.clone()))
    }

    pub fn is_enabled(&self, name: &str) -> Result<bool> {
        let state = self.lock_state();
        let entry = state.entries.get(name).ok_or_else(|| not_found(name))?;
        Ok(entry.details.enabled)
    }

    /// `true` when the entry's subscription has at least one connected
    /// client.
    pub fn is_connected(&self, name: &str) -> Result<bool> {
        let state = self.lock_state();
        let entry = state.entries.get(name).ok_or_else(|| not_found(name))?;
        Ok(entry
            .subscription
            .as_ref()
            .is_some_and(|subscription| !subscription.connected_clients().is_empty()))
    }

    pub fn subscription_names(&self) -> Vec<String> {
        self.lock_state().entries.keys().cloned().collect()
    }

    pub fn subscription_details(&self) -> Vec<ServiceSubscriptionManagerDetails> {
        self.lock_state()
            .entries
            .values()
            .map(|entry| entry.details.clone())
            .collect()
    }

    /// Detaches every subscription and refuses further changes. Returns
    /// the first close failure when `close_subscriptions` is set.
    pub async fn close(&self, close_subscriptions: bool) -> Result<()> {
        let subscriptions: Vec<_> = {
            let mut state = self.lock_state();
            state.closed = true;
            std::mem::take(&mut state.entries)
                .into_values()
                .filter_map(|entry| entry.subscription)
                .collect()
        };
        if !close_subscriptions {
            return Ok(());
        }
        let mut first_err = None;
        for subscription in subscriptions {
            if let Err(err) = subscription.close().await {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn validate(
        &self,
        details: &ServiceSubscriptionManagerDetails,
    ) -> std::result::Result<(), CreateSubscriptionError> {
        if details.urls.is_empty() && details.service_types.is_empty() {
            return Err(CreateSubscriptionError::MissingTarget);
        }
        if details.urls.is_empty() && self.discovery.is_none() {
            return Err(CreateSubscriptionError::DiscoveryUnavailable);
        }
        Ok(())
    }

    fn create(&self, details: &ServiceSubscriptionManagerDetails) -> Result<ServiceSubscription> {
        self.try_create(details).map_err(|err| {
            warn!(
                event = events::MANAGER_SUBSCRIPTION_CREATE_FAILED,
                component = COMPONENT,
                subscription = details.name.as_str(),
                err = %err,
                "unable to create subscription"
            );
            StreamError::from(err)
        })
    }

    fn try_create(
        &self,
        details: &ServiceSubscriptionManagerDetails,
    ) -> std::result::Result<ServiceSubscription, CreateSubscriptionError> {
        self.validate(details)?;
        let res = if !details.urls.is_empty() {
            ServiceSubscription::for_urls(
                self.connector.clone(),
                details.urls.clone(),
                self.config.clone(),
            )
        } else {
            let Some(discovery) = self.discovery.clone() else {
                return Err(CreateSubscriptionError::DiscoveryUnavailable);
            };
            ServiceSubscription::for_type(
                self.connector.clone(),
                discovery,
                details.service_types.clone(),
                details.filter.clone(),
                self.config.clone(),
            )
        };
        res.map_err(CreateSubscriptionError::Subscription)
    }
}

fn not_found(name: &str) -> StreamError {
    StreamError::not_found(format!("no subscription named {name}"))
}

fn closed_error() -> StreamError {
    StreamError::invalid_operation("subscription manager is closed")
}

#[cfg(test)]
mod tests {
    use super::{CreateSubscriptionError, ServiceSubscriptionManager, ServiceSubscriptionManagerDetails};
    use crate::config::{ManagerConfig, StreamlinkConfig};
    use crate::error::{Result, StreamError};
    use crate::transport::{NodeCredentials, ObjectConnection, ServiceConnector};
    use async_trait::async_trait;
    use std::error::Error;
    use std::sync::Arc;

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

    fn manager() -> ServiceSubscriptionManager {
        ServiceSubscriptionManager::new(
            Arc::new(RefusingConnector),
            None,
            StreamlinkConfig::default(),
        )
    }

    fn reporter() -> ServiceSubscriptionManagerDetails {
        ServiceSubscriptionManagerDetails::for_urls(
            "reporter",
            vec!["loopback://node-a/?service=reporter".to_string()],
        )
    }

    #[tokio::test]
    async fn disable_without_close_keeps_the_subscription_for_enable() {
        let manager = manager();
        manager.add_subscription(reporter()).await.unwrap();
        let first = manager.get_subscription("reporter", false).unwrap().unwrap();
        assert!(manager.is_enabled("reporter").unwrap());
        assert!(!manager.is_connected("reporter").unwrap());

        manager.disable_subscription("reporter", false).await.unwrap();
        assert!(!manager.is_enabled("reporter").unwrap());
        assert!(manager.get_subscription("reporter", false).unwrap().is_none());
        assert!(!first.is_closed());

        manager.enable_subscription("reporter").unwrap();
        let again = manager.get_subscription("reporter", false).unwrap().unwrap();
        assert_eq!(first, again);

        manager.close(true).await.unwrap();
        assert!(first.is_closed());
    }

    #[tokio::test]
    async fn disable_with_close_makes_enable_build_a_new_subscription() {
        let manager = manager();
        manager.add_subscription(reporter()).await.unwrap();
        let first = manager.get_subscription("reporter", false).unwrap().unwrap();

        manager.disable_subscription("reporter", true).await.unwrap();
        assert!(first.is_closed());

        manager.enable_subscription("reporter").unwrap();
        let second = manager.get_subscription("reporter", false).unwrap().unwrap();
        assert_ne!(first, second);
        assert!(!second.is_closed());

        // A disabled entry still owns its open subscription.
        manager.disable_subscription("reporter", false).await.unwrap();
        manager.remove_subscription("reporter", true).await.unwrap();
        assert!(second.is_closed());
    }

    #[tokio::test]
    async fn force_create_enables_a_disabled_entry() {
        let manager = manager();
        let mut details = reporter();
        details.enabled = false;
        manager.add_subscription(details).await.unwrap();
        assert!(manager.get_subscription("reporter", false).unwrap().is_none());

        let subscription = manager.get_subscription("reporter", true).unwrap();
        assert!(subscription.is_some());
        assert!(manager.is_enabled("reporter").unwrap());
        manager.close(true).await.unwrap();
        assert!(subscription.unwrap().is_closed());
    }

    #[tokio::test]
    async fn replacing_an_entry_closes_the_old_subscription() {
        let manager = manager();
        manager.add_subscription(reporter()).await.unwrap();
        let old = manager.get_subscription("reporter", false).unwrap().unwrap();
        manager.add_subscription(reporter()).await.unwrap();
        assert!(old.is_closed());
        assert_eq!(manager.subscription_names(), vec!["reporter".to_string()]);

        manager.remove_subscription("reporter", true).await.unwrap();
        assert!(manager.subscription_names().is_empty());
        assert!(matches!(
            manager.remove_subscription("reporter", true).await,
            Err(StreamError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn type_details_need_discovery() {
        let manager = manager();
        let details =
            ServiceSubscriptionManagerDetails::for_types("sensors", vec!["demo.Sensor".into()], None);
        let res = manager.add_subscription(details).await;
        assert!(matches!(res, Err(StreamError::InvalidOperation(_))));

        let empty = ServiceSubscriptionManagerDetails::for_urls("empty", Vec::new());
        let res = manager.add_subscription(empty).await;
        assert!(matches!(res, Err(StreamError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn closed_manager_refuses_new_entries() {
        let manager = manager();
        manager.close(true).await.unwrap();
        let res = manager.add_subscription(reporter()).await;
        assert!(matches!(res, Err(StreamError::InvalidOperation(_))));
    }

    #[tokio::test]
    async fn manager_builds_from_configuration() {
        let config = ManagerConfig::from_json5_str(
            r#"{
                subscriptions: [
                    { name: "reporter", urls: ["loopback://node-a/?service=reporter"] },
                    { name: "idle", urls: ["loopback://node-b/?service=idle"], enabled: false },
                ],
            }"#,
        )
        .unwrap();
        let manager =
            ServiceSubscriptionManager::from_config(config, Arc::new(RefusingConnector), None)
                .await
                .unwrap();
        assert_eq!(manager.subscription_names(), vec!["idle", "reporter"]);
        assert!(!manager.is_enabled("idle").unwrap());
        assert_eq!(manager.subscription_details().len(), 2);
        manager.close(true).await.unwrap();
    }

    #[test]
    fn create_error_exposes_source() {
        let err = CreateSubscriptionError::Subscription(StreamError::invalid_argument("bad url"));
        assert!(err.source().is_some());
        assert!(CreateSubscriptionError::MissingTarget.source().is_none());
        assert_eq!(
            StreamError::from(CreateSubscriptionError::DiscoveryUnavailable).kind(),
            StreamError::invalid_operation("x").kind()
        );
    }
}
