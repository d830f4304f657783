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

//! In-memory network of hosted services with a connector and discovery.

use crate::loopback_transport::{HostIdentity, HostShared, HostTransport};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use streamlink::transport::{DiscoveryEvent, MemberTransport};
use streamlink::{
    NodeCredentials, NodeId, ObjectConnection, ObjectTypeDef, Payload, Result, ServiceConnector,
    ServiceDiscovery, ServiceInfo, StreamError,
};
use tokio::sync::broadcast;
use tracing::{debug, info};
use url::Url;

pub const LOOPBACK_SCHEME: &str = "loopback";

const DISCOVERY_CAPACITY: usize = 64;

/// Extras advertised for a hosted service.
#[derive(Clone, Debug, Default)]
pub struct ServiceOptions {
    pub implements: Vec<String>,
    pub attributes: HashMap<String, Payload>,
    /// Additional advertised URLs; the loopback connector cannot reach them.
    pub extra_urls: Vec<String>,
    /// When set, connects must present this username.
    pub required_username: Option<String>,
}

struct RunningService {
    host: Arc<HostShared>,
    info: ServiceInfo,
    required_username: Option<String>,
}

struct NetworkInner {
    nodes: Mutex<HashMap<String, NodeId>>,
    services: Mutex<HashMap<(String, String), RunningService>>,
    discovery: broadcast::Sender<DiscoveryEvent>,
}

/// Hosts services in memory and connects to them by `loopback://` URL.
///
/// Node ids are stable per node name, so a service stopped and started
/// again keeps its identity.
#[derive(Clone)]
pub struct LoopbackNetwork {
    inner: Arc<NetworkInner>,
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        let (discovery, _) = broadcast::channel(DISCOVERY_CAPACITY);
        Self {
            inner: Arc::new(NetworkInner {
                nodes: Mutex::new(HashMap::new()),
                services: Mutex::new(HashMap::new()),
                discovery,
            }),
        }
    }

    pub fn connector(&self) -> Arc<dyn ServiceConnector> {
        Arc::new(self.clone())
    }

    pub fn discovery(&self) -> Arc<dyn ServiceDiscovery> {
        Arc::new(self.clone())
    }

    pub fn node_id(&self, node_name: &str) -> NodeId {
        *self
            .inner
            .nodes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(node_name.to_string())
            .or_insert_with(NodeId::new_random)
    }

    /// URL that reaches `service_name` on `node_name`.
    pub fn service_url(&self, node_name: &str, service_name: &str) -> String {
        format!(
            "{LOOPBACK_SCHEME}://{node_name}/?nodeid={}&service={service_name}",
            self.node_id(node_name)
        )
    }

    pub fn start_service(
        &self,
        node_name: &str,
        service_name: &str,
        root_type: Arc<ObjectTypeDef>,
    ) -> Result<ServiceHost> {
        self.start_service_with(node_name, service_name, root_type, ServiceOptions::default())
    }

    /// Starts a service and announces it to discovery subscribers.
    pub fn start_service_with(
        &self,
        node_name: &str,
        service_name: &str,
        root_type: Arc<ObjectTypeDef>,
        options: ServiceOptions,
    ) -> Result<ServiceHost> {
        let node_id = self.node_id(node_name);
        let mut connection_urls = vec![self.service_url(node_name, service_name)];
        connection_urls.extend(options.extra_urls);
        let info = ServiceInfo {
            node_id,
            node_name: node_name.to_string(),
            service_name: service_name.to_string(),
            root_object_type: root_type.name.clone(),
            root_object_implements: options.implements,
            connection_urls,
            attributes: options.attributes,
        };
        let host = HostShared::new(HostIdentity {
            node_id,
            node_name: node_name.to_string(),
            service_name: service_name.to_string(),
            root_type,
        });

        let key = (node_name.to_string(), service_name.to_string());
        {
            let mut services = self.services();
            if services.contains_key(&key) {
                return Err(StreamError::invalid_operation(format!(
                    "{service_name} already running on {node_name}"
                )));
            }
            services.insert(
                key,
                RunningService {
                    host: host.clone(),
                    info: info.clone(),
                    required_username: options.required_username,
                },
            );
        }
        info!(node = node_name, service = service_name, "loopback service started");
        let _ = self.inner.discovery.send(DiscoveryEvent::Detected(info));
        Ok(ServiceHost {
            network: self.clone(),
            host,
        })
    }

    fn services(&self) -> MutexGuard<'_, HashMap<(String, String), RunningService>> {
        self.inner.services.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn connect_url(
        &self,
        url: &str,
        credentials: Option<&NodeCredentials>,
    ) -> Result<Arc<dyn ObjectConnection>> {
        let parsed = Url::parse(url)
            .map_err(|e| StreamError::invalid_argument(format!("invalid url {url}: {e}")))?;
        if parsed.scheme() != LOOPBACK_SCHEME {
            return Err(StreamError::connection_failed(format!(
                "unsupported scheme in {url}"
            )));
        }
        let node_name = parsed.host_str().unwrap_or_default().to_string();
        let service_name = parsed
            .query_pairs()
            .find(|(key, _)| key == "service")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| StreamError::invalid_argument(format!("no service in {url}")))?;

        let services = self.services();
        let running = services
            .get(&(node_name, service_name))
            .ok_or_else(|| StreamError::connection_failed(format!("nothing listening at {url}")))?;
        if let Some(required) = &running.required_username {
            if credentials.map(|c| &c.username) != Some(required) {
                return Err(StreamError::connection_failed(format!(
                    "{url} refused the credentials"
                )));
            }
        }
        Ok(running.host.accept())
    }
}

#[async_trait]
impl ServiceConnector for LoopbackNetwork {
    async fn connect(
        &self,
        urls: &[String],
        credentials: Option<&NodeCredentials>,
    ) -> Result<Arc<dyn ObjectConnection>> {
        let mut last_err = StreamError::connection_failed("no url to connect to");
        for url in urls {
            match self.connect_url(url, credentials) {
                Ok(connection) => return Ok(connection),
                Err(err) => {
                    debug!(url = url.as_str(), err = %err, "loopback connect failed");
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }
}

impl ServiceDiscovery for LoopbackNetwork {
    fn detected_services(&self) -> Vec<ServiceInfo> {
        self.services()
            .values()
            .map(|running| running.info.clone())
            .collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.inner.discovery.subscribe()
    }
}

/// Handle to one running service.
pub struct ServiceHost {
    network: LoopbackNetwork,
    host: Arc<HostShared>,
}

impl ServiceHost {
    /// Transport to build the service skeleton on.
    pub fn transport(&self) -> Arc<dyn MemberTransport> {
        Arc::new(HostTransport {
            host: self.host.clone(),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.host.identity.node_id
    }

    pub fn service_name(&self) -> &str {
        &self.host.identity.service_name
    }

    pub fn url(&self) -> String {
        self.network
            .service_url(&self.host.identity.node_name, &self.host.identity.service_name)
    }

    /// Makes `service_path` (for example `robot.arms[left]`) reachable
    /// through object references.
    pub fn add_sub_object(&self, service_path: &str, type_def: Arc<ObjectTypeDef>) {
        self.host.add_sub_object(service_path, type_def);
    }

    pub fn connection_count(&self) -> usize {
        self.host.connection_count()
    }

    /// Drops every open connection while staying reachable.
    pub async fn drop_connections(&self) {
        self.host.shut_all().await;
    }

    /// Withdraws the service, announces the loss and drops its connections.
    pub async fn stop(&self) {
        let key = (
            self.host.identity.node_name.clone(),
            self.host.identity.service_name.clone(),
        );
        let removed = {
            let mut services = self.network.services();
            match services.get(&key) {
                Some(running) if Arc::ptr_eq(&running.host, &self.host) => services.remove(&key),
                _ => None,
            }
        };
        if removed.is_some() {
            let _ = self.network.inner.discovery.send(DiscoveryEvent::Lost {
                node_id: self.host.identity.node_id,
                service_name: self.host.identity.service_name.clone(),
            });
            info!(
                node = self.host.identity.node_name.as_str(),
                service = self.host.identity.service_name.as_str(),
                "loopback service stopped"
            );
        }
        self.host.shut_all().await;
    }
}
