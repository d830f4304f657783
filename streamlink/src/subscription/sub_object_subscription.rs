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

use crate::client::ServiceClient;
use crate::error::{Result, StreamError};
use crate::runtime::wait_with_timeout;
use crate::service_path::ServicePath;
use crate::subscription::member_tracker::resolve_service_path;
use crate::subscription::service_subscription::{ChildSubscription, ServiceSubscription};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

struct SubObjectInner {
    parent: ServiceSubscription,
    service_path: ServicePath,
    closed: AtomicBool,
}

/// Default client of a sub-object reached through a service path such as
/// `robot.arms[left].gripper` or `*.arms[left]`.
///
/// Nothing is connected ahead of time: every lookup walks the path from a
/// currently connected service, reusing the client's cached sub-objects.
#[derive(Clone)]
pub struct SubObjectSubscription {
    inner: Arc<SubObjectInner>,
}

impl SubObjectSubscription {
    pub(crate) fn new(parent: ServiceSubscription, service_path: &str) -> Result<Self> {
        let service_path: ServicePath = service_path.parse()?;
        let inner = Arc::new(SubObjectInner {
            parent: parent.clone(),
            service_path,
            closed: AtomicBool::new(false),
        });
        let child: Weak<dyn ChildSubscription> = Arc::downgrade(&inner) as Weak<dyn ChildSubscription>;
        parent.register_child(child);
        Ok(SubObjectSubscription { inner })
    }

    pub fn service_path(&self) -> &ServicePath {
        &self.inner.service_path
    }

    pub fn parent(&self) -> &ServiceSubscription {
        &self.inner.parent
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire) || self.inner.parent.is_closed()
    }

    /// Sub-object client on the first connected service the path matches.
    pub async fn default_client(&self) -> Result<ServiceClient> {
        if self.is_closed() {
            return Err(closed_error());
        }
        let path = &self.inner.service_path;
        let mut last_err = None;
        for client in self.inner.parent.connected_clients().into_values() {
            if !path.matches_service(client.service_name()) {
                continue;
            }
            match resolve_service_path(&client, Some(path)).await {
                Ok(sub_object) => return Ok(sub_object),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            StreamError::connection_failed(format!("no connected service matches {path}"))
        }))
    }

    /// Waits until [`Self::default_client`] can resolve. A timeout is
    /// reported as `ConnectionFailed`.
    pub async fn default_client_wait(&self, timeout: Option<Duration>) -> Result<ServiceClient> {
        let mut changed = self.inner.parent.clients_changed();
        let res = wait_with_timeout(timeout, "waiting for a sub-object client", async {
            loop {
                match self.default_client().await {
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

    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for SubObjectSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubObjectSubscription")
            .field("service_path", &self.inner.service_path.to_string())
            .finish()
    }
}

fn closed_error() -> StreamError {
    StreamError::invalid_operation("sub-object subscription is closed")
}

#[async_trait]
impl ChildSubscription for SubObjectInner {
    async fn parent_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
