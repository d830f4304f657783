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

//! Packet fan-out with per-endpoint backlog limits.

use crate::error::{Result, StreamError};
use crate::observability::events;
use crate::pipe::{Pipe, PipeConnectCallback, PipeEndpoint};
use crate::types::{ConnectionId, Payload, Role};
use futures::future::join_all;
use futures::FutureExt;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info, warn};

const COMPONENT: &str = "pipe_broadcaster";

/// Decides per send whether an endpoint gets the packet.
pub type PipeBroadcastPredicate = Arc<dyn Fn(ConnectionId, i32) -> bool + Send + Sync>;

struct BroadcasterInner {
    pipe: Pipe,
    max_backlog: Mutex<Option<usize>>,
    predicate: Mutex<Option<PipeBroadcastPredicate>>,
}

/// Sends every packet to every connected endpoint of a service pipe.
///
/// With a max backlog set, endpoints request packet acks and an endpoint
/// whose unacknowledged count reached the limit is skipped until the client
/// drains its queue.
#[derive(Clone)]
pub struct PipeBroadcaster {
    inner: Arc<BroadcasterInner>,
}

impl PipeBroadcaster {
    /// Takes over the connect callback of `pipe`.
    pub fn new(pipe: Pipe, max_backlog: Option<usize>) -> Result<PipeBroadcaster> {
        if pipe.role() != Role::Service {
            return Err(StreamError::invalid_operation(
                "pipe broadcasters are only available on the service side",
            ));
        }
        if !pipe.direction().can_send(Role::Service) {
            return Err(StreamError::invalid_operation(format!(
                "pipe {} cannot send from the service side",
                pipe.member_name()
            )));
        }

        let inner = Arc::new(BroadcasterInner {
            pipe: pipe.clone(),
            max_backlog: Mutex::new(max_backlog),
            predicate: Mutex::new(None),
        });
        let weak = Arc::downgrade(&inner);
        let on_connect: PipeConnectCallback = Arc::new(move |endpoint: PipeEndpoint| {
            let weak: Weak<BroadcasterInner> = weak.clone();
            async move {
                let inner = weak.upgrade().ok_or_else(|| {
                    StreamError::invalid_operation("pipe broadcaster was dropped")
                })?;
                inner.accept(&endpoint);
                Ok(())
            }
            .boxed()
        });
        pipe.set_connect_callback(on_connect)?;
        Ok(PipeBroadcaster { inner })
    }

    pub fn pipe(&self) -> &Pipe {
        &self.inner.pipe
    }

    pub fn max_backlog(&self) -> Option<usize> {
        *self.inner.max_backlog.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Changes the backlog limit; connected endpoints follow immediately.
    pub fn set_max_backlog(&self, max_backlog: Option<usize>) {
        *self.inner.max_backlog.lock().unwrap_or_else(|p| p.into_inner()) = max_backlog;
        for endpoint in self.inner.pipe.endpoints() {
            endpoint.set_request_packet_ack(max_backlog.is_some());
        }
    }

    pub fn set_predicate(&self, predicate: Option<PipeBroadcastPredicate>) {
        *self.inner.predicate.lock().unwrap_or_else(|p| p.into_inner()) = predicate;
    }

    pub fn active_endpoint_count(&self) -> usize {
        self.inner.pipe.active_endpoint_count()
    }

    pub fn endpoints(&self) -> Vec<PipeEndpoint> {
        self.inner.pipe.endpoints()
    }

    /// Sends `payload` to every eligible endpoint and returns how many
    /// endpoints accepted it. Failures on single endpoints are logged, not
    /// returned.
    pub async fn send_packet(&self, payload: Payload) -> Result<usize> {
        let max_backlog = self.max_backlog();
        let predicate = self
            .inner
            .predicate
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();

        let targets: Vec<PipeEndpoint> = self
            .inner
            .pipe
            .endpoints()
            .into_iter()
            .filter(|endpoint| !endpoint.is_closed())
            .filter(|endpoint| {
                predicate
                    .as_ref()
                    .map_or(true, |allow| allow(endpoint.peer(), endpoint.index()))
            })
            .collect();

        let sends = targets.iter().map(|endpoint| {
            let payload = payload.clone();
            async move {
                let res = endpoint
                    .send_packet_within_backlog(payload, max_backlog)
                    .await;
                (endpoint, res)
            }
        });
        let mut delivered = 0;
        for (endpoint, res) in join_all(sends).await {
            match res {
                Ok(Some(_)) => delivered += 1,
                Ok(None) => debug!(
                    event = events::BROADCAST_BACKLOG_FULL,
                    component = COMPONENT,
                    member = self.inner.pipe.member_name(),
                    peer = %endpoint.peer(),
                    index = endpoint.index(),
                    "skipping endpoint at its backlog limit"
                ),
                Err(err) => warn!(
                    event = events::BROADCAST_SEND_FAILED,
                    component = COMPONENT,
                    member = self.inner.pipe.member_name(),
                    peer = %endpoint.peer(),
                    index = endpoint.index(),
                    err = %err,
                    "broadcast send failed"
                ),
            }
        }
        Ok(delivered)
    }
}

impl BroadcasterInner {
    fn accept(&self, endpoint: &PipeEndpoint) {
        let backlog = *self.max_backlog.lock().unwrap_or_else(|p| p.into_inner());
        endpoint.set_request_packet_ack(backlog.is_some());
        info!(
            event = events::BROADCAST_ENDPOINT_ACCEPTED,
            component = COMPONENT,
            member = self.pipe.member_name(),
            peer = %endpoint.peer(),
            index = endpoint.index(),
            max_backlog = ?backlog,
            "endpoint joined broadcast"
        );
    }
}
