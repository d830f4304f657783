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

#![allow(dead_code)]

use async_trait::async_trait;
use integration_test_utils::{LoopbackNetwork, ServiceHost, ServiceOptions};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use streamlink::{
    ConnectionId, GeneratorMemberDef, GeneratorSource, IterGenerator, MemberDirection, ObjectTypeDef, Payload,
    PipeMemberDef, Result, ServiceClient, ServiceConnector, ServiceSkeleton, StreamError,
    StreamlinkConfig, WireMemberDef,
};
use tokio::sync::broadcast;

pub(crate) const REPORTER_TYPE: &str = "demo.Reporter";
pub(crate) const ARM_TYPE: &str = "demo.Arm";
pub(crate) const LEFT_ARM: &str = "arms[left]";

pub(crate) const WAIT: Duration = Duration::from_secs(5);

pub(crate) fn reporter_type() -> Arc<ObjectTypeDef> {
    Arc::new(
        ObjectTypeDef::new(REPORTER_TYPE)
            .with_pipe(PipeMemberDef::new("commands", MemberDirection::Writeonly))
            .with_pipe(PipeMemberDef::new("readings", MemberDirection::Readonly))
            .with_wire(WireMemberDef::new("status", MemberDirection::Readonly))
            .with_wire(WireMemberDef::new("setpoint", MemberDirection::Writeonly))
            .with_wire(WireMemberDef::new("level", MemberDirection::Both))
            .with_generator(GeneratorMemberDef::new("count", false))
            .with_generator(GeneratorMemberDef::new("accumulate", true)),
    )
}

pub(crate) fn arm_type() -> Arc<ObjectTypeDef> {
    Arc::new(
        ObjectTypeDef::new(ARM_TYPE)
            .with_wire(WireMemberDef::new("position", MemberDirection::Readonly)),
    )
}

pub(crate) fn test_config() -> StreamlinkConfig {
    StreamlinkConfig::default().with_connect_retry_delay(Duration::from_secs(1))
}

/// Sums the parameters it is given.
struct Accumulator {
    total: i64,
}

#[async_trait]
impl GeneratorSource for Accumulator {
    async fn next(&mut self, param: Option<Payload>) -> Result<Payload> {
        let step = param
            .as_ref()
            .and_then(Payload::as_i64)
            .ok_or_else(|| StreamError::invalid_argument("accumulate takes integers"))?;
        self.total += step;
        Ok(json!(self.total))
    }
}

/// A running reporter service with a left arm sub-object.
pub(crate) struct Reporter {
    pub(crate) host: ServiceHost,
    pub(crate) root: ServiceSkeleton,
    pub(crate) arm: ServiceSkeleton,
}

pub(crate) async fn start_reporter(network: &LoopbackNetwork, node: &str, service: &str) -> Reporter {
    start_reporter_with(network, node, service, ServiceOptions::default()).await
}

pub(crate) async fn start_reporter_with(
    network: &LoopbackNetwork,
    node: &str,
    service: &str,
    options: ServiceOptions,
) -> Reporter {
    let config = test_config();
    let host = network
        .start_service_with(node, service, reporter_type(), options)
        .unwrap();
    let root = ServiceSkeleton::new(reporter_type(), host.transport(), service, &config)
        .await
        .unwrap();

    root.generator("count").unwrap().set_factory(Arc::new(|args: Payload, _peer: ConnectionId| {
        let limit = args.as_u64().unwrap_or(0);
        Ok(Box::new(IterGenerator::new((0..limit).map(|n| json!(n)))) as Box<dyn GeneratorSource>)
    }));
    root.generator("accumulate")
        .unwrap()
        .set_factory(Arc::new(|_args: Payload, _peer: ConnectionId| {
            Ok(Box::new(Accumulator { total: 0 }) as Box<dyn GeneratorSource>)
        }));

    let arm_path = format!("{service}.{LEFT_ARM}");
    host.add_sub_object(&arm_path, arm_type());
    let arm = ServiceSkeleton::new(arm_type(), host.transport(), &arm_path, &config)
        .await
        .unwrap();

    Reporter { host, root, arm }
}

pub(crate) async fn connect_client(network: &LoopbackNetwork, url: &str) -> ServiceClient {
    let connection = network.connect(&[url.to_string()], None).await.unwrap();
    ServiceClient::new(connection, test_config().event_capacity)
}

/// Polls `condition` until it holds, failing the test after [`WAIT`].
pub(crate) async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Next event accepted by `accept`, skipping the others.
pub(crate) async fn next_event<T: Clone>(
    events: &mut broadcast::Receiver<T>,
    mut accept: impl FnMut(&T) -> bool,
) -> T {
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if accept(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for an event")
}
