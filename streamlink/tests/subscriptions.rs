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

mod support;

use integration_test_utils::{LoopbackNetwork, ServiceOptions};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use streamlink::{
    FilterNode, PipeSubscriptionEvent, ServiceInfo, ServiceSubscription,
    ServiceSubscriptionFilter, StreamError, SubscriptionEvent,
};
use support::{
    eventually, next_event, start_reporter, start_reporter_with, test_config, REPORTER_TYPE, WAIT,
};

fn by_type(network: &LoopbackNetwork, filter: Option<ServiceSubscriptionFilter>) -> ServiceSubscription {
    ServiceSubscription::for_type(
        network.connector(),
        network.discovery(),
        vec![REPORTER_TYPE.to_string()],
        filter,
        test_config(),
    )
    .unwrap()
}

fn connected_services(subscription: &ServiceSubscription) -> BTreeSet<String> {
    subscription
        .connected_clients()
        .keys()
        .map(|id| id.service_name.clone())
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn url_subscription_reconnects_after_service_restart() {
    integration_test_utils::init_logging();
    let network = LoopbackNetwork::new();
    let reporter = start_reporter(&network, "node-a", "reporter").await;
    let url = reporter.host.url();

    let subscription =
        ServiceSubscription::for_urls(network.connector(), vec![url.clone()], test_config())
            .unwrap();
    let mut events = subscription.subscribe();
    let first = subscription.default_client_wait(Some(WAIT)).await.unwrap();
    assert_eq!(first.service_name(), "reporter");

    reporter.host.stop().await;
    drop(reporter);
    let SubscriptionEvent::ClientDisconnected { id, client } = next_event(&mut events, |e| {
        matches!(e, SubscriptionEvent::ClientDisconnected { .. })
    })
    .await
    else {
        unreachable!()
    };
    assert_eq!(id.service_name, "reporter");
    assert!(client.ptr_eq(&first));
    assert!(matches!(
        subscription.default_client(),
        Err(StreamError::ConnectionFailed(_))
    ));

    // While stopped, attempts fail and are reported.
    next_event(&mut events, |e| {
        matches!(e, SubscriptionEvent::ClientConnectFailed { .. })
    })
    .await;

    let restarted_at = Instant::now();
    let _reporter = start_reporter(&network, "node-a", "reporter").await;
    next_event(&mut events, |e| {
        matches!(e, SubscriptionEvent::ClientConnected { .. })
    })
    .await;
    assert!(restarted_at.elapsed() < subscription.connect_retry_delay() + Duration::from_secs(1));

    let second = subscription.default_client_wait(Some(WAIT)).await.unwrap();
    assert!(!second.ptr_eq(&first));
    assert!(!second.is_closed());

    subscription.close().await.unwrap();
    assert!(second.is_closed());
    assert!(matches!(
        subscription.default_client(),
        Err(StreamError::InvalidOperation(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn type_subscription_follows_discovery() {
    integration_test_utils::init_logging();
    let network = LoopbackNetwork::new();
    let left = start_reporter(&network, "node-a", "left").await;
    let subscription = by_type(&network, None);
    eventually("left connected", || {
        connected_services(&subscription) == BTreeSet::from(["left".to_string()])
    })
    .await;

    let _right = start_reporter(&network, "node-b", "right").await;
    eventually("both connected", || subscription.connected_clients().len() == 2).await;

    left.host.stop().await;
    eventually("left dropped", || {
        connected_services(&subscription) == BTreeSet::from(["right".to_string()])
    })
    .await;

    // Services that are not reporters are ignored.
    let _other = network
        .start_service("node-c", "other", support::arm_type())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(subscription.connected_clients().len(), 1);
    subscription.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn filter_rejects_services_and_caps_connections() {
    integration_test_utils::init_logging();
    let network = LoopbackNetwork::new();
    let _a = start_reporter(&network, "node-a", "alpha").await;
    let _b = start_reporter(&network, "node-b", "beta").await;
    let _c = start_reporter(&network, "node-c", "gamma").await;
    let _d = start_reporter(&network, "node-d", "delta").await;
    let _e = start_reporter(&network, "node-e", "intruder").await;

    let filter = ServiceSubscriptionFilter {
        service_names: vec!["alpha".into(), "beta".into(), "gamma".into(), "delta".into()],
        max_connections: Some(2),
        ..Default::default()
    }
    .with_predicate(Arc::new(|info: &ServiceInfo| info.node_name != "node-b"));
    let subscription = by_type(&network, Some(filter));

    eventually("two connections", || subscription.connected_clients().len() == 2).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let connected = connected_services(&subscription);
    assert_eq!(connected.len(), 2);
    let allowed = BTreeSet::from(["alpha".to_string(), "gamma".to_string(), "delta".to_string()]);
    assert!(connected.is_subset(&allowed), "unexpected services {connected:?}");
    subscription.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn filter_credentials_reach_services_that_require_them() {
    integration_test_utils::init_logging();
    let network = LoopbackNetwork::new();
    let options = ServiceOptions {
        required_username: Some("operator".into()),
        ..Default::default()
    };
    let _guarded = start_reporter_with(&network, "node-a", "guarded", options).await;

    let anonymous = by_type(&network, None);
    let mut failures = anonymous.subscribe();
    next_event(&mut failures, |e| {
        matches!(e, SubscriptionEvent::ClientConnectFailed { .. })
    })
    .await;
    assert!(anonymous.connected_clients().is_empty());
    anonymous.close().await.unwrap();

    let filter = ServiceSubscriptionFilter {
        nodes: vec![FilterNode {
            node_name: Some("node-a".into()),
            username: Some("operator".into()),
            ..Default::default()
        }],
        ..Default::default()
    };
    let authenticated = by_type(&network, Some(filter));
    let client = authenticated.default_client_wait(Some(WAIT)).await.unwrap();
    assert_eq!(client.service_name(), "guarded");
    authenticated.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn claimed_client_outlives_the_subscription() {
    integration_test_utils::init_logging();
    let network = LoopbackNetwork::new();
    let reporter = start_reporter(&network, "node-a", "reporter").await;
    let subscription = ServiceSubscription::for_urls(
        network.connector(),
        vec![reporter.host.url()],
        test_config(),
    )
    .unwrap();
    let client = subscription.default_client_wait(Some(WAIT)).await.unwrap();

    subscription.claim_client(&client).unwrap();
    subscription.close().await.unwrap();
    assert!(!client.is_closed());
    assert_eq!(reporter.host.connection_count(), 1);

    assert!(matches!(
        subscription.release_client(&client),
        Err(StreamError::NotFound(_))
    ));
    client.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn updating_urls_moves_the_subscription() {
    integration_test_utils::init_logging();
    let network = LoopbackNetwork::new();
    let first = start_reporter(&network, "node-a", "first").await;
    let second = start_reporter(&network, "node-b", "second").await;

    let subscription =
        ServiceSubscription::for_urls(network.connector(), vec![first.host.url()], test_config())
            .unwrap();
    subscription.default_client_wait(Some(WAIT)).await.unwrap();

    subscription
        .update_service_urls(vec![second.host.url()], true)
        .await
        .unwrap();
    eventually("switch to second", || {
        connected_services(&subscription) == BTreeSet::from(["second".to_string()])
    })
    .await;
    eventually("first released", || first.host.connection_count() == 0).await;

    assert!(matches!(
        subscription
            .update_service_by_type(vec![REPORTER_TYPE.into()], None, true)
            .await,
        Err(StreamError::InvalidOperation(_))
    ));
    subscription.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn wire_subscription_reports_the_newest_value_of_any_service() {
    integration_test_utils::init_logging();
    let network = LoopbackNetwork::new();
    let left = start_reporter(&network, "node-a", "left").await;
    let right = start_reporter(&network, "node-b", "right").await;
    let subscription = by_type(&network, None);

    let wire = subscription.subscribe_wire("status", None).unwrap();
    assert_eq!(wire.member_name(), "status");
    eventually("both wires", || wire.active_wire_connection_count() == 2).await;
    assert!(matches!(wire.in_value(), Err(StreamError::ValueNotSet(_))));

    let mut events = wire.subscribe();
    left.root
        .wire_broadcaster("status")
        .unwrap()
        .set_out_value(json!("left-ready"))
        .await
        .unwrap();
    next_event(&mut events, |_| true).await;
    let (value, _, source) = wire.try_get_in_value().unwrap();
    assert_eq!(value, json!("left-ready"));
    assert_eq!(source.service_name, "left");

    right
        .root
        .wire_broadcaster("status")
        .unwrap()
        .set_out_value(json!("right-ready"))
        .await
        .unwrap();
    next_event(&mut events, |_| true).await;
    let (value, _, source) = wire.try_get_in_value().unwrap();
    assert_eq!(value, json!("right-ready"));
    assert_eq!(source.service_name, "right");

    right.host.stop().await;
    eventually("right wire dropped", || wire.active_wire_connection_count() == 1).await;

    wire.close().await;
    assert!(wire.is_closed());
    assert_eq!(wire.active_wire_connection_count(), 0);
    subscription.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn wire_subscription_writes_to_every_service() {
    integration_test_utils::init_logging();
    let network = LoopbackNetwork::new();
    let left = start_reporter(&network, "node-a", "left").await;
    let right = start_reporter(&network, "node-b", "right").await;
    let subscription = by_type(&network, None);

    let wire = subscription.subscribe_wire("setpoint", None).unwrap();
    eventually("both wires", || wire.active_wire_connection_count() == 2).await;
    assert_eq!(wire.set_out_value_all(json!(42)).await.unwrap(), 2);

    for reporter in [&left, &right] {
        let receiver = reporter.root.wire_unicast_receiver("setpoint").unwrap();
        receiver.wait_in_value_valid(Some(WAIT)).await.unwrap();
        assert_eq!(receiver.in_value().unwrap(), json!(42));
    }
    subscription.close().await.unwrap();
    assert!(wire.is_closed());
}

#[tokio::test(flavor = "multi_thread")]
async fn pipe_subscription_merges_packets_from_every_service() {
    integration_test_utils::init_logging();
    let network = LoopbackNetwork::new();
    let left = start_reporter(&network, "node-a", "left").await;
    let right = start_reporter(&network, "node-b", "right").await;
    let subscription = by_type(&network, None);

    let pipe = subscription.subscribe_pipe("readings", None, None).unwrap();
    eventually("both endpoints", || pipe.active_pipe_endpoint_count() == 2).await;

    let mut events = pipe.subscribe();
    left.root
        .pipe_broadcaster("readings")
        .unwrap()
        .send_packet(json!("from-left"))
        .await
        .unwrap();
    assert_eq!(
        next_event(&mut events, |_| true).await,
        PipeSubscriptionEvent::PacketReceived
    );
    let (packet, source, endpoint) = pipe.try_receive_packet().unwrap();
    assert_eq!(packet, json!("from-left"));
    assert_eq!(source.service_name, "left");
    assert_eq!(endpoint.member_name(), "readings");

    right
        .root
        .pipe_broadcaster("readings")
        .unwrap()
        .send_packet(json!("from-right"))
        .await
        .unwrap();
    assert_eq!(
        pipe.receive_packet_wait(Some(WAIT)).await.unwrap(),
        json!("from-right")
    );
    assert!(matches!(
        pipe.receive_packet(),
        Err(StreamError::InvalidOperation(_))
    ));

    let commands = subscription.subscribe_pipe("commands", None, None).unwrap();
    eventually("command endpoints", || commands.active_pipe_endpoint_count() == 2).await;
    assert_eq!(commands.async_send_packet_all(json!("halt")).await.unwrap(), 2);
    for reporter in [&left, &right] {
        let service_pipe = reporter.root.pipe("commands").unwrap();
        let endpoint = service_pipe.endpoints().pop().unwrap();
        assert_eq!(
            endpoint.receive_packet_wait(Some(WAIT)).await.unwrap(),
            json!("halt")
        );
    }
    subscription.close().await.unwrap();
    assert!(pipe.is_closed());
}

#[tokio::test(flavor = "multi_thread")]
async fn pipe_subscription_drops_oldest_packets_at_its_limit() {
    integration_test_utils::init_logging();
    let network = LoopbackNetwork::new();
    let reporter = start_reporter(&network, "node-a", "reporter").await;
    let subscription = by_type(&network, None);

    let pipe = subscription.subscribe_pipe("readings", None, Some(2)).unwrap();
    assert_eq!(pipe.max_recv_packets(), Some(2));
    let broadcaster = reporter.root.pipe_broadcaster("readings").unwrap();
    // Acks make it observable when the subscription has drained everything.
    broadcaster.set_max_backlog(Some(16));
    eventually("endpoint", || pipe.active_pipe_endpoint_count() == 1).await;

    for n in 1..=3 {
        broadcaster.send_packet(json!(n)).await.unwrap();
    }
    let service_endpoint = broadcaster.endpoints().pop().unwrap();
    eventually("all packets drained", || {
        service_endpoint.unacked_packet_count() == 0
    })
    .await;

    assert_eq!(pipe.available(), 2);
    assert_eq!(pipe.receive_packet().unwrap(), json!(2));
    assert_eq!(pipe.receive_packet().unwrap(), json!(3));
    subscription.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn sub_object_subscriptions_resolve_paths_on_connected_services() {
    integration_test_utils::init_logging();
    let network = LoopbackNetwork::new();
    let subscription = by_type(&network, None);
    let arm = subscription.subscribe_sub_object("*.arms[left]").unwrap();
    assert!(matches!(
        arm.default_client_wait(Some(Duration::from_millis(100))).await,
        Err(StreamError::ConnectionFailed(_))
    ));

    let reporter = start_reporter(&network, "node-a", "reporter").await;
    let client = arm.default_client_wait(Some(WAIT)).await.unwrap();
    assert_eq!(client.service_path(), "reporter.arms[left]");

    let position = subscription
        .subscribe_wire("position", Some("*.arms[left]"))
        .unwrap();
    reporter
        .arm
        .wire_broadcaster("position")
        .unwrap()
        .set_out_value(json!([0.5, 0.25]))
        .await
        .unwrap();
    position.wait_in_value_valid(Some(WAIT)).await.unwrap();
    assert_eq!(position.in_value().unwrap(), json!([0.5, 0.25]));

    subscription.close().await.unwrap();
    assert!(arm.is_closed());
    assert!(position.is_closed());
    assert!(matches!(
        arm.default_client().await,
        Err(StreamError::InvalidOperation(_))
    ));
}
