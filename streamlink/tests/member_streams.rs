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

use serde_json::json;
use std::time::Duration;
use streamlink::{GeneratorState, StreamError, UnicastEvent, ANY_INDEX};
use support::{connect_client, eventually, next_event, start_reporter, WAIT};

use integration_test_utils::LoopbackNetwork;

#[tokio::test(flavor = "multi_thread")]
async fn reliable_pipe_delivers_packets_in_send_order() {
    integration_test_utils::init_logging();
    let network = LoopbackNetwork::new();
    let reporter = start_reporter(&network, "node-a", "reporter").await;
    let client = connect_client(&network, &reporter.host.url()).await;

    let endpoint = client
        .pipe("commands")
        .await
        .unwrap()
        .connect(ANY_INDEX)
        .await
        .unwrap();
    assert_eq!(endpoint.index(), 1);

    let service_pipe = reporter.root.pipe("commands").unwrap();
    let service_endpoint = service_pipe.endpoints().pop().unwrap();
    assert_eq!(service_endpoint.index(), 1);

    for n in 0..50 {
        endpoint.send_packet(json!(n)).await.unwrap();
    }
    for n in 0..50 {
        let packet = service_endpoint.receive_packet_wait(Some(WAIT)).await.unwrap();
        assert_eq!(packet, json!(n));
    }
    assert_eq!(service_endpoint.available(), 0);

    // Writeonly pipes refuse sends from the service side.
    assert!(matches!(
        service_endpoint.send_packet(json!("nope")).await,
        Err(StreamError::InvalidOperation(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn closing_a_pipe_endpoint_closes_its_peer() {
    integration_test_utils::init_logging();
    let network = LoopbackNetwork::new();
    let reporter = start_reporter(&network, "node-a", "reporter").await;
    let client = connect_client(&network, &reporter.host.url()).await;

    let endpoint = client
        .pipe("commands")
        .await
        .unwrap()
        .connect(ANY_INDEX)
        .await
        .unwrap();
    let service_pipe = reporter.root.pipe("commands").unwrap();
    let service_endpoint = service_pipe.endpoints().pop().unwrap();

    endpoint.close().await.unwrap();
    tokio::time::timeout(WAIT, service_endpoint.wait_closed())
        .await
        .unwrap();
    eventually("service endpoint removal", || {
        service_pipe.active_endpoint_count() == 0
    })
    .await;
    assert!(matches!(
        service_endpoint.receive_packet_wait(Some(WAIT)).await,
        Err(StreamError::InvalidOperation(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn pipe_broadcaster_skips_endpoints_at_backlog_limit() {
    integration_test_utils::init_logging();
    let network = LoopbackNetwork::new();
    let reporter = start_reporter(&network, "node-a", "reporter").await;
    let client = connect_client(&network, &reporter.host.url()).await;

    let broadcaster = reporter.root.pipe_broadcaster("readings").unwrap();
    broadcaster.set_max_backlog(Some(3));
    let endpoint = client
        .pipe("readings")
        .await
        .unwrap()
        .connect(ANY_INDEX)
        .await
        .unwrap();
    eventually("broadcaster endpoint", || {
        broadcaster.active_endpoint_count() == 1
    })
    .await;

    let mut delivered = Vec::new();
    for n in 1..=5 {
        delivered.push(broadcaster.send_packet(json!(n)).await.unwrap());
    }
    assert_eq!(delivered, vec![1, 1, 1, 0, 0]);

    // Consuming one packet acknowledges it and frees exactly one slot.
    assert_eq!(endpoint.receive_packet_wait(Some(WAIT)).await.unwrap(), json!(1));
    let service_endpoint = broadcaster.endpoints().pop().unwrap();
    eventually("ack for the consumed packet", || {
        service_endpoint.unacked_packet_count() == 2
    })
    .await;
    assert_eq!(broadcaster.send_packet(json!(6)).await.unwrap(), 1);
    assert_eq!(broadcaster.send_packet(json!(7)).await.unwrap(), 0);

    for expected in [2, 3, 6] {
        assert_eq!(
            endpoint.receive_packet_wait(Some(WAIT)).await.unwrap(),
            json!(expected)
        );
    }
    assert_eq!(endpoint.available(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn wire_keeps_only_the_most_recent_value() {
    integration_test_utils::init_logging();
    let network = LoopbackNetwork::new();
    let reporter = start_reporter(&network, "node-a", "reporter").await;
    let client = connect_client(&network, &reporter.host.url()).await;

    let connection = client.wire("level").await.unwrap().connect().await.unwrap();
    let service_wire = reporter.root.wire("level").unwrap();
    let service_connection = service_wire.connections().pop().unwrap();
    assert!(matches!(
        service_connection.in_value(),
        Err(StreamError::ValueNotSet(_))
    ));

    for n in 1..=10 {
        connection.set_out_value(json!(n)).await.unwrap();
    }
    eventually("latest wire value", || {
        service_connection.try_get_in_value().map(|(value, _)| value) == Some(json!(10))
    })
    .await;
    assert_eq!(connection.out_value().unwrap(), json!(10));

    service_connection.set_out_value(json!("ack")).await.unwrap();
    connection.wait_in_value_valid(Some(WAIT)).await.unwrap();
    assert_eq!(connection.in_value().unwrap(), json!("ack"));

    // A second connect on the same client wire is refused while open.
    assert!(matches!(
        client.wire("level").await.unwrap().connect().await,
        Err(StreamError::InvalidOperation(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn wire_value_expires_after_its_lifespan() {
    integration_test_utils::init_logging();
    let network = LoopbackNetwork::new();
    let reporter = start_reporter(&network, "node-a", "reporter").await;
    let client = connect_client(&network, &reporter.host.url()).await;

    let broadcaster = reporter.root.wire_broadcaster("status").unwrap();
    broadcaster.set_out_value(json!("ready")).await.unwrap();

    let connection = client.wire("status").await.unwrap().connect().await.unwrap();
    connection.set_in_value_lifespan(Some(Duration::from_millis(200)));
    connection.wait_in_value_valid(Some(WAIT)).await.unwrap();
    assert_eq!(connection.in_value().unwrap(), json!("ready"));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(matches!(
        connection.in_value(),
        Err(StreamError::ValueNotSet(_))
    ));
    assert!(!connection.in_value_valid());

    broadcaster.set_out_value(json!("busy")).await.unwrap();
    connection.wait_in_value_valid(Some(WAIT)).await.unwrap();
    assert_eq!(connection.in_value().unwrap(), json!("busy"));
}

#[tokio::test(flavor = "multi_thread")]
async fn wire_peek_and_poke_work_without_a_connection() {
    integration_test_utils::init_logging();
    let network = LoopbackNetwork::new();
    let reporter = start_reporter(&network, "node-a", "reporter").await;
    let client = connect_client(&network, &reporter.host.url()).await;

    let broadcaster = reporter.root.wire_broadcaster("status").unwrap();
    assert!(matches!(
        client.wire("status").await.unwrap().peek_in_value().await,
        Err(StreamError::ValueNotSet(_))
    ));
    broadcaster.set_out_value(json!("idle")).await.unwrap();
    let (value, _) = client.wire("status").await.unwrap().peek_in_value().await.unwrap();
    assert_eq!(value, json!("idle"));

    let receiver = reporter.root.wire_unicast_receiver("setpoint").unwrap();
    client
        .wire("setpoint")
        .await
        .unwrap()
        .poke_out_value(json!(21.5))
        .await
        .unwrap();
    assert_eq!(receiver.in_value().unwrap(), json!(21.5));
}

#[tokio::test(flavor = "multi_thread")]
async fn unicast_receiver_follows_the_newest_connection() {
    integration_test_utils::init_logging();
    let network = LoopbackNetwork::new();
    let reporter = start_reporter(&network, "node-a", "reporter").await;
    let first = connect_client(&network, &reporter.host.url()).await;
    let second = connect_client(&network, &reporter.host.url()).await;

    let receiver = reporter.root.wire_unicast_receiver("setpoint").unwrap();
    let mut events = receiver.subscribe();

    let first_connection = first.wire("setpoint").await.unwrap().connect().await.unwrap();
    first_connection.set_out_value(json!(1)).await.unwrap();
    let UnicastEvent::InValueChanged { value, peer, .. } =
        next_event(&mut events, |_| true).await;
    assert_eq!(value, json!(1));
    let first_peer = peer;
    assert_eq!(receiver.active_peer(), Some(first_peer));

    let second_connection = second.wire("setpoint").await.unwrap().connect().await.unwrap();
    eventually("active peer switch", || {
        receiver.active_peer().is_some_and(|peer| peer != first_peer)
    })
    .await;
    second_connection.set_out_value(json!(2)).await.unwrap();
    let UnicastEvent::InValueChanged { value, peer, .. } =
        next_event(&mut events, |_| true).await;
    assert_eq!(value, json!(2));
    assert_ne!(peer, first_peer);
    assert_eq!(receiver.in_value().unwrap(), json!(2));
}

#[tokio::test(flavor = "multi_thread")]
async fn generator_runs_to_the_end_of_its_sequence() {
    integration_test_utils::init_logging();
    let network = LoopbackNetwork::new();
    let reporter = start_reporter(&network, "node-a", "reporter").await;
    let client = connect_client(&network, &reporter.host.url()).await;
    let service = reporter.root.generator("count").unwrap();

    let generator = client.generator("count", json!(3)).await.unwrap();
    assert_eq!(service.active_generator_count(), 1);
    for n in 0..3 {
        assert_eq!(generator.next(None).await.unwrap(), json!(n));
    }
    assert_eq!(generator.next(None).await, Err(StreamError::StopIteration));
    assert_eq!(generator.state(), GeneratorState::Closed);
    eventually("generator release", || service.active_generator_count() == 0).await;

    let drained = client.generator("count", json!(2)).await.unwrap();
    assert_eq!(drained.next_all().await.unwrap(), vec![json!(0), json!(1)]);
}

#[tokio::test(flavor = "multi_thread")]
async fn aborted_generator_refuses_further_steps() {
    integration_test_utils::init_logging();
    let network = LoopbackNetwork::new();
    let reporter = start_reporter(&network, "node-a", "reporter").await;
    let client = connect_client(&network, &reporter.host.url()).await;
    let service = reporter.root.generator("count").unwrap();

    let generator = client.generator("count", json!(10)).await.unwrap();
    assert_eq!(generator.next(None).await.unwrap(), json!(0));
    generator.abort().await.unwrap();
    assert_eq!(generator.state(), GeneratorState::Aborted);
    assert!(matches!(
        generator.next(None).await,
        Err(StreamError::OperationAborted(_))
    ));
    eventually("generator release", || service.active_generator_count() == 0).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn generator_with_parameters_takes_one_per_step() {
    integration_test_utils::init_logging();
    let network = LoopbackNetwork::new();
    let reporter = start_reporter(&network, "node-a", "reporter").await;
    let client = connect_client(&network, &reporter.host.url()).await;

    let generator = client.generator("accumulate", json!(null)).await.unwrap();
    assert_eq!(generator.next(Some(json!(2))).await.unwrap(), json!(2));
    assert_eq!(generator.next(Some(json!(3))).await.unwrap(), json!(5));
    assert!(matches!(
        generator.next(None).await,
        Err(StreamError::InvalidArgument(_))
    ));
    assert!(matches!(
        generator.next_all().await,
        Err(StreamError::InvalidOperation(_))
    ));
    generator.close().await.unwrap();
    assert_eq!(generator.state(), GeneratorState::Closed);
}

#[tokio::test(flavor = "multi_thread")]
async fn sub_object_members_are_reached_through_references() {
    integration_test_utils::init_logging();
    let network = LoopbackNetwork::new();
    let reporter = start_reporter(&network, "node-a", "reporter").await;
    let client = connect_client(&network, &reporter.host.url()).await;

    reporter
        .arm
        .wire_broadcaster("position")
        .unwrap()
        .set_out_value(json!([1.0, 2.0]))
        .await
        .unwrap();

    let arm = client.sub_object("arms", Some("left")).await.unwrap();
    assert_eq!(arm.service_path(), "reporter.arms[left]");
    assert_eq!(arm.object_type().name, support::ARM_TYPE);
    let connection = arm.wire("position").await.unwrap().connect().await.unwrap();
    connection.wait_in_value_valid(Some(WAIT)).await.unwrap();
    assert_eq!(connection.in_value().unwrap(), json!([1.0, 2.0]));

    assert!(matches!(
        client.sub_object("arms", Some("right")).await,
        Err(StreamError::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn closing_the_client_closes_its_members() {
    integration_test_utils::init_logging();
    let network = LoopbackNetwork::new();
    let reporter = start_reporter(&network, "node-a", "reporter").await;
    let client = connect_client(&network, &reporter.host.url()).await;

    let endpoint = client
        .pipe("commands")
        .await
        .unwrap()
        .connect(ANY_INDEX)
        .await
        .unwrap();
    let connection = client.wire("level").await.unwrap().connect().await.unwrap();

    client.close().await.unwrap();
    assert!(client.is_closed());
    assert!(endpoint.is_closed());
    assert!(connection.is_closed());
    eventually("service side cleanup", || {
        reporter.host.connection_count() == 0
    })
    .await;
}
