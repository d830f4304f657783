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

use integration_test_utils::{LoopbackNetwork, ServiceOptions};
use std::sync::Arc;
use streamlink::transport::DiscoveryEvent;
use streamlink::{
    NodeCredentials, ObjectTypeDef, ServiceConnector, ServiceDiscovery, StreamError,
};

fn root_type() -> Arc<ObjectTypeDef> {
    Arc::new(ObjectTypeDef::new("demo.Reporter"))
}

#[tokio::test]
async fn connecting_needs_a_running_service() {
    let network = LoopbackNetwork::new();
    let url = network.service_url("node-a", "reporter");
    assert!(matches!(
        network.connect(&[url.clone()], None).await,
        Err(StreamError::ConnectionFailed(_))
    ));

    let host = network
        .start_service("node-a", "reporter", root_type())
        .unwrap();
    assert_eq!(host.url(), url);
    let connection = network.connect(&[url], None).await.unwrap();
    assert_eq!(connection.service_name(), "reporter");
    assert_eq!(connection.service_path(), "reporter");
    assert_eq!(connection.node_id(), network.node_id("node-a"));
    assert_eq!(host.connection_count(), 1);

    assert!(matches!(
        network.start_service("node-a", "reporter", root_type()),
        Err(StreamError::InvalidOperation(_))
    ));

    host.stop().await;
    tokio::time::timeout(std::time::Duration::from_secs(5), connection.wait_closed())
        .await
        .unwrap();
    assert!(connection.is_closed());
}

#[tokio::test]
async fn unreachable_urls_are_skipped() {
    let network = LoopbackNetwork::new();
    let _host = network
        .start_service("node-a", "reporter", root_type())
        .unwrap();
    let urls = vec![
        "tcp://10.0.0.1:4000/?service=reporter".to_string(),
        network.service_url("node-a", "reporter"),
    ];
    assert!(network.connect(&urls, None).await.is_ok());
}

#[tokio::test]
async fn guarded_services_check_the_username() {
    let network = LoopbackNetwork::new();
    let options = ServiceOptions {
        required_username: Some("operator".into()),
        ..Default::default()
    };
    let host = network
        .start_service_with("node-a", "guarded", root_type(), options)
        .unwrap();
    let urls = vec![host.url()];

    assert!(network.connect(&urls, None).await.is_err());
    let credentials = NodeCredentials {
        username: "operator".into(),
        credentials: Default::default(),
    };
    assert!(network.connect(&urls, Some(&credentials)).await.is_ok());
}

#[tokio::test]
async fn discovery_announces_started_and_stopped_services() {
    let network = LoopbackNetwork::new();
    let mut events = network.subscribe();

    let host = network
        .start_service_with(
            "node-a",
            "reporter",
            root_type(),
            ServiceOptions {
                implements: vec!["demo.Device".into()],
                ..Default::default()
            },
        )
        .unwrap();
    match events.recv().await.unwrap() {
        DiscoveryEvent::Detected(info) => {
            assert_eq!(info.service_name, "reporter");
            assert!(info.provides_type("demo.Device"));
            assert_eq!(info.connection_urls, vec![host.url()]);
        }
        other => panic!("expected a detected event, got {other:?}"),
    }
    assert_eq!(network.detected_services().len(), 1);

    host.stop().await;
    assert_eq!(
        events.recv().await.unwrap(),
        DiscoveryEvent::Lost {
            node_id: network.node_id("node-a"),
            service_name: "reporter".into(),
        }
    );
    assert!(network.detected_services().is_empty());
}
