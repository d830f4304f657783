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

//! # streamlink
//!
//! `streamlink` is the streaming-member and subscription layer of an object
//! RPC runtime. It sits on top of a transport that already knows how to
//! deliver one-way messages and unary calls between the two ends of an
//! object connection (see [`transport`]), and adds:
//!
//! - [`Pipe`] / [`PipeEndpoint`]: indexed packet streams with optional acks.
//! - [`Wire`] / [`WireConnection`]: most-recent-value channels with
//!   timestamps and lifespans.
//! - [`PipeBroadcaster`], [`WireBroadcaster`] and [`WireUnicastReceiver`]:
//!   service-side fan-out and fan-in helpers.
//! - [`Generator`] / [`GeneratorService`]: remote cursors.
//! - [`ServiceSubscription`] and its wire, pipe and sub-object
//!   subscriptions: connections that come back on their own.
//! - [`ServiceSubscriptionManager`]: a named, configurable table of
//!   subscriptions.
//!
//! ## Layout
//!
//! - `types`, `error`, `config`: shared vocabulary, [`StreamError`] and the
//!   JSON5-loadable [`StreamlinkConfig`] / [`ManagerConfig`].
//! - `transport`: the boundary traits a concrete transport implements.
//! - `member_def`, `skeleton`, `client`: per-type member tables, the
//!   service-side object skeleton and the client-side object handle.
//! - `pipe`, `wire`, `broadcast`, `generator`: member facades.
//! - `subscription`: reconnecting subscriptions and the manager.
//! - `event_hook`, `observability`, `runtime`: event fan-out, structured
//!   log vocabulary and dispatch loops.
//!
//! Library code only emits `tracing` events; installing a subscriber is up
//! to the application.
//!
//! ## Service paths
//!
//! ```
//! use streamlink::ServicePath;
//!
//! let path: ServicePath = "robot.arms[left].gripper".parse().unwrap();
//! assert_eq!(path.service_name(), Some("robot"));
//! assert_eq!(path.object_refs().len(), 2);
//!
//! let any: ServicePath = "*.arms[left]".parse().unwrap();
//! assert!(any.matches_service("other_robot"));
//! ```

pub mod broadcast;
pub mod client;
pub mod config;
pub mod error;
pub mod event_hook;
pub mod generator;
pub mod member_def;
pub mod observability;
pub mod pipe;
pub(crate) mod runtime;
pub mod service_path;
pub mod skeleton;
pub mod subscription;
pub mod transport;
pub mod types;
pub mod wire;

pub use broadcast::{
    PipeBroadcastPredicate, PipeBroadcaster, UnicastEvent, WireBroadcastPredicate,
    WireBroadcaster, WireUnicastReceiver,
};
pub use client::ServiceClient;
pub use config::{ManagerConfig, StreamlinkConfig};
pub use error::{Result, StreamError};
pub use event_hook::{EventHook, EventListenerHandle};
pub use generator::{
    Generator, GeneratorFactory, GeneratorService, GeneratorSource, GeneratorState, IterGenerator,
};
pub use member_def::{GeneratorMemberDef, MemberDef, ObjectTypeDef, PipeMemberDef, WireMemberDef};
pub use pipe::{Pipe, PipeConnectCallback, PipeEndpoint, PipeEndpointEvent};
pub use service_path::{ServicePath, ServicePathSegment};
pub use skeleton::{ServiceSkeleton, SkeletonMember};
pub use subscription::{
    AttributeGroup, FilterNode, MatchOperation, PipeSubscription, PipeSubscriptionEvent,
    ServicePredicate, ServiceSubscription, ServiceSubscriptionFilter, ServiceSubscriptionManager,
    ServiceSubscriptionManagerDetails, SubObjectSubscription, SubscriptionClientId,
    SubscriptionEvent, WireSubscription, WireSubscriptionEvent,
};
pub use transport::{
    NodeCredentials, ObjectConnection, ServiceConnector, ServiceDiscovery, ServiceInfo,
};
pub use types::{ConnectionId, MemberDirection, NodeId, Payload, Role, ANY_INDEX};
pub use wire::{Wire, WireConnection, WireConnectionEvent};
