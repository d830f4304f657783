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

//! Auto-reconnecting subscriptions to services and their members.
//!
//! A [`ServiceSubscription`] keeps connections to one service (by URL) or
//! to every discovered service of some types. Member subscriptions built
//! on top of it follow one wire, pipe or sub-object across all of those
//! connections and survive reconnects.

pub(crate) mod client_id;
pub(crate) mod filter;
pub(crate) mod manager;
pub(crate) mod member_tracker;
pub(crate) mod pipe_subscription;
pub(crate) mod service_subscription;
pub(crate) mod sub_object_subscription;
pub(crate) mod wire_subscription;

pub use client_id::SubscriptionClientId;
pub use filter::{
    AttributeGroup, FilterNode, MatchOperation, ServicePredicate, ServiceSubscriptionFilter,
};
pub use manager::{ServiceSubscriptionManager, ServiceSubscriptionManagerDetails};
pub use pipe_subscription::{PipeSubscription, PipeSubscriptionEvent};
pub use service_subscription::{ServiceSubscription, SubscriptionEvent};
pub use sub_object_subscription::SubObjectSubscription;
pub use wire_subscription::{WireSubscription, WireSubscriptionEvent};
