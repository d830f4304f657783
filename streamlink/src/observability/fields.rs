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

//! Canonical structured field keys and value-format helpers.

use crate::transport::MemberAddress;

pub const EVENT: &str = "event";
pub const COMPONENT: &str = "component";
pub const LISTENER_ID: &str = "listener_id";

pub const MEMBER: &str = "member";
pub const PEER: &str = "peer";
pub const INDEX: &str = "index";
pub const SEQ: &str = "seq";
pub const CLIENT_ID: &str = "client_id";
pub const URLS: &str = "urls";
pub const SUBSCRIPTION: &str = "subscription";

pub const SKIPPED: &str = "skipped";
pub const REASON: &str = "reason";
pub const ERR: &str = "err";

pub const NONE: &str = "none";
pub const REASON_BROADCAST_CLOSED: &str = "broadcast_closed";
pub const REASON_CALLBACK_REJECTED: &str = "callback_rejected";
pub const REASON_UNKNOWN_ENDPOINT: &str = "unknown_endpoint";
pub const REASON_SERVICE_NOT_DETECTED: &str = "service_not_detected";
pub const REASON_CLAIMED: &str = "claimed";
pub const REASON_SUPERSEDED: &str = "superseded";

/// Identifies one spawned listener loop in logs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DispatchContext {
    pub listener_id: String,
    pub component: &'static str,
}

impl DispatchContext {
    pub fn new(component: &'static str) -> Self {
        Self {
            listener_id: uuid::Uuid::new_v4().simple().to_string(),
            component,
        }
    }
}

pub fn format_address(address: &MemberAddress) -> String {
    address.to_string()
}

pub fn format_urls(urls: &[String]) -> String {
    if urls.is_empty() {
        NONE.to_string()
    } else {
        urls.join(",")
    }
}
