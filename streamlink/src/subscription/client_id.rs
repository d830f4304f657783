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

use crate::error::{Result, StreamError};
use crate::transport::ServiceInfo;
use crate::types::NodeId;
use std::fmt::{Display, Formatter};
use url::Url;
use uuid::Uuid;

/// Identity of one service connection managed by a subscription.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SubscriptionClientId {
    pub node_id: NodeId,
    pub service_name: String,
}

impl SubscriptionClientId {
    pub fn new(node_id: NodeId, service_name: &str) -> Self {
        Self {
            node_id,
            service_name: service_name.to_string(),
        }
    }

    pub fn from_service_info(info: &ServiceInfo) -> Self {
        Self::new(info.node_id, &info.service_name)
    }

    /// Reads `service` and, when present, `nodeid` from the URL query. A
    /// URL without `nodeid` yields the nil node id.
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = parse_url(url)?;
        let mut node_id = NodeId::nil();
        let mut service_name = None;
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "service" => service_name = Some(value.into_owned()),
                "nodeid" => {
                    let uuid = Uuid::parse_str(value.trim_matches(|c| c == '{' || c == '}'))
                        .map_err(|e| {
                            StreamError::invalid_argument(format!("url {url}: bad nodeid: {e}"))
                        })?;
                    node_id = NodeId(uuid);
                }
                _ => {}
            }
        }
        let service_name = service_name.ok_or_else(|| {
            StreamError::invalid_argument(format!("url {url} has no service parameter"))
        })?;
        Ok(Self {
            node_id,
            service_name,
        })
    }

    /// Id shared by a list of equivalent URLs; they must agree.
    pub fn from_urls(urls: &[String]) -> Result<Self> {
        let mut ids = urls.iter().map(|url| Self::from_url(url));
        let first = ids
            .next()
            .ok_or_else(|| StreamError::invalid_argument("no connection urls given"))??;
        for id in ids {
            if id? != first {
                return Err(StreamError::invalid_argument(
                    "connection urls name different services",
                ));
            }
        }
        Ok(first)
    }
}

impl Display for SubscriptionClientId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.node_id, self.service_name)
    }
}

pub(crate) fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| StreamError::invalid_argument(format!("invalid url {url}: {e}")))
}

/// Transport scheme of a connection URL, lowercased.
pub(crate) fn url_scheme(url: &str) -> Option<String> {
    Url::parse(url).ok().map(|u| u.scheme().to_ascii_lowercase())
}
