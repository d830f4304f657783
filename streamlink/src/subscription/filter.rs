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

//! Acceptance criteria for discovered services.
//!
//! Every criterion left empty matches everything.

use crate::subscription::client_id::url_scheme;
use crate::transport::{NodeCredentials, ServiceInfo};
use crate::types::{NodeId, Payload};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// How a set of boolean matches combines.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOperation {
    #[default]
    And,
    Or,
    Nand,
    Nor,
}

impl MatchOperation {
    pub fn apply(self, results: impl IntoIterator<Item = bool>) -> bool {
        let mut results = results.into_iter();
        match self {
            MatchOperation::And => results.all(|r| r),
            MatchOperation::Or => results.any(|r| r),
            MatchOperation::Nand => !results.all(|r| r),
            MatchOperation::Nor => !results.any(|r| r),
        }
    }
}

/// Node accepted by a filter, with the credentials used to connect to it.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FilterNode {
    #[serde(default)]
    pub node_id: Option<NodeId>,
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credentials: Option<HashMap<String, Payload>>,
}

impl FilterNode {
    fn matches(&self, info: &ServiceInfo) -> bool {
        self.node_id.map_or(true, |id| id == info.node_id)
            && self
                .node_name
                .as_ref()
                .map_or(true, |name| *name == info.node_name)
    }
}

/// Match values for one service attribute.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AttributeGroup {
    #[serde(default = "default_group_operation")]
    pub operation: MatchOperation,
    pub matches: Vec<String>,
}

fn default_group_operation() -> MatchOperation {
    MatchOperation::Or
}

impl AttributeGroup {
    pub fn any_of(values: &[&str]) -> Self {
        Self {
            operation: MatchOperation::Or,
            matches: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    fn matches(&self, value: Option<&Payload>) -> bool {
        let values = value.map(attribute_values).unwrap_or_default();
        self.operation
            .apply(self.matches.iter().map(|m| values.iter().any(|v| v == m)))
    }
}

// Strings match as-is, arrays element-wise, everything else by its JSON text.
fn attribute_values(value: &Payload) -> Vec<String> {
    match value {
        Payload::String(s) => vec![s.clone()],
        Payload::Array(items) => items
            .iter()
            .map(|item| match item {
                Payload::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        other => vec![other.to_string()],
    }
}

/// Final say on a candidate after the declarative criteria passed.
pub type ServicePredicate = Arc<dyn Fn(&ServiceInfo) -> bool + Send + Sync>;

#[derive(Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceSubscriptionFilter {
    #[serde(default)]
    pub nodes: Vec<FilterNode>,
    #[serde(default)]
    pub service_names: Vec<String>,
    #[serde(default)]
    pub transport_schemes: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeGroup>,
    #[serde(default)]
    pub attributes_match_operation: MatchOperation,
    #[serde(default)]
    pub max_connections: Option<usize>,
    #[serde(skip)]
    pub predicate: Option<ServicePredicate>,
}

impl Debug for ServiceSubscriptionFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceSubscriptionFilter")
            .field("nodes", &self.nodes)
            .field("service_names", &self.service_names)
            .field("transport_schemes", &self.transport_schemes)
            .field("attributes", &self.attributes)
            .field("attributes_match_operation", &self.attributes_match_operation)
            .field("max_connections", &self.max_connections)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl ServiceSubscriptionFilter {
    pub fn with_predicate(mut self, predicate: ServicePredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn matches(&self, info: &ServiceInfo) -> bool {
        if !self.nodes.is_empty() && !self.nodes.iter().any(|n| n.matches(info)) {
            return false;
        }
        if !self.service_names.is_empty()
            && !self.service_names.iter().any(|n| *n == info.service_name)
        {
            return false;
        }
        if !self.transport_schemes.is_empty() && self.filter_urls(&info.connection_urls).is_empty()
        {
            return false;
        }
        if !self.attributes.is_empty() {
            let results = self
                .attributes
                .iter()
                .map(|(name, group)| group.matches(info.attributes.get(name)));
            if !self.attributes_match_operation.apply(results) {
                return false;
            }
        }
        self.predicate.as_ref().map_or(true, |accept| accept(info))
    }

    /// Connection URLs whose scheme the filter allows.
    pub fn filter_urls(&self, urls: &[String]) -> Vec<String> {
        if self.transport_schemes.is_empty() {
            return urls.to_vec();
        }
        urls.iter()
            .filter(|url| {
                url_scheme(url).is_some_and(|scheme| {
                    self.transport_schemes
                        .iter()
                        .any(|s| s.eq_ignore_ascii_case(&scheme))
                })
            })
            .cloned()
            .collect()
    }

    /// Credentials of the first node entry matching `info` that has any.
    pub fn credentials_for(&self, info: &ServiceInfo) -> Option<NodeCredentials> {
        self.nodes
            .iter()
            .filter(|node| node.matches(info))
            .find_map(|node| {
                node.username.as_ref().map(|username| NodeCredentials {
                    username: username.clone(),
                    credentials: node.credentials.clone().unwrap_or_default(),
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::{AttributeGroup, FilterNode, MatchOperation, ServiceSubscriptionFilter};
    use crate::transport::ServiceInfo;
    use crate::types::NodeId;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn info(service_name: &str) -> ServiceInfo {
        ServiceInfo {
            node_id: NodeId::new_random(),
            node_name: "node-a".to_string(),
            service_name: service_name.to_string(),
            root_object_type: "demo.Sensor".to_string(),
            root_object_implements: Vec::new(),
            connection_urls: vec![
                format!("loopback://node-a/?service={service_name}"),
                format!("tcp://10.0.0.1:2354/?service={service_name}"),
            ],
            attributes: HashMap::from([
                ("location".to_string(), json!("garage")),
                ("tags".to_string(), json!(["thermal", "outdoor"])),
            ]),
        }
    }

    #[test]
    fn empty_filter_accepts_everything() {
        assert!(ServiceSubscriptionFilter::default().matches(&info("any")));
    }

    #[test]
    fn service_names_reject_mismatch() {
        let filter = ServiceSubscriptionFilter {
            service_names: vec!["left".to_string()],
            ..Default::default()
        };
        assert!(filter.matches(&info("left")));
        assert!(!filter.matches(&info("right")));
    }

    #[test]
    fn node_entries_match_by_name_and_supply_credentials() {
        let filter = ServiceSubscriptionFilter {
            nodes: vec![FilterNode {
                node_name: Some("node-a".to_string()),
                username: Some("operator".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let candidate = info("svc");
        assert!(filter.matches(&candidate));
        assert_eq!(
            filter.credentials_for(&candidate).map(|c| c.username),
            Some("operator".to_string())
        );

        let mut elsewhere = info("svc");
        elsewhere.node_name = "node-b".to_string();
        assert!(!filter.matches(&elsewhere));
    }

    #[test]
    fn transport_schemes_narrow_urls() {
        let filter = ServiceSubscriptionFilter {
            transport_schemes: vec!["TCP".to_string()],
            ..Default::default()
        };
        let candidate = info("svc");
        assert_eq!(
            filter.filter_urls(&candidate.connection_urls),
            vec!["tcp://10.0.0.1:2354/?service=svc".to_string()]
        );

        let filter = ServiceSubscriptionFilter {
            transport_schemes: vec!["ws".to_string()],
            ..Default::default()
        };
        assert!(!filter.matches(&candidate));
    }

    #[test]
    fn attribute_groups_combine_with_operations() {
        let mut filter = ServiceSubscriptionFilter::default();
        filter
            .attributes
            .insert("location".to_string(), AttributeGroup::any_of(&["garage", "hall"]));
        filter.attributes.insert(
            "tags".to_string(),
            AttributeGroup {
                operation: MatchOperation::And,
                matches: vec!["thermal".to_string(), "indoor".to_string()],
            },
        );
        let candidate = info("svc");

        assert!(!filter.matches(&candidate));
        filter.attributes_match_operation = MatchOperation::Or;
        assert!(filter.matches(&candidate));
        filter.attributes_match_operation = MatchOperation::Nor;
        assert!(!filter.matches(&candidate));
        filter.attributes_match_operation = MatchOperation::Nand;
        assert!(filter.matches(&candidate));
    }

    #[test]
    fn predicate_has_the_final_say() {
        let filter = ServiceSubscriptionFilter::default()
            .with_predicate(Arc::new(|info: &ServiceInfo| info.service_name.starts_with("cam")));
        assert!(filter.matches(&info("cam1")));
        assert!(!filter.matches(&info("lidar")));
    }

    #[test]
    fn filter_parses_from_json5() {
        let filter: ServiceSubscriptionFilter = json5::from_str(
            r#"{
                service_names: ["left"],
                attributes: { location: { matches: ["garage"] } },
                attributes_match_operation: "or",
                max_connections: 2,
            }"#,
        )
        .unwrap();
        assert_eq!(filter.max_connections, Some(2));
        assert_eq!(filter.attributes["location"].operation, MatchOperation::Or);
        assert!(filter.matches(&info("left")));
    }
}
