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

//! Dotted service paths such as `*.robot.arms[left].gripper`.
//!
//! The first segment names the service; `*` there matches any service. Later
//! segments follow object reference members, optionally with an `[index]` or
//! `[key]` suffix.

use crate::error::{Result, StreamError};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

pub const WILDCARD: &str = "*";

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ServicePathSegment {
    pub name: String,
    pub index: Option<String>,
}

impl Display for ServicePathSegment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.index {
            Some(index) => write!(f, "{}[{}]", self.name, index),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ServicePath {
    segments: Vec<ServicePathSegment>,
}

impl ServicePath {
    pub fn root(service_name: &str) -> Self {
        Self {
            segments: vec![ServicePathSegment {
                name: service_name.to_string(),
                index: None,
            }],
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.segments[0].name == WILDCARD
    }

    /// Service name, or `None` for a wildcard path.
    pub fn service_name(&self) -> Option<&str> {
        (!self.is_wildcard()).then(|| self.segments[0].name.as_str())
    }

    pub fn matches_service(&self, service_name: &str) -> bool {
        self.is_wildcard() || self.segments[0].name == service_name
    }

    pub fn segments(&self) -> &[ServicePathSegment] {
        &self.segments
    }

    /// Object reference hops below the root object.
    pub fn object_refs(&self) -> &[ServicePathSegment] {
        &self.segments[1..]
    }

    pub fn is_root(&self) -> bool {
        self.segments.len() == 1
    }

    /// Same path with the root segment naming `service_name`.
    pub fn with_service_name(&self, service_name: &str) -> ServicePath {
        let mut segments = self.segments.clone();
        segments[0].name = service_name.to_string();
        ServicePath { segments }
    }
}

impl FromStr for ServicePath {
    type Err = StreamError;

    fn from_str(path: &str) -> Result<Self> {
        let mut segments = Vec::new();
        for raw in split_segments(path)? {
            segments.push(parse_segment(path, raw)?);
        }
        let Some(root) = segments.first() else {
            return Err(invalid(path, "empty path"));
        };
        if root.index.is_some() {
            return Err(invalid(path, "the service segment cannot be indexed"));
        }
        if segments[1..].iter().any(|s| s.name == WILDCARD) {
            return Err(invalid(path, "only the first segment may be a wildcard"));
        }
        Ok(ServicePath { segments })
    }
}

impl Display for ServicePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

fn invalid(path: &str, reason: &str) -> StreamError {
    StreamError::invalid_argument(format!("service path {path:?}: {reason}"))
}

// Dots inside brackets belong to the key.
fn split_segments(path: &str) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in path.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| invalid(path, "unbalanced ']'"))?
            }
            '.' if depth == 0 => {
                parts.push(&path[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(invalid(path, "unbalanced '['"));
    }
    parts.push(&path[start..]);
    Ok(parts)
}

fn parse_segment(path: &str, raw: &str) -> Result<ServicePathSegment> {
    let (name, index) = match raw.find('[') {
        Some(open) => {
            let rest = &raw[open + 1..];
            let index = rest
                .strip_suffix(']')
                .filter(|index| !index.is_empty() && !index.contains(['[', ']']))
                .ok_or_else(|| invalid(path, "malformed index"))?;
            (&raw[..open], Some(index.to_string()))
        }
        None => (raw, None),
    };
    let valid = name == WILDCARD
        || (!name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
    if !valid {
        return Err(invalid(path, "invalid segment name"));
    }
    Ok(ServicePathSegment {
        name: name.to_string(),
        index,
    })
}

#[cfg(test)]
mod tests {
    use super::ServicePath;
    use crate::error::StreamError;

    #[test]
    fn parses_indexed_and_keyed_segments() {
        let path: ServicePath = "robot.arms[left].joints[2]".parse().unwrap();
        assert_eq!(path.service_name(), Some("robot"));
        let refs = path.object_refs();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].name, "arms");
        assert_eq!(refs[0].index.as_deref(), Some("left"));
        assert_eq!(refs[1].index.as_deref(), Some("2"));
        assert_eq!(path.to_string(), "robot.arms[left].joints[2]");
    }

    #[test]
    fn wildcard_matches_any_service() {
        let path: ServicePath = "*.camera".parse().unwrap();
        assert!(path.is_wildcard());
        assert_eq!(path.service_name(), None);
        assert!(path.matches_service("front"));
        assert_eq!(path.with_service_name("front").to_string(), "front.camera");
    }

    #[test]
    fn keys_may_contain_dots() {
        let path: ServicePath = "svc.sensors[a.b]".parse().unwrap();
        assert_eq!(path.object_refs()[0].index.as_deref(), Some("a.b"));
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in ["", "svc..x", "svc.*", "svc[1]", "svc.x[", "svc.x]", "svc.x[]", "svc.x y"] {
            assert!(
                matches!(bad.parse::<ServicePath>(), Err(StreamError::InvalidArgument(_))),
                "{bad} should be rejected"
            );
        }
    }
}
