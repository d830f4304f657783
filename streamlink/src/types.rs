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

//! Identity and value types shared by every member kind.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::time::Duration;
use uuid::Uuid;

/// Opaque, already-unpacked member payload.
///
/// Packing values into messages belongs to the marshalling layer; the streaming
/// runtime only moves payloads around.
pub type Payload = serde_json::Value;

/// Index value asking the runtime to pick any free pipe index.
pub const ANY_INDEX: i32 = -1;

/// Remote end of an object connection, as seen from the local side.
///
/// A client sees one id per connected service; a service sees one id per
/// connected client.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ConnectionId(pub u32);

impl Display for ConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Node identity of a service host.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Which side of an object connection a member facade lives on.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Role {
    Client,
    Service,
}

/// Flow direction declared by a member definition.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberDirection {
    #[default]
    Both,
    /// Service to client only.
    Readonly,
    /// Client to service only.
    Writeonly,
}

impl MemberDirection {
    /// Returns `true` when the given side is allowed to send on this member.
    pub fn can_send(self, role: Role) -> bool {
        match (self, role) {
            (MemberDirection::Both, _) => true,
            (MemberDirection::Readonly, Role::Service) => true,
            (MemberDirection::Writeonly, Role::Client) => true,
            _ => false,
        }
    }

    /// Returns `true` when the given side is allowed to receive on this member.
    pub fn can_receive(self, role: Role) -> bool {
        match role {
            Role::Client => self.can_send(Role::Service),
            Role::Service => self.can_send(Role::Client),
        }
    }
}

/// Converts the conventional "seconds, negative means infinite" setting.
pub fn lifespan_from_secs(seconds: f64) -> Option<Duration> {
    if seconds < 0.0 || !seconds.is_finite() {
        None
    } else {
        Some(Duration::from_secs_f64(seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::{lifespan_from_secs, MemberDirection, Role};
    use std::time::Duration;

    #[test]
    fn readonly_members_flow_from_service_to_client() {
        assert!(MemberDirection::Readonly.can_send(Role::Service));
        assert!(!MemberDirection::Readonly.can_send(Role::Client));
        assert!(MemberDirection::Readonly.can_receive(Role::Client));
        assert!(!MemberDirection::Readonly.can_receive(Role::Service));
    }

    #[test]
    fn writeonly_members_flow_from_client_to_service() {
        assert!(MemberDirection::Writeonly.can_send(Role::Client));
        assert!(!MemberDirection::Writeonly.can_send(Role::Service));
        assert!(MemberDirection::Writeonly.can_receive(Role::Service));
    }

    #[test]
    fn negative_lifespan_means_infinite() {
        assert_eq!(lifespan_from_secs(-1.0), None);
        assert_eq!(lifespan_from_secs(0.5), Some(Duration::from_millis(500)));
    }
}
