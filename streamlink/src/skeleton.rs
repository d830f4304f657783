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

//! Service-side object skeleton.
//!
//! Instantiates every member of a hosted object from its [`ObjectTypeDef`]:
//!
//! | member            | wired as                  |
//! |-------------------|---------------------------|
//! | readonly pipe     | [`PipeBroadcaster`]       |
//! | readonly wire     | [`WireBroadcaster`]       |
//! | writeonly wire    | [`WireUnicastReceiver`]   |
//! | other pipe / wire | plain [`Pipe`] / [`Wire`] |
//! | generator         | [`GeneratorService`]      |

use crate::broadcast::{PipeBroadcaster, WireBroadcaster, WireUnicastReceiver};
use crate::config::StreamlinkConfig;
use crate::error::{Result, StreamError};
use crate::generator::GeneratorService;
use crate::member_def::{MemberDef, ObjectTypeDef};
use crate::observability::events;
use crate::pipe::Pipe;
use crate::transport::MemberTransport;
use crate::types::MemberDirection;
use crate::wire::Wire;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

const COMPONENT: &str = "skeleton";

#[derive(Clone)]
pub enum SkeletonMember {
    Pipe(Pipe),
    PipeBroadcaster(PipeBroadcaster),
    Wire(Wire),
    WireBroadcaster(WireBroadcaster),
    WireUnicastReceiver(WireUnicastReceiver),
    Generator(GeneratorService),
}

impl SkeletonMember {
    fn kind(&self) -> &'static str {
        match self {
            SkeletonMember::Pipe(_) => "pipe",
            SkeletonMember::PipeBroadcaster(_) => "pipe_broadcaster",
            SkeletonMember::Wire(_) => "wire",
            SkeletonMember::WireBroadcaster(_) => "wire_broadcaster",
            SkeletonMember::WireUnicastReceiver(_) => "wire_unicast_receiver",
            SkeletonMember::Generator(_) => "generator",
        }
    }

    async fn close(&self) -> Result<()> {
        match self {
            SkeletonMember::Pipe(pipe) => pipe.close().await,
            SkeletonMember::PipeBroadcaster(b) => b.pipe().close().await,
            SkeletonMember::Wire(wire) => wire.close().await,
            SkeletonMember::WireBroadcaster(b) => b.wire().close().await,
            SkeletonMember::WireUnicastReceiver(r) => r.wire().close().await,
            SkeletonMember::Generator(g) => g.close().await,
        }
    }
}

pub struct ServiceSkeleton {
    type_def: Arc<ObjectTypeDef>,
    service_path: String,
    members: BTreeMap<String, SkeletonMember>,
}

impl ServiceSkeleton {
    pub async fn new(
        type_def: Arc<ObjectTypeDef>,
        transport: Arc<dyn MemberTransport>,
        service_path: &str,
        config: &StreamlinkConfig,
    ) -> Result<ServiceSkeleton> {
        let capacity = config.event_capacity;
        let mut members = BTreeMap::new();
        for def in &type_def.members {
            let member = match def {
                MemberDef::Pipe(def) => {
                    let pipe =
                        Pipe::service(def.clone(), transport.clone(), service_path, capacity)
                            .await?;
                    if def.direction == MemberDirection::Readonly {
                        SkeletonMember::PipeBroadcaster(PipeBroadcaster::new(pipe, None)?)
                    } else {
                        SkeletonMember::Pipe(pipe)
                    }
                }
                MemberDef::Wire(def) => {
                    let wire =
                        Wire::service(def.clone(), transport.clone(), service_path, capacity)
                            .await?;
                    match def.direction {
                        MemberDirection::Readonly => {
                            SkeletonMember::WireBroadcaster(WireBroadcaster::new(wire)?)
                        }
                        MemberDirection::Writeonly => {
                            SkeletonMember::WireUnicastReceiver(WireUnicastReceiver::new(wire)?)
                        }
                        MemberDirection::Both => SkeletonMember::Wire(wire),
                    }
                }
                MemberDef::Generator(def) => SkeletonMember::Generator(
                    GeneratorService::new(def.clone(), transport.clone(), service_path).await?,
                ),
            };
            debug!(
                event = events::SKELETON_MEMBER_WIRED,
                component = COMPONENT,
                service_path,
                member = def.name(),
                wired_as = member.kind(),
                "member wired"
            );
            members.insert(def.name().to_string(), member);
        }
        Ok(ServiceSkeleton {
            type_def,
            service_path: service_path.to_string(),
            members,
        })
    }

    pub fn type_def(&self) -> &Arc<ObjectTypeDef> {
        &self.type_def
    }

    pub fn service_path(&self) -> &str {
        &self.service_path
    }

    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    pub fn member(&self, name: &str) -> Result<&SkeletonMember> {
        self.members.get(name).ok_or_else(|| {
            StreamError::not_found(format!("member {name} not found on {}", self.service_path))
        })
    }

    /// Underlying pipe, whether or not it is wrapped by a broadcaster.
    pub fn pipe(&self, name: &str) -> Result<&Pipe> {
        match self.member(name)? {
            SkeletonMember::Pipe(pipe) => Ok(pipe),
            SkeletonMember::PipeBroadcaster(b) => Ok(b.pipe()),
            other => Err(self.wired_as(name, other, "pipe")),
        }
    }

    pub fn pipe_broadcaster(&self, name: &str) -> Result<&PipeBroadcaster> {
        match self.member(name)? {
            SkeletonMember::PipeBroadcaster(b) => Ok(b),
            other => Err(self.wired_as(name, other, "pipe_broadcaster")),
        }
    }

    /// Underlying wire, whatever helper wraps it.
    pub fn wire(&self, name: &str) -> Result<&Wire> {
        match self.member(name)? {
            SkeletonMember::Wire(wire) => Ok(wire),
            SkeletonMember::WireBroadcaster(b) => Ok(b.wire()),
            SkeletonMember::WireUnicastReceiver(r) => Ok(r.wire()),
            other => Err(self.wired_as(name, other, "wire")),
        }
    }

    pub fn wire_broadcaster(&self, name: &str) -> Result<&WireBroadcaster> {
        match self.member(name)? {
            SkeletonMember::WireBroadcaster(b) => Ok(b),
            other => Err(self.wired_as(name, other, "wire_broadcaster")),
        }
    }

    pub fn wire_unicast_receiver(&self, name: &str) -> Result<&WireUnicastReceiver> {
        match self.member(name)? {
            SkeletonMember::WireUnicastReceiver(r) => Ok(r),
            other => Err(self.wired_as(name, other, "wire_unicast_receiver")),
        }
    }

    pub fn generator(&self, name: &str) -> Result<&GeneratorService> {
        match self.member(name)? {
            SkeletonMember::Generator(g) => Ok(g),
            other => Err(self.wired_as(name, other, "generator")),
        }
    }

    /// Closes every member; failures are logged and the first one returned.
    pub async fn close(&self) -> Result<()> {
        let mut first_err = None;
        for (name, member) in &self.members {
            if let Err(err) = member.close().await {
                warn!(
                    event = events::SKELETON_MEMBER_CLOSE_FAILED,
                    component = COMPONENT,
                    service_path = self.service_path.as_str(),
                    member = name.as_str(),
                    err = %err,
                    "closing member failed"
                );
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn wired_as(&self, name: &str, member: &SkeletonMember, wanted: &str) -> StreamError {
        StreamError::invalid_argument(format!(
            "member {name} of {} is wired as {}, not {wanted}",
            self.service_path,
            member.kind()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::ServiceSkeleton;
    use crate::config::StreamlinkConfig;
    use crate::error::StreamError;
    use crate::member_def::{GeneratorMemberDef, ObjectTypeDef, PipeMemberDef, WireMemberDef};
    use crate::transport::test_support::PairedTransport;
    use crate::types::MemberDirection;
    use std::sync::Arc;

    fn robot_type() -> Arc<ObjectTypeDef> {
        Arc::new(
            ObjectTypeDef::new("example.Robot")
                .with_pipe(PipeMemberDef::new("frames", MemberDirection::Readonly))
                .with_pipe(PipeMemberDef::new("chat", MemberDirection::Both))
                .with_wire(WireMemberDef::new("pose", MemberDirection::Readonly))
                .with_wire(WireMemberDef::new("setpoint", MemberDirection::Writeonly))
                .with_wire(WireMemberDef::new("mode", MemberDirection::Both))
                .with_generator(GeneratorMemberDef::new("scan", false)),
        )
    }

    #[tokio::test]
    async fn default_wiring_follows_direction() {
        let (_client_t, service_t) = PairedTransport::pair();
        let skeleton = ServiceSkeleton::new(
            robot_type(),
            service_t,
            "robot",
            &StreamlinkConfig::default(),
        )
        .await
        .unwrap();

        assert!(skeleton.pipe_broadcaster("frames").is_ok());
        assert!(skeleton.pipe("frames").is_ok());
        assert!(skeleton.pipe("chat").is_ok());
        assert!(matches!(
            skeleton.pipe_broadcaster("chat"),
            Err(StreamError::InvalidArgument(_))
        ));
        assert!(skeleton.wire_broadcaster("pose").is_ok());
        assert!(skeleton.wire_unicast_receiver("setpoint").is_ok());
        assert!(skeleton.wire("mode").is_ok());
        assert!(skeleton.generator("scan").is_ok());
        assert!(matches!(
            skeleton.generator("missing"),
            Err(StreamError::NotFound(_))
        ));
        assert_eq!(skeleton.member_names().count(), 6);
        skeleton.close().await.unwrap();
    }
}
