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

//! Typed registration table of the streaming members of an object type.
//!
//! An [`ObjectTypeDef`] is built once per object type, usually next to the
//! generated marshalling code, and drives both the client facades and the
//! service-side default wiring in [`crate::skeleton`].

use crate::error::{Result, StreamError};
use crate::types::MemberDirection;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PipeMemberDef {
    pub name: String,
    pub direction: MemberDirection,
    pub unreliable: bool,
}

impl PipeMemberDef {
    pub fn new(name: &str, direction: MemberDirection) -> Self {
        Self {
            name: name.to_string(),
            direction,
            unreliable: false,
        }
    }

    pub fn unreliable(mut self) -> Self {
        self.unreliable = true;
        self
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WireMemberDef {
    pub name: String,
    pub direction: MemberDirection,
}

impl WireMemberDef {
    pub fn new(name: &str, direction: MemberDirection) -> Self {
        Self {
            name: name.to_string(),
            direction,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GeneratorMemberDef {
    pub name: String,
    /// Each `next` carries a parameter to the service.
    pub takes_param: bool,
}

impl GeneratorMemberDef {
    pub fn new(name: &str, takes_param: bool) -> Self {
        Self {
            name: name.to_string(),
            takes_param,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MemberDef {
    Pipe(PipeMemberDef),
    Wire(WireMemberDef),
    Generator(GeneratorMemberDef),
}

impl MemberDef {
    pub fn name(&self) -> &str {
        match self {
            MemberDef::Pipe(def) => &def.name,
            MemberDef::Wire(def) => &def.name,
            MemberDef::Generator(def) => &def.name,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            MemberDef::Pipe(_) => "pipe",
            MemberDef::Wire(_) => "wire",
            MemberDef::Generator(_) => "generator",
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ObjectTypeDef {
    pub name: String,
    pub members: Vec<MemberDef>,
}

impl ObjectTypeDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            members: Vec::new(),
        }
    }

    pub fn with_pipe(mut self, def: PipeMemberDef) -> Self {
        self.members.push(MemberDef::Pipe(def));
        self
    }

    pub fn with_wire(mut self, def: WireMemberDef) -> Self {
        self.members.push(MemberDef::Wire(def));
        self
    }

    pub fn with_generator(mut self, def: GeneratorMemberDef) -> Self {
        self.members.push(MemberDef::Generator(def));
        self
    }

    pub fn member(&self, name: &str) -> Result<&MemberDef> {
        self.members
            .iter()
            .find(|m| m.name() == name)
            .ok_or_else(|| {
                StreamError::not_found(format!("type {} has no member {name}", self.name))
            })
    }

    pub fn pipe(&self, name: &str) -> Result<&PipeMemberDef> {
        match self.member(name)? {
            MemberDef::Pipe(def) => Ok(def),
            other => Err(self.wrong_kind(name, "pipe", other)),
        }
    }

    pub fn wire(&self, name: &str) -> Result<&WireMemberDef> {
        match self.member(name)? {
            MemberDef::Wire(def) => Ok(def),
            other => Err(self.wrong_kind(name, "wire", other)),
        }
    }

    pub fn generator(&self, name: &str) -> Result<&GeneratorMemberDef> {
        match self.member(name)? {
            MemberDef::Generator(def) => Ok(def),
            other => Err(self.wrong_kind(name, "generator", other)),
        }
    }

    fn wrong_kind(&self, name: &str, wanted: &str, found: &MemberDef) -> StreamError {
        StreamError::invalid_argument(format!(
            "member {}.{name} is a {}, not a {wanted}",
            self.name,
            found.kind()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::{GeneratorMemberDef, ObjectTypeDef, PipeMemberDef, WireMemberDef};
    use crate::error::StreamError;
    use crate::types::MemberDirection;

    fn sensor_type() -> ObjectTypeDef {
        ObjectTypeDef::new("demo.Sensor")
            .with_pipe(PipeMemberDef::new("samples", MemberDirection::Readonly).unreliable())
            .with_wire(WireMemberDef::new("setpoint", MemberDirection::Writeonly))
            .with_generator(GeneratorMemberDef::new("history", false))
    }

    #[test]
    fn lookup_by_kind_returns_typed_definition() {
        let def = sensor_type();
        assert!(def.pipe("samples").unwrap().unreliable);
        assert_eq!(
            def.wire("setpoint").unwrap().direction,
            MemberDirection::Writeonly
        );
        assert!(!def.generator("history").unwrap().takes_param);
    }

    #[test]
    fn unknown_member_is_not_found() {
        assert!(matches!(
            sensor_type().pipe("missing"),
            Err(StreamError::NotFound(_))
        ));
    }

    #[test]
    fn wrong_kind_is_invalid_argument() {
        assert!(matches!(
            sensor_type().wire("samples"),
            Err(StreamError::InvalidArgument(_))
        ));
    }
}
