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
use crate::member_def::GeneratorMemberDef;
use crate::observability::{events, fields};
use crate::transport::{
    unexpected_reply, CallReply, CallRequest, MemberAddress, MemberCall, MemberTransport,
};
use crate::types::{ConnectionId, Payload};
use futures::stream::{self, Stream};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, warn};

const COMPONENT: &str = "generator";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GeneratorState {
    Open,
    /// The sequence ended normally or was closed.
    Closed,
    Aborted,
}

/// Client cursor over a service-side generator.
///
/// Dropping an open generator does not release it on the service; call
/// [`Generator::close`] or [`Generator::abort`].
pub struct Generator {
    def: GeneratorMemberDef,
    address: MemberAddress,
    transport: Arc<dyn MemberTransport>,
    service_peer: ConnectionId,
    id: i32,
    state: Mutex<GeneratorState>,
    // Keeps `next` calls of one cursor strictly sequential.
    call_lock: tokio::sync::Mutex<()>,
    aborted: watch::Sender<bool>,
}

impl Generator {
    /// Starts a new sequence on the service with `args`.
    pub async fn start(
        def: GeneratorMemberDef,
        transport: Arc<dyn MemberTransport>,
        service_peer: ConnectionId,
        service_path: &str,
        args: Payload,
    ) -> Result<Generator> {
        let address = MemberAddress::new(service_path, &def.name);
        let call = MemberCall {
            address: address.clone(),
            peer: service_peer,
            request: CallRequest::GeneratorStart { args },
        };
        let id = match transport.call(call).await {
            Ok(CallReply::Generator { id }) => id,
            Ok(other) => return Err(unexpected_reply("generator start", &other)),
            Err(err) => {
                warn!(
                    event = events::GENERATOR_START_FAILED,
                    component = COMPONENT,
                    member = fields::format_address(&address).as_str(),
                    err = %err,
                    "generator start failed"
                );
                return Err(err);
            }
        };
        debug!(
            event = events::GENERATOR_START,
            component = COMPONENT,
            member = fields::format_address(&address).as_str(),
            generator_id = id,
            "generator started"
        );
        Ok(Generator {
            def,
            address,
            transport,
            service_peer,
            id,
            state: Mutex::new(GeneratorState::Open),
            call_lock: tokio::sync::Mutex::new(()),
            aborted: watch::channel(false).0,
        })
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn member_name(&self) -> &str {
        &self.def.name
    }

    pub fn takes_param(&self) -> bool {
        self.def.takes_param
    }

    pub fn state(&self) -> GeneratorState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Fetches the next value, sending `param` when the member takes one.
    ///
    /// Fails with `StopIteration` once the sequence ended and with
    /// `OperationAborted` after an abort.
    pub async fn next(&self, param: Option<Payload>) -> Result<Payload> {
        match (self.def.takes_param, param.is_some()) {
            (true, false) => {
                return Err(StreamError::invalid_argument(format!(
                    "generator {} requires a parameter for each step",
                    self.address
                )))
            }
            (false, true) => {
                return Err(StreamError::invalid_argument(format!(
                    "generator {} does not take a parameter",
                    self.address
                )))
            }
            _ => {}
        }

        let _guard = self.call_lock.lock().await;
        self.check_open()?;
        let mut aborted = self.aborted.subscribe();
        let call = self.call(CallRequest::GeneratorNext { id: self.id, param });
        let res = tokio::select! {
            res = self.transport.call(call) => res,
            _ = aborted.wait_for(|aborted| *aborted) => return Err(self.aborted_error()),
        };
        match res {
            Ok(CallReply::Next(value)) => Ok(value),
            Ok(other) => Err(unexpected_reply("generator next", &other)),
            Err(StreamError::StopIteration) => {
                self.leave_open(GeneratorState::Closed);
                // An abort that raced the last step still wins.
                Err(self
                    .check_open()
                    .err()
                    .unwrap_or(StreamError::StopIteration))
            }
            Err(err @ StreamError::OperationAborted(_)) => {
                self.leave_open(GeneratorState::Aborted);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Like [`Generator::next`], but an ended sequence yields `Ok(None)`.
    pub async fn try_next(&self, param: Option<Payload>) -> Result<Option<Payload>> {
        match self.next(param).await {
            Ok(value) => Ok(Some(value)),
            Err(StreamError::StopIteration) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Terminates the sequence at once. A `next` in flight and every later
    /// one fail with `OperationAborted`.
    pub async fn abort(&self) -> Result<()> {
        if !self.leave_open(GeneratorState::Aborted) {
            return Ok(());
        }
        self.aborted.send_replace(true);
        self.finish(GeneratorState::Aborted).await
    }

    /// Asks the service to end the sequence gracefully, after any `next`
    /// in flight.
    pub async fn close(&self) -> Result<()> {
        let _guard = self.call_lock.lock().await;
        if !self.leave_open(GeneratorState::Closed) {
            return Ok(());
        }
        self.finish(GeneratorState::Closed).await
    }

    /// Drains the whole sequence. Only legal without per-step parameters.
    pub async fn next_all(&self) -> Result<Vec<Payload>> {
        self.require_no_param("next_all")?;
        let mut values = Vec::new();
        while let Some(value) = self.try_next(None).await? {
            values.push(value);
        }
        Ok(values)
    }

    /// Adapts the cursor into a stream that ends with the sequence. The
    /// first error other than `StopIteration` is yielded and ends the
    /// stream.
    pub fn into_stream(self) -> Result<impl Stream<Item = Result<Payload>>> {
        self.require_no_param("into_stream")?;
        Ok(stream::unfold(Some(self), |cursor| async move {
            let cursor = cursor?;
            match cursor.next(None).await {
                Ok(value) => Some((Ok(value), Some(cursor))),
                Err(StreamError::StopIteration) => None,
                Err(err) => Some((Err(err), None)),
            }
        }))
    }

    async fn finish(&self, target: GeneratorState) -> Result<()> {
        let request = match target {
            GeneratorState::Aborted => CallRequest::GeneratorAbort { id: self.id },
            _ => CallRequest::GeneratorClose { id: self.id },
        };
        match self.transport.call(self.call(request)).await {
            Ok(CallReply::Ack) => Ok(()),
            Ok(other) => Err(unexpected_reply("generator finish", &other)),
            Err(err) => {
                warn!(
                    event = events::GENERATOR_ABORT_FAILED,
                    component = COMPONENT,
                    member = fields::format_address(&self.address).as_str(),
                    generator_id = self.id,
                    state = ?target,
                    err = %err,
                    "service did not release the generator"
                );
                Err(err)
            }
        }
    }

    fn check_open(&self) -> Result<()> {
        match self.state() {
            GeneratorState::Open => Ok(()),
            GeneratorState::Closed => Err(StreamError::StopIteration),
            GeneratorState::Aborted => Err(self.aborted_error()),
        }
    }

    fn aborted_error(&self) -> StreamError {
        StreamError::aborted(format!("generator {} was aborted", self.address))
    }

    fn require_no_param(&self, operation: &str) -> Result<()> {
        if self.def.takes_param {
            Err(StreamError::invalid_operation(format!(
                "{operation} needs a generator without per-step parameters"
            )))
        } else {
            Ok(())
        }
    }

    /// Moves an open cursor to `target`. Returns false when it had already
    /// ended.
    fn leave_open(&self, target: GeneratorState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if *state != GeneratorState::Open {
            return false;
        }
        *state = target;
        true
    }

    fn call(&self, request: CallRequest) -> MemberCall {
        MemberCall {
            address: self.address.clone(),
            peer: self.service_peer,
            request,
        }
    }
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("address", &self.address)
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
