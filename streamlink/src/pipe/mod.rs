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

//! Indexed packet streams.
//!
//! A [`Pipe`] is the per-member facade on either side of an object
//! connection. Clients call [`Pipe::connect`] to open a [`PipeEndpoint`]
//! pair; the service accepts through its connect callback and keeps the
//! endpoint until either side closes it.
//!
//! Reliable endpoints deliver in send order without loss or duplicates.
//! When the sender sets [`PipeEndpoint::set_request_packet_ack`], the
//! receiver acks each packet as the application dequeues it (or at once if
//! it ignores received packets), which is what backlog flow control counts.

pub(crate) mod endpoint;
pub(crate) mod member;
pub(crate) mod packet_queue;

pub use endpoint::{PipeEndpoint, PipeEndpointEvent};
pub use member::{Pipe, PipeConnectCallback};
