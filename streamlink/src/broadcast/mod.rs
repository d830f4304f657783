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

//! Service-side helpers that own a member's connect callback.
//!
//! [`PipeBroadcaster`] and [`WireBroadcaster`] fan one outgoing stream out to
//! every connected client. [`WireUnicastReceiver`] keeps the in value of the
//! most recently connected client only.

pub(crate) mod pipe_broadcaster;
pub(crate) mod wire_broadcaster;
pub(crate) mod wire_unicast_receiver;

pub use pipe_broadcaster::{PipeBroadcastPredicate, PipeBroadcaster};
pub use wire_broadcaster::{WireBroadcastPredicate, WireBroadcaster};
pub use wire_unicast_receiver::{UnicastEvent, WireUnicastReceiver};
