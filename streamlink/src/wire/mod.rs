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

//! Most-recent-value channels.
//!
//! Each side of a [`WireConnection`] has an in value (last accepted from the
//! peer) and an out value (last set locally). Values carry the sender's
//! timestamp; a value older than the one already held is dropped, so only
//! "most recent wins" is guaranteed. Either slot may be given a lifespan
//! after which reads fail with `ValueNotSet`.

pub(crate) mod connection;
pub(crate) mod member;
pub(crate) mod value_slot;

pub use connection::{WireConnection, WireConnectionEvent};
pub use member::{PeekValueCallback, PokeValueCallback, Wire, WireConnectCallback};
