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

//! Test support for `streamlink`: an in-memory network that hosts
//! services, connects to them by `loopback://node/?service=name` URL and
//! announces them through a discovery feed.

mod loopback_network;
pub use loopback_network::{LoopbackNetwork, ServiceHost, ServiceOptions, LOOPBACK_SCHEME};
mod loopback_transport;
pub use loopback_transport::{LoopbackConnection, SERVICE_PEER};
mod test_logging;
pub use test_logging::init_logging;
