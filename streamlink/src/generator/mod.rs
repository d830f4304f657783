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

//! Pull-based result sequences.
//!
//! A client [`Generator`] is a cursor onto a [`GeneratorSource`] hosted by a
//! [`GeneratorService`]. The cursor is `Open` until the source reports
//! `StopIteration` (then `Closed`) or either side aborts it (then
//! `Aborted`). It cannot be restarted.

pub(crate) mod client;
pub(crate) mod service;

pub use client::{Generator, GeneratorState};
pub use service::{GeneratorFactory, GeneratorService, GeneratorSource, IterGenerator};
