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

//! Most-recent-value slot with optional lifespan.
//!
//! Reads go through an `ArcSwapOption` snapshot and never block writers.
//! Writers serialize on a small mutex so the staleness check and the store
//! happen together.

use crate::error::{Result, StreamError};
use crate::runtime::wait_with_timeout;
use crate::types::Payload;
use arc_swap::ArcSwapOption;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::watch;

#[derive(Debug)]
struct SlotEntry {
    value: Payload,
    timestamp: SystemTime,
    received_at: Instant,
}

pub(crate) struct ValueSlot {
    name: &'static str,
    entry: ArcSwapOption<SlotEntry>,
    lifespan: Mutex<Option<Duration>>,
    write_lock: Mutex<()>,
    version: watch::Sender<u64>,
}

impl ValueSlot {
    pub(crate) fn new(name: &'static str) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            name,
            entry: ArcSwapOption::empty(),
            lifespan: Mutex::new(None),
            write_lock: Mutex::new(()),
            version,
        }
    }

    /// Stores `value` unless the slot already holds a newer sender timestamp.
    pub(crate) fn set(&self, value: Payload, timestamp: SystemTime) -> bool {
        {
            let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(current) = self.entry.load().as_ref() {
                if timestamp < current.timestamp {
                    return false;
                }
            }
            self.entry.store(Some(Arc::new(SlotEntry {
                value,
                timestamp,
                received_at: Instant::now(),
            })));
        }
        self.version.send_modify(|v| *v = v.wrapping_add(1));
        true
    }

    /// Stores `value` regardless of the timestamp already held.
    pub(crate) fn replace(&self, value: Payload, timestamp: SystemTime) {
        {
            let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
            self.entry.store(Some(Arc::new(SlotEntry {
                value,
                timestamp,
                received_at: Instant::now(),
            })));
        }
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    pub(crate) fn get(&self) -> Result<(Payload, SystemTime)> {
        self.try_get()
            .ok_or_else(|| StreamError::value_not_set(format!("{} value not set", self.name)))
    }

    pub(crate) fn try_get(&self) -> Option<(Payload, SystemTime)> {
        let entry = self.entry.load_full()?;
        if self.expired(&entry) {
            return None;
        }
        Some((entry.value.clone(), entry.timestamp))
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.entry
            .load()
            .as_ref()
            .is_some_and(|entry| !self.expired(entry))
    }

    pub(crate) fn lifespan(&self) -> Option<Duration> {
        *self.lifespan.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub(crate) fn set_lifespan(&self, lifespan: Option<Duration>) {
        *self.lifespan.lock().unwrap_or_else(|p| p.into_inner()) = lifespan;
    }

    pub(crate) fn clear(&self) {
        self.entry.store(None);
    }

    pub(crate) async fn wait_valid(&self, timeout: Option<Duration>) -> Result<()> {
        let what = format!("waiting for {} value", self.name);
        wait_with_timeout(timeout, &what, async {
            let mut version = self.version.subscribe();
            loop {
                if self.is_valid() {
                    return Ok(());
                }
                if version.changed().await.is_err() {
                    return Err(StreamError::value_not_set(format!(
                        "{} value slot dropped",
                        self.name
                    )));
                }
            }
        })
        .await
    }

    fn expired(&self, entry: &SlotEntry) -> bool {
        self.lifespan()
            .is_some_and(|lifespan| entry.received_at.elapsed() >= lifespan)
    }
}
