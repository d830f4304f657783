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

//! [`ServiceDiscovery`] backed by a static JSON5 file.
//!
//! The file holds `{ services: [ServiceInfo, ...] }`. Readers see an
//! atomically swapped snapshot; [`DiscoveryStaticFile::reload`] re-reads
//! the file and announces what appeared or disappeared.

use arc_swap::ArcSwap;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::{self, canonicalize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use streamlink::transport::DiscoveryEvent;
use streamlink::{NodeId, Result, ServiceDiscovery, ServiceInfo, StreamError};
use tokio::sync::broadcast;
use tracing::{debug, info};

const EVENT_CAPACITY: usize = 64;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StaticServices {
    #[serde(default)]
    services: Vec<ServiceInfo>,
}

type ServiceKey = (NodeId, String);

fn key(info: &ServiceInfo) -> ServiceKey {
    (info.node_id, info.service_name.clone())
}

pub struct DiscoveryStaticFile {
    static_file: PathBuf,
    snapshot: ArcSwap<Vec<ServiceInfo>>,
    events: broadcast::Sender<DiscoveryEvent>,
}

impl DiscoveryStaticFile {
    /// Loads `static_file`; fails with `InvalidArgument` when it is missing
    /// or malformed.
    pub fn new(static_file: impl AsRef<Path>) -> Result<Self> {
        let static_file = canonicalize(static_file.as_ref()).map_err(|e| {
            StreamError::invalid_argument(format!(
                "static discovery file {} not found: {e}",
                static_file.as_ref().display()
            ))
        })?;
        let services = read_services(&static_file)?;
        info!(
            file = %static_file.display(),
            services = services.len(),
            "static discovery loaded"
        );
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            static_file,
            snapshot: ArcSwap::from_pointee(services),
            events,
        })
    }

    pub fn static_file(&self) -> &Path {
        &self.static_file
    }

    /// Re-reads the file and fires `Detected` for new or changed entries
    /// and `Lost` for removed ones. On error the previous snapshot stays.
    pub fn reload(&self) -> Result<()> {
        let services = read_services(&self.static_file)?;
        let previous = self.snapshot.swap(Arc::new(services.clone()));

        let old: BTreeMap<ServiceKey, &ServiceInfo> =
            previous.iter().map(|info| (key(info), info)).collect();
        let new: BTreeMap<ServiceKey, &ServiceInfo> =
            services.iter().map(|info| (key(info), info)).collect();

        for (service_key, info) in &old {
            if !new.contains_key(service_key) {
                debug!(service = info.service_name.as_str(), "static service removed");
                let _ = self.events.send(DiscoveryEvent::Lost {
                    node_id: info.node_id,
                    service_name: info.service_name.clone(),
                });
            }
        }
        for (service_key, info) in &new {
            if old.get(service_key) != Some(info) {
                debug!(service = info.service_name.as_str(), "static service detected");
                let _ = self.events.send(DiscoveryEvent::Detected((*info).clone()));
            }
        }
        Ok(())
    }
}

fn read_services(static_file: &Path) -> Result<Vec<ServiceInfo>> {
    let data = fs::read_to_string(static_file).map_err(|e| {
        StreamError::invalid_argument(format!(
            "unable to read {}: {e}",
            static_file.display()
        ))
    })?;
    let parsed: StaticServices = json5::from_str(&data).map_err(|e| {
        StreamError::invalid_argument(format!(
            "unable to parse {}: {e}",
            static_file.display()
        ))
    })?;
    Ok(parsed.services)
}

impl ServiceDiscovery for DiscoveryStaticFile {
    fn detected_services(&self) -> Vec<ServiceInfo> {
        self.snapshot.load().as_ref().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }
}
