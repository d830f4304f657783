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

//! Multi-subscriber application event hooks.
//!
//! Events are fanned out over a `tokio::sync::broadcast` channel. Listeners
//! either pull from [`EventHook::subscribe`] themselves or register a closure
//! with [`EventHook::add_listener`], which runs on its own dispatch task and
//! therefore never executes on the stack of the code that fired the event.

use crate::observability::fields::DispatchContext;
use crate::runtime::dispatch::spawn_event_dispatch_loop;
use tokio::sync::broadcast::{self, Receiver, Sender};
use tokio::task::JoinHandle;

pub struct EventHook<E> {
    sender: Sender<E>,
    component: &'static str,
}

impl<E> EventHook<E>
where
    E: Clone + Send + 'static,
{
    pub fn new(component: &'static str, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, component }
    }

    /// Returns a receiver that observes every event fired from now on.
    pub fn subscribe(&self) -> Receiver<E> {
        self.sender.subscribe()
    }

    /// Runs `listener` for each event on a dedicated dispatch task.
    ///
    /// The listener should hold only weak references to the object that owns
    /// this hook, otherwise the hook never closes and the task never ends.
    pub fn add_listener<F>(&self, listener: F) -> EventListenerHandle
    where
        F: FnMut(E) + Send + 'static,
    {
        let receiver = self.sender.subscribe();
        let handle =
            spawn_event_dispatch_loop(DispatchContext::new(self.component), receiver, listener);
        EventListenerHandle { handle }
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub(crate) fn fire(&self, event: E) {
        // No receivers is not an error: nobody asked to be told.
        let _ = self.sender.send(event);
    }
}

/// Handle to a listener registered with [`EventHook::add_listener`].
///
/// Dropping the handle leaves the listener running for the life of the hook.
#[derive(Debug)]
pub struct EventListenerHandle {
    handle: JoinHandle<()>,
}

impl EventListenerHandle {
    /// Stops the listener; events not yet dispatched are discarded.
    pub fn remove(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
