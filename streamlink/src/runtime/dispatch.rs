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

//! Listener dispatch loops fed by broadcast channels.

use crate::observability::{events, fields, fields::DispatchContext};
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Spawns a task that hands every event from `receiver` to `handler`.
///
/// The receiver must already be subscribed so no event fired before the
/// spawn is missed. The loop ends when every sender is dropped.
pub(crate) fn spawn_event_dispatch_loop<E, F>(
    context: DispatchContext,
    receiver: Receiver<E>,
    handler: F,
) -> JoinHandle<()>
where
    E: Clone + Send + 'static,
    F: FnMut(E) + Send + 'static,
{
    tokio::spawn(event_dispatch_loop(context, receiver, handler))
}

pub(crate) async fn event_dispatch_loop<E, F>(
    context: DispatchContext,
    mut receiver: Receiver<E>,
    mut handler: F,
) where
    E: Clone + Send + 'static,
    F: FnMut(E) + Send + 'static,
{
    loop {
        match receiver.recv().await {
            Ok(event) => handler(event),
            Err(RecvError::Lagged(skipped)) => {
                warn!(
                    event = events::EVENT_LISTENER_LAGGED,
                    component = context.component,
                    listener_id = context.listener_id.as_str(),
                    skipped,
                    "listener lagged; events dropped"
                );
            }
            Err(RecvError::Closed) => {
                debug!(
                    event = events::EVENT_LISTENER_CLOSED,
                    component = context.component,
                    listener_id = context.listener_id.as_str(),
                    reason = fields::REASON_BROADCAST_CLOSED,
                    "event source closed; stopping dispatch loop"
                );
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::spawn_event_dispatch_loop;
    use crate::observability::fields::DispatchContext;
    use std::sync::{Arc, Mutex};
    use tokio::sync::broadcast;

    #[tokio::test]
    async fn loop_delivers_in_order_and_stops_when_sender_dropped() {
        let (tx, rx) = broadcast::channel::<u32>(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_loop = seen.clone();
        let handle = spawn_event_dispatch_loop(DispatchContext::new("test"), rx, move |e| {
            seen_in_loop.lock().unwrap().push(e);
        });

        for i in 0..3 {
            tx.send(i).unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn lagged_receiver_keeps_running() {
        let (tx, rx) = broadcast::channel::<u32>(2);
        for i in 0..5 {
            tx.send(i).unwrap();
        }
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_loop = seen.clone();
        let handle = spawn_event_dispatch_loop(DispatchContext::new("test"), rx, move |e| {
            seen_in_loop.lock().unwrap().push(e);
        });
        drop(tx);
        handle.await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![3, 4]);
    }
}
