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

//! Receive queue of one pipe endpoint.

use crate::types::Payload;
use std::collections::{BTreeMap, VecDeque};

/// Sequence number of the first packet sent on an endpoint.
pub(crate) const FIRST_SEQ: u32 = 1;

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct QueuedPacket {
    pub seq: u32,
    pub request_ack: bool,
    pub payload: Payload,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum PushOutcome {
    /// This many packets became readable.
    Released(usize),
    /// Arrived ahead of a gap; held until the gap fills.
    Held,
    Duplicate,
}

/// FIFO of received packets.
///
/// Reliable queues release packets strictly in sequence order and drop
/// anything already seen. Unreliable queues keep arrival order as is.
#[derive(Debug)]
pub(crate) struct PacketQueue {
    ready: VecDeque<QueuedPacket>,
    reliable: bool,
    next_expected: u32,
    // `None` marks a sequence number skipped ahead of a gap.
    reorder: BTreeMap<u32, Option<QueuedPacket>>,
}

impl PacketQueue {
    pub(crate) fn new(reliable: bool) -> Self {
        Self {
            ready: VecDeque::new(),
            reliable,
            next_expected: FIRST_SEQ,
            reorder: BTreeMap::new(),
        }
    }

    pub(crate) fn push(&mut self, packet: QueuedPacket) -> PushOutcome {
        if !self.reliable {
            self.ready.push_back(packet);
            return PushOutcome::Released(1);
        }
        self.accept(packet.seq, Some(packet))
    }

    /// Marks `seq` as consumed without queueing it. Filling a gap this way
    /// can still release held packets.
    pub(crate) fn skip(&mut self, seq: u32) -> PushOutcome {
        if !self.reliable {
            return PushOutcome::Released(0);
        }
        self.accept(seq, None)
    }

    fn accept(&mut self, seq: u32, packet: Option<QueuedPacket>) -> PushOutcome {
        if seq < self.next_expected || self.reorder.contains_key(&seq) {
            return PushOutcome::Duplicate;
        }
        if seq != self.next_expected {
            self.reorder.insert(seq, packet);
            return PushOutcome::Held;
        }

        let mut released = self.release(packet);
        while let Some(next) = self.reorder.remove(&self.next_expected) {
            released += self.release(next);
        }
        PushOutcome::Released(released)
    }

    fn release(&mut self, packet: Option<QueuedPacket>) -> usize {
        self.next_expected = self.next_expected.wrapping_add(1);
        match packet {
            Some(packet) => {
                self.ready.push_back(packet);
                1
            }
            None => 0,
        }
    }

    pub(crate) fn pop(&mut self) -> Option<QueuedPacket> {
        self.ready.pop_front()
    }

    pub(crate) fn peek(&self) -> Option<&QueuedPacket> {
        self.ready.front()
    }

    pub(crate) fn len(&self) -> usize {
        self.ready.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.ready.clear();
        self.reorder.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::{PacketQueue, PushOutcome, QueuedPacket};
    use serde_json::json;

    fn packet(seq: u32) -> QueuedPacket {
        QueuedPacket {
            seq,
            request_ack: false,
            payload: json!(seq),
        }
    }

    fn drain(queue: &mut PacketQueue) -> Vec<u32> {
        std::iter::from_fn(|| queue.pop()).map(|p| p.seq).collect()
    }

    #[test]
    fn reliable_queue_restores_sequence_order() {
        let mut queue = PacketQueue::new(true);
        assert_eq!(queue.push(packet(2)), PushOutcome::Held);
        assert_eq!(queue.push(packet(3)), PushOutcome::Held);
        assert!(queue.is_empty());
        assert_eq!(queue.push(packet(1)), PushOutcome::Released(3));
        assert_eq!(drain(&mut queue), vec![1, 2, 3]);
    }

    #[test]
    fn reliable_queue_drops_duplicates() {
        let mut queue = PacketQueue::new(true);
        queue.push(packet(1));
        assert_eq!(queue.push(packet(1)), PushOutcome::Duplicate);
        queue.push(packet(3));
        assert_eq!(queue.push(packet(3)), PushOutcome::Duplicate);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn unreliable_queue_keeps_arrival_order() {
        let mut queue = PacketQueue::new(false);
        queue.push(packet(2));
        queue.push(packet(1));
        queue.push(packet(2));
        assert_eq!(drain(&mut queue), vec![2, 1, 2]);
    }

    #[test]
    fn skipped_packets_advance_the_sequence() {
        let mut queue = PacketQueue::new(true);
        queue.push(packet(2));
        assert_eq!(queue.skip(1), PushOutcome::Released(1));
        assert_eq!(drain(&mut queue), vec![2]);
        assert_eq!(queue.skip(2), PushOutcome::Duplicate);
    }

    #[test]
    fn skip_ahead_of_a_gap_is_stepped_over_once_it_fills() {
        let mut queue = PacketQueue::new(true);
        assert_eq!(queue.skip(2), PushOutcome::Held);
        assert_eq!(queue.push(packet(1)), PushOutcome::Released(1));
        assert_eq!(queue.push(packet(3)), PushOutcome::Released(1));
        assert_eq!(drain(&mut queue), vec![1, 3]);
        assert_eq!(queue.push(packet(2)), PushOutcome::Duplicate);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut queue = PacketQueue::new(true);
        queue.push(packet(1));
        assert_eq!(queue.peek().map(|p| p.seq), Some(1));
        assert_eq!(queue.len(), 1);
        queue.clear();
        assert!(queue.peek().is_none());
    }
}
