//! Sequence numbering and reply correlation.
//!
//! [`Sequencer`] is the bookkeeping half of a connection with no I/O of
//! its own: it hands out sequence numbers, remembers which sends are
//! waiting for a reply, and holds packets submitted while the connection
//! is down. The completion type `C` is whatever the owner uses to wake a
//! waiting caller.

use parley_protocol::Packet;
use std::collections::{HashMap, VecDeque};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Sequence numbers, pending completions and the outbound queue.
#[derive(Debug)]
pub struct Sequencer<C> {
    next_seq: u32,
    pending: HashMap<u32, C>,
    queue: VecDeque<(Packet, Option<C>)>,
    status: ConnectionStatus,
}

impl<C> Default for Sequencer<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Sequencer<C> {
    pub fn new() -> Self {
        Self {
            next_seq: 1,
            pending: HashMap::new(),
            queue: VecDeque::new(),
            status: ConnectionStatus::Disconnected,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Moves to `Connecting`. Returns false if a connection is already
    /// being established or is up.
    pub fn begin_connect(&mut self) -> bool {
        if self.status != ConnectionStatus::Disconnected {
            return false;
        }
        self.status = ConnectionStatus::Connecting;
        true
    }

    pub fn mark_connected(&mut self) {
        self.status = ConnectionStatus::Connected;
    }

    /// Sequence number the next assignment will use.
    pub fn peek_seq(&self) -> u32 {
        self.next_seq
    }

    /// Stamps `packet` with the next sequence number and registers its
    /// completion, returning the number assigned.
    pub fn assign(&mut self, packet: &mut Packet, completion: Option<C>) -> u32 {
        let seq = self.next_seq;
        // 0 means "not a reply", so it is never handed out
        self.next_seq = self.next_seq.checked_add(1).unwrap_or(1);
        packet.seq = seq;
        if let Some(completion) = completion {
            self.pending.insert(seq, completion);
        }
        seq
    }

    /// Drops the completion registered for `seq`.
    pub fn forget(&mut self, seq: u32) -> Option<C> {
        self.pending.remove(&seq)
    }

    /// Holds a packet until the connection is up. Its sequence number is
    /// assigned when the queue is flushed.
    pub fn enqueue(&mut self, packet: Packet, completion: Option<C>) {
        self.queue.push_back((packet, completion));
    }

    /// Takes every queued packet in submission order.
    pub fn drain_queue(&mut self) -> Vec<(Packet, Option<C>)> {
        self.queue.drain(..).collect()
    }

    /// Retires and returns the completion waiting for `packet`, if it is a
    /// reply to one.
    pub fn resolve(&mut self, packet: &Packet) -> Option<C> {
        if packet.reply_to == 0 {
            return None;
        }
        self.pending.remove(&packet.reply_to)
    }

    /// Drops completions for which `keep` returns false. Queued packets
    /// stay queued without a completion.
    pub fn retain(&mut self, mut keep: impl FnMut(&C) -> bool) {
        self.pending.retain(|_, c| keep(c));
        for (_, completion) in self.queue.iter_mut() {
            if completion.as_ref().is_some_and(|c| !keep(c)) {
                *completion = None;
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    /// Returns to the initial state: counter at 1, nothing pending or
    /// queued, disconnected. Dropped completions are never fired.
    pub fn reset(&mut self) {
        self.next_seq = 1;
        self.pending.clear();
        self.queue.clear();
        self.status = ConnectionStatus::Disconnected;
    }
}
