//! Liveness probing
//!
//! Pong replies carry no correlation token, so they are matched to probes
//! purely by order: each reply settles the oldest outstanding probe. This
//! relies on the worker answering probes in the order it received them.
//! A probe that times out is removed on its own; a pong arriving after that
//! is credited to the next probe in line.

use crate::error::BridgeError;
use crate::registry::Responder;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

struct PendingPing {
    seq: u64,
    responder: Responder<()>,
    deadline: Instant,
}

/// FIFO of outstanding liveness probes
pub struct LivenessProber {
    queue: VecDeque<PendingPing>,
    timeout: Duration,
    next_seq: u64,
}

impl LivenessProber {
    /// Create a prober whose probes expire after `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            queue: VecDeque::new(),
            timeout,
            next_seq: 0,
        }
    }

    /// Append a probe to the tail of the queue; returns its sequence number
    pub fn enqueue(&mut self, responder: Responder<()>, now: Instant) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push_back(PendingPing {
            seq,
            responder,
            deadline: now + self.timeout,
        });
        seq
    }

    /// Settle the head of the queue with success.
    ///
    /// Returns `false` if no probe was outstanding.
    pub fn on_pong(&mut self) -> bool {
        match self.queue.pop_front() {
            Some(ping) => {
                debug!("Pong matched probe #{}", ping.seq);
                let _ = ping.responder.send(Ok(()));
                true
            }
            None => {
                warn!("Received pong with no outstanding probe");
                false
            }
        }
    }

    /// Reject every probe whose deadline has passed; returns how many
    pub fn expire(&mut self, now: Instant) -> usize {
        let millis = self.timeout.as_millis() as u64;
        let mut expired = 0;
        let mut kept = VecDeque::with_capacity(self.queue.len());
        for ping in self.queue.drain(..) {
            if ping.deadline <= now {
                warn!("Liveness probe #{} timed out after {} ms", ping.seq, millis);
                let _ = ping
                    .responder
                    .send(Err(BridgeError::LivenessTimeout { millis }));
                expired += 1;
            } else {
                kept.push_back(ping);
            }
        }
        self.queue = kept;
        expired
    }

    /// Earliest deadline among outstanding probes
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.iter().map(|ping| ping.deadline).min()
    }

    /// Reject every outstanding probe with a clone of `error`
    pub fn reject_all(&mut self, error: &BridgeError) -> usize {
        let count = self.queue.len();
        for ping in self.queue.drain(..) {
            let _ = ping.responder.send(Err(error.clone()));
        }
        count
    }

    /// Number of outstanding probes
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether no probe is outstanding
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
