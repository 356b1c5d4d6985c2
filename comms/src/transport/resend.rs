//! The queue of requests still waiting for their response.

use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::NodeId;

/// A sent request, kept until its response arrives.
#[derive(Debug)]
pub(super) struct Pending {
    pub message_id: u64,
    pub to: NodeId,
    /// The encoded frame, resent verbatim.
    pub frame: Arc<[u8]>,
    pub sent_at: Instant,
    pub resends: u32,
}

/// What the retry daemon should do next.
#[derive(Debug)]
pub(super) enum Next {
    Idle,
    Wait(Duration),
    Resend(Pending),
}

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<Pending>,
    outstanding: HashSet<u64>,
}

/// FIFO of pending requests.
///
/// Entries are ordered by their last transmission, so only the head ever
/// needs to be inspected. Answered entries are discarded lazily when they
/// reach the head.
#[derive(Debug, Default)]
pub(super) struct ResendQueue {
    state: Mutex<State>,
    notify: Notify,
}

impl ResendQueue {
    pub fn push(&self, pending: Pending) {
        {
            let mut state = self.state.lock();
            state.outstanding.insert(pending.message_id);
            state.queue.push_back(pending);
        }

        self.notify.notify_one();
    }

    /// Puts a just resent entry back at the tail.
    pub fn requeue(&self, pending: Pending) {
        let mut state = self.state.lock();
        if state.outstanding.contains(&pending.message_id) {
            state.queue.push_back(pending);
        }
    }

    /// Marks `message_id` as answered.
    ///
    /// # Returns
    /// Whether the request was still pending.
    pub fn cancel(&self, message_id: u64) -> bool {
        self.state.lock().outstanding.remove(&message_id)
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding.len()
    }

    /// Pops answered entries off the head and reports on the first live one.
    pub fn next(&self, rtt_timeout: Duration) -> Next {
        let mut state = self.state.lock();
        let State { queue, outstanding } = &mut *state;

        while let Some(head) = queue.pop_front() {
            if !outstanding.contains(&head.message_id) {
                continue;
            }

            let age = head.sent_at.elapsed();
            if age < rtt_timeout {
                queue.push_front(head);
                return Next::Wait(rtt_timeout - age);
            }

            return Next::Resend(head);
        }

        Next::Idle
    }

    /// Resolves once something was pushed since the last call.
    pub async fn pushed(&self) {
        self.notify.notified().await
    }
}
