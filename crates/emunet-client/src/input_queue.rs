//! Per-frame FIFO of pending input events, with retry metadata for unordered/P2P delivery.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single controller input, local or remote, scheduled for a specific frame.
///
/// `(player_index, input_index)` is the input key used for edge-trigger de-duplication
/// upstream in `InputSync`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEvent {
    pub frame: u32,
    pub slot: u8,
    pub player_index: u8,
    pub input_index: u16,
    pub value: i32,
    pub from_remote: bool,
}

struct QueuedEvent {
    event: InputEvent,
    retry_count: u8,
}

/// FIFO keyed by frame. Events for the same frame are returned in enqueue order.
///
/// No capacity bound is enforced here; callers that need bounded memory growth (the
/// `InputSync` retain-window in §4.5) call [`InputQueue::evict_older_than`] themselves after
/// each tick.
#[derive(Default)]
pub struct InputQueue {
    by_frame: BTreeMap<u32, Vec<QueuedEvent>>,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, event: InputEvent) {
        self.by_frame
            .entry(event.frame)
            .or_default()
            .push(QueuedEvent {
                event,
                retry_count: 0,
            });
    }

    /// Remove and return every event queued for `frame`.
    pub fn drain(&mut self, frame: u32) -> Vec<InputEvent> {
        self.by_frame
            .remove(&frame)
            .map(|entries| entries.into_iter().map(|e| e.event).collect())
            .unwrap_or_default()
    }

    /// Look at the events queued for `frame` without consuming them.
    pub fn peek(&self, frame: u32) -> Vec<InputEvent> {
        self.by_frame
            .get(&frame)
            .map(|entries| entries.iter().map(|e| e.event).collect())
            .unwrap_or_default()
    }

    /// Stop tracking events at `frame` for retry purposes: the origin received an ACK for it.
    pub fn acknowledge(&mut self, frame: u32) {
        self.by_frame.remove(&frame);
    }

    /// Events eligible for retransmission: `event.frame < current_frame`,
    /// `current_frame - event.frame <= max_age`, and `retry_count < unordered_retries`.
    /// Each returned candidate's `retry_count` is incremented exactly once.
    pub fn retry_candidates(
        &mut self,
        current_frame: u32,
        max_age: u32,
        unordered_retries: u8,
    ) -> Vec<InputEvent> {
        let mut out = Vec::new();
        for (&frame, entries) in self.by_frame.iter_mut() {
            if frame >= current_frame || current_frame - frame > max_age {
                continue;
            }
            for entry in entries.iter_mut() {
                if entry.retry_count < unordered_retries {
                    entry.retry_count += 1;
                    out.push(entry.event);
                }
            }
        }
        out
    }

    pub fn clear(&mut self) {
        self.by_frame.clear();
    }

    /// Drop every event older than `current_frame - retain_window` (the §4.5 memory-hygiene
    /// pass InputSync runs after every `process_frame_inputs`).
    pub fn evict_older_than(&mut self, current_frame: u32, retain_window: u32) {
        let floor = current_frame.saturating_sub(retain_window);
        self.by_frame.retain(|&frame, _| frame >= floor);
    }

    pub fn is_empty(&self) -> bool {
        self.by_frame.is_empty()
    }
}
