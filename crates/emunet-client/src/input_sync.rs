//! InputSync: the netplay input pipeline. Owns the input queue, slot table, and controller
//! framework; enforces edge-triggering and the delay-synchronous host/client policy.

use std::collections::{HashMap, HashSet};

use crate::controller::ControllerFramework;
use crate::frame_clock::FrameClock;
use crate::input_queue::{InputEvent, InputQueue};
use crate::slot_manager::SlotManager;

/// Where a produced/received input actually lands. Provided by the caller; InputSync never
/// guesses at the emulator's internals.
pub trait EmulatorSink {
    fn apply_input(&mut self, event: InputEvent);
}

/// Save-state collaborator for rollback mode. The spec deliberately leaves the snapshot
/// mechanism abstract; this trait is the seam an implementer plugs a real save-state system
/// into.
pub trait RollbackHook {
    fn save_predicted(&mut self, frame: u32, predicted: &[InputEvent]);
    fn resimulate(&mut self, from_frame: u32, to_frame: u32, late_event: InputEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Client,
}

/// Result of [`InputSync::send_local`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendLocalOutcome {
    /// Host role: the input was enqueued under the current frame; nothing to transmit yet.
    Enqueued,
    /// Client role: serialize and hand this event to the data channel immediately.
    Send(InputEvent),
    /// Edge-trigger suppressed the repeat, or the controller framework rejected the event.
    Suppressed,
}

pub struct InputSync {
    role: Role,
    local_player_id: u32,
    retain_window: u32,
    supports_rollback: bool,
    queue: InputQueue,
    slots: SlotManager,
    controller: ControllerFramework,
    last_value: HashMap<(u8, u16), i32>,
    rollback: Option<Box<dyn RollbackHook + Send>>,
    /// Keys of remote inputs already applied, keyed by `(frame, slot, player_index, input_index)`.
    /// A given event can arrive twice — once over the data channel, once via the signaling
    /// fallback relay — and must only ever be applied once.
    applied_keys: HashSet<(u32, u8, u8, u16)>,
}

impl InputSync {
    pub fn new(
        role: Role,
        local_player_id: u32,
        controller: ControllerFramework,
        slots: SlotManager,
    ) -> Self {
        Self {
            role,
            local_player_id,
            retain_window: 120,
            supports_rollback: false,
            queue: InputQueue::new(),
            slots,
            controller,
            last_value: HashMap::new(),
            rollback: None,
            applied_keys: HashSet::new(),
        }
    }

    pub fn set_retain_window(&mut self, frames: u32) {
        self.retain_window = frames;
    }

    pub fn enable_rollback(&mut self, hook: Box<dyn RollbackHook + Send>) {
        self.supports_rollback = true;
        self.rollback = Some(hook);
    }

    pub fn slots(&self) -> &SlotManager {
        &self.slots
    }

    /// Invalidate the edge-trigger cache. Call whenever a slot assignment changes.
    pub fn invalidate_cache(&mut self) {
        self.last_value.clear();
    }

    /// Assign a slot, per [`SlotManager::assign`]. Every slot mutation goes through one of
    /// these wrappers so the edge-trigger cache is never left stale (§4.5: the cache is fully
    /// invalidated whenever a slot assignment changes).
    pub fn assign_slot(&mut self, player_id: u32, preferred: Option<u8>) -> Option<u8> {
        let slot = self.slots.assign(player_id, preferred);
        if slot.is_some() {
            self.invalidate_cache();
        }
        slot
    }

    pub fn release_slot(&mut self, player_id: u32) {
        self.slots.release(player_id);
        self.invalidate_cache();
    }

    pub fn request_slot_pass(&mut self, from: u32, to: u32, slot: u8) -> Option<u64> {
        self.slots.request_pass(from, to, slot)
    }

    pub fn accept_slot_pass(&mut self, request_id: u64) -> Option<crate::slot_manager::SlotPassRequest> {
        let resolved = self.slots.accept_pass(request_id);
        if resolved.is_some() {
            self.invalidate_cache();
        }
        resolved
    }

    pub fn reject_slot_pass(&mut self, request_id: u64) -> Option<crate::slot_manager::SlotPassRequest> {
        self.slots.reject_pass(request_id)
    }

    /// Produce a local input. Host role enqueues it for host-authoritative simulation; client
    /// role bypasses the queue and hands the event straight to the transport.
    pub fn send_local(
        &mut self,
        clock: &FrameClock,
        player_index: u8,
        input_index: u16,
        value: i32,
    ) -> SendLocalOutcome {
        let effective_player = match self.role {
            Role::Client => self
                .slots
                .slot_of(self.local_player_id)
                .unwrap_or(player_index),
            Role::Host => player_index,
        };

        let key = (effective_player, input_index);
        let probe = InputEvent {
            frame: 0,
            slot: effective_player,
            player_index: effective_player,
            input_index,
            value,
            from_remote: false,
        };
        if !self.controller.validate(&probe) {
            return SendLocalOutcome::Suppressed;
        }
        if self.last_value.get(&key) == Some(&value) {
            return SendLocalOutcome::Suppressed;
        }
        self.last_value.insert(key, value);

        match self.role {
            Role::Host => {
                let event = InputEvent {
                    frame: clock.current(),
                    ..probe
                };
                self.queue.enqueue(event);
                SendLocalOutcome::Enqueued
            }
            Role::Client => {
                let event = InputEvent {
                    frame: clock.delayed_target(),
                    ..probe
                };
                SendLocalOutcome::Send(event)
            }
        }
    }

    /// Host-side per-tick pump: drain the queue for the current frame, apply every event to
    /// the emulator, and return the outbound batch targeted at `current + delay`.
    pub fn process_frame_inputs(
        &mut self,
        clock: &FrameClock,
        sink: &mut dyn EmulatorSink,
    ) -> Vec<InputEvent> {
        let current = clock.current();
        let drained = self.queue.drain(current);

        if self.supports_rollback {
            if let Some(hook) = self.rollback.as_deref_mut() {
                hook.save_predicted(current, &drained);
            }
        }

        for event in &drained {
            sink.apply_input(*event);
        }

        let target = clock.delayed_target();
        let outgoing = drained
            .iter()
            .map(|event| InputEvent {
                frame: target,
                ..*event
            })
            .collect();

        self.queue.evict_older_than(current, self.retain_window);
        let retain_window = self.retain_window;
        self.applied_keys
            .retain(|&(frame, ..)| current.saturating_sub(frame) <= retain_window);
        outgoing
    }

    /// Apply (delay-sync) or replay-buffer (rollback) a remote input. Duplicate deliveries of the
    /// same `(frame, slot, player_index, input_index)` — e.g. one over the data channel and one
    /// via the signaling fallback relay — are applied at most once.
    pub fn receive_remote(
        &mut self,
        payload: InputEvent,
        clock: &FrameClock,
        sink: &mut dyn EmulatorSink,
    ) {
        if !self.controller.validate(&payload) {
            tracing::debug!(frame = payload.frame, "dropping invalid remote input");
            return;
        }

        let key = (
            payload.frame,
            payload.slot,
            payload.player_index,
            payload.input_index,
        );
        if !self.applied_keys.insert(key) {
            tracing::trace!(frame = payload.frame, "dropping duplicate remote input");
            return;
        }

        if self.supports_rollback && payload.frame < clock.current() {
            if let Some(hook) = self.rollback.as_deref_mut() {
                hook.resimulate(payload.frame, clock.current(), payload);
            }
            return;
        }

        sink.apply_input(payload);
    }
}
