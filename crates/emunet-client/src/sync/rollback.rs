//! Rollback synchronization strategy.
//!
//! This strategy predicts remote inputs and rolls back on misprediction.
//! Best for high-latency networks where waiting would cause noticeable lag.

use std::collections::HashMap;

use super::{RollbackRequest, SyncMode, SyncStrategy};

/// Rollback synchronization implementation.
///
/// Predicts remote inputs (repeats last known input) and triggers rollback
/// when confirmed inputs differ from predictions.
#[derive(Debug)]
pub struct RollbackSync {
    /// Confirmed inputs per port (frame -> buttons).
    confirmed_inputs: [HashMap<u32, u16>; 4],
    /// Last known input per port (for prediction).
    last_inputs: [u16; 4],
    /// Which ports are active.
    active_ports: [bool; 4],
    /// Last confirmed frame (all ports have confirmed up to this frame).
    last_confirmed_frame: u32,
    /// Current predicted frame.
    current_frame: u32,
    /// Pending rollback request if prediction was wrong.
    pending_rollback: Option<RollbackRequest>,
    /// Local player index.
    local_player: Option<u8>,
    /// Input delay frames.
    input_delay: u32,
}

impl Default for RollbackSync {
    fn default() -> Self {
        Self::new(2)
    }
}

impl RollbackSync {
    /// Create a new rollback sync with the given input delay.
    pub fn new(input_delay: u32) -> Self {
        Self {
            confirmed_inputs: Default::default(),
            last_inputs: [0; 4],
            active_ports: [false; 4],
            last_confirmed_frame: 0,
            current_frame: 0,
            pending_rollback: None,
            local_player: None,
            input_delay,
        }
    }

    /// Set the local player index.
    pub fn set_local_player(&mut self, player: Option<u8>) {
        self.local_player = player;
    }

    /// Set input delay.
    pub fn set_input_delay(&mut self, delay: u32) {
        self.input_delay = delay;
    }

    /// Get predicted input for a remote port at a specific frame.
    fn predict_input(&self, port: usize, frame: u32) -> u16 {
        // Use confirmed input if available
        if let Some(&buttons) = self.confirmed_inputs[port].get(&frame) {
            return buttons;
        }
        // Otherwise predict using last known input
        self.last_inputs[port]
    }

    /// Update the last confirmed frame.
    fn update_confirmed_frame(&mut self) {
        let mut min_confirmed = u32::MAX;
        let mut any_active = false;

        for (i, &active) in self.active_ports.iter().enumerate() {
            if active {
                any_active = true;
                // Find largest frame F such that all 0..=F exist for this port.
                // Since confirmed_inputs is a HashMap, we check sequentially.
                // Optimization: start from last_confirmed_frame.
                let mut current = self.last_confirmed_frame;
                while self.confirmed_inputs[i].contains_key(&current) {
                    current += 1;
                }
                // 'current' is the first MISSING frame, so 'current - 1' is confirmed.
                let confirmed = current.saturating_sub(1);
                min_confirmed = min_confirmed.min(confirmed);
            }
        }

        if any_active && min_confirmed != u32::MAX {
            self.last_confirmed_frame = min_confirmed;
        }
    }

    /// Prune old confirmed inputs.
    fn prune_old_inputs(&mut self, keep_from: u32) {
        for inputs in &mut self.confirmed_inputs {
            inputs.retain(|&f, _| f >= keep_from.saturating_sub(120));
        }
    }
}

impl SyncStrategy for RollbackSync {
    fn inputs_for_frame(&mut self, frame: u32) -> Option<[u16; 4]> {
        self.current_frame = frame;

        let mut inputs = [0u16; 4];
        for (i, &active) in self.active_ports.iter().enumerate() {
            if active {
                inputs[i] = self.predict_input(i, frame);
            }
        }

        // Prune periodically
        if frame % 60 == 0 {
            self.prune_old_inputs(self.last_confirmed_frame);
        }

        Some(inputs)
    }

    fn can_advance(&self, _frame: u32) -> bool {
        // Rollback mode can always advance using predictions
        true
    }

    fn on_local_input(&mut self, player: u8, frame: u32, buttons: u16) {
        let port = player as usize;
        if port >= 4 {
            return;
        }

        // Ignore inputs for frames that are already finalized and pruned
        if frame < self.last_confirmed_frame.saturating_sub(120) {
            return;
        }

        self.confirmed_inputs[port].insert(frame, buttons);
        self.last_inputs[port] = buttons;
        self.update_confirmed_frame();
    }

    fn on_remote_input(&mut self, player: u8, frame: u32, buttons: u16) {
        let port = player as usize;
        if port >= 4 {
            return;
        }

        // Ignore inputs for frames that are already finalized and pruned
        if frame < self.last_confirmed_frame.saturating_sub(120) {
            return;
        }

        // Check if this differs from our prediction (if we already simulated this frame)
        if frame < self.current_frame {
            let predicted = self.predict_input(port, frame);
            if predicted != buttons {
                // Prediction was wrong, need to rollback
                let target = match &self.pending_rollback {
                    Some(rb) => rb.target_frame.min(frame),
                    None => frame,
                };
                self.pending_rollback = Some(RollbackRequest {
                    target_frame: target,
                    current_frame: self.current_frame,
                });
            }
        }

        // Store confirmed input
        self.confirmed_inputs[port].insert(frame, buttons);
        self.last_inputs[port] = buttons;
        self.update_confirmed_frame();
    }

    fn pending_rollback(&self) -> Option<RollbackRequest> {
        self.pending_rollback.clone()
    }

    fn clear_rollback(&mut self) {
        self.pending_rollback = None;
    }

    fn should_fast_forward(&self, current_frame: u32) -> bool {
        // Fast forward if we're behind confirmed frame significantly
        self.last_confirmed_frame > current_frame + self.input_delay + 2
    }

    fn set_port_active(&mut self, port: usize, active: bool) {
        if port < 4 {
            self.active_ports[port] = active;
            if !active {
                self.confirmed_inputs[port].clear();
                self.last_inputs[port] = 0;
            }
        }
    }

    fn mode(&self) -> SyncMode {
        SyncMode::Rollback
    }

    fn clear(&mut self) {
        self.confirmed_inputs = Default::default();
        self.last_inputs = [0; 4];
        self.last_confirmed_frame = 0;
        self.current_frame = 0;
        self.pending_rollback = None;
    }

    fn last_confirmed_frame(&self) -> u32 {
        self.last_confirmed_frame
    }

    fn set_input_delay(&mut self, delay: u32) {
        self.input_delay = delay;
    }
}
