//! Controller frameworks: validate input events and produce zeroed input-state vectors.
//!
//! Polymorphic over the capability set `{validate, create_input_state, max_players, max_inputs}`,
//! discriminated by tag rather than by a trait object hierarchy (see the tagged-variants design
//! note).

use crate::input_queue::InputEvent;

/// Descriptor for a `Complex` controller framework: a variable, implementer-defined input map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComplexDescriptor {
    pub max_players: u8,
    pub max_inputs: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerFramework {
    /// Fixed 4 players x 30 inputs, buttons in `{0,1}`, analog in `[-32767, 32767]`.
    Simple,
    Complex(ComplexDescriptor),
}

impl ControllerFramework {
    pub fn max_players(&self) -> u8 {
        match self {
            ControllerFramework::Simple => 4,
            ControllerFramework::Complex(d) => d.max_players,
        }
    }

    pub fn max_inputs(&self) -> u16 {
        match self {
            ControllerFramework::Simple => 30,
            ControllerFramework::Complex(d) => d.max_inputs,
        }
    }

    /// Reject out-of-range player/input indices or non-numeric (NaN-equivalent, here: out of
    /// the Simple variant's value bounds) values.
    pub fn validate(&self, event: &InputEvent) -> bool {
        if event.player_index >= self.max_players() {
            return false;
        }
        if u16::from(event.input_index) >= self.max_inputs() {
            return false;
        }
        match self {
            ControllerFramework::Simple => {
                (0..=1).contains(&event.value) || (-32767..=32767).contains(&event.value)
            }
            ControllerFramework::Complex(_) => true,
        }
    }

    /// A zeroed input-state vector of length `max_inputs`.
    pub fn create_input_state(&self) -> Vec<i32> {
        vec![0; self.max_inputs() as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(player_index: u8, input_index: u16, value: i32) -> InputEvent {
        InputEvent {
            frame: 0,
            slot: player_index,
            player_index,
            input_index,
            value,
            from_remote: false,
        }
    }

    #[test]
    fn simple_rejects_out_of_range_player() {
        let simple = ControllerFramework::Simple;
        assert!(!simple.validate(&ev(4, 0, 1)));
    }

    #[test]
    fn simple_rejects_out_of_range_input_index() {
        let simple = ControllerFramework::Simple;
        assert!(!simple.validate(&ev(0, 30, 1)));
    }

    #[test]
    fn simple_accepts_button_and_analog_values() {
        let simple = ControllerFramework::Simple;
        assert!(simple.validate(&ev(0, 0, 1)));
        assert!(simple.validate(&ev(0, 0, -32767)));
    }

    #[test]
    fn create_input_state_is_zeroed_to_max_inputs() {
        let simple = ControllerFramework::Simple;
        assert_eq!(simple.create_input_state(), vec![0; 30]);

        let complex = ControllerFramework::Complex(ComplexDescriptor {
            max_players: 8,
            max_inputs: 12,
        });
        assert_eq!(complex.create_input_state().len(), 12);
    }
}
