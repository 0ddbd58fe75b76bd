//! Room state: player/spectator membership, input history, and the
//! derived broadcast helpers used to relay inputs and state snapshots.

pub mod broadcast;
pub mod state;
