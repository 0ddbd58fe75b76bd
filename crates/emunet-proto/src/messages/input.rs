use serde::{Deserialize, Serialize};

/// A client's local input for a contiguous run of frames starting at `start_frame`.
///
/// `buttons[i]` is the button mask for frame `start_frame + i`. Variable-length so the sender
/// can batch as many frames as fit under the control-payload limit, trading latency for
/// redundancy against packet loss (each frame is typically re-sent in several consecutive
/// batches until acknowledged).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InputBatch {
    pub start_frame: u32,
    pub buttons: Vec<u16>,
}

/// Server relay of one player's inputs to every other participant in the room.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RelayInputs {
    pub player_index: u8,
    pub start_frame: u32,
    pub buttons: Vec<u16>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct InputAck {
    pub last_server_frame: u32,
}
