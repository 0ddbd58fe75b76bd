use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Udp,
    Kcp,
}

/// Error codes carried by [`ErrorMsg`]. Each variant maps to a category of rejected request
/// or a terminal session condition.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BadMessage,
    RoomNotFound,
    AlreadyInRoom,
    NotInRoom,
    PermissionDenied,
    GameAlreadyStarted,
    InvalidState,
    HostNotAvailable,
    SlotOccupied,
    SlotOutOfRange,
    RomMismatch,
    RoomFull,
    Timeout,
    ServerFull,
    RateLimited,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Hello {
    pub client_nonce: u32,
    pub transport: TransportKind,
    pub proto_min: u8,
    pub proto_max: u8,
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Welcome {
    pub server_nonce: u32,
    pub assigned_client_id: u32,
    pub room_id: u32,
    pub tick_hz: u16,
    pub input_delay_frames: u8,
    pub max_payload: u16,
    pub rewind_capacity: u32,
    /// Opaque token identifying this connection, presented when attaching secondary
    /// channel-specific streams (see `AttachChannel`) on transports that support them.
    pub session_token: u64,
    /// How long this connection may stay silent before the server disconnects it, or `0` if
    /// the server has no idle timeout configured.
    pub idle_timeout_secs: u16,
}

/// Mirrors `crate::sync`-style lockstep/rollback choice over the wire. Kept separate from any
/// client-internal sync-mode type so the wire contract doesn't depend on client internals.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    #[default]
    Lockstep,
    Rollback,
}

/// Client announces which logical channel (see `crate::channel::ChannelKind`) a freshly opened
/// secondary transport stream should be used for, authenticated by the `session_token` handed
/// out in `Welcome`. Needed on transports (a second QUIC stream, a raw WebRTC data channel) that
/// don't otherwise convey this out of band.
#[derive(Serialize, Deserialize, Debug)]
pub struct AttachChannel {
    pub session_token: u64,
    pub channel: crate::channel::ChannelKind,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct JoinRoom {
    pub room_code: u32,
    /// Only meaningful when `room_code == 0` (creating a new room); the host's preference for
    /// which sync strategy the room runs. Ignored when joining an existing room, since the room
    /// already fixed its sync mode at creation time.
    pub preferred_sync_mode: Option<SyncMode>,
    /// 0-3 for a specific player slot, `AUTO_PLAYER_INDEX` to let the server pick, or
    /// `SPECTATOR_PLAYER_INDEX` to join as a spectator.
    pub desired_role: u8,
    /// True if the client already has the room's ROM cached locally, so the server can skip
    /// pushing `LoadRom` to it on join.
    pub has_rom: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct JoinAck {
    pub ok: bool,
    pub player_index: u8,
    pub start_frame: u32,
    pub room_id: u32,
    pub sync_mode: SyncMode,
    /// True if this player's port is occupying a slot that isn't live yet (room already started;
    /// the port activates later via `ActivatePort` once the client has caught up).
    pub pending_activation: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Leave {
    pub reason_code: u8,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorMsg {
    pub code: ErrorCode,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SwitchRole {
    /// 0-3 for player index, or `SPECTATOR_PLAYER_INDEX` for spectator.
    pub new_role: u8,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RoleChanged {
    pub client_id: u32,
    /// 0-3 for player index, or `SPECTATOR_PLAYER_INDEX` for spectator.
    pub new_role: u8,
}

/// Server notifies clients that a player has left the room.
#[derive(Serialize, Deserialize, Debug)]
pub struct PlayerLeft {
    pub client_id: u32,
    /// The player's previous index (0-3), or `SPECTATOR_PLAYER_INDEX` if spectator.
    pub player_index: u8,
}

/// Server notifies clients that a new player has joined the room.
#[derive(Serialize, Deserialize, Debug)]
pub struct PlayerJoined {
    pub client_id: u32,
    /// The player's index (0-3), or `SPECTATOR_PLAYER_INDEX` if spectator.
    pub player_index: u8,
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct LoadRom {
    pub data: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RomLoaded;

#[derive(Serialize, Deserialize, Debug)]
pub struct StartGame {
    /// Bitmask of active player ports (bit N = player index N is present)
    pub active_ports_mask: u8,
}

/// Client requests to pause/resume the game for all players.
#[derive(Serialize, Deserialize, Debug)]
pub struct PauseGame {
    pub paused: bool,
}

/// Server broadcasts pause state to all players.
#[derive(Serialize, Deserialize, Debug)]
pub struct PauseSync {
    pub paused: bool,
}

/// Client requests to reset the game for all players.
#[derive(Serialize, Deserialize, Debug)]
pub struct ResetGame {
    /// 0 = Soft, 1 = Hard/Power
    pub kind: u8,
}

/// Server broadcasts reset to all players.
#[derive(Serialize, Deserialize, Debug)]
pub struct ResetSync {
    pub kind: u8,
}

/// Host requests a switch between lockstep and rollback sync strategy for the room.
#[derive(Serialize, Deserialize, Debug)]
pub struct SetSyncMode {
    pub mode: SyncMode,
}

/// Server broadcasts the room's (possibly changed) sync mode.
#[derive(Serialize, Deserialize, Debug)]
pub struct SyncModeChanged {
    pub mode: SyncMode,
}

/// Late joiner / reconnecting client tells the server it has applied the catch-up snapshot and
/// replayed inputs up to `caught_up_to_frame`, and is ready to receive live input relay again.
#[derive(Serialize, Deserialize, Debug)]
pub struct RejoinReady {
    pub caught_up_to_frame: u32,
}

/// Host grants or revokes a controller port to/from a client without a full role-switch
/// handshake (pass-controller between an already-joined spectator and a player).
#[derive(Serialize, Deserialize, Debug)]
pub struct ActivatePort {
    pub player_index: u8,
    pub active_from_frame: u32,
}

/// Discovery: ask the server for metadata about a room by its join code, before attempting to
/// join it (used to check ROM compatibility up front).
#[derive(Serialize, Deserialize, Debug)]
pub struct QueryRoom {
    pub room_code: u32,
    /// Echoed back in the matching `RoomInfo`, so the client can correlate concurrent queries.
    pub request_id: u32,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RoomInfo {
    pub request_id: u32,
    pub ok: bool,
    pub room_id: u32,
    pub started: bool,
    pub sync_mode: SyncMode,
    /// Bitmask of occupied player slots (bit N = player index N is taken).
    pub occupied_mask: u8,
}

/// Client requests current game state (for reconnection/late join).
#[derive(Serialize, Deserialize, Debug)]
pub struct RequestState {}

/// Client provides game state snapshot to server.
#[derive(Serialize, Deserialize, Debug)]
pub struct ProvideState {
    pub frame: u32,
    pub data: Vec<u8>,
}

/// Server sends game state snapshot to a client.
#[derive(Serialize, Deserialize, Debug)]
pub struct SyncState {
    pub frame: u32,
    pub data: Vec<u8>,
}

/// Server tells a late joiner to begin catch-up playback.
///
/// The client is expected to:
/// - Ensure the ROM is loaded
/// - Apply the `SyncState` snapshot for `snapshot_frame`
/// - Replay inputs from `snapshot_frame` onward until it reaches `target_frame`
#[derive(Serialize, Deserialize, Debug)]
pub struct BeginCatchUp {
    /// The frame number corresponding to the snapshot that the client should start from.
    pub snapshot_frame: u32,
    /// The server's current target frame to catch up to (best-effort).
    pub target_frame: u32,
    /// Bitmask of controller ports that must be treated as active (bit 0..3).
    pub active_ports_mask: u8,
}

/// Maximum number of candidate addresses a host may advertise in [`P2PCreateRoom`] /
/// [`P2PJoinAck`].
pub const P2P_MAX_HOST_ADDRS: usize = 8;
/// Maximum byte length of a human-readable fallback reason string.
pub const P2P_MAX_REASON_LEN: usize = 256;

/// Host requests the signaling server create a room for a direct peer-to-peer session, falling
/// back to server relay only if the peers can't establish a direct media path.
#[derive(Serialize, Deserialize, Debug)]
pub struct P2PCreateRoom {
    /// Candidate addresses the host is reachable on, for direct peer connection.
    pub host_addrs: Vec<std::net::SocketAddr>,
    /// The host's own identifier for this room in its local (QUIC) room table.
    pub host_room_id: u32,
    /// SHA-256 fingerprint of the host's self-signed QUIC certificate, for peers to pin.
    pub host_quic_cert_sha256_fingerprint: Option<String>,
    pub host_quic_server_name: Option<String>,
    pub rom_hash: [u8; 16],
    pub max_slots: u8,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct P2PRoomCreated {
    pub room_id: u32,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct P2PJoinRoom {
    pub room_id: u32,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct P2PJoinAck {
    pub ok: bool,
    pub room_id: u32,
    pub host_room_id: u32,
    pub host_addrs: Vec<std::net::SocketAddr>,
    pub host_quic_cert_sha256_fingerprint: Option<String>,
    pub host_quic_server_name: Option<String>,
    /// True if the signaling server already knows direct P2P won't work for this room (e.g. the
    /// host has none of its candidate addresses reachable) and the joiner should go straight to
    /// relay.
    pub fallback_required: bool,
    pub fallback_reason: Option<String>,
}

/// Either peer asks the signaling server to arrange a fallback to server relay, because direct
/// P2P connectivity (ICE) could not be established or was lost.
#[derive(Serialize, Deserialize, Debug)]
pub struct P2PRequestFallback {
    pub room_id: u32,
    pub reason: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct P2PFallbackNotice {
    pub room_id: u32,
    pub reason: String,
    pub requested_by_client_id: u32,
}

/// Signaling server tells remaining peers the P2P host has disconnected.
#[derive(Serialize, Deserialize, Debug)]
pub struct P2PHostDisconnected {
    pub room_id: u32,
}

/// Host asks the signaling server to instruct every participant to reconnect through a relay
/// server, because the direct P2P/media path has failed or degraded.
#[derive(Serialize, Deserialize, Debug)]
pub struct RequestFallbackRelay {
    pub relay_addr: std::net::SocketAddr,
    pub relay_room_id: u32,
    pub reason: String,
}

/// Server instructs a client to reconnect through the named relay server.
#[derive(Serialize, Deserialize, Debug)]
pub struct FallbackToRelay {
    pub relay_addr: std::net::SocketAddr,
    pub relay_room_id: u32,
    pub reason: String,
}
