//! Netplay error types.

use thiserror::Error;

/// The public error surface for a netplay session. Finer-grained internal error enums (wire
/// decode errors, handler errors) convert into this at the module boundary.
#[derive(Error, Debug)]
pub enum NetplayError {
    #[error("not connected to server")]
    NotConnected,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] emunet_proto::error::ProtoError),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("room join failed: {0}")]
    RoomJoinFailed(String),

    #[error("ROM hash mismatch")]
    RomHashMismatch,

    #[error("compatibility mismatch: {reason} (spectate allowed: {can_spectate})")]
    CompatibilityMismatch { reason: String, can_spectate: bool },

    #[error("no free slot available")]
    NoSlot,

    #[error("room is full")]
    RoomFull,

    #[error("room password is incorrect")]
    BadPassword,

    #[error("no room with that code")]
    NoSuchRoom,

    #[error("authentication required before this action can proceed")]
    AuthRequired,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("state sync failed: {0}")]
    SyncFailed(String),

    #[error("input queue exhausted (waiting for remote)")]
    InputQueueEmpty,

    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("media codec unavailable: {0}")]
    CodecUnavailable(String),

    #[error("ICE restart failed: {0}")]
    IceRestartFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel send error")]
    ChannelSend,

    #[error("channel receive error")]
    ChannelRecv,

    #[error("session already active")]
    AlreadyConnected,

    #[error("invalid server reply: {0}")]
    InvalidServerReply(String),
}

impl NetplayError {
    /// True for errors tagged unauthorized/token/auth (§4.7/§7): these must be surfaced to the
    /// credential-refresh collaborator before any retry, rather than propagated directly.
    pub fn is_auth_related(&self) -> bool {
        matches!(self, NetplayError::AuthRequired)
    }
}
