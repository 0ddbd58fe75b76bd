//! Netplay client core for browser-hosted emulators.
//!
//! This crate is transport- and emulator-agnostic: it drives room lifecycle, slot assignment,
//! input synchronization, and SFU/P2P media plumbing for a netplay session, while delegating the
//! actual emulator stepping, signaling transport, and media backend to collaborators the host
//! application supplies (see [`input_provider`], [`signaling`], [`media_transport`]). Input and
//! room-control messages travel over a signaling/data-channel pair rather than a dedicated TCP
//! lockstep socket, so the same core supports both relayed (ordered/unordered) and P2P modes.
//!
//! # Architecture
//!
//! - [`session`]: Session state machine and input queue management
//! - [`config`]: Runtime-tunable netplay knobs and the connection harness CLI
//! - [`tcp_client`]: Async TCP client for server communication
//! - [`input_provider`]: Interface for injecting network inputs into the NES runtime
//! - [`handler`]: Session handler for protocol message processing
//! - [`sync`]: Lockstep/rollback synchronization strategies
//! - [`error`]: Error types
//! - [`frame_clock`]: Netplay-visible frame counter derived from the emulator's own clock
//! - [`input_queue`]: Per-frame FIFO of pending inputs with retry bookkeeping
//! - [`slot_manager`]: Player-slot assignment and pass-controller negotiation
//! - [`controller`]: Controller frameworks (Simple/Complex input validation)
//! - [`input_sync`]: The input pipeline tying FrameClock/InputQueue/SlotManager/Controller together
//! - [`game_mode`]: Game mode registry and join-compatibility validation
//! - [`spectator`]: Spectator tracking and the bounded room chat log
//! - [`signaling`]: Reconnecting request/response + pub/sub channel to the signaling server
//! - [`media_transport`]: SFU media transport orchestration (producers/consumers/ICE restart)
//! - [`data_channel`]: Unified SFU/P2P data channel send and receive path
//! - [`room_manager`]: Client-side room lifecycle (list/create/join/leave/ready/start)
//! - [`credential`]: Credential-refresh collaborator, invoked before retrying auth-tagged errors

pub mod config;
pub mod controller;
pub mod credential;
pub mod data_channel;
pub mod error;
pub mod frame_clock;
pub mod game_mode;
pub mod handler;
pub mod input_provider;
pub mod input_queue;
pub mod input_sync;
pub mod media_transport;
pub mod room_manager;
pub mod session;
pub mod signaling;
pub mod slot_manager;
pub mod spectator;
pub mod sync;
pub mod tcp_client;

// Re-export commonly used types
pub use config::{HostCodec, InputMode, NetplayConfig, PreferredSlot, SimulcastQuality};
pub use controller::ControllerFramework;
pub use credential::CredentialRefresh;
pub use data_channel::{ChannelMode, DataChannelCore};
pub use emunet_proto::constants::SPECTATOR_PLAYER_INDEX;
pub use error::NetplayError;
pub use frame_clock::FrameClock;
pub use game_mode::GameModeManager;
pub use handler::{NetplayCommand, NetplayEvent, SessionHandler, SessionStartConfig};
pub use input_provider::{NetplayInputProvider, SharedInputProvider, create_input_provider};
pub use input_queue::{InputEvent, InputQueue};
pub use input_sync::InputSync;
pub use media_transport::MediaTransport;
pub use room_manager::RoomManager;
pub use session::{NetplaySession, SessionState};
pub use signaling::SignalingTransport;
pub use slot_manager::{SlotManager, SlotPassRequest};
pub use spectator::SpectatorManager;
pub use sync::SyncMode;
pub use tcp_client::{TcpClientEvent, TcpClientHandle, connect};
