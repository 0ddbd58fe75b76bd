//! Runtime-tunable netplay knobs (§6 "Configuration knobs"), decoupled from any particular CLI
//! or transport so library users can set them programmatically, plus a `clap`-based harness CLI
//! in the teacher's `Args`/`Config` style for the `emunet-client` binary/integration tests.

use clap::{Parser, ValueEnum};

use emunet_proto::constants::SPECTATOR_PLAYER_INDEX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InputMode {
    OrderedRelay,
    UnorderedRelay,
    OrderedP2p,
    UnorderedP2p,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HostCodec {
    Auto,
    Vp9,
    H264,
    Vp8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SimulcastQuality {
    Low,
    High,
}

/// A participant's desired seat: a concrete slot index, or the spectator gallery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferredSlot {
    Slot(u8),
    Spectator,
}

impl PreferredSlot {
    pub fn as_wire_index(self) -> u8 {
        match self {
            PreferredSlot::Slot(n) => n,
            PreferredSlot::Spectator => SPECTATOR_PLAYER_INDEX,
        }
    }
}

/// Every runtime knob named in §6, constructed independently of `clap` so embedders can build
/// one without going through a CLI at all.
#[derive(Debug, Clone)]
pub struct NetplayConfig {
    pub input_mode: InputMode,
    /// Host-authoritative forward offset for outbound input events, in frames. `[0, 20]`.
    pub frame_delay: u8,
    /// Retry budget per missing unordered payload. `{0, 1, 2}`.
    pub unordered_retries: u8,
    /// ICE-restart backoff in seconds. `0` disables restarts. `[0, 5]`.
    pub retry_timer_seconds: u8,
    pub host_codec: HostCodec,
    pub client_simulcast_quality: SimulcastQuality,
    pub exclusive_slots: bool,
    /// `{2..8}`.
    pub max_slots: u8,
    pub preferred_slot: PreferredSlot,
}

impl Default for NetplayConfig {
    fn default() -> Self {
        Self {
            input_mode: InputMode::OrderedRelay,
            frame_delay: 20,
            unordered_retries: 1,
            retry_timer_seconds: 3,
            host_codec: HostCodec::Auto,
            client_simulcast_quality: SimulcastQuality::High,
            exclusive_slots: true,
            max_slots: 4,
            preferred_slot: PreferredSlot::Spectator,
        }
    }
}

impl NetplayConfig {
    /// Clamp every knob to its documented domain, in place.
    pub fn normalize(&mut self) {
        self.frame_delay = self.frame_delay.min(20);
        self.unordered_retries = self.unordered_retries.min(2);
        self.retry_timer_seconds = self.retry_timer_seconds.min(5);
        self.max_slots = self.max_slots.clamp(2, 8);
        if let PreferredSlot::Slot(slot) = self.preferred_slot
            && slot >= self.max_slots
        {
            self.preferred_slot = PreferredSlot::Spectator;
        }
    }
}

/// Connection harness CLI, used by the `emunet-client` integration tests and any example binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "emunet-client")]
pub struct Args {
    /// Server address to connect to, e.g. 127.0.0.1:5233
    #[arg(long)]
    pub connect: String,

    /// Use QUIC instead of TCP.
    #[arg(long, default_value_t = false)]
    pub quic: bool,

    /// Preferred slot: a number, or "spectator".
    #[arg(long, default_value = "spectator")]
    pub preferred_slot: String,

    #[arg(long, value_enum, default_value_t = InputMode::OrderedRelay)]
    pub input_mode: InputMode,

    #[arg(long, default_value_t = 20)]
    pub frame_delay: u8,

    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn preferred_slot(&self) -> PreferredSlot {
        match self.preferred_slot.parse::<u8>() {
            Ok(n) => PreferredSlot::Slot(n),
            Err(_) => PreferredSlot::Spectator,
        }
    }
}
