//! DataChannelCore: the one optional SFU data producer plus the per-peer P2P channel map, unified
//! behind a single `send`/`on_incoming` surface.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::error::NetplayError;
use crate::input_queue::InputEvent;

/// One concrete outbound channel: either the SFU data producer or a single P2P data channel.
pub trait DataChannelSink: Send + Sync {
    fn send(&self, bytes: &[u8]) -> Result<(), NetplayError>;
    fn is_open(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    OrderedRelay,
    UnorderedRelay,
    OrderedP2P,
    UnorderedP2P,
}

#[derive(Default)]
struct PeerChannels {
    ordered: Option<Arc<dyn DataChannelSink>>,
    unordered: Option<Arc<dyn DataChannelSink>>,
}

const DEFAULT_PENDING_CAPACITY: usize = 100;

pub struct DataChannelCore {
    mode: ChannelMode,
    sfu_producer: Option<Arc<dyn DataChannelSink>>,
    peers: HashMap<u32, PeerChannels>,
    pending: VecDeque<Vec<u8>>,
    pending_capacity: usize,
}

impl DataChannelCore {
    pub fn new(mode: ChannelMode) -> Self {
        Self {
            mode,
            sfu_producer: None,
            peers: HashMap::new(),
            pending: VecDeque::new(),
            pending_capacity: DEFAULT_PENDING_CAPACITY,
        }
    }

    pub fn set_pending_capacity(&mut self, capacity: usize) {
        self.pending_capacity = capacity;
    }

    pub fn set_sfu_producer(&mut self, producer: Arc<dyn DataChannelSink>) {
        self.sfu_producer = Some(producer);
    }

    /// Register (or replace) a peer's ordered/unordered P2P channels. Passing `None` leaves the
    /// existing slot untouched.
    pub fn set_peer_channel(
        &mut self,
        peer_id: u32,
        ordered: Option<Arc<dyn DataChannelSink>>,
        unordered: Option<Arc<dyn DataChannelSink>>,
    ) {
        let entry = self.peers.entry(peer_id).or_default();
        if ordered.is_some() {
            entry.ordered = ordered;
        }
        if unordered.is_some() {
            entry.unordered = unordered;
        }
    }

    fn preferred_peer_channel(&self) -> Option<Arc<dyn DataChannelSink>> {
        let want_unordered = matches!(self.mode, ChannelMode::UnorderedP2P);
        self.peers.values().find_map(|p| {
            let candidate = if want_unordered {
                p.unordered.as_ref()
            } else {
                p.ordered.as_ref()
            };
            candidate.filter(|c| c.is_open()).cloned()
        })
    }

    fn push_pending(&mut self, payload: Vec<u8>) {
        if self.pending.len() >= self.pending_capacity {
            tracing::warn!("data channel pending buffer full, dropping oldest payload");
            self.pending.pop_front();
        }
        self.pending.push_back(payload);
    }

    /// Send `payload` by mode: relay modes write the SFU producer directly; P2P modes prefer the
    /// first open channel of the right ordering across peers, buffering if none is open.
    pub fn send(&mut self, payload: Vec<u8>) -> Result<(), NetplayError> {
        match self.mode {
            ChannelMode::OrderedRelay | ChannelMode::UnorderedRelay => match &self.sfu_producer {
                Some(producer) if producer.is_open() => producer.send(&payload),
                _ => Err(NetplayError::TransportUnavailable(
                    "sfu data producer not open".to_string(),
                )),
            },
            ChannelMode::OrderedP2P | ChannelMode::UnorderedP2P => {
                match self.preferred_peer_channel() {
                    Some(channel) => channel.send(&payload),
                    None => {
                        self.push_pending(payload);
                        Ok(())
                    }
                }
            }
        }
    }

    /// Called when any P2P channel transitions to open. Sends every pending payload in arrival
    /// order; a send failure reinserts the remaining batch at the head to preserve ordering.
    pub fn flush_pending(&mut self) {
        while let Some(payload) = self.pending.pop_front() {
            let Some(channel) = self.preferred_peer_channel() else {
                self.pending.push_front(payload);
                break;
            };
            if channel.send(&payload).is_err() {
                self.pending.push_front(payload);
                break;
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Decode an incoming payload and dispatch it. `"i"`-tagged payloads invoke `on_input` with
    /// the decoded event; other tags are ignored with a warning; malformed bytes are discarded
    /// silently.
    pub fn on_incoming(
        &self,
        bytes: &[u8],
        from_peer: Option<u32>,
        on_input: &mut dyn FnMut(InputEvent, Option<u32>),
    ) {
        let Some((&tag, rest)) = bytes.split_first() else {
            return;
        };
        match tag {
            b'i' => {
                // SFU data channels carry the input tag as UTF-8 JSON, not postcard: server-side
                // SCTP framing corrupts binary structured payloads on that path.
                if let Ok(event) = serde_json::from_slice::<InputEvent>(rest) {
                    on_input(event, from_peer);
                }
            }
            other => {
                tracing::warn!(tag = other as u32, "ignoring unknown data-channel payload type")
            }
        }
    }
}

/// Build the `"i"`-tagged wire payload for an input event, UTF-8 JSON per §6.
pub fn encode_input_payload(event: &InputEvent) -> Result<Vec<u8>, NetplayError> {
    let mut out = vec![b'i'];
    out.extend(serde_json::to_vec(event).map_err(|e| NetplayError::InvalidServerReply(e.to_string()))?);
    Ok(out)
}
