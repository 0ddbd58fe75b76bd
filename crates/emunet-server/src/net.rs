//! Network transport layer: TCP/WebSocket/TLS listeners, QUIC, and the
//! inbound/outbound event plumbing shared between them.

pub mod framing;
pub mod inbound;
pub mod outbound;
pub mod quic;
pub mod quic_config;
pub mod rate_limit;
pub mod stream_adapter;
pub mod tcp;
