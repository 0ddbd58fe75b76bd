pub mod channel;
pub mod codec_tcp;
pub mod codec_udp;
pub mod constants;
pub mod error;
pub mod header;
pub mod limits;
pub mod messages;
pub mod msg_id;
pub mod packet;

/// Alias retained for call sites that spell the TCP codec module `codec` instead of
/// `codec_tcp`.
pub use codec_tcp as codec;
