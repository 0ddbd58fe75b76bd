use crate::{
    constants::{HEADER_LEN, MAX_TCP_FRAME, TCP_LEN_PREFIX},
    error::ProtoError,
    header::Header,
    messages::Message,
    msg_id::MsgId,
    packet::PacketView,
};

/// Encode `payload` as a length-prefixed TCP frame: `[u32 frame_len_le][Header][Payload]`.
pub fn encode_tcp_frame<T: serde::Serialize>(
    mut header: Header,
    msg_id: MsgId,
    payload: &T,
    max_payload: usize,
) -> Result<Vec<u8>, ProtoError> {
    let payload_bytes = postcard::to_stdvec(payload)?;
    if payload_bytes.len() > max_payload {
        return Err(ProtoError::PayloadTooLarge(payload_bytes.len()));
    }

    header.msg_id = msg_id as u8;
    header.payload_len = payload_bytes.len() as u32;

    let frame_len = HEADER_LEN + payload_bytes.len();
    if frame_len > MAX_TCP_FRAME {
        return Err(ProtoError::FrameTooLarge(frame_len));
    }

    let mut out = Vec::with_capacity(TCP_LEN_PREFIX + frame_len);
    out.extend_from_slice(&(frame_len as u32).to_le_bytes());

    let mut hbuf = [0u8; HEADER_LEN];
    header.encode_into(&mut hbuf);
    out.extend_from_slice(&hbuf);
    out.extend_from_slice(&payload_bytes);
    Ok(out)
}

/// Encode `header`/`payload` as a TCP frame, picking the payload size limit automatically from
/// `msg_id` (control messages get the small cap, bulk ones like `LoadRom`/`SyncState` the large
/// one). Spares callers that already track their own `Header` from having to look up the limit.
pub fn encode_tcp_frame_auto<T: serde::Serialize>(
    header: Header,
    msg_id: MsgId,
    payload: &T,
) -> Result<Vec<u8>, ProtoError> {
    encode_tcp_frame(header, msg_id, payload, crate::limits::max_payload_for(msg_id))
}

/// Encode a message using its own `MsgId`, a fresh default header, and the auto-selected size
/// limit. Shared by call sites that just want to send a `Message` without tracking their own
/// connection-sequenced `Header`.
pub fn encode_message<T: Message>(payload: &T) -> Result<Vec<u8>, ProtoError> {
    let msg_id = T::msg_id();
    encode_tcp_frame_auto(Header::new(msg_id as u8), msg_id, payload)
}

pub fn try_decode_tcp_frames<'a>(
    in_buf: &'a [u8],
) -> Result<(Vec<PacketView<'a>>, usize), ProtoError> {
    let mut frames = Vec::new();
    let mut offset = 0usize;

    loop {
        if in_buf.len().saturating_sub(offset) < TCP_LEN_PREFIX {
            break;
        }
        let len_bytes = &in_buf[offset..offset + TCP_LEN_PREFIX];
        let frame_len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;

        if frame_len < HEADER_LEN {
            return Err(ProtoError::LengthMismatch);
        }
        if frame_len > MAX_TCP_FRAME {
            return Err(ProtoError::FrameTooLarge(frame_len));
        }

        let total_needed = TCP_LEN_PREFIX + frame_len;
        if in_buf.len().saturating_sub(offset) < total_needed {
            break;
        }

        let frame = &in_buf[offset + TCP_LEN_PREFIX..offset + total_needed];
        let (h, payload) = Header::decode(frame)?;
        let msg = MsgId::from_repr(h.msg_id).ok_or(ProtoError::UnknownMsgId(h.msg_id))?;

        frames.push(PacketView::new(h, msg, payload));
        offset += total_needed;
    }

    Ok((frames, offset))
}
