use bytes::{Buf, BufMut, BytesMut};
use std::sync::Arc;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::WireError;
use crate::message::{Message, MessageRegistry};

/// Frame header: [u32 wire id][u32 payload length], big-endian.
pub const HEADER_LEN: usize = 8;

/// Upper bound on a single frame's payload; anything larger is treated as a
/// corrupt stream and the connection is dropped.
pub const MAX_FRAME: usize = 16 * 1024 * 1024;

/// Length-prefixed, self-describing codec for `Message` frames. The registry
/// reconstructs the concrete shape from the wire id, so any node can decode a
/// message it was not the sender of.
pub struct WireCodec {
    registry: Arc<MessageRegistry>,
}

impl WireCodec {
    pub fn new(registry: Arc<MessageRegistry>) -> Self {
        WireCodec { registry }
    }
}

impl<'a> Encoder<&'a dyn Message> for WireCodec {
    type Error = WireError;

    fn encode(&mut self, item: &'a dyn Message, dst: &mut BytesMut) -> Result<(), WireError> {
        let payload = item.encode()?;
        if payload.len() > MAX_FRAME {
            return Err(WireError::Oversize(payload.len()));
        }
        dst.reserve(HEADER_LEN + payload.len());
        dst.put_u32(item.wire_id());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

impl Decoder for WireCodec {
    type Item = Box<dyn Message>;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, WireError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = &src[..HEADER_LEN];
        let wire_id = header.get_u32();
        let length = header.get_u32() as usize;
        if length > MAX_FRAME {
            return Err(WireError::Oversize(length));
        }
        if src.len() < HEADER_LEN + length {
            src.reserve(HEADER_LEN + length - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(length);
        self.registry.decode(wire_id, &payload).map(Some)
    }
}
