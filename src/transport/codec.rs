//! Multipart framing for stream transports.
//!
//! ```text
//! +-----------+-----------+---------+-----------+---------+----
//! | count u32 | len_0 u32 | frame_0 | len_1 u32 | frame_1 | ...
//! +-----------+-----------+---------+-----------+---------+----
//! ```
//! All integers are big-endian.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::Frames;

/// Maximum number of frames in one message.
pub const MAX_FRAMES: usize = 64;

/// Maximum encoded message size (64MB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

const LEN_SIZE: usize = 4;

/// Codec for length-prefixed multipart messages.
#[derive(Debug, Clone, Default)]
pub struct MultipartCodec;

impl MultipartCodec {
    pub fn new() -> Self {
        Self
    }
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

impl Encoder<Frames> for MultipartCodec {
    type Error = io::Error;

    fn encode(&mut self, frames: Frames, dst: &mut BytesMut) -> io::Result<()> {
        if frames.len() > MAX_FRAMES {
            return Err(invalid(format!(
                "{} frames exceeds limit of {}",
                frames.len(),
                MAX_FRAMES
            )));
        }
        let size = LEN_SIZE + frames.iter().map(|f| LEN_SIZE + f.len()).sum::<usize>();
        if size > MAX_MESSAGE_SIZE {
            return Err(invalid(format!(
                "message of {} bytes exceeds limit of {}",
                size, MAX_MESSAGE_SIZE
            )));
        }

        dst.reserve(size);
        dst.put_u32(frames.len() as u32);
        for frame in frames {
            dst.put_u32(frame.len() as u32);
            dst.put_slice(&frame);
        }
        Ok(())
    }
}

impl Decoder for MultipartCodec {
    type Item = Frames;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Frames>> {
        if src.len() < LEN_SIZE {
            return Ok(None);
        }

        let count = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if count > MAX_FRAMES {
            return Err(invalid(format!(
                "{} frames exceeds limit of {}",
                count, MAX_FRAMES
            )));
        }

        // Walk the length prefixes without consuming until the whole message is buffered.
        let mut offset = LEN_SIZE;
        for _ in 0..count {
            if src.len() < offset + LEN_SIZE {
                src.reserve(offset + LEN_SIZE - src.len());
                return Ok(None);
            }
            let len = u32::from_be_bytes([
                src[offset],
                src[offset + 1],
                src[offset + 2],
                src[offset + 3],
            ]) as usize;
            offset += LEN_SIZE + len;
            if offset > MAX_MESSAGE_SIZE {
                return Err(invalid(format!(
                    "message exceeds limit of {} bytes",
                    MAX_MESSAGE_SIZE
                )));
            }
        }
        if src.len() < offset {
            src.reserve(offset - src.len());
            return Ok(None);
        }

        let mut message = src.split_to(offset);
        message.advance(LEN_SIZE);
        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            let len = message.get_u32() as usize;
            let frame: Bytes = message.split_to(len).freeze();
            frames.push(frame);
        }
        Ok(Some(frames))
    }
}
