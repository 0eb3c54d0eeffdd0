//! Frame codec for the IPC stream
//!
//! Each frame is `code:u32 LE, size:u32 LE` followed by `size` payload bytes.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::IpcMessage;
use crate::config::DEFAULT_MAX_FRAME_SIZE;
use crate::error::{Error, Result};

/// Frame header length (code + size)
pub const HEADER_LEN: usize = 8;

/// Length-prefixed frame codec.
#[derive(Debug, Clone, Copy)]
pub struct IpcCodec {
    max_frame_size: usize,
}

impl Default for IpcCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl IpcCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                size,
                limit: self.max_frame_size,
            });
        }
        Ok(())
    }
}

impl Decoder for IpcCodec {
    type Item = IpcMessage;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<IpcMessage>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = &src[..HEADER_LEN];
        let code = header.get_u32_le();
        let size = header.get_u32_le() as usize;

        self.check_size(size)?;

        if src.len() < HEADER_LEN + size {
            src.reserve(HEADER_LEN + size - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(size).freeze();

        Ok(Some(IpcMessage { code, payload }))
    }
}

impl Encoder<IpcMessage> for IpcCodec {
    type Error = Error;

    fn encode(&mut self, item: IpcMessage, dst: &mut BytesMut) -> Result<()> {
        self.check_size(item.payload.len())?;

        dst.reserve(HEADER_LEN + item.payload.len());
        dst.put_u32_le(item.code);
        dst.put_u32_le(item.payload.len() as u32);
        dst.put_slice(&item.payload);
        Ok(())
    }
}
