//! Length-delimited protobuf framing over byte streams.
//!
//! A frame is `[varint payload length][protobuf payload]`, the layout of
//! `prost::Message::encode_length_delimited`. [`WireCodec`] drives it
//! through `tokio_util::codec::Framed`; [`encode_frame`] and
//! [`decode_frame`] are the same logic over plain buffers.

use std::fmt;
use std::marker::PhantomData;

use bytes::{Buf, BytesMut};
use prost::Message;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{ProtoError, Result};

/// Largest payload accepted in either direction (1 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Longest possible varint encoding of a `u64`.
const MAX_VARINT_LEN: usize = 10;

fn check_size(len: usize) -> Result<()> {
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtoError::FrameTooLarge {
            len,
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(())
}

/// Append one frame holding `msg` to `dst`.
pub fn encode_frame<M: Message>(msg: &M, dst: &mut BytesMut) -> Result<()> {
    check_size(msg.encoded_len())?;
    msg.encode_length_delimited(dst)?;
    Ok(())
}

/// Take one complete frame off the front of `src`.
///
/// Leaves `src` untouched and returns `Ok(None)` while the frame is still
/// incomplete.
pub fn decode_frame<M: Message + Default>(src: &mut BytesMut) -> Result<Option<M>> {
    let mut prefix = &src[..];
    let payload_len = match prost::decode_length_delimiter(&mut prefix) {
        Ok(len) => len,
        Err(e) if src.len() >= MAX_VARINT_LEN => return Err(e.into()),
        Err(_) => return Ok(None),
    };
    check_size(payload_len)?;

    let header_len = src.len() - prefix.len();
    if prefix.len() < payload_len {
        src.reserve(header_len + payload_len - src.len());
        return Ok(None);
    }

    src.advance(header_len);
    let payload = src.split_to(payload_len);
    Ok(Some(M::decode(payload.freeze())?))
}

/// `tokio_util` codec decoding `D` frames and encoding `E` frames.
///
/// A server reading requests and writing responses uses
/// `WireCodec<Request, Response>`; the peer uses the mirror image.
pub struct WireCodec<D, E> {
    _marker: PhantomData<fn() -> (D, E)>,
}

impl<D, E> WireCodec<D, E> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<D, E> Default for WireCodec<D, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D, E> Clone for WireCodec<D, E> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<D, E> fmt::Debug for WireCodec<D, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireCodec")
            .field("decode", &std::any::type_name::<D>())
            .field("encode", &std::any::type_name::<E>())
            .finish()
    }
}

impl<D: Message + Default, E> Decoder for WireCodec<D, E> {
    type Item = D;
    type Error = ProtoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<D>> {
        decode_frame(src)
    }
}

impl<D, E: Message> Encoder<E> for WireCodec<D, E> {
    type Error = ProtoError;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<()> {
        encode_frame(&item, dst)
    }
}
