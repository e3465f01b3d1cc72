//! Length-prefixed framing for the TCP service.
//!
//! Each frame is a 4-byte big-endian length followed by the payload. Frames
//! above the configured limit are skipped, not buffered, and surface as
//! [`Inbound::Oversized`] so the connection survives.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

const HEADER_LEN: usize = 4;
/// Up-front buffer growth on a header; larger bodies grow as bytes arrive.
const RESERVE_CAP: usize = 64 * 1024;

#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    Frame(BytesMut),
    Oversized(usize),
}

#[derive(Debug)]
enum State {
    Head,
    Body(usize),
    Discard(usize),
}

#[derive(Debug)]
pub struct FrameCodec {
    max_frame: usize,
    state:     State,
}

impl FrameCodec {
    pub fn new(max_frame: usize) -> Self {
        Self { max_frame, state: State::Head }
    }
}

impl Decoder for FrameCodec {
    type Item = Inbound;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>, io::Error> {
        loop {
            match self.state {
                State::Head => {
                    if src.len() < HEADER_LEN {
                        return Ok(None);
                    }
                    let n = src.get_u32() as usize;
                    if n > self.max_frame {
                        self.state = State::Discard(n);
                        return Ok(Some(Inbound::Oversized(n)));
                    }
                    src.reserve(n.min(RESERVE_CAP));
                    self.state = State::Body(n);
                }
                State::Body(n) => {
                    if src.len() < n {
                        return Ok(None);
                    }
                    self.state = State::Head;
                    return Ok(Some(Inbound::Frame(src.split_to(n))));
                }
                State::Discard(left) => {
                    let skip = left.min(src.len());
                    src.advance(skip);
                    if skip < left {
                        self.state = State::Discard(left - skip);
                        return Ok(None);
                    }
                    self.state = State::Head;
                }
            }
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), io::Error> {
        let len = u32::try_from(item.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "frame exceeds 4 GiB")
        })?;
        dst.reserve(HEADER_LEN + item.len());
        dst.put_u32(len);
        dst.extend_from_slice(&item);
        Ok(())
    }
}
