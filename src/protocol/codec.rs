use crate::error::IpcError;
use crate::message::Message;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{self, IoSlice, Write};

/// Frame header: `[u32 code][u32 size]` in host byte order.
pub const HEADER_SIZE: usize = 8;

// Upper bound for a single body reservation; a peer announcing a huge frame
// gets its buffer grown as the bytes actually arrive.
const BODY_RESERVE_STEP: usize = 64 * 1024;

/// Encodes a frame header for a payload of `size` bytes.
pub fn encode_header(code: u32, size: u32) -> [u8; HEADER_SIZE] {
  let mut header = [0u8; HEADER_SIZE];
  header[..4].copy_from_slice(&code.to_ne_bytes());
  header[4..].copy_from_slice(&size.to_ne_bytes());
  header
}

/// Appends a complete frame (header + payload) to `dst`.
pub fn encode(code: u32, payload: &[u8], dst: &mut BytesMut) -> Result<(), IpcError> {
  let size = u32::try_from(payload.len()).map_err(|_| IpcError::MessageTooLarge(payload.len()))?;
  dst.reserve(HEADER_SIZE + payload.len());
  dst.put_slice(&encode_header(code, size));
  dst.put_slice(payload);
  Ok(())
}

#[derive(Debug, Default, Clone, Copy)]
enum DecodingState {
  #[default]
  ReadHeader,
  ReadBody {
    code: u32,
    size: usize,
  },
}

/// Incremental frame parser.
///
/// Bytes may be fed in windows of any size; the decoder keeps however much of
/// the current header and body it has seen so far and only consumes bytes that
/// belong to the frame in progress, so anything after a completed frame stays
/// in the caller's buffer for the next call.
#[derive(Debug, Default)]
pub struct FrameDecoder {
  state: DecodingState,
  header: [u8; HEADER_SIZE],
  header_len: usize,
  body: BytesMut,
}

impl FrameDecoder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Consumes bytes from `src` until a frame completes or `src` runs dry.
  ///
  /// # Returns
  /// - `Some(Message)` if a full frame was decoded.
  /// - `None` if more bytes are needed.
  pub fn decode<B: Buf>(&mut self, src: &mut B) -> Option<Message> {
    loop {
      match self.state {
        DecodingState::ReadHeader => {
          let take = (HEADER_SIZE - self.header_len).min(src.remaining());
          src.copy_to_slice(&mut self.header[self.header_len..self.header_len + take]);
          self.header_len += take;

          if self.header_len < HEADER_SIZE {
            return None; // Not enough data for full header
          }
          self.header_len = 0;

          let code = u32::from_ne_bytes([self.header[0], self.header[1], self.header[2], self.header[3]]);
          let size = u32::from_ne_bytes([self.header[4], self.header[5], self.header[6], self.header[7]]) as usize;

          if size == 0 {
            return Some(Message::from_frame(code, Bytes::new()));
          }

          self.body.reserve(size.min(BODY_RESERVE_STEP));
          self.state = DecodingState::ReadBody { code, size };
          // Continue loop to try reading body immediately
        }
        DecodingState::ReadBody { code, size } => {
          let mut missing = size - self.body.len();
          while missing > 0 && src.has_remaining() {
            let chunk = src.chunk();
            let take = chunk.len().min(missing);
            self.body.reserve(take.min(BODY_RESERVE_STEP));
            self.body.extend_from_slice(&chunk[..take]);
            src.advance(take);
            missing -= take;
          }

          if missing > 0 {
            return None; // Not enough data for body
          }

          self.state = DecodingState::ReadHeader;
          return Some(Message::from_frame(code, self.body.split().freeze()));
        }
      }
    }
  }

  /// Header + body bytes of the frame currently being assembled.
  pub fn buffered(&self) -> usize {
    match self.state {
      DecodingState::ReadHeader => self.header_len,
      DecodingState::ReadBody { .. } => HEADER_SIZE + self.body.len(),
    }
  }

  /// True while a frame has been started but not completed.
  pub fn is_partial(&self) -> bool {
    self.buffered() != 0
  }

  /// Drops any partially assembled frame.
  pub fn reset(&mut self) {
    self.state = DecodingState::ReadHeader;
    self.header_len = 0;
    self.body.clear();
  }
}

/// An outbound frame together with how much of it has reached the socket.
#[derive(Debug)]
pub struct PendingFrame {
  header: [u8; HEADER_SIZE],
  payload: Bytes,
  written: usize,
}

impl PendingFrame {
  pub fn new(message: &Message) -> Self {
    Self {
      header: encode_header(message.code(), message.size()),
      payload: message.data_bytes(),
      written: 0,
    }
  }

  pub fn total_len(&self) -> usize {
    HEADER_SIZE + self.payload.len()
  }

  /// Bytes still to be written.
  pub fn remaining(&self) -> usize {
    self.total_len() - self.written
  }

  pub fn is_complete(&self) -> bool {
    self.written == self.total_len()
  }

  /// Writes as much of the frame as `w` accepts.
  ///
  /// Returns `Ok(true)` once the whole frame is written and `Ok(false)` when the
  /// writer reports `WouldBlock` first. Interrupted writes are retried.
  pub fn write_to<W: Write>(&mut self, w: &mut W) -> io::Result<bool> {
    while !self.is_complete() {
      let result = if self.written < HEADER_SIZE {
        let bufs = [IoSlice::new(&self.header[self.written..]), IoSlice::new(&self.payload)];
        w.write_vectored(&bufs)
      } else {
        w.write(&self.payload[self.written - HEADER_SIZE..])
      };

      match result {
        Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "IPC socket accepted no data")),
        Ok(n) => self.written += n,
        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
        Err(e) => return Err(e),
      }
    }
    Ok(true)
  }
}
