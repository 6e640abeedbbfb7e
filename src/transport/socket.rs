// src/transport/socket.rs

use crate::context::IpcConfig;
use crate::error::IpcError;
use crate::message::Message;
use crate::protocol::{encode, encode_header, FrameDecoder, HEADER_SIZE};

use bytes::BytesMut;
use socket2::{Domain, SockAddr, Socket, Type};
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::{Duration, Instant};

/// Size of the per-socket read-ahead buffer.
pub const RX_BUFFER_SIZE: usize = 4096;

/// Delay between connection attempts while a service is not yet listening.
pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of a single refill of an [`RxBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fill {
  Data(usize),
  WouldBlock,
  Eof,
}

/// Small read-ahead buffer amortizing read syscalls across frames.
pub(crate) struct RxBuffer {
  bytes: Box<[u8; RX_BUFFER_SIZE]>,
  offset: usize,
  length: usize,
}

impl RxBuffer {
  pub(crate) fn new() -> Self {
    Self {
      bytes: Box::new([0u8; RX_BUFFER_SIZE]),
      offset: 0,
      length: 0,
    }
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.offset == self.length
  }

  /// Feeds buffered bytes to `decoder`, consuming only what the current frame needs.
  pub(crate) fn decode(&mut self, decoder: &mut FrameDecoder) -> Option<Message> {
    let mut window = &self.bytes[self.offset..self.length];
    let before = window.len();
    let message = decoder.decode(&mut window);
    self.offset += before - window.len();
    message
  }

  /// Refills the buffer from `reader` once it has been drained.
  pub(crate) fn fill<R: Read>(&mut self, reader: &mut R) -> io::Result<Fill> {
    debug_assert!(self.is_empty(), "refilling a buffer that still holds data");
    self.offset = 0;
    self.length = 0;
    loop {
      match reader.read(&mut self.bytes[..]) {
        Ok(0) => return Ok(Fill::Eof),
        Ok(n) => {
          self.length = n;
          return Ok(Fill::Data(n));
        }
        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Fill::WouldBlock),
        Err(e) => return Err(e),
      }
    }
  }
}

impl std::fmt::Debug for RxBuffer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RxBuffer")
      .field("offset", &self.offset)
      .field("length", &self.length)
      .finish()
  }
}

/// Connects to the socket at `path`, retrying every [`CONNECT_RETRY_INTERVAL`]
/// until `timeout` has elapsed. A zero timeout makes exactly one attempt.
pub(crate) fn connect_path(path: &Path, service_name: &str, timeout: Duration) -> Result<UnixStream, IpcError> {
  let socket = Socket::new(Domain::UNIX, Type::STREAM, None).map_err(IpcError::SocketCreate)?;
  let addr = SockAddr::unix(path).map_err(|e| IpcError::from_io_path(e, path))?;
  let start = Instant::now();

  loop {
    match socket.connect(&addr) {
      Ok(()) => break,
      Err(e) => {
        if start.elapsed() >= timeout {
          tracing::debug!(service = service_name, path = ?path, error = %e, "Giving up connecting to IPC service");
          return Err(IpcError::ConnectTimedOut {
            service: service_name.to_string(),
            source: e,
          });
        }
        std::thread::sleep(CONNECT_RETRY_INTERVAL);
      }
    }
  }

  Ok(socket.into())
}

/// Blocking client connection to an IPC service.
///
/// Writes and reads whole messages; a partial transfer is always an error here,
/// unlike the nonblocking connections driven by the service reactor.
#[derive(Debug)]
pub struct IpcSocket {
  stream: Option<UnixStream>,
  rx: RxBuffer,
  decoder: FrameDecoder,
}

impl IpcSocket {
  /// Connects to `service_name`, retrying for up to `timeout`.
  pub fn open(config: &IpcConfig, service_name: &str, timeout: Duration) -> Result<Self, IpcError> {
    tracing::debug!(service = service_name, ?timeout, "Opening IPC socket");
    let path = config.socket_path(service_name)?;
    let stream = connect_path(&path, service_name, timeout)?;
    Ok(Self::from_stream(stream))
  }

  /// Wraps an already connected stream.
  pub fn from_stream(stream: UnixStream) -> Self {
    Self {
      stream: Some(stream),
      rx: RxBuffer::new(),
      decoder: FrameDecoder::new(),
    }
  }

  fn stream(&mut self) -> Result<&mut UnixStream, IpcError> {
    self.stream.as_mut().ok_or(IpcError::InvalidState("IPC socket is closed"))
  }

  /// Sets the read timeout; a read that times out returns [`IpcError::Timeout`].
  pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), IpcError> {
    self.stream()?.set_read_timeout(timeout)?;
    Ok(())
  }

  /// Writes one complete message, blocking until every byte is sent.
  pub fn write(&mut self, code: u32, payload: &[u8]) -> Result<(), IpcError> {
    let size = u32::try_from(payload.len()).map_err(|_| IpcError::MessageTooLarge(payload.len()))?;
    let stream = self.stream()?;

    // Small messages go out in one syscall; large payloads are not copied.
    let result = if payload.len() <= RX_BUFFER_SIZE - HEADER_SIZE {
      let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
      encode(code, payload, &mut frame)?;
      stream.write_all(&frame)
    } else {
      stream
        .write_all(&encode_header(code, size))
        .and_then(|_| stream.write_all(payload))
    };

    result.map_err(|e| {
      tracing::warn!(code, size, error = %e, "Cannot write to IPC socket");
      IpcError::from(e)
    })
  }

  /// Reads one complete message. Bytes belonging to later messages stay
  /// buffered for the next call.
  pub fn read(&mut self) -> Result<Message, IpcError> {
    let stream = self.stream.as_mut().ok_or(IpcError::InvalidState("IPC socket is closed"))?;

    loop {
      if let Some(message) = self.rx.decode(&mut self.decoder) {
        if tracing::enabled!(tracing::Level::TRACE) {
          tracing::trace!(message = %message.dump(), "IPC socket read message");
        }
        return Ok(message);
      }

      match self.rx.fill(stream)? {
        Fill::Data(_) => {}
        Fill::Eof => {
          if self.decoder.is_partial() {
            tracing::debug!(buffered = self.decoder.buffered(), "IPC peer closed in the middle of a frame");
          }
          self.decoder.reset();
          return Err(IpcError::ConnectionClosed);
        }
        // Only reachable when a read timeout was set.
        Fill::WouldBlock => return Err(IpcError::Timeout),
      }
    }
  }

  pub fn is_open(&self) -> bool {
    self.stream.is_some()
  }

  /// Closes the connection. Calling it again has no effect.
  pub fn close(&mut self) {
    if self.stream.take().is_some() {
      tracing::debug!("IPC socket closed");
    }
  }
}
