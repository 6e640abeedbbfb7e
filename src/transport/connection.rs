// src/transport/connection.rs

use crate::error::IpcError;
use crate::message::Message;
use crate::protocol::{FrameDecoder, PendingFrame};
use crate::transport::socket::{Fill, RxBuffer};

use mio::net::UnixStream;
use std::collections::VecDeque;
use std::net::Shutdown;

/// Nonblocking framed connection: a stream plus its inbound and outbound queues.
///
/// Shared by the service's per-client state and by the async socket. Nothing
/// here blocks; partially received or sent frames are resumed on the next call.
#[derive(Debug)]
pub(crate) struct Connection {
  stream: UnixStream,
  rx: RxBuffer,
  decoder: FrameDecoder,
  rx_queue: VecDeque<Message>,
  // Head-of-line frame; `tx_queue` is non-empty only while this is set.
  tx: Option<PendingFrame>,
  tx_queue: VecDeque<PendingFrame>,
}

impl Connection {
  pub(crate) fn new(stream: UnixStream) -> Self {
    Self {
      stream,
      rx: RxBuffer::new(),
      decoder: FrameDecoder::new(),
      rx_queue: VecDeque::new(),
      tx: None,
      tx_queue: VecDeque::new(),
    }
  }

  pub(crate) fn stream_mut(&mut self) -> &mut UnixStream {
    &mut self.stream
  }

  /// Drains the socket, queueing every completed message.
  ///
  /// Returns the number of messages completed by this call. Peer close and
  /// hard errors are returned as errors after whatever was framed before them
  /// has been queued; a trailing partial frame is discarded.
  pub(crate) fn read(&mut self) -> Result<usize, IpcError> {
    let mut completed = 0;
    loop {
      while let Some(message) = self.rx.decode(&mut self.decoder) {
        self.rx_queue.push_back(message);
        completed += 1;
      }

      let outcome = self.rx.fill(&mut self.stream);
      match outcome {
        Ok(Fill::Data(_)) => {}
        Ok(Fill::WouldBlock) => return Ok(completed),
        Ok(Fill::Eof) => {
          if self.decoder.is_partial() {
            tracing::debug!(buffered = self.decoder.buffered(), "Discarding truncated IPC frame");
          }
          self.decoder.reset();
          return Err(IpcError::ConnectionClosed);
        }
        Err(e) => {
          self.decoder.reset();
          return Err(e.into());
        }
      }
    }
  }

  pub(crate) fn pop_rx(&mut self) -> Option<Message> {
    self.rx_queue.pop_front()
  }

  pub(crate) fn has_rx(&self) -> bool {
    !self.rx_queue.is_empty()
  }

  /// Sends `message`, writing directly when nothing is buffered.
  ///
  /// Returns `Ok(true)` if the frame went out completely. Otherwise the rest is
  /// buffered behind any earlier frames and the caller must wait for
  /// writability and call [`Connection::write`].
  pub(crate) fn send(&mut self, message: &Message) -> Result<bool, IpcError> {
    let mut frame = PendingFrame::new(message);
    if self.tx.is_some() {
      self.tx_queue.push_back(frame);
      return Ok(false);
    }

    if frame.write_to(&mut self.stream)? {
      return Ok(true);
    }
    self.tx = Some(frame);
    Ok(false)
  }

  /// Flushes buffered frames in order. Returns `Ok(true)` once nothing is left.
  pub(crate) fn write(&mut self) -> Result<bool, IpcError> {
    while let Some(frame) = self.tx.as_mut() {
      if !frame.write_to(&mut self.stream)? {
        return Ok(false);
      }
      self.tx = self.tx_queue.pop_front();
    }
    Ok(true)
  }

  pub(crate) fn has_pending_tx(&self) -> bool {
    self.tx.is_some()
  }

  /// Total bytes not yet written to the socket.
  pub(crate) fn pending_tx_bytes(&self) -> usize {
    self.tx.as_ref().map_or(0, PendingFrame::remaining)
      + self.tx_queue.iter().map(PendingFrame::remaining).sum::<usize>()
  }

  /// Drops unsent output and shuts the stream down in both directions.
  /// Received messages stay queued.
  pub(crate) fn shutdown(&mut self) {
    self.tx = None;
    self.tx_queue.clear();
    if let Err(e) = self.stream.shutdown(Shutdown::Both) {
      tracing::trace!(error = %e, "IPC stream shutdown failed (likely already closed)");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::protocol::encode;
  use bytes::BytesMut;
  use std::io::{Read, Write};

  fn pair() -> (Connection, std::os::unix::net::UnixStream) {
    let (a, b) = std::os::unix::net::UnixStream::pair().unwrap();
    a.set_nonblocking(true).unwrap();
    (Connection::new(UnixStream::from_std(a)), b)
  }

  #[test]
  fn read_queues_frames_then_would_block() {
    let (mut conn, mut peer) = pair();
    let mut buf = BytesMut::new();
    encode(10001, b"one", &mut buf).unwrap();
    encode(10002, b"two", &mut buf).unwrap();
    encode(10003, b"thr", &mut buf).unwrap();
    // Third frame arrives only partially.
    peer.write_all(&buf[..buf.len() - 2]).unwrap();

    assert_eq!(conn.read().unwrap(), 2);
    assert_eq!(conn.pop_rx().unwrap().data(), b"one");
    assert_eq!(conn.pop_rx().unwrap().data(), b"two");
    assert!(!conn.has_rx());

    peer.write_all(&buf[buf.len() - 2..]).unwrap();
    assert_eq!(conn.read().unwrap(), 1);
    assert_eq!(conn.pop_rx().unwrap().code(), 10003);
  }

  #[test]
  fn close_after_frames_keeps_them_queued() {
    let (mut conn, mut peer) = pair();
    let mut buf = BytesMut::new();
    encode(10001, b"last words", &mut buf).unwrap();
    peer.write_all(&buf).unwrap();
    drop(peer);

    assert!(matches!(conn.read(), Err(IpcError::ConnectionClosed)));
    assert_eq!(conn.pop_rx().unwrap().data(), b"last words");
  }

  #[test]
  fn send_buffers_when_peer_is_not_reading() {
    let (mut conn, mut peer) = pair();
    let big = Message::new(10020, vec![0x5a; 1 << 20]).unwrap();
    let small = Message::new(10021, &b"after"[..]).unwrap();

    assert!(!conn.send(&big).unwrap());
    assert!(!conn.send(&small).unwrap());
    assert!(conn.has_pending_tx());
    assert!(conn.pending_tx_bytes() > 0);

    peer.set_nonblocking(false).unwrap();
    let reader = std::thread::spawn(move || {
      let mut socket = crate::transport::IpcSocket::from_stream(peer);
      let first = socket.read().unwrap();
      let second = socket.read().unwrap();
      (first.size(), second.code())
    });

    while !conn.write().unwrap() {
      std::thread::sleep(std::time::Duration::from_millis(1));
    }
    assert_eq!(conn.pending_tx_bytes(), 0);
    assert_eq!(reader.join().unwrap(), (1 << 20, 10021));
  }

  #[test]
  fn shutdown_keeps_received_messages() {
    let (mut conn, mut peer) = pair();
    let mut buf = BytesMut::new();
    encode(10001, b"kept", &mut buf).unwrap();
    peer.write_all(&buf).unwrap();
    assert_eq!(conn.read().unwrap(), 1);

    conn.shutdown();
    let mut rest = Vec::new();
    peer.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
    assert_eq!(conn.pop_rx().unwrap().data(), b"kept");
  }
}
