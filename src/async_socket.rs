// src/async_socket.rs

//! Client-side request/response socket with explicit timeouts.
//!
//! Unlike [`crate::transport::IpcSocket`], nothing here blocks past the caller's
//! timeout: the connection is nonblocking and driven by a private reactor.

use crate::context::IpcConfig;
use crate::error::{ExchangeError, IpcError};
use crate::message::Message;
use crate::service::Timeout;
use crate::transport::connection::Connection;
use crate::transport::socket::connect_path;

use mio::net::UnixStream;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::time::{Duration, Instant};

const SOCKET: Token = Token(0);

/// Outcome of the last flush or receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AsyncSocketState {
  #[default]
  None,
  /// The last operation ran out of time. Cleared by the next flush or receive.
  Timeout,
  /// The connection failed or was closed by the peer. Terminal.
  Error,
}

/// Nonblocking client connection to an IPC service.
pub struct IpcAsyncSocket {
  conn: Option<Connection>,
  poll: Poll,
  events: Events,
  state: AsyncSocketState,
  write_registered: bool,
}

impl IpcAsyncSocket {
  /// Connects to `service_name`, retrying for up to `timeout`, then switches the
  /// connection to nonblocking mode.
  pub fn open(config: &IpcConfig, service_name: &str, timeout: Duration) -> Result<Self, IpcError> {
    tracing::debug!(service = service_name, ?timeout, "Opening async IPC socket");
    let path = config.socket_path(service_name)?;
    let stream = connect_path(&path, service_name, timeout)?;
    Self::from_std(stream)
  }

  /// Wraps an already connected stream.
  pub fn from_std(stream: std::os::unix::net::UnixStream) -> Result<Self, IpcError> {
    stream.set_nonblocking(true)?;
    let mut stream = UnixStream::from_std(stream);
    let poll = Poll::new()?;
    poll.registry().register(&mut stream, SOCKET, Interest::READABLE)?;

    Ok(Self {
      conn: Some(Connection::new(stream)),
      poll,
      events: Events::with_capacity(8),
      state: AsyncSocketState::None,
      write_registered: false,
    })
  }

  pub fn state(&self) -> AsyncSocketState {
    self.state
  }

  /// True until the connection fails or is closed.
  pub fn connected(&self) -> bool {
    self.conn.is_some() && self.state != AsyncSocketState::Error
  }

  /// True while part of a sent message is still waiting to be written.
  pub fn check_unsent(&self) -> bool {
    self.conn.as_ref().is_some_and(Connection::has_pending_tx)
  }

  /// Queues a message, writing as much as the socket accepts right away.
  pub fn send(&mut self, code: u32, payload: &[u8]) -> Result<(), IpcError> {
    let message = Message::new(code, bytes::Bytes::copy_from_slice(payload))?;
    self.ensure_usable()?;
    let conn = self.conn.as_mut().ok_or(IpcError::InvalidState("async IPC socket is closed"))?;

    match conn.send(&message) {
      Ok(true) => Ok(()),
      Ok(false) => self.want_write(true),
      Err(e) => {
        tracing::debug!(code, error = %e, "Cannot send message through async IPC socket");
        self.state = AsyncSocketState::Error;
        Err(e)
      }
    }
  }

  /// Writes pending output. Returns `Ok(true)` once everything is sent and
  /// `Ok(false)` if `timeout` expired first.
  pub fn flush(&mut self, timeout: Timeout) -> Result<bool, IpcError> {
    self.reset_timeout();
    self.ensure_usable()?;
    let deadline = timeout.deadline();

    loop {
      let conn = self.conn.as_mut().ok_or(IpcError::InvalidState("async IPC socket is closed"))?;
      match conn.write() {
        Ok(true) => {
          self.want_write(false)?;
          return Ok(true);
        }
        Ok(false) => {}
        Err(e) => {
          tracing::debug!(error = %e, "Cannot flush async IPC socket");
          self.state = AsyncSocketState::Error;
          return Err(e);
        }
      }
      self.want_write(true)?;

      if !self.wait(timeout, deadline)? {
        self.state = AsyncSocketState::Timeout;
        return Ok(false);
      }
    }
  }

  /// Receives one message. Returns `Ok(None)` if `timeout` expired first.
  ///
  /// Messages that arrived before the peer closed are still returned; the
  /// close itself is reported once they are consumed.
  pub fn recv(&mut self, timeout: Timeout) -> Result<Option<Message>, IpcError> {
    self.reset_timeout();
    let deadline = timeout.deadline();

    loop {
      let conn = self.conn.as_mut().ok_or(IpcError::InvalidState("async IPC socket is closed"))?;
      if let Some(message) = conn.pop_rx() {
        if tracing::enabled!(tracing::Level::TRACE) {
          tracing::trace!(message = %message.dump(), "Async IPC socket received message");
        }
        return Ok(Some(message));
      }
      if self.state == AsyncSocketState::Error {
        return Err(IpcError::ConnectionClosed);
      }

      match conn.read() {
        Ok(0) => {}
        Ok(_) => continue,
        Err(e) => {
          tracing::debug!(error = %e, "Async IPC socket connection ended");
          self.state = AsyncSocketState::Error;
          if e.is_disconnect() {
            continue;
          }
          return Err(e);
        }
      }

      // Keep output moving while waiting for the reply.
      if self.write_registered {
        let conn = self.conn.as_mut().ok_or(IpcError::InvalidState("async IPC socket is closed"))?;
        match conn.write() {
          Ok(true) => self.want_write(false)?,
          Ok(false) => {}
          Err(e) => {
            self.state = AsyncSocketState::Error;
            return Err(e);
          }
        }
      }

      if !self.wait(timeout, deadline)? {
        self.state = AsyncSocketState::Timeout;
        return Ok(None);
      }
    }
  }

  /// Closes the connection. Calling it again has no effect.
  pub fn close(&mut self) {
    if let Some(mut conn) = self.conn.take() {
      if let Err(e) = self.poll.registry().deregister(conn.stream_mut()) {
        tracing::trace!(error = %e, "Deregistering async IPC socket failed");
      }
      conn.shutdown();
      tracing::debug!("Async IPC socket closed");
    }
  }

  // --- Internals ---

  fn reset_timeout(&mut self) {
    if self.state == AsyncSocketState::Timeout {
      self.state = AsyncSocketState::None;
    }
  }

  fn ensure_usable(&self) -> Result<(), IpcError> {
    match self.state {
      AsyncSocketState::Error => Err(IpcError::ConnectionClosed),
      _ if self.conn.is_none() => Err(IpcError::InvalidState("async IPC socket is closed")),
      _ => Ok(()),
    }
  }

  fn want_write(&mut self, enable: bool) -> Result<(), IpcError> {
    if self.write_registered == enable {
      return Ok(());
    }
    let interest = if enable {
      Interest::READABLE | Interest::WRITABLE
    } else {
      Interest::READABLE
    };
    if let Some(conn) = self.conn.as_mut() {
      self.poll.registry().reregister(conn.stream_mut(), SOCKET, interest)?;
    }
    self.write_registered = enable;
    Ok(())
  }

  /// Waits for readiness. Returns false once the deadline has passed.
  fn wait(&mut self, timeout: Timeout, deadline: Option<Instant>) -> Result<bool, IpcError> {
    let remaining = match (timeout, deadline) {
      (Timeout::NoWait, _) => return Ok(false),
      // Forever, or a duration past the end of the clock.
      (_, None) => None,
      (_, Some(d)) => {
        let left = d.saturating_duration_since(Instant::now());
        if left.is_zero() {
          return Ok(false);
        }
        Some(left)
      }
    };

    match self.poll.poll(&mut self.events, remaining) {
      Ok(()) => Ok(true),
      Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(true),
      Err(e) => Err(e.into()),
    }
  }
}

impl Drop for IpcAsyncSocket {
  fn drop(&mut self) {
    self.close();
  }
}

impl std::fmt::Debug for IpcAsyncSocket {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("IpcAsyncSocket")
      .field("state", &self.state)
      .field("open", &self.conn.is_some())
      .field("unsent", &self.check_unsent())
      .finish()
  }
}

// Time left of an exchange-wide deadline. Without a deadline the original
// timeout is passed on unchanged.
fn remaining(timeout: Timeout, deadline: Option<Instant>) -> Timeout {
  match (timeout, deadline) {
    (Timeout::After(_), Some(d)) => Timeout::from(d.saturating_duration_since(Instant::now())),
    _ => timeout,
  }
}

/// Sends one request to `service_name` and waits for its reply.
///
/// `timeout` bounds the whole exchange. [`Timeout::Forever`] and
/// [`Timeout::NoWait`] make a single connection attempt.
pub fn exchange(
  config: &IpcConfig,
  service_name: &str,
  code: u32,
  timeout: Timeout,
  payload: &[u8],
) -> Result<Message, IpcError> {
  tracing::debug!(service = service_name, code, size = payload.len(), ?timeout, "IPC exchange");
  let fail = |kind: ExchangeError| IpcError::Exchange {
    service: service_name.to_string(),
    kind,
  };

  let deadline = timeout.deadline();
  let connect_timeout = match timeout {
    Timeout::After(d) => d,
    Timeout::NoWait | Timeout::Forever => Duration::ZERO,
  };

  let mut socket =
    IpcAsyncSocket::open(config, service_name, connect_timeout).map_err(|e| fail(ExchangeError::Connect(Box::new(e))))?;

  socket
    .send(code, payload)
    .map_err(|e| fail(ExchangeError::Send(Box::new(e))))?;

  match socket.flush(remaining(timeout, deadline)) {
    Ok(true) => {}
    Ok(false) => return Err(fail(ExchangeError::TimedOut)),
    Err(e) => return Err(fail(ExchangeError::Flush(Box::new(e)))),
  }

  let reply = match socket.recv(remaining(timeout, deadline)) {
    Ok(Some(message)) => message,
    Ok(None) => return Err(fail(ExchangeError::TimedOut)),
    Err(e) => return Err(fail(ExchangeError::Receive(Box::new(e)))),
  };

  socket.close();
  tracing::debug!(service = service_name, code = reply.code(), size = reply.size(), "IPC exchange done");
  Ok(reply)
}
