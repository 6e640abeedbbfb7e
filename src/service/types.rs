// src/service/types.rs

use crate::message::Message;
use crate::service::client::ClientHandle;
use std::fmt;
use std::time::{Duration, Instant};

/// Identifier of a service-side client. Assigned from a per-service counter
/// starting at 1; never zero and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub(crate) u64);

impl ClientId {
  pub fn get(&self) -> u64 {
    self.0
  }
}

impl fmt::Display for ClientId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Membership of a client in the service's ready queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
  /// Not enqueued for delivery.
  #[default]
  None,
  /// Enqueued: has a completed message or its connection has ended.
  Queued,
}

/// How long a receive may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
  /// One nonblocking reactor pass.
  NoWait,
  /// Block for at most the given duration.
  After(Duration),
  /// Block until something is ready (or an alert arrives).
  Forever,
}

impl Timeout {
  /// Absolute deadline for [`Timeout::After`]. A duration too large to add to
  /// the clock has no deadline and behaves like [`Timeout::Forever`].
  pub(crate) fn deadline(self) -> Option<Instant> {
    match self {
      Timeout::After(d) => Instant::now().checked_add(d),
      Timeout::NoWait | Timeout::Forever => None,
    }
  }
}

impl From<Duration> for Timeout {
  fn from(d: Duration) -> Self {
    if d.is_zero() {
      Timeout::NoWait
    } else {
      Timeout::After(d)
    }
  }
}

/// A client paired with its next message.
///
/// `message` is `None` when the client's connection has ended; that signal is
/// produced only after every message framed before the close was delivered.
#[derive(Debug)]
pub struct Delivery {
  pub client: ClientHandle,
  pub message: Option<Message>,
}

/// Result of [`crate::service::IpcService::recv`].
#[derive(Debug)]
pub enum Recv {
  /// Data was already pending; the call did not wait.
  Immediate(Delivery),
  /// The call waited on I/O before data became available.
  Wait(Delivery),
  /// Nothing became available in time.
  Timeout,
}

impl Recv {
  pub fn delivery(&self) -> Option<&Delivery> {
    match self {
      Recv::Immediate(d) | Recv::Wait(d) => Some(d),
      Recv::Timeout => None,
    }
  }

  pub fn into_delivery(self) -> Option<Delivery> {
    match self {
      Recv::Immediate(d) | Recv::Wait(d) => Some(d),
      Recv::Timeout => None,
    }
  }

  pub fn is_immediate(&self) -> bool {
    matches!(self, Recv::Immediate(_))
  }

  pub fn is_timeout(&self) -> bool {
    matches!(self, Recv::Timeout)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn huge_timeout_has_no_deadline() {
    assert!(Timeout::After(Duration::MAX).deadline().is_none());
    assert!(Timeout::After(Duration::from_secs(1)).deadline().is_some());
    assert!(Timeout::Forever.deadline().is_none());
    assert_eq!(Timeout::from(Duration::ZERO), Timeout::NoWait);
  }
}
