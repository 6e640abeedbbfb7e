// src/service/client.rs

use crate::service::types::{ClientId, ClientState};
use crate::transport::connection::Connection;

use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

/// Releases posted by dropped [`ClientHandle`]s, possibly from other threads.
/// The owning service drains it before touching its client table.
#[derive(Debug, Default)]
pub(crate) struct ReleaseQueue {
  ids: Mutex<Vec<ClientId>>,
}

impl ReleaseQueue {
  fn post(&self, id: ClientId) {
    self.ids.lock().push(id);
  }

  pub(crate) fn take(&self) -> Vec<ClientId> {
    std::mem::take(&mut *self.ids.lock())
  }
}

struct HandleInner {
  id: ClientId,
  releases: Arc<ReleaseQueue>,
}

impl Drop for HandleInner {
  fn drop(&mut self) {
    self.releases.post(self.id);
  }
}

/// Caller-side reference to a service client.
///
/// Cloning is cheap. While any clone is alive the service keeps the client's
/// state around, even after its connection ended. Dropping the last clone
/// releases that reference; the drop may happen on any thread.
#[derive(Clone)]
pub struct ClientHandle {
  inner: Arc<HandleInner>,
}

impl ClientHandle {
  pub fn id(&self) -> ClientId {
    self.inner.id
  }

  pub(crate) fn belongs_to(&self, releases: &Arc<ReleaseQueue>) -> bool {
    Arc::ptr_eq(&self.inner.releases, releases)
  }
}

impl fmt::Debug for ClientHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ClientHandle").field("id", &self.inner.id).finish()
  }
}

impl PartialEq for ClientHandle {
  fn eq(&self, other: &Self) -> bool {
    self.inner.id == other.inner.id && Arc::ptr_eq(&self.inner.releases, &other.inner.releases)
  }
}

impl Eq for ClientHandle {}

/// Service-side state of one accepted connection.
pub(crate) struct IpcClient {
  pub(crate) id: ClientId,
  pub(crate) conn: Connection,
  pub(crate) state: ClientState,
  // One reference for the service table until the client is closed or its
  // end of stream delivered, plus one while any external handle is alive.
  pub(crate) refcount: u32,
  pub(crate) table_ref: bool,
  handle: Weak<HandleInner>,
  pub(crate) userdata: Option<Box<dyn Any + Send>>,
  // Read registration alive; cleared together with the write registration.
  pub(crate) connected: bool,
  pub(crate) write_registered: bool,
}

impl IpcClient {
  pub(crate) fn new(id: ClientId, conn: Connection) -> Self {
    Self {
      id,
      conn,
      state: ClientState::None,
      refcount: 1,
      table_ref: true,
      handle: Weak::new(),
      userdata: None,
      connected: true,
      write_registered: false,
    }
  }

  /// Returns the live external handle, creating one (and taking a reference)
  /// if none exists.
  pub(crate) fn handle(&mut self, releases: &Arc<ReleaseQueue>) -> ClientHandle {
    if let Some(inner) = self.handle.upgrade() {
      return ClientHandle { inner };
    }
    let inner = Arc::new(HandleInner {
      id: self.id,
      releases: releases.clone(),
    });
    self.handle = Arc::downgrade(&inner);
    self.refcount += 1;
    ClientHandle { inner }
  }

  /// True when the client should sit in the ready queue.
  pub(crate) fn is_deliverable(&self) -> bool {
    self.conn.has_rx() || !self.connected
  }
}

impl fmt::Debug for IpcClient {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("IpcClient")
      .field("id", &self.id)
      .field("state", &self.state)
      .field("refcount", &self.refcount)
      .field("connected", &self.connected)
      .field("write_registered", &self.write_registered)
      .field("has_userdata", &self.userdata.is_some())
      .finish()
  }
}
