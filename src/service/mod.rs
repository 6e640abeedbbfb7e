//! The IPC service: a listening socket plus a single-threaded `mio` reactor
//! that turns client byte streams into queued messages and flushes replies.

pub mod client;
pub mod types;

pub use client::ClientHandle;
pub use types::{ClientId, ClientState, Delivery, Recv, Timeout};

use crate::context::IpcConfig;
use crate::error::IpcError;
use crate::message::Message;
use crate::transport::connection::Connection;
use crate::transport::IpcSocket;
use client::{IpcClient, ReleaseQueue};

use mio::net::{UnixListener, UnixStream};
use mio::{Events, Interest, Poll, Token, Waker};
use nix::sys::stat::{umask, Mode};
use nix::unistd::{access, AccessFlags};
use socket2::{Domain, SockAddr, Socket, Type};
use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

const LISTENER: Token = Token(usize::MAX);
const WAKER: Token = Token(usize::MAX - 1);
const EVENTS_CAPACITY: usize = 256;

fn client_token(id: ClientId) -> Token {
  Token(id.0 as usize)
}

/// Restores the previous umask when dropped.
struct UmaskGuard(Mode);

impl UmaskGuard {
  fn set(mask: Mode) -> Self {
    Self(umask(mask))
  }
}

impl Drop for UmaskGuard {
  fn drop(&mut self) {
    umask(self.0);
  }
}

#[derive(Debug, Clone, Copy)]
struct Readiness {
  token: Token,
  readable: bool,
  writable: bool,
}

/// Wakes a service blocked in [`IpcService::recv`] from any thread.
#[derive(Clone, Debug)]
pub struct ServiceAlerter {
  waker: Arc<Waker>,
}

impl ServiceAlerter {
  pub fn alert(&self) {
    if let Err(e) = self.waker.wake() {
      tracing::warn!(error = %e, "Cannot alert IPC service");
    }
  }
}

/// A named IPC service accepting local client connections.
///
/// All methods take `&mut self`: one thread drives the reactor and owns every
/// client's buffers. Other threads interact only through [`ServiceAlerter`]
/// and by dropping [`ClientHandle`]s.
pub struct IpcService {
  name: String,
  path: PathBuf,
  listener: UnixListener,
  poll: Poll,
  events: Events,
  scratch: Vec<Readiness>,
  waker: Arc<Waker>,
  // Owning table; entries outlive their connection while referenced.
  clients: HashMap<ClientId, IpcClient>,
  // Clients whose connection is still registered with the reactor.
  live: HashSet<ClientId>,
  ready: VecDeque<ClientId>,
  next_client_id: u64,
  releases: Arc<ReleaseQueue>,
  closed: bool,
}

impl IpcService {
  /// Binds the service socket and sets up the reactor.
  ///
  /// An existing socket file is probed first: if a service answers on it the
  /// start fails with [`IpcError::AlreadyRunning`]; a stale file is removed.
  pub fn start(config: &IpcConfig, service_name: &str) -> Result<Self, IpcError> {
    tracing::debug!(service = service_name, "Starting IPC service");
    let path = config.socket_path(service_name)?;
    let _umask = UmaskGuard::set(Mode::from_bits_truncate(0o077));

    if path.symlink_metadata().is_ok() {
      if access(path.as_path(), AccessFlags::W_OK).is_err() {
        return Err(IpcError::InUseByOther(path.display().to_string()));
      }
      if IpcSocket::open(config, service_name, Duration::ZERO).is_ok() {
        return Err(IpcError::AlreadyRunning(service_name.to_string()));
      }
      match std::fs::remove_file(&path) {
        Ok(()) => tracing::debug!(path = ?path, "Removed stale IPC socket file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = ?path, error = %e, "Failed to remove stale IPC socket file. Bind may fail."),
      }
    }

    let mut listener = bind_listener(&path)?;

    let poll = Poll::new()?;
    poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;
    let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

    tracing::info!(service = service_name, path = ?path, "IPC service listening");
    Ok(Self {
      name: service_name.to_string(),
      path,
      listener,
      poll,
      events: Events::with_capacity(EVENTS_CAPACITY),
      scratch: Vec::with_capacity(EVENTS_CAPACITY),
      waker,
      clients: HashMap::new(),
      live: HashSet::new(),
      ready: VecDeque::new(),
      next_client_id: 1,
      releases: Arc::new(ReleaseQueue::default()),
      closed: false,
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// A cloneable, `Send` handle that can wake this service from another thread.
  pub fn alerter(&self) -> ServiceAlerter {
    ServiceAlerter {
      waker: self.waker.clone(),
    }
  }

  /// Wakes a blocked [`IpcService::recv`].
  pub fn alert(&self) {
    self.alerter().alert();
  }

  /// Returns the next client with something to deliver.
  ///
  /// With [`Timeout::NoWait`], or when a client is already queued, the reactor
  /// makes one nonblocking pass and the result is [`Recv::Immediate`].
  /// Otherwise it waits for I/O until a client becomes ready, an alert
  /// arrives or the timeout expires.
  pub fn recv(&mut self, timeout: Timeout) -> Result<Recv, IpcError> {
    tracing::trace!(service = %self.name, ?timeout, "IPC service recv");
    self.process_releases();

    let wait = !matches!(timeout, Timeout::NoWait) && self.ready.is_empty();
    if wait {
      let deadline = timeout.deadline();
      loop {
        let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        let alerted = self.poll_once(remaining)?;
        if alerted || !self.ready.is_empty() {
          break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
          break;
        }
      }
    } else {
      self.poll_once(Some(Duration::ZERO))?;
    }

    let result = match self.pop_ready() {
      Some(delivery) if wait => Recv::Wait(delivery),
      Some(delivery) => Recv::Immediate(delivery),
      None => Recv::Timeout,
    };
    tracing::trace!(service = %self.name, timeout = result.is_timeout(), "IPC service recv done");
    Ok(result)
  }

  /// Sends a message to `client`.
  ///
  /// Written straight to the socket when nothing is buffered for the client;
  /// otherwise (or on a partial write) queued and flushed by the reactor.
  /// Frames reach the client in call order either way.
  pub fn send(&mut self, client: &ClientHandle, code: u32, payload: &[u8]) -> Result<(), IpcError> {
    let message = Message::new(code, bytes::Bytes::copy_from_slice(payload))?;
    self.send_message(client, &message)
  }

  pub fn send_message(&mut self, client: &ClientHandle, message: &Message) -> Result<(), IpcError> {
    self.process_releases();
    let id = self.own(client)?;
    let registry = self.poll.registry();
    let entry = self.clients.get_mut(&id).ok_or(IpcError::UnknownClient(id.0))?;
    tracing::trace!(client_id = %id, code = message.code(), size = message.size(), "IPC client send");

    if !entry.connected {
      return Err(IpcError::ConnectionClosed);
    }

    match entry.conn.send(message) {
      Ok(true) => Ok(()),
      Ok(false) => {
        if !entry.write_registered {
          registry.reregister(
            entry.conn.stream_mut(),
            client_token(id),
            Interest::READABLE | Interest::WRITABLE,
          )?;
          entry.write_registered = true;
        }
        Ok(())
      }
      Err(e) => {
        tracing::warn!(client_id = %id, error = %e, "Cannot write to IPC client");
        Err(e)
      }
    }
  }

  /// Closes the client's connection and drops the service's reference to it.
  pub fn close_client(&mut self, client: &ClientHandle) -> Result<(), IpcError> {
    self.process_releases();
    let id = self.own(client)?;
    tracing::debug!(client_id = %id, "Closing IPC client");

    self.disconnect(id);
    self.ready.retain(|queued| *queued != id);
    if let Some(entry) = self.clients.get_mut(&id) {
      entry.state = ClientState::None;
      if entry.table_ref {
        entry.table_ref = false;
        self.release(id);
      }
    }
    Ok(())
  }

  /// Looks up a client whose connection is still open.
  pub fn client_by_id(&mut self, id: ClientId) -> Option<ClientHandle> {
    self.process_releases();
    if !self.live.contains(&id) {
      return None;
    }
    let releases = self.releases.clone();
    self.clients.get_mut(&id).map(|entry| entry.handle(&releases))
  }

  /// Ids of clients whose connection is still open, in ascending order.
  pub fn clients(&self) -> Vec<ClientId> {
    let mut ids: Vec<ClientId> = self.live.iter().copied().collect();
    ids.sort_unstable();
    ids
  }

  pub fn client_connected(&self, client: &ClientHandle) -> bool {
    client.belongs_to(&self.releases) && self.live.contains(&client.id())
  }

  /// Bytes buffered for `client` that have not reached its socket yet.
  pub fn client_unsent(&self, client: &ClientHandle) -> usize {
    self.entry(client).map_or(0, |entry| entry.conn.pending_tx_bytes())
  }

  pub fn set_userdata<T: Any + Send>(&mut self, client: &ClientHandle, data: T) -> Result<(), IpcError> {
    let id = self.own(client)?;
    let entry = self.clients.get_mut(&id).ok_or(IpcError::UnknownClient(id.0))?;
    entry.userdata = Some(Box::new(data));
    Ok(())
  }

  pub fn userdata<T: Any + Send>(&self, client: &ClientHandle) -> Option<&T> {
    self.entry(client)?.userdata.as_ref()?.downcast_ref::<T>()
  }

  pub fn userdata_mut<T: Any + Send>(&mut self, client: &ClientHandle) -> Option<&mut T> {
    let id = self.own(client).ok()?;
    self.clients.get_mut(&id)?.userdata.as_mut()?.downcast_mut::<T>()
  }

  pub fn take_userdata(&mut self, client: &ClientHandle) -> Option<Box<dyn Any + Send>> {
    let id = self.own(client).ok()?;
    self.clients.get_mut(&id)?.userdata.take()
  }

  /// Closes every client, removes the socket file and drops the reactor.
  pub fn close(mut self) {
    self.shutdown();
  }

  // --- Reactor internals ---

  fn own(&self, client: &ClientHandle) -> Result<ClientId, IpcError> {
    if client.belongs_to(&self.releases) {
      Ok(client.id())
    } else {
      Err(IpcError::UnknownClient(client.id().0))
    }
  }

  fn entry(&self, client: &ClientHandle) -> Option<&IpcClient> {
    let id = self.own(client).ok()?;
    self.clients.get(&id)
  }

  /// Runs one reactor iteration. Returns true if an alert was received.
  fn poll_once(&mut self, timeout: Option<Duration>) -> Result<bool, IpcError> {
    match self.poll.poll(&mut self.events, timeout) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(false),
      Err(e) => return Err(e.into()),
    }

    let mut scratch = std::mem::take(&mut self.scratch);
    scratch.clear();
    scratch.extend(self.events.iter().map(|event| Readiness {
      token: event.token(),
      readable: event.is_readable() || event.is_read_closed() || event.is_error(),
      writable: event.is_writable() || event.is_error(),
    }));

    let mut alerted = false;
    let mut result = Ok(());
    for readiness in &scratch {
      match readiness.token {
        LISTENER => {
          if let Err(e) = self.accept() {
            result = Err(e);
          }
        }
        WAKER => alerted = true,
        token => self.client_ready(ClientId(token.0 as u64), readiness.readable, readiness.writable),
      }
    }
    self.scratch = scratch;

    result.map(|_| alerted)
  }

  fn accept(&mut self) -> Result<(), IpcError> {
    loop {
      match self.listener.accept() {
        Ok((stream, _addr)) => self.add_client(stream)?,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) => {
          tracing::error!(service = %self.name, error = %e, "Cannot accept incoming IPC connection");
          return Err(IpcError::Accept(e));
        }
      }
    }
  }

  fn add_client(&mut self, mut stream: UnixStream) -> Result<(), IpcError> {
    let id = ClientId(self.next_client_id);
    self.next_client_id += 1;

    // Accepted streams are already nonblocking.
    self
      .poll
      .registry()
      .register(&mut stream, client_token(id), Interest::READABLE)?;

    self.clients.insert(id, IpcClient::new(id, Connection::new(stream)));
    self.live.insert(id);
    tracing::debug!(service = %self.name, client_id = %id, "Accepted IPC client");
    Ok(())
  }

  fn client_ready(&mut self, id: ClientId, readable: bool, writable: bool) {
    let Some(entry) = self.clients.get_mut(&id) else {
      return;
    };
    if !entry.connected {
      return;
    }

    if readable {
      match entry.conn.read() {
        Ok(0) => {}
        Ok(_) => self.push_ready(id),
        Err(e) => {
          tracing::debug!(client_id = %id, error = %e, "IPC client disconnected");
          self.disconnect(id);
          self.push_ready(id);
          return;
        }
      }
    }

    let registry = self.poll.registry();
    let Some(entry) = self.clients.get_mut(&id) else {
      return;
    };
    if writable && entry.write_registered {
      match entry.conn.write() {
        Ok(true) => {
          if let Err(e) = registry.reregister(entry.conn.stream_mut(), client_token(id), Interest::READABLE) {
            tracing::warn!(client_id = %id, error = %e, "Cannot drop write interest for IPC client");
          }
          entry.write_registered = false;
        }
        Ok(false) => {}
        Err(e) => {
          tracing::error!(client_id = %id, error = %e, "Cannot send data to IPC client");
          self.disconnect(id);
          self.push_ready(id);
        }
      }
    }
  }

  /// Tears down the client's registrations and removes it from the live set.
  /// Already received messages stay queued.
  fn disconnect(&mut self, id: ClientId) {
    let registry = self.poll.registry();
    let Some(entry) = self.clients.get_mut(&id) else {
      return;
    };
    if entry.connected {
      if let Err(e) = registry.deregister(entry.conn.stream_mut()) {
        tracing::trace!(client_id = %id, error = %e, "Deregistering IPC client failed");
      }
      entry.conn.shutdown();
      entry.connected = false;
      entry.write_registered = false;
    }
    self.live.remove(&id);
  }

  fn push_ready(&mut self, id: ClientId) {
    let Some(entry) = self.clients.get_mut(&id) else {
      return;
    };
    if entry.state == ClientState::Queued || !entry.is_deliverable() {
      return;
    }
    entry.state = ClientState::Queued;
    self.ready.push_back(id);
  }

  fn pop_ready(&mut self) -> Option<Delivery> {
    while let Some(id) = self.ready.pop_front() {
      let releases = self.releases.clone();
      let Some(entry) = self.clients.get_mut(&id) else {
        continue;
      };
      entry.state = ClientState::None;

      let message = entry.conn.pop_rx();
      let client = entry.handle(&releases);

      match &message {
        Some(message) => {
          if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!(client_id = %id, message = %message.dump(), "IPC service received message");
          }
          self.push_ready(id);
        }
        None => {
          // End of stream delivered; nothing more will come from this client.
          if !entry.connected && entry.table_ref {
            entry.table_ref = false;
            self.release(id);
          }
        }
      }
      return Some(Delivery { client, message });
    }
    None
  }

  fn release(&mut self, id: ClientId) {
    let Some(entry) = self.clients.get_mut(&id) else {
      return;
    };
    entry.refcount = entry.refcount.saturating_sub(1);
    if entry.refcount == 0 {
      self.disconnect(id);
      self.clients.remove(&id);
      tracing::debug!(client_id = %id, "IPC client freed");
    }
  }

  fn process_releases(&mut self) {
    for id in self.releases.take() {
      self.release(id);
    }
  }

  fn shutdown(&mut self) {
    if self.closed {
      return;
    }
    self.closed = true;
    tracing::debug!(service = %self.name, path = ?self.path, "Closing IPC service");

    let ids: Vec<ClientId> = self.clients.keys().copied().collect();
    for id in ids {
      self.disconnect(id);
    }
    self.clients.clear();
    self.ready.clear();

    if let Err(e) = self.poll.registry().deregister(&mut self.listener) {
      tracing::trace!(error = %e, "Deregistering IPC listener failed");
    }
    match std::fs::remove_file(&self.path) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => tracing::warn!(path = ?self.path, error = %e, "Failed to remove IPC socket file"),
    }
  }
}

impl Drop for IpcService {
  fn drop(&mut self) {
    self.shutdown();
  }
}

impl std::fmt::Debug for IpcService {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("IpcService")
      .field("name", &self.name)
      .field("path", &self.path)
      .field("clients", &self.clients.len())
      .field("live", &self.live.len())
      .field("ready", &self.ready.len())
      .finish()
  }
}

fn bind_listener(path: &Path) -> Result<UnixListener, IpcError> {
  let socket = Socket::new(Domain::UNIX, Type::STREAM, None).map_err(IpcError::SocketCreate)?;
  let bind_err = |source: io::Error| IpcError::Bind {
    path: path.display().to_string(),
    source,
  };
  let addr = SockAddr::unix(path).map_err(bind_err)?;
  socket.bind(&addr).map_err(bind_err)?;
  socket.listen(libc::SOMAXCONN).map_err(|e| {
    tracing::error!(path = ?path, error = %e, "Cannot listen on IPC socket");
    IpcError::Io(e)
  })?;
  socket.set_nonblocking(true)?;
  let listener: std::os::unix::net::UnixListener = socket.into();
  Ok(UnixListener::from_std(listener))
}
