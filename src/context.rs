//! IPC environment configuration: the socket root directory and the class of
//! program whose services live there.

use crate::error::IpcError;
use crate::transport::endpoint::sun_path_capacity;

use nix::unistd::{access, AccessFlags};
use once_cell::sync::OnceCell;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// The role of the program hosting or dialing a service.
///
/// Each class gets its own socket name prefix so that, for example, a server
/// and an agent sharing one root directory never collide on a service name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServiceClass {
  Server,
  Proxy,
  Agent,
  #[default]
  None,
}

impl ServiceClass {
  pub fn prefix(&self) -> &'static str {
    match self {
      ServiceClass::Server => "server_",
      ServiceClass::Proxy => "proxy_",
      ServiceClass::Agent => "agent_",
      ServiceClass::None => "",
    }
  }
}

impl fmt::Display for ServiceClass {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ServiceClass::Server => "server",
      ServiceClass::Proxy => "proxy",
      ServiceClass::Agent => "agent",
      ServiceClass::None => "none",
    };
    f.write_str(name)
  }
}

/// Validated IPC environment passed explicitly to services and sockets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcConfig {
  root: PathBuf,
  class: ServiceClass,
}

impl IpcConfig {
  /// Validates `root` (must exist, be a directory and be readable and writable)
  /// and strips trailing slashes from it.
  pub fn new(root: impl AsRef<Path>, class: ServiceClass) -> Result<Self, IpcError> {
    let root = root.as_ref();
    tracing::debug!(path = ?root, %class, "Validating IPC root directory");

    let meta = std::fs::metadata(root).map_err(|e| {
      IpcError::InvalidRoot(format!("Failed to stat the specified path \"{}\": {}", root.display(), e))
    })?;
    if !meta.is_dir() {
      return Err(IpcError::InvalidRoot(format!(
        "The specified path \"{}\" is not a directory",
        root.display()
      )));
    }
    access(root, AccessFlags::R_OK | AccessFlags::W_OK)
      .map_err(|e| IpcError::InvalidRoot(format!("Cannot access path \"{}\": {}", root.display(), e)))?;

    let mut bytes = root.as_os_str().as_bytes();
    while bytes.len() > 1 && bytes.ends_with(b"/") {
      bytes = &bytes[..bytes.len() - 1];
    }
    if bytes.len() + 3 > sun_path_capacity() {
      return Err(IpcError::InvalidRoot(format!(
        "The IPC root path \"{}\" is too long",
        root.display()
      )));
    }

    Ok(Self {
      root: PathBuf::from(std::ffi::OsStr::from_bytes(bytes)),
      class,
    })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn class(&self) -> ServiceClass {
    self.class
  }

  /// Full socket path for `service_name` under this environment.
  pub fn socket_path(&self, service_name: &str) -> Result<PathBuf, IpcError> {
    crate::transport::endpoint::socket_path(self, service_name)
  }
}

static IPC_ENV: OnceCell<IpcConfig> = OnceCell::new();

/// Registers the process-wide IPC environment. May succeed only once.
pub fn init_env(config: IpcConfig) -> Result<&'static IpcConfig, IpcError> {
  let mut fresh = false;
  let installed = IPC_ENV.get_or_init(|| {
    fresh = true;
    config
  });
  if !fresh {
    return Err(IpcError::AlreadyInitialized(installed.root().display().to_string()));
  }
  tracing::debug!(root = ?installed.root(), class = %installed.class(), "IPC environment initialized");
  Ok(installed)
}

/// The process-wide IPC environment, if [`init_env`] has been called.
pub fn env() -> Option<&'static IpcConfig> {
  IPC_ENV.get()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn class_prefixes() {
    assert_eq!(ServiceClass::Server.prefix(), "server_");
    assert_eq!(ServiceClass::Proxy.prefix(), "proxy_");
    assert_eq!(ServiceClass::Agent.prefix(), "agent_");
    assert_eq!(ServiceClass::None.prefix(), "");
  }

  #[test]
  fn trailing_slashes_are_trimmed() {
    let dir = tempfile::tempdir().unwrap();
    let with_slashes = format!("{}///", dir.path().display());
    let config = IpcConfig::new(&with_slashes, ServiceClass::None).unwrap();
    assert_eq!(config.root(), dir.path());
  }

  #[test]
  fn rejects_missing_root() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope");
    let err = IpcConfig::new(&missing, ServiceClass::None).unwrap_err();
    assert!(matches!(err, IpcError::InvalidRoot(ref m) if m.contains("Failed to stat")));
  }

  #[test]
  fn rejects_regular_file_root() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let err = IpcConfig::new(file.path(), ServiceClass::None).unwrap_err();
    assert!(matches!(err, IpcError::InvalidRoot(ref m) if m.contains("not a directory")));
  }
}
