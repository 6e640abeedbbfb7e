// tests/env.rs

mod common;

use common::test_config;
use ipcsvc::{env, init_env, IpcError, ServiceClass};
use serial_test::serial;

#[test]
#[serial]
fn init_env_succeeds_once() {
  let (_dir, config) = test_config(ServiceClass::Agent);
  let root = config.root().to_path_buf();

  let installed = init_env(config.clone()).unwrap();
  assert_eq!(installed.root(), root.as_path());
  assert_eq!(env().map(|c| c.class()), Some(ServiceClass::Agent));

  let (_other_dir, other) = test_config(ServiceClass::Server);
  match init_env(other) {
    Err(IpcError::AlreadyInitialized(existing)) => assert_eq!(existing, root.display().to_string()),
    result => panic!("expected AlreadyInitialized, got {:?}", result),
  }
  assert_eq!(env(), Some(&config));
}
