use crate::cli::SendArgs;

use anyhow::{Context as AnyhowContext, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ipcsvc::{exchange, Timeout};
use std::time::Duration;

fn decode_payload(payload: &str, format: &str) -> Result<Vec<u8>> {
  let bytes = match format {
    "text" => payload.as_bytes().to_vec(),
    "hex" => hex::decode(payload).context("Payload is not valid hex")?,
    "base64" => STANDARD.decode(payload).context("Payload is not valid base64")?,
    other => anyhow::bail!("Unsupported payload format: {}", other),
  };
  Ok(bytes)
}

pub fn send_request(args: SendArgs) -> Result<()> {
  let config = super::load_config(&args.env)?;
  let payload = decode_payload(&args.payload, &args.payload_format)?;
  let timeout = match args.timeout_ms {
    0 => Timeout::Forever,
    ms => Timeout::After(Duration::from_millis(ms)),
  };

  tracing::debug!(service = %args.env.name, code = args.code, size = payload.len(), "Sending request");
  let reply = exchange(&config, &args.env.name, args.code, timeout, &payload)
    .with_context(|| format!("Request to service '{}' failed", args.env.name))?;

  match args.display_format.as_str() {
    "hex" => println!("{} {}", reply.code(), hex::encode(reply.data())),
    "base64" => println!("{} {}", reply.code(), STANDARD.encode(reply.data())),
    "dump" => println!("{}", reply.dump()),
    _ => println!("{} {}", reply.code(), String::from_utf8_lossy(reply.data())),
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn payload_formats() {
    assert_eq!(decode_payload("hi", "text").unwrap(), b"hi");
    assert_eq!(decode_payload("6869", "hex").unwrap(), b"hi");
    assert_eq!(decode_payload("aGk=", "base64").unwrap(), b"hi");
    assert!(decode_payload("zz", "hex").is_err());
  }
}
