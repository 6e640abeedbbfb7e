use crate::error::IpcError;
use bytes::Bytes;
use std::fmt;

/// Codes below this value belong to the shared runtime-control channel.
/// Subsystems exchanging their own messages must use codes at or above it.
pub const RTC_CODE_LIMIT: u32 = 10000;

/// How many payload bytes a [`MessageDump`] renders before truncating.
pub const DUMP_DATA_LIMIT: usize = 128;

/// A single framed IPC message: a consumer-defined code and an opaque payload.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Message {
  code: u32,
  // Bytes keeps clones cheap when the same payload is queued for several clients.
  data: Bytes,
}

impl Message {
  /// Creates a message, checking that the payload length fits the 32-bit size field.
  pub fn new(code: u32, data: impl Into<Bytes>) -> Result<Self, IpcError> {
    let data = data.into();
    if data.len() > u32::MAX as usize {
      return Err(IpcError::MessageTooLarge(data.len()));
    }
    Ok(Self { code, data })
  }

  /// Creates a message without a payload.
  pub fn empty(code: u32) -> Self {
    Self {
      code,
      data: Bytes::new(),
    }
  }

  /// Creates a message from a static byte slice (zero-copy).
  pub fn from_static(code: u32, data: &'static [u8]) -> Self {
    Self {
      code,
      data: Bytes::from_static(data),
    }
  }

  // Decoder-side constructor; the header size field already bounded the length.
  pub(crate) fn from_frame(code: u32, data: Bytes) -> Self {
    Self { code, data }
  }

  pub fn code(&self) -> u32 {
    self.code
  }

  /// Payload length as carried in the frame header.
  pub fn size(&self) -> u32 {
    self.data.len() as u32
  }

  pub fn data(&self) -> &[u8] {
    &self.data
  }

  /// Returns the payload `Bytes` (cheap, reference counted).
  pub fn data_bytes(&self) -> Bytes {
    self.data.clone()
  }

  pub fn into_data(self) -> Bytes {
    self.data
  }

  /// True if the code falls in the reserved runtime-control range.
  pub fn is_rtc(&self) -> bool {
    self.code < RTC_CODE_LIMIT
  }

  /// A displayable diagnostic rendering: `code:<c> size:<s> data:<hex>`.
  pub fn dump(&self) -> MessageDump<'_> {
    MessageDump(self)
  }
}

impl fmt::Debug for Message {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Message")
      .field("code", &self.code)
      .field("size", &self.data.len()) // Avoid printing large data
      .finish()
  }
}

/// Hex dump of at most [`DUMP_DATA_LIMIT`] payload bytes, grouped by eight.
pub struct MessageDump<'a>(&'a Message);

impl fmt::Display for MessageDump<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let msg = self.0;
    write!(f, "code:{} size:{} data:", msg.code, msg.size())?;
    for (i, byte) in msg.data.iter().take(DUMP_DATA_LIMIT).enumerate() {
      if i != 0 {
        f.write_str(if i % 8 == 0 { " | " } else { " " })?;
      }
      write!(f, "{:02x}", byte)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dump_groups_bytes_by_eight() {
    let msg = Message::new(10001, (0u8..10).collect::<Vec<_>>()).unwrap();
    assert_eq!(
      msg.dump().to_string(),
      "code:10001 size:10 data:00 01 02 03 04 05 06 07 | 08 09"
    );
  }

  #[test]
  fn dump_truncates_long_payloads() {
    let msg = Message::new(10001, vec![0xabu8; 1000]).unwrap();
    let text = msg.dump().to_string();
    assert!(text.starts_with("code:10001 size:1000 data:ab ab"));
    assert_eq!(text.matches("ab").count(), DUMP_DATA_LIMIT);
  }

  #[test]
  fn empty_message_has_no_payload() {
    let msg = Message::empty(7);
    assert_eq!(msg.size(), 0);
    assert!(msg.data().is_empty());
    assert!(msg.is_rtc());
    assert_eq!(msg.dump().to_string(), "code:7 size:0 data:");
  }

  #[test]
  fn rtc_range_boundary() {
    assert!(Message::empty(RTC_CODE_LIMIT - 1).is_rtc());
    assert!(!Message::empty(RTC_CODE_LIMIT).is_rtc());
  }
}
