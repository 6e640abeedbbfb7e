//! Wire framing: the 8-byte `[code][size]` header followed by `size` payload bytes.

pub mod codec;

pub use codec::{encode, encode_header, FrameDecoder, PendingFrame, HEADER_SIZE};
