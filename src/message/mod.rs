//! Message-related types (`Message`, reserved code ranges, diagnostic dumps).

mod msg;

pub use msg::{Message, MessageDump, DUMP_DATA_LIMIT, RTC_CODE_LIMIT};
