//! Byte transport between the session and its workers
//!
//! - `queue`: bounded blocking byte queue, one per direction
//! - `utf8`: code point encoding for user input

mod queue;
mod utf8;

pub use queue::{ByteQueue, QueueClosed, DEFAULT_CAPACITY};
pub use utf8::{encode_code_point, EncodedInput, InvalidCodePoint, ESC, MAX_CODE_POINT};
