//! Transport layer: Content-Length framing over a byte-stream channel.

pub mod channel;
pub mod framing;

pub use channel::Channel;
pub use framing::{frame_message, parse_message, MessageReader, MessageWriter};
