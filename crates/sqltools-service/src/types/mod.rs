//! Wire types shared by the host and feature services.

pub mod capabilities;
pub mod contracts;
pub mod error;
pub mod message;
pub mod query;

pub use capabilities::*;
pub use contracts::*;
pub use error::*;
pub use message::*;
