//! warpsync Wire Protocol - Tagged message envelope
//!
//! Every message is a 32-bit tag followed by the payload that tag selects.
//! Client-to-server payloads and server-to-client payloads differ for some
//! tags (the server stamps the sender's name), so each direction has its own
//! enum; both are encoded and decoded next to the tag table.
//!
//! All integers are little-endian, strings are a `u16` length plus UTF-8,
//! booleans are one byte.

pub mod codec;
pub mod message;

pub use codec::*;
pub use message::*;
