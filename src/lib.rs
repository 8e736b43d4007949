//! Streaming decoder and UDP collector source for sFlow version 5 datagrams.
//!
//! The wire format nests sample records inside a datagram, flow records
//! inside each sample, and raw packet headers (Ethernet, IPv4/IPv6, TCP/UDP)
//! inside each raw-packet flow record. Every nesting level declares its own
//! byte length; the decoder holds each inner decoder to the declared length
//! so one unknown or malformed record never desynchronizes the outer stream.

mod bounded;
mod read;

pub mod datagram;
pub mod metrics;
pub mod source;

pub use datagram::Datagram;

#[macro_use]
extern crate tracing;

/// Basic error type, dynamically dispatched and safe to send across threads
pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Basic result type, defined in terms of [`Error`] and generic over `T`
pub type Result<T> = std::result::Result<T, Error>;
