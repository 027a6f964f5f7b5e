//! An async GATT link protocol between a host stack and an external BLE
//! controller.
//!
//! Some BLE designs split the stack across two processors: the application
//! host keeps the GATT view of its services while a companion controller
//! owns the attribute table and the ATT state machines. This crate speaks
//! the message protocol crossing that split: framed requests from the host,
//! responses and unsolicited events from the controller, over any byte
//! stream implementing the `embedded-io-async` traits.
//!
//! Every request is correlated with its response through a nonzero request
//! id echoed by the controller, so any number of operations can be in
//! flight and complete out of order. Events (peer writes, incoming
//! notifications, protocol timeouts) carry no id and are delivered through
//! a bounded queue.
//!
//! # Architecture
//!
//! - [`proto`] — frame envelope and per-role message definitions with
//!   encode/parse (server role: registration, value maintenance, value
//!   pushes; client role: discovery, read/write, value events)
//! - [`link`] — the dispatch loop, the pending request table and the typed
//!   operation front end
//! - [`codec`] / [`cursor`] — little-endian wire primitives
//!
//! The crate is `no_std` and allocation-free; capacities are const
//! generics on [`Link`].

#![no_std]

#[cfg(feature = "std")]
extern crate std;

// This mod MUST go first, so that the others see its macros.
mod fmt;

pub mod codec;
pub mod cursor;
pub mod link;
mod pending;
pub mod proto;
pub mod types;

pub use link::{Link, LinkEvent};

use proto::{RequestId, Status};

/// Errors surfaced by link operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Transport I/O error.
    Transport(embedded_io::ErrorKind),
    /// Wire encoding or parsing error.
    Codec(codec::Error),
    /// The controller reported a failure status.
    Status(Status),
    /// A response frame did not correlate with its request.
    UnexpectedResponse,
    /// A response frame carried an id with no request in flight.
    UnknownRequest(RequestId),
    /// All request slots are in flight.
    RequestQueueFull,
    /// A buffer or bounded collection was too small for the data.
    InsufficientSpace,
}

impl From<codec::Error> for Error {
    fn from(error: codec::Error) -> Self {
        Self::Codec(error)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Transport(kind) => write!(f, "transport error: {:?}", kind),
            Error::Codec(e) => write!(f, "codec error: {:?}", e),
            Error::Status(status) => write!(f, "controller status: {}", status.0),
            Error::UnexpectedResponse => write!(f, "response did not correlate with its request"),
            Error::UnknownRequest(id) => write!(f, "no request in flight with id {}", id.0),
            Error::RequestQueueFull => write!(f, "all request slots are in flight"),
            Error::InsufficientSpace => write!(f, "insufficient space"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::Transport(_) => defmt::write!(f, "Transport"),
            Error::Codec(e) => defmt::write!(f, "Codec({})", e),
            Error::Status(status) => defmt::write!(f, "Status({})", status.0),
            Error::UnexpectedResponse => defmt::write!(f, "UnexpectedResponse"),
            Error::UnknownRequest(id) => defmt::write!(f, "UnknownRequest({})", id.0),
            Error::RequestQueueFull => defmt::write!(f, "RequestQueueFull"),
            Error::InsufficientSpace => defmt::write!(f, "InsufficientSpace"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Convert a ReadExactError to Error.
///
/// This is provided as a function rather than a From impl due to potential
/// forward-compatibility issues with trait implementations.
pub(crate) fn from_read_exact_error<E: embedded_io::Error>(e: embedded_io::ReadExactError<E>) -> Error {
    match e {
        embedded_io::ReadExactError::UnexpectedEof => Error::Transport(embedded_io::ErrorKind::Other),
        embedded_io::ReadExactError::Other(e) => Error::Transport(e.kind()),
    }
}
