//! # Fabriq Wire Format
//!
//! The canonical binary message encoding for the fabriq control subnet.
//!
//! Every message is a positional tagged record: one tag byte followed by the
//! fields of that type in declared order, integers little-endian, Q1.31
//! scalars as signed 32-bit little-endian, variable-length byte fields
//! prefixed with a `u16` count. There are no field names, no padding, and no
//! alternative encodings; a datagram either decodes to exactly one
//! [`Message`] or is rejected.
//!
//! The set of message types is fixed by the protocol, so they are modeled as
//! one closed enum with exhaustive dispatch rather than open polymorphism.
//!
//! Signing never covers the tag: the canonical byte strings fed to Ed25519
//! are the untagged field concatenations produced by [`canonical`].
//!
//! - [`Message`] - the closed set of wire messages
//! - [`codec`] - encode/decode against the 1200-byte datagram budget
//! - [`canonical`] - byte strings for signatures and state digests
//! - [`Role`] / [`NodeId`] - identities shared across the fabric

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod canonical;
pub mod codec;
pub mod message;

pub use codec::{decode, encode, MAX_DATAGRAM};
pub use message::{Message, NodeId, Role};

/// Result type alias for wire operations
pub type Result<T> = std::result::Result<T, WireError>;

/// Errors produced while encoding or decoding datagrams
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// The datagram ended before the declared fields did
    #[error("truncated datagram: needed {needed} more bytes")]
    Truncated {
        /// Bytes still required by the current field
        needed: usize,
    },

    /// The first byte is not a known message tag
    #[error("unknown message tag {0:#04x}")]
    UnknownTag(u8),

    /// Bytes remained after the last declared field
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    /// The encoded message would exceed the datagram budget
    #[error("message of {len} bytes exceeds the {MAX_DATAGRAM}-byte datagram budget")]
    Oversize {
        /// Encoded length
        len: usize,
    },

    /// The role byte is outside the defined mapping
    #[error("invalid role byte {0:#04x}")]
    InvalidRole(u8),
}
