//! The chunked representation of one oversized logical file.
//!
//! A file larger than the direct-upload limit is stored as
//! `<rel>.parts/<name>.part<N>.txt` objects, each a small text document with a
//! JSON metadata header and a base64 body. See [`codec`] for the framing and
//! [`naming`] for the path scheme.

pub mod codec;
pub mod error;
pub mod naming;
pub mod split;

#[cfg(test)]
pub use codec::decode;
pub use codec::{encode, PartMetadata};
pub use error::PartError;
