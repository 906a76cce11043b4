//! System Stream Protocol
//!
//! Control-plane messages exchanged between brokers over the broadband system stream.
//!
//! ## Wire Format
//! Each frame is one version byte followed by the bincode encoding of a [`types::SystemMessage`].
//! The payload enum tag is the type discriminator, so unknown types fail to decode
//! and surface as a `ProtocolError`.

pub mod codec;
pub mod types;

pub use codec::{decode, encode};
pub use types::*;
