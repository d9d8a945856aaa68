//! Wire-level building blocks for the Interactive Molecular Dynamics (IMD)
//! protocol: the fixed header + typed payload codec, a single-client
//! TCP socket endpoint, and the dense tag <-> index map.
//!
//! This crate has no notion of an MD simulation, a session state machine,
//! or a collective communicator — those live in `imd-bridge`, which is
//! built on top of the types exposed here.

pub mod codec;
pub mod error;
pub mod socket;
pub mod tagmap;
pub mod types;

pub use error::{WireError, WireResult};
pub use socket::{platform_init, ClientEndpoint, ListenEndpoint};
pub use tagmap::{sort_tags, Fail, TagIndex};
pub use types::{
    ForceRecord, Header, MessageType, ProtocolVersion, SessionFlags, Triple, HEADER_SIZE,
};
