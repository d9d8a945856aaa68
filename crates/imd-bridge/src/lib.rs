//! Interactive Molecular Dynamics (IMD) steering/observation bridge.
//!
//! A host embeds one [`Bridge`] per MPI-style rank, implements
//! [`ParticleView`] over its own particle storage and [`Communicator`]
//! over its own process-group transport, and calls [`Bridge::setup`] once
//! followed by [`Bridge::post_force`]/[`Bridge::end_of_step`] every
//! integration step. Everything below that surface — the wire protocol,
//! the tag index, the session state machine, and the gather/scatter
//! collective logic — is internal.

pub mod asyncio;
pub mod collective;
pub mod config;
pub mod error;
pub mod frame;
pub mod hooks;
pub mod particle;
pub mod session;
pub mod steering;

pub use collective::{Communicator, InProcessCommunicator, LocalCommunicator};
pub use config::{BridgeConfig, BridgeConfigBuilder, SessionToggles, MIN_PORT};
pub use error::{BridgeError, BridgeResult, Severity};
pub use frame::StepInfo;
pub use hooks::Bridge;
pub use particle::{Domain, ParticleView};
pub use session::{Session, SessionEvent, SessionState};
