// error.rs — bridge-level error taxonomy.
//
// Generalizes myq2's integer ERR_FATAL/ERR_DROP/ERR_QUIT codes
// (myq2-common::common::com_error) into typed variants a host can match on
// and route to its own fatal-error channel, instead of the bridge calling
// into a host-owned print/abort path itself.

use imd_wire::WireError;

/// Severity a host should treat a [`BridgeError`] with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Collective: every rank must observe this and the host must tear the
    /// run down together (argument errors, bind errors, KILL).
    FatalCollective,
    /// Only the current client connection is affected; the simulation
    /// continues (stream I/O errors, handshake/accept failures).
    NonFatal,
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Bad port/trate/version/group-size at construction time.
    #[error("invalid bridge configuration: {0}")]
    Argument(String),

    /// Rank 0 failed to bind the listening socket.
    #[error("failed to bind IMD listen socket: {0}")]
    Bind(#[source] imd_wire::WireError),

    /// Accept, handshake negotiation, or the mandatory GO reply failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A non-EINTR stream error during normal operation. Non-fatal: the
    /// caller drops the client and returns to listening.
    #[error("client stream error: {0}")]
    Stream(#[source] imd_wire::WireError),

    /// The client sent `KILL`, a client-initiated fatal condition.
    #[error("client requested KILL")]
    Killed,
}

impl BridgeError {
    pub fn severity(&self) -> Severity {
        match self {
            BridgeError::Argument(_) | BridgeError::Bind(_) | BridgeError::Killed => {
                Severity::FatalCollective
            }
            BridgeError::Handshake(_) | BridgeError::Stream(_) => Severity::NonFatal,
        }
    }
}

impl From<WireError> for BridgeError {
    fn from(e: WireError) -> Self {
        BridgeError::Stream(e)
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
