// error.rs — wire-level error taxonomy
// Converted in spirit from myq2-common's com_error()/ERR_* codes, generalized
// into typed variants a caller can match on.

use std::io;

/// Errors raised while framing, decoding, or moving bytes across the IMD
/// socket. Distinct from `imd_bridge::BridgeError`, which additionally knows
/// about session/collective-level failures.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The stream ended, reset, or errored other than `EINTR`. Surfaced to
    /// callers uniformly as the synthetic `IOERROR` condition.
    #[error("stream I/O error: {0}")]
    Io(#[from] io::Error),

    /// A header or payload was the wrong length or carried an out-of-range
    /// message type.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    /// `accept`/`selread`/`selwrite` saw an unexpected readiness failure.
    #[error("socket readiness error: {0}")]
    Readiness(io::Error),
}

pub type WireResult<T> = Result<T, WireError>;
