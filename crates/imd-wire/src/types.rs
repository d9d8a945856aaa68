// types.rs — IMD message catalogue and the 8-byte header shared by every
// message. Converted in spirit from myq2-common::qcommon's SVC_*/CLC_* op
// tables, generalized to the IMD protocol's 16 message types.

/// One IMD wire message type. The numeric value is the on-wire `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MessageType {
    Disconnect = 0,
    Energies = 1,
    FCoords = 2,
    Go = 3,
    Handshake = 4,
    Kill = 5,
    MdComm = 6,
    Pause = 7,
    Trate = 8,
    /// Synthetic: returned by `recv_header` on a stream error. Never
    /// actually appears on the wire.
    IoError = 9,
    SessionInfo = 10,
    Resume = 11,
    Time = 12,
    Box = 13,
    Velocities = 14,
    Forces = 15,
}

impl MessageType {
    /// Decode a raw `type` field. Unknown values return `None`; the caller
    /// logs and ignores an unrecognized message type rather than treating
    /// it as fatal.
    pub fn from_i32(v: i32) -> Option<Self> {
        Some(match v {
            0 => Self::Disconnect,
            1 => Self::Energies,
            2 => Self::FCoords,
            3 => Self::Go,
            4 => Self::Handshake,
            5 => Self::Kill,
            6 => Self::MdComm,
            7 => Self::Pause,
            8 => Self::Trate,
            9 => Self::IoError,
            10 => Self::SessionInfo,
            11 => Self::Resume,
            12 => Self::Time,
            13 => Self::Box,
            14 => Self::Velocities,
            15 => Self::Forces,
            _ => return None,
        })
    }
}

/// The fixed 8-byte frame header: `type` then `length`, both `i32`.
///
/// Every header is sent network-byte-order on both fields *except* the
/// handshake header, whose `length` carries the raw protocol version in the
/// host's native byte order (see [`crate::codec::encode_handshake_header`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub msg_type: i32,
    pub length: i32,
}

pub const HEADER_SIZE: usize = 8;

/// Negotiated protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V2 = 2,
    V3 = 3,
}

impl ProtocolVersion {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            2 => Some(Self::V2),
            3 => Some(Self::V3),
            _ => None,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// The seven booleans negotiated in a v3 `SESSIONINFO` block, in wire order.
/// v2 sessions use only `coords` (implicitly always on) and ignore the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionFlags {
    pub time: bool,
    pub box_: bool,
    pub coords: bool,
    pub wrap: bool,
    pub velocities: bool,
    pub forces: bool,
    pub energies: bool,
}

impl SessionFlags {
    /// v2 only ever reports wrapped/unwrapped coordinates.
    pub fn v2_default(wrap: bool) -> Self {
        Self {
            time: false,
            box_: false,
            coords: true,
            wrap,
            velocities: false,
            forces: false,
            energies: false,
        }
    }

    pub fn to_bytes(self) -> [u8; 7] {
        [
            self.time as u8,
            self.box_ as u8,
            self.coords as u8,
            self.wrap as u8,
            self.velocities as u8,
            self.forces as u8,
            self.energies as u8,
        ]
    }

    pub fn from_bytes(b: [u8; 7]) -> Self {
        Self {
            time: b[0] != 0,
            box_: b[1] != 0,
            coords: b[2] != 0,
            wrap: b[3] != 0,
            velocities: b[4] != 0,
            forces: b[5] != 0,
            energies: b[6] != 0,
        }
    }
}

/// One steering record received in an `MDCOMM` message: a client-supplied
/// index (translated through `rev_idmap` to a tag by the caller) and a force
/// vector in the sender's units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForceRecord {
    pub index: i32,
    pub fx: f32,
    pub fy: f32,
    pub fz: f32,
}

/// A dense (x, y, z) triple, used for coords/velocities/forces sub-blocks.
pub type Triple = [f32; 3];
