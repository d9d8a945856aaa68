// codec.rs — fixed header + typed payload encode/decode.
//
// Converted in spirit from myq2-common's MSG_Write*/MSG_Read* helpers
// around `SizeBuf`, generalized to the IMD frame layout. Integers are
// network byte order except the handshake header's `length` field, which
// rides in host byte order so the client can auto-detect endianness by
// comparing the raw value against 2/3 in its own order.
//
// Float payloads (coords/velocities/forces/time/box) are written in the
// host's native byte order and never byte-swapped, matching the original
// protocol's little-endian-host assumption.

use byteorder::{BigEndian, ByteOrder, NativeEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::error::{WireError, WireResult};
use crate::types::{ForceRecord, Header, MessageType, ProtocolVersion, SessionFlags, Triple, HEADER_SIZE};

/// Append a normal 8-byte header (both fields network/big-endian).
pub fn write_header(buf: &mut Vec<u8>, msg_type: MessageType, length: i32) {
    buf.write_i32::<BigEndian>(msg_type as i32).unwrap();
    buf.write_i32::<BigEndian>(length).unwrap();
}

/// Append the special HANDSHAKE header: `type` network order, `length`
/// carrying the raw protocol version in *host* order.
pub fn write_handshake_header(buf: &mut Vec<u8>, version: ProtocolVersion) {
    buf.write_i32::<BigEndian>(MessageType::Handshake as i32).unwrap();
    buf.write_i32::<NativeEndian>(version.as_i32()).unwrap();
}

/// Decode an 8-byte header with both fields in network/big-endian order.
/// Used for every client->server message (GO, KILL, PAUSE, TRATE, MDCOMM,
/// RESUME) and to re-parse our own outgoing normal headers in tests.
pub fn read_header(bytes: &[u8]) -> WireResult<Header> {
    if bytes.len() < HEADER_SIZE {
        return Err(WireError::Malformed("header shorter than 8 bytes"));
    }
    let msg_type = BigEndian::read_i32(&bytes[0..4]);
    let length = BigEndian::read_i32(&bytes[4..8]);
    Ok(Header { msg_type, length })
}

/// Decode a handshake header: `type` big-endian, `length` host-native.
/// Used by test clients emulating the viewer's own byte-order detection.
pub fn read_handshake_header(bytes: &[u8]) -> WireResult<Header> {
    if bytes.len() < HEADER_SIZE {
        return Err(WireError::Malformed("header shorter than 8 bytes"));
    }
    let msg_type = BigEndian::read_i32(&bytes[0..4]);
    let length = NativeEndian::read_i32(&bytes[4..8]);
    Ok(Header { msg_type, length })
}

// =============================================================================
// Triple payloads: FCOORDS / VELOCITIES / FORCES
// =============================================================================

/// Byte length of a `count`-triple payload (not including the header).
pub fn triples_payload_len(count: usize) -> usize {
    count * 3 * 4
}

pub fn encode_triples(buf: &mut Vec<u8>, triples: &[Triple]) {
    for t in triples {
        buf.write_f32::<NativeEndian>(t[0]).unwrap();
        buf.write_f32::<NativeEndian>(t[1]).unwrap();
        buf.write_f32::<NativeEndian>(t[2]).unwrap();
    }
}

pub fn decode_triples(bytes: &[u8], count: usize) -> WireResult<Vec<Triple>> {
    let need = triples_payload_len(count);
    if bytes.len() < need {
        return Err(WireError::Malformed("triple payload truncated"));
    }
    let mut cursor = Cursor::new(bytes);
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let x = cursor.read_f32::<NativeEndian>().map_err(WireError::Io)?;
        let y = cursor.read_f32::<NativeEndian>().map_err(WireError::Io)?;
        let z = cursor.read_f32::<NativeEndian>().map_err(WireError::Io)?;
        out.push([x, y, z]);
    }
    Ok(out)
}

// =============================================================================
// MDCOMM: length int32 indices (network order) + length*3 float32 forces
// =============================================================================

pub fn mdcomm_payload_len(count: usize) -> usize {
    count * 4 + triples_payload_len(count)
}

pub fn encode_mdcomm(buf: &mut Vec<u8>, records: &[ForceRecord]) {
    for r in records {
        buf.write_i32::<BigEndian>(r.index).unwrap();
    }
    for r in records {
        buf.write_f32::<NativeEndian>(r.fx).unwrap();
        buf.write_f32::<NativeEndian>(r.fy).unwrap();
        buf.write_f32::<NativeEndian>(r.fz).unwrap();
    }
}

pub fn decode_mdcomm(bytes: &[u8], count: usize) -> WireResult<Vec<ForceRecord>> {
    let need = mdcomm_payload_len(count);
    if bytes.len() < need {
        return Err(WireError::Malformed("MDCOMM payload truncated"));
    }
    let mut cursor = Cursor::new(bytes);
    let mut indices = Vec::with_capacity(count);
    for _ in 0..count {
        indices.push(cursor.read_i32::<BigEndian>().map_err(WireError::Io)?);
    }
    let mut out = Vec::with_capacity(count);
    for index in indices {
        let fx = cursor.read_f32::<NativeEndian>().map_err(WireError::Io)?;
        let fy = cursor.read_f32::<NativeEndian>().map_err(WireError::Io)?;
        let fz = cursor.read_f32::<NativeEndian>().map_err(WireError::Io)?;
        out.push(ForceRecord { index, fx, fy, fz });
    }
    Ok(out)
}

// =============================================================================
// TIME: float64 dt, float64 current_time, uint64 step (24 bytes)
// =============================================================================

pub const TIME_PAYLOAD_LEN: usize = 24;

pub fn encode_time(buf: &mut Vec<u8>, dt: f64, current_time: f64, step: u64) {
    buf.write_f64::<NativeEndian>(dt).unwrap();
    buf.write_f64::<NativeEndian>(current_time).unwrap();
    buf.write_u64::<NativeEndian>(step).unwrap();
}

pub fn decode_time(bytes: &[u8]) -> WireResult<(f64, f64, u64)> {
    if bytes.len() < TIME_PAYLOAD_LEN {
        return Err(WireError::Malformed("TIME payload truncated"));
    }
    let mut cursor = Cursor::new(bytes);
    let dt = cursor.read_f64::<NativeEndian>().map_err(WireError::Io)?;
    let t = cursor.read_f64::<NativeEndian>().map_err(WireError::Io)?;
    let step = cursor.read_u64::<NativeEndian>().map_err(WireError::Io)?;
    Ok((dt, t, step))
}

// =============================================================================
// BOX: 9 float32 values, box-edge vectors a, b, c row-major (36 bytes)
// =============================================================================

pub const BOX_PAYLOAD_LEN: usize = 36;

pub fn encode_box(buf: &mut Vec<u8>, edges: &[Triple; 3]) {
    for v in edges {
        buf.write_f32::<NativeEndian>(v[0]).unwrap();
        buf.write_f32::<NativeEndian>(v[1]).unwrap();
        buf.write_f32::<NativeEndian>(v[2]).unwrap();
    }
}

pub fn decode_box(bytes: &[u8]) -> WireResult<[Triple; 3]> {
    if bytes.len() < BOX_PAYLOAD_LEN {
        return Err(WireError::Malformed("BOX payload truncated"));
    }
    let v = decode_triples(bytes, 3)?;
    Ok([v[0], v[1], v[2]])
}

// =============================================================================
// SESSIONINFO: 7 bytes, one per boolean (spec order)
// =============================================================================

pub const SESSION_INFO_PAYLOAD_LEN: usize = 7;

pub fn encode_session_info(buf: &mut Vec<u8>, flags: SessionFlags) {
    buf.extend_from_slice(&flags.to_bytes());
}

pub fn decode_session_info(bytes: &[u8]) -> WireResult<SessionFlags> {
    if bytes.len() < SESSION_INFO_PAYLOAD_LEN {
        return Err(WireError::Malformed("SESSIONINFO payload truncated"));
    }
    let mut arr = [0u8; 7];
    arr.copy_from_slice(&bytes[..7]);
    Ok(SessionFlags::from_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_header_round_trips_big_endian() {
        let mut buf = Vec::new();
        write_header(&mut buf, MessageType::FCoords, 3);
        assert_eq!(buf, vec![0, 0, 0, 2, 0, 0, 0, 3]);
        let hdr = read_header(&buf).unwrap();
        assert_eq!(hdr.msg_type, MessageType::FCoords as i32);
        assert_eq!(hdr.length, 3);
    }

    #[test]
    fn handshake_header_length_is_host_order() {
        let mut buf = Vec::new();
        write_handshake_header(&mut buf, ProtocolVersion::V3);
        // type field is still big-endian
        assert_eq!(&buf[0..4], &[0, 0, 0, 4]);
        let hdr = read_handshake_header(&buf).unwrap();
        assert_eq!(hdr.length, 3);
    }

    #[test]
    fn triples_round_trip() {
        let triples = vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let mut buf = Vec::new();
        encode_triples(&mut buf, &triples);
        assert_eq!(buf.len(), triples_payload_len(2));
        let decoded = decode_triples(&buf, 2).unwrap();
        assert_eq!(decoded, triples);
    }

    #[test]
    fn mdcomm_round_trip() {
        let records = vec![
            ForceRecord { index: 0, fx: 1.0, fy: 2.0, fz: 3.0 },
            ForceRecord { index: 7, fx: -1.0, fy: 0.5, fz: 0.0 },
        ];
        let mut buf = Vec::new();
        encode_mdcomm(&mut buf, &records);
        assert_eq!(buf.len(), mdcomm_payload_len(2));
        let decoded = decode_mdcomm(&buf, 2).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn time_round_trip() {
        let mut buf = Vec::new();
        encode_time(&mut buf, 0.002, 123.456, 99);
        assert_eq!(buf.len(), TIME_PAYLOAD_LEN);
        let (dt, t, step) = decode_time(&buf).unwrap();
        assert_eq!(dt, 0.002);
        assert_eq!(t, 123.456);
        assert_eq!(step, 99);
    }

    #[test]
    fn box_round_trip() {
        let edges = [[10.0, 0.0, 0.0], [1.0, 10.0, 0.0], [2.0, 3.0, 10.0]];
        let mut buf = Vec::new();
        encode_box(&mut buf, &edges);
        assert_eq!(buf.len(), BOX_PAYLOAD_LEN);
        assert_eq!(decode_box(&buf).unwrap(), edges);
    }

    #[test]
    fn session_info_round_trip() {
        let flags = SessionFlags {
            time: true,
            box_: false,
            coords: true,
            wrap: false,
            velocities: true,
            forces: false,
            energies: false,
        };
        let mut buf = Vec::new();
        encode_session_info(&mut buf, flags);
        assert_eq!(buf.len(), SESSION_INFO_PAYLOAD_LEN);
        assert_eq!(decode_session_info(&buf).unwrap(), flags);
    }

    #[test]
    fn decode_triples_rejects_short_buffer() {
        let buf = vec![0u8; 4];
        assert!(decode_triples(&buf, 1).is_err());
    }
}
