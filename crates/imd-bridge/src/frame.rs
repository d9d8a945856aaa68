// frame.rs — the outbound frame assembler.
//
// Builds the single `msgdata` buffer sent to the client each emission step:
// FCOORDS always, with optional TIME/BOX/VELOCITIES/FORCES sub-blocks ahead
// of it when the v3 session negotiated them on. Sized once up front for the
// worst-case session configuration the way myq2's `SZ_Init`-backed
// `SizeBuf` buffers are grown once and reused per packet
// (`crates/myq2-common/src/net.rs`), rather than reallocating per frame.

use imd_wire::{codec, MessageType, TagIndex, Triple};

use crate::config::SessionToggles;
use crate::particle::{Domain, ParticleView};

/// Upper bound on the byte size of one assembled frame for `num_coords`
/// particles with every optional sub-block enabled, sized for the
/// worst-case session configuration.
pub fn worst_case_frame_size(num_coords: usize) -> usize {
    let header = imd_wire::HEADER_SIZE;
    let time_block = header + codec::TIME_PAYLOAD_LEN;
    let box_block = header + codec::BOX_PAYLOAD_LEN;
    let coords_block = header + codec::triples_payload_len(num_coords);
    let velocities_block = header + codec::triples_payload_len(num_coords);
    let forces_block = header + codec::triples_payload_len(num_coords);
    time_block + box_block + coords_block + velocities_block + forces_block
}

/// Per-step simulation state the assembler needs in addition to the
/// gathered particle sub-blocks.
#[derive(Debug, Clone, Copy)]
pub struct StepInfo {
    pub dt: f64,
    pub current_time: f64,
    pub step: u64,
}

/// Assemble one frame into `out`, appending the fixed sub-block order
/// TIME, BOX, FCOORDS, VELOCITIES, FORCES.
/// `coords`/`velocities`/`forces` must already be dense and tag-ordered
/// (the output of `collective::scatter_into_dense`); their length must
/// equal `idx.len()`.
pub fn assemble(
    out: &mut Vec<u8>,
    toggles: SessionToggles,
    idx: &TagIndex,
    step_info: StepInfo,
    domain: Domain,
    coords: &[Triple],
    velocities: &[Triple],
    forces: &[Triple],
) {
    out.clear();

    if toggles.time {
        codec::write_header(out, MessageType::Time, 1);
        codec::encode_time(out, step_info.dt, step_info.current_time, step_info.step);
    }

    if toggles.box_ {
        let edges = [
            [domain.xprd as f32, 0.0, 0.0],
            [domain.xy as f32, domain.yprd as f32, 0.0],
            [domain.xz as f32, domain.yz as f32, domain.zprd as f32],
        ];
        codec::write_header(out, MessageType::Box, 1);
        codec::encode_box(out, &edges);
    }

    if toggles.coordinates {
        debug_assert_eq!(coords.len(), idx.len());
        codec::write_header(out, MessageType::FCoords, idx.len() as i32);
        codec::encode_triples(out, coords);
    }

    if toggles.velocities {
        debug_assert_eq!(velocities.len(), idx.len());
        codec::write_header(out, MessageType::Velocities, idx.len() as i32);
        codec::encode_triples(out, velocities);
    }

    if toggles.forces {
        debug_assert_eq!(forces.len(), idx.len());
        codec::write_header(out, MessageType::Forces, idx.len() as i32);
        codec::encode_triples(out, forces);
    }
}

/// Collect one rank's local, in-group particle positions as `(tag, xyz)`
/// records, unwrapping through the periodic image flags first when
/// `unwrap` is set. This is the per-rank half of
/// the gather step; the caller passes the result to
/// `collective::gather_block`.
pub fn collect_local_coords(view: &impl ParticleView, unwrap: bool) -> Vec<(i64, Triple)> {
    let domain = view.domain();
    (0..view.num_local())
        .filter(|&i| view.in_group(i))
        .map(|i| {
            let tag = view.tag(i);
            let pos = view.position(i);
            let pos = if unwrap { domain.unwrap(pos, view.image(i)) } else { pos };
            (tag, [pos[0] as f32, pos[1] as f32, pos[2] as f32])
        })
        .collect()
}

pub fn collect_local_velocities(view: &impl ParticleView) -> Vec<(i64, Triple)> {
    (0..view.num_local())
        .filter(|&i| view.in_group(i))
        .map(|i| {
            let v = view.velocity(i);
            (view.tag(i), [v[0] as f32, v[1] as f32, v[2] as f32])
        })
        .collect()
}

pub fn collect_local_forces(view: &impl ParticleView) -> Vec<(i64, Triple)> {
    (0..view.num_local())
        .filter(|&i| view.in_group(i))
        .map(|i| {
            let f = view.force(i);
            (view.tag(i), [f[0] as f32, f[1] as f32, f[2] as f32])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use imd_wire::Header;

    fn toggles_all() -> SessionToggles {
        SessionToggles { time: true, box_: true, coordinates: true, velocities: true, forces: true }
    }

    #[test]
    fn assembled_frame_matches_worst_case_upper_bound() {
        let idx = TagIndex::build_from_sorted_tags(&[1, 2, 3]).unwrap();
        let coords = vec![[0.0; 3]; 3];
        let velocities = vec![[0.0; 3]; 3];
        let forces = vec![[0.0; 3]; 3];
        let domain = Domain::orthogonal(10.0, 10.0, 10.0);
        let mut buf = Vec::new();
        assemble(
            &mut buf,
            toggles_all(),
            &idx,
            StepInfo { dt: 0.001, current_time: 1.0, step: 10 },
            domain,
            &coords,
            &velocities,
            &forces,
        );
        assert!(buf.len() <= worst_case_frame_size(3));
    }

    #[test]
    fn v2_frame_contains_only_fcoords() {
        let idx = TagIndex::build_from_sorted_tags(&[1]).unwrap();
        let coords = vec![[1.0, 2.0, 3.0]];
        let domain = Domain::orthogonal(10.0, 10.0, 10.0);
        let mut buf = Vec::new();
        let v2_toggles = SessionToggles { time: false, box_: false, coordinates: true, velocities: false, forces: false };
        assemble(
            &mut buf,
            v2_toggles,
            &idx,
            StepInfo { dt: 0.0, current_time: 0.0, step: 0 },
            domain,
            &coords,
            &[],
            &[],
        );
        let header = imd_wire::codec::read_header(&buf[0..8]).unwrap();
        assert_eq!(header, Header { msg_type: MessageType::FCoords as i32, length: 1 });
        assert_eq!(buf.len(), 8 + codec::triples_payload_len(1));
    }

    #[test]
    fn triclinic_box_carries_tilt_factors() {
        let idx = TagIndex::build_from_sorted_tags(&[1]).unwrap();
        let coords = vec![[0.0; 3]];
        let domain = Domain { xprd: 10.0, yprd: 10.0, zprd: 10.0, xy: 1.0, xz: 0.0, yz: 0.0 };
        let mut buf = Vec::new();
        assemble(
            &mut buf,
            toggles_all(),
            &idx,
            StepInfo { dt: 0.0, current_time: 0.0, step: 0 },
            domain,
            &coords,
            &coords,
            &coords,
        );
        // TIME block first, then BOX: header + payload offsets.
        let box_header_off = 8 + codec::TIME_PAYLOAD_LEN;
        let box_payload_off = box_header_off + 8;
        let edges = codec::decode_box(&buf[box_payload_off..]).unwrap();
        assert_eq!(edges[1][0], 1.0);
    }
}
