// collective.rs — the process-group collective communicator and the
// rank-0 gather/scatter + broadcast logic built on top of it.
//
// The host provides a process-group collective communicator, MPI-style:
// rank 0 is the network endpoint, every rank owns a disjoint particle
// subset. No crate in the retrieved corpus wires up a real MPI binding, so
// rather than fabricate one, the collective primitives the bridge actually
// needs (gather-to-root, broadcast) are expressed as the `Communicator`
// trait below; a host embeds the bridge by implementing it over whatever
// SPMD transport it already has (real MPI, a job-scheduler IPC layer, or —
// in the single-process case — the trivial `LocalCommunicator`).
// `InProcessCommunicator` simulates several ranks inside one test binary
// via threads, so the gather/scatter/broadcast logic in this file is
// exercised without any external dependency.
//
// A real MPI binding would typically post an Irecv, send a ready token,
// then Waitall to avoid an extra copy; that's an implementation detail for
// avoiding a copy, not something observable from outside, so
// `Communicator` exposes the two collective operations at the semantic
// level the rest of the bridge needs.

use std::sync::{Arc, Barrier};

use parking_lot::Mutex;

use imd_wire::{TagIndex, Triple};

/// A process-group collective communicator, provided by the host. Rank 0
/// is always the one that owns the client socket.
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn is_root(&self) -> bool {
        self.rank() == 0
    }

    /// Gather every rank's byte buffer to rank 0. On rank 0, returns
    /// `Some(per_rank_buffers)` indexed by rank. On every other rank,
    /// returns `None` — the data was handed off, not returned locally.
    fn gather_to_root(&self, local: &[u8]) -> Option<Vec<Vec<u8>>>;

    /// Broadcast rank 0's buffer to every rank, itself included. Only rank
    /// 0 needs to supply `Some(data)`; other ranks may pass `None`.
    fn broadcast(&self, root_data: Option<&[u8]>) -> Vec<u8>;
}

/// Single-rank communicator for embedding the bridge in a non-parallel
/// host, or for unit tests that don't need multi-rank behavior.
pub struct LocalCommunicator;

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn gather_to_root(&self, local: &[u8]) -> Option<Vec<Vec<u8>>> {
        Some(vec![local.to_vec()])
    }

    fn broadcast(&self, root_data: Option<&[u8]>) -> Vec<u8> {
        root_data.expect("LocalCommunicator::broadcast requires root_data").to_vec()
    }
}

/// A communicator simulating `size` MPI-style ranks inside one process via
/// threads and a shared barrier — used by tests that need to check the
/// gather/scatter/broadcast logic actually behaves the same regardless of
/// how particles are partitioned across ranks.
pub struct InProcessCommunicator {
    rank: usize,
    size: usize,
    gather_slots: Arc<Mutex<Vec<Vec<u8>>>>,
    bcast_slot: Arc<Mutex<Vec<u8>>>,
    entry_barrier: Arc<Barrier>,
    exit_barrier: Arc<Barrier>,
}

impl InProcessCommunicator {
    /// Build one handle per simulated rank. Each handle is `Send` and meant
    /// to be moved into its own thread.
    pub fn new_group(size: usize) -> Vec<Self> {
        assert!(size > 0, "a communicator group needs at least one rank");
        let gather_slots = Arc::new(Mutex::new(vec![Vec::new(); size]));
        let bcast_slot = Arc::new(Mutex::new(Vec::new()));
        let entry_barrier = Arc::new(Barrier::new(size));
        let exit_barrier = Arc::new(Barrier::new(size));
        (0..size)
            .map(|rank| Self {
                rank,
                size,
                gather_slots: gather_slots.clone(),
                bcast_slot: bcast_slot.clone(),
                entry_barrier: entry_barrier.clone(),
                exit_barrier: exit_barrier.clone(),
            })
            .collect()
    }
}

impl Communicator for InProcessCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn gather_to_root(&self, local: &[u8]) -> Option<Vec<Vec<u8>>> {
        self.gather_slots.lock()[self.rank] = local.to_vec();
        self.entry_barrier.wait();
        let result = self.is_root().then(|| self.gather_slots.lock().clone());
        self.exit_barrier.wait();
        result
    }

    fn broadcast(&self, root_data: Option<&[u8]>) -> Vec<u8> {
        if self.is_root() {
            *self.bcast_slot.lock() = root_data.expect("root must supply broadcast data").to_vec();
        }
        self.entry_barrier.wait();
        let out = self.bcast_slot.lock().clone();
        self.exit_barrier.wait();
        out
    }
}

// =============================================================================
// Tagged record (de)serialization for gather/broadcast payloads
// =============================================================================

const RECORD_LEN: usize = 8 + 12; // i64 tag + 3 x f32

fn pack_records(buf: &mut Vec<u8>, records: &[(i64, Triple)]) {
    for (tag, v) in records {
        buf.extend_from_slice(&tag.to_ne_bytes());
        buf.extend_from_slice(&v[0].to_ne_bytes());
        buf.extend_from_slice(&v[1].to_ne_bytes());
        buf.extend_from_slice(&v[2].to_ne_bytes());
    }
}

fn unpack_records(buf: &[u8]) -> Vec<(i64, Triple)> {
    buf.chunks_exact(RECORD_LEN)
        .map(|c| {
            let tag = i64::from_ne_bytes(c[0..8].try_into().unwrap());
            let x = f32::from_ne_bytes(c[8..12].try_into().unwrap());
            let y = f32::from_ne_bytes(c[12..16].try_into().unwrap());
            let z = f32::from_ne_bytes(c[16..20].try_into().unwrap());
            (tag, [x, y, z])
        })
        .collect()
}

/// Gather one enabled sub-block (coords, velocities, or forces) of tagged
/// records from every rank to rank 0: each rank packs its selected
/// particles into `(tag, ...)` records, and rank 0 later scatters each
/// incoming record into the dense output. Returns `None` on non-root ranks.
pub fn gather_block(comm: &dyn Communicator, local: &[(i64, Triple)]) -> Option<Vec<(i64, Triple)>> {
    let mut buf = Vec::with_capacity(local.len() * RECORD_LEN);
    pack_records(&mut buf, local);
    comm.gather_to_root(&buf).map(|per_rank| {
        per_rank.iter().flat_map(|b| unpack_records(b)).collect()
    })
}

/// Scatter gathered `(tag, value)` records into the dense, tag-ordered
/// output region, skipping any tags absent from `idx`.
pub fn scatter_into_dense(records: &[(i64, Triple)], idx: &TagIndex, out: &mut [Triple]) {
    for (tag, v) in records {
        if let Some(i) = idx.index_of(*tag) {
            out[i as usize] = *v;
        }
    }
}

/// Gather each rank's in-group local tags to rank 0 for tag-index
/// construction. A real MPI transport would implement this with a
/// token/ready-send dance; here it collapses to the semantic gather.
pub fn gather_tags(comm: &dyn Communicator, local_tags: &[i64]) -> Option<Vec<i64>> {
    let mut buf = Vec::with_capacity(local_tags.len() * 8);
    for t in local_tags {
        buf.extend_from_slice(&t.to_ne_bytes());
    }
    comm.gather_to_root(&buf).map(|per_rank| {
        per_rank
            .iter()
            .flat_map(|b| b.chunks_exact(8).map(|c| i64::from_ne_bytes(c.try_into().unwrap())))
            .collect()
    })
}

/// Broadcast the steering force records rank 0 just parsed out of an
/// MDCOMM message (already translated from client index to tag via
/// `rev_idmap`) to every rank. Ranks other than root pass `None`.
pub fn broadcast_force_records(
    comm: &dyn Communicator,
    root_records: Option<&[(i64, Triple)]>,
) -> Vec<(i64, Triple)> {
    let mut buf = Vec::new();
    if let Some(records) = root_records {
        pack_records(&mut buf, records);
    }
    let received = comm.broadcast(if comm.is_root() { Some(&buf) } else { None });
    unpack_records(&received)
}

/// Broadcast a single boolean flag (used for propagating `terminate` and
/// other session-wide agreement decisions to every rank).
pub fn broadcast_flag(comm: &dyn Communicator, root_value: Option<bool>) -> bool {
    let buf = [root_value.unwrap_or(false) as u8];
    let received = comm.broadcast(if comm.is_root() { Some(&buf) } else { None });
    received.first().copied().unwrap_or(0) != 0
}

/// Broadcast a single i32 (used for `trate` changes and the MDCOMM record
/// count).
pub fn broadcast_i32(comm: &dyn Communicator, root_value: Option<i32>) -> i32 {
    let buf = root_value.unwrap_or(0).to_ne_bytes();
    let received = comm.broadcast(if comm.is_root() { Some(&buf) } else { None });
    let mut arr = [0u8; 4];
    arr.copy_from_slice(&received[..4]);
    i32::from_ne_bytes(arr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn local_communicator_gather_is_identity() {
        let comm = LocalCommunicator;
        let records = vec![(3i64, [1.0, 2.0, 3.0])];
        let gathered = gather_block(&comm, &records).unwrap();
        assert_eq!(gathered, records);
    }

    #[test]
    fn gather_and_scatter_is_order_independent_of_partition() {
        // Exercised through real threads this time.
        let handles = InProcessCommunicator::new_group(3);
        let local_tags: Vec<Vec<i64>> = vec![vec![10, 3], vec![7], vec![]];

        let mut join_handles = Vec::new();
        for (comm, tags) in handles.into_iter().zip(local_tags.into_iter()) {
            join_handles.push(thread::spawn(move || gather_tags(&comm, &tags)));
        }
        let results: Vec<_> = join_handles.into_iter().map(|h| h.join().unwrap()).collect();

        // Only rank 0 (index 0) gets Some(..); others get None.
        assert!(results[1].is_none());
        assert!(results[2].is_none());
        let mut all = results[0].clone().unwrap();
        all.sort_unstable();
        assert_eq!(all, vec![3, 7, 10]);
    }

    #[test]
    fn broadcast_delivers_root_value_to_every_rank() {
        let handles = InProcessCommunicator::new_group(4);
        let records = vec![(3i64, [2.0_f32, 4.0, 6.0])];

        let mut join_handles = Vec::new();
        for comm in handles.into_iter() {
            let records = records.clone();
            join_handles.push(thread::spawn(move || {
                let root_records = if comm.is_root() { Some(records.as_slice()) } else { None };
                broadcast_force_records(&comm, root_records)
            }));
        }
        for h in join_handles {
            assert_eq!(h.join().unwrap(), records);
        }
    }

    #[test]
    fn scatter_skips_absent_tags() {
        let idx = TagIndex::build_from_sorted_tags(&[3, 7, 10]).unwrap();
        let mut out = vec![[0.0f32; 3]; 3];
        let records = vec![(7i64, [1.0, 1.0, 1.0]), (999i64, [9.0, 9.0, 9.0])];
        scatter_into_dense(&records, &idx, &mut out);
        assert_eq!(out[idx.index_of(7).unwrap() as usize], [1.0, 1.0, 1.0]);
        assert_eq!(out[idx.index_of(3).unwrap() as usize], [0.0, 0.0, 0.0]);
    }
}
