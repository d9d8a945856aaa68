// steering.rs — the steering force applier.
//
// Once rank 0 has parsed an MDCOMM message into tagged force records and
// broadcast them to every rank (`collective::broadcast_force_records`),
// each rank applies its share by scanning its own local particles. The
// resulting O(imd_forces * nlocal) double loop is the documented baseline;
// `ParticleView::find_local_by_tag` is the seam a host can override with a
// cheaper local tag index if its particle count makes the linear scan a
// bottleneck.

use imd_wire::Triple;

use crate::particle::ParticleView;

/// Apply `fscale * (fx, fy, fz)` additively to every local, in-group
/// particle whose tag appears in `records`. Records
/// whose tag this rank doesn't own are silently skipped — ownership is
/// disjoint across ranks, so exactly one rank (or none, if the tag isn't
/// in the reporting group at all) will match each record.
pub fn apply_forces(view: &mut impl ParticleView, records: &[(i64, Triple)], fscale: f64) {
    for &(tag, force) in records {
        if let Some(i) = view.find_local_by_tag(tag) {
            let df = [force[0] as f64 * fscale, force[1] as f64 * fscale, force[2] as f64 * fscale];
            view.add_force(i, df);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::Domain;

    struct FakeParticles {
        tags: Vec<i64>,
        in_group: Vec<bool>,
        forces: Vec<[f64; 3]>,
    }

    impl ParticleView for FakeParticles {
        fn num_local(&self) -> usize {
            self.tags.len()
        }
        fn tag(&self, i: usize) -> i64 {
            self.tags[i]
        }
        fn in_group(&self, i: usize) -> bool {
            self.in_group[i]
        }
        fn position(&self, _i: usize) -> [f64; 3] {
            [0.0; 3]
        }
        fn velocity(&self, _i: usize) -> [f64; 3] {
            [0.0; 3]
        }
        fn force(&self, i: usize) -> [f64; 3] {
            self.forces[i]
        }
        fn image(&self, _i: usize) -> [i32; 3] {
            [0; 3]
        }
        fn domain(&self) -> Domain {
            Domain::orthogonal(10.0, 10.0, 10.0)
        }
        fn add_force(&mut self, i: usize, df: [f64; 3]) {
            self.forces[i][0] += df[0];
            self.forces[i][1] += df[1];
            self.forces[i][2] += df[2];
        }
    }

    #[test]
    fn matched_in_group_particle_receives_scaled_force() {
        let mut particles = FakeParticles {
            tags: vec![3, 7],
            in_group: vec![true, true],
            forces: vec![[0.0; 3], [0.0; 3]],
        };
        apply_forces(&mut particles, &[(7, [1.0, 2.0, 3.0])], 2.0);
        assert_eq!(particles.forces[1], [2.0, 4.0, 6.0]);
        assert_eq!(particles.forces[0], [0.0, 0.0, 0.0]);
    }

    #[test]
    fn out_of_group_particle_is_never_touched() {
        let mut particles = FakeParticles {
            tags: vec![7],
            in_group: vec![false],
            forces: vec![[0.0; 3]],
        };
        apply_forces(&mut particles, &[(7, [1.0, 1.0, 1.0])], 1.0);
        assert_eq!(particles.forces[0], [0.0, 0.0, 0.0]);
    }

    #[test]
    fn unmatched_tag_on_this_rank_is_a_no_op() {
        let mut particles = FakeParticles {
            tags: vec![3],
            in_group: vec![true],
            forces: vec![[0.0; 3]],
        };
        apply_forces(&mut particles, &[(999, [5.0, 5.0, 5.0])], 1.0);
        assert_eq!(particles.forces[0], [0.0, 0.0, 0.0]);
    }
}
