// particle.rs — host-owned particle data view. The bridge never owns
// particle storage; it only reads through this trait and writes additively
// through `add_force`.
//
// Modeled the way myq2's `sv_game::GameModule` wraps the host's game
// DLL/export table behind a small trait-like surface instead of reaching
// into host memory directly (`crates/myq2-server/src/sv_game.rs`).

/// The periodic simulation cell a rank's particles live in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Domain {
    pub xprd: f64,
    pub yprd: f64,
    pub zprd: f64,
    pub xy: f64,
    pub xz: f64,
    pub yz: f64,
}

impl Domain {
    pub fn orthogonal(xprd: f64, yprd: f64, zprd: f64) -> Self {
        Self { xprd, yprd, zprd, xy: 0.0, xz: 0.0, yz: 0.0 }
    }

    pub fn is_triclinic(&self) -> bool {
        self.xy != 0.0 || self.xz != 0.0 || self.yz != 0.0
    }

    /// Unwrap a position using its image flags. Image flags are packed
    /// `(ix, iy, iz)`; the triclinic form includes tilt cross terms, the
    /// orthogonal form drops them.
    pub fn unwrap(&self, x: [f64; 3], image: [i32; 3]) -> [f64; 3] {
        let (ix, iy, iz) = (image[0] as f64, image[1] as f64, image[2] as f64);
        if self.is_triclinic() {
            [
                x[0] + ix * self.xprd + iy * self.xy + iz * self.xz,
                x[1] + iy * self.yprd + iz * self.yz,
                x[2] + iz * self.zprd,
            ]
        } else {
            [
                x[0] + ix * self.xprd,
                x[1] + iy * self.yprd,
                x[2] + iz * self.zprd,
            ]
        }
    }
}

/// Read/write access to one rank's local particle subset, provided by the
/// host.
///
/// Indices here are *local* indices into the host's own arrays, not the
/// bridge's dense tag-ordered indices — those only exist in assembled
/// frames and `TagIndex`.
pub trait ParticleView {
    /// Number of locally owned particles (may include particles outside
    /// the reporting group).
    fn num_local(&self) -> usize;

    /// Stable global tag of local particle `i`.
    fn tag(&self, i: usize) -> i64;

    /// Whether local particle `i` passes the group/mask selection test
    /// that decides which particles get reported and steered.
    fn in_group(&self, i: usize) -> bool;

    fn position(&self, i: usize) -> [f64; 3];
    fn velocity(&self, i: usize) -> [f64; 3];
    fn force(&self, i: usize) -> [f64; 3];
    fn image(&self, i: usize) -> [i32; 3];

    /// The periodic cell for this rank (identical across ranks in practice,
    /// but read per-call so hosts with per-rank domain decomposition state
    /// don't need a global singleton).
    fn domain(&self) -> Domain;

    /// Additively apply a steering force to local particle `i`'s force
    /// accumulator: adds `fscale*(fx,fy,fz)` to its force triple.
    fn add_force(&mut self, i: usize, df: [f64; 3]);

    /// Find the local index owning `tag`, if this rank owns it and it is
    /// in-group. Implementations may keep a local tag->index cache; the
    /// default here performs a linear scan over local particles (callers
    /// needing better asymptotics may override).
    fn find_local_by_tag(&self, tag: i64) -> Option<usize> {
        (0..self.num_local()).find(|&i| self.in_group(i) && self.tag(i) == tag)
    }
}
