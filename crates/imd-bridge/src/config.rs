// config.rs — host-script option surface and its validation.
//
// The original reads these off the fix's argument vector and range-checks
// them inline at parse time; this is the same validate-up-front shape
// myq2-common::cvar's `get_or_create`/`full_set` use for console variables,
// expressed as a builder that can only produce a [`BridgeConfig`] once every
// constraint holds — violations produce a fatal error before the run begins.

use imd_wire::ProtocolVersion;

use crate::error::BridgeError;

pub const MIN_PORT: u16 = 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionToggles {
    pub time: bool,
    pub box_: bool,
    pub coordinates: bool,
    pub velocities: bool,
    pub forces: bool,
}

impl Default for SessionToggles {
    fn default() -> Self {
        // v3 ships with every sub-block on by default.
        Self { time: true, box_: true, coordinates: true, velocities: true, forces: true }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub instance_id: String,
    pub group_id: String,
    pub port: u16,
    pub unwrap: bool,
    pub nowait: bool,
    pub fscale: f64,
    pub trate: u32,
    pub version: ProtocolVersion,
    pub toggles: SessionToggles,
}

impl BridgeConfig {
    /// The `SESSIONINFO` block sent to a v3 client during handshake, echoing
    /// the negotiated sub-block toggles. Energies are never produced by this
    /// host (see the module-level Non-goal), so that flag is always off.
    pub fn session_flags(&self) -> imd_wire::SessionFlags {
        imd_wire::SessionFlags {
            time: self.toggles.time,
            box_: self.toggles.box_,
            coords: self.toggles.coordinates,
            wrap: !self.unwrap,
            velocities: self.toggles.velocities,
            forces: self.toggles.forces,
            energies: false,
        }
    }
}

/// Builder mirroring the host's option table; every field has a documented
/// default, `build()` enforces the documented constraints.
pub struct BridgeConfigBuilder {
    instance_id: String,
    group_id: String,
    port: u32,
    unwrap: bool,
    nowait: bool,
    fscale: f64,
    trate: i64,
    version: i32,
    toggles: SessionToggles,
    group_size: u64,
}

impl BridgeConfigBuilder {
    pub fn new(instance_id: impl Into<String>, group_id: impl Into<String>, port: u32) -> Self {
        Self {
            instance_id: instance_id.into(),
            group_id: group_id.into(),
            port,
            unwrap: false,
            nowait: false,
            fscale: 1.0,
            trate: 1,
            version: 2,
            toggles: SessionToggles::default(),
            group_size: 0,
        }
    }

    pub fn unwrap(mut self, v: bool) -> Self {
        self.unwrap = v;
        self
    }

    pub fn nowait(mut self, v: bool) -> Self {
        self.nowait = v;
        self
    }

    pub fn fscale(mut self, v: f64) -> Self {
        self.fscale = v;
        self
    }

    pub fn trate(mut self, v: i64) -> Self {
        self.trate = v;
        self
    }

    pub fn version(mut self, v: i32) -> Self {
        self.version = v;
        self
    }

    pub fn toggles(mut self, t: SessionToggles) -> Self {
        self.toggles = t;
        self
    }

    /// Total particle-group size across all ranks, checked against
    /// `INT32_MAX`.
    pub fn group_size(mut self, n: u64) -> Self {
        self.group_size = n;
        self
    }

    pub fn build(self) -> Result<BridgeConfig, BridgeError> {
        // Port 0 means "let the OS assign one" (used by tests and by hosts
        // that want to discover the bound port via `Bridge::local_port`);
        // any other value must satisfy the documented lower bound.
        if self.port != 0 && (self.port < MIN_PORT as u32 || self.port > u16::MAX as u32) {
            return Err(BridgeError::Argument(format!(
                "port must be in [{}, {}], got {}",
                MIN_PORT,
                u16::MAX,
                self.port
            )));
        }
        if self.trate < 1 {
            return Err(BridgeError::Argument(format!(
                "trate must be >= 1, got {}",
                self.trate
            )));
        }
        let version = ProtocolVersion::from_i32(self.version).ok_or_else(|| {
            BridgeError::Argument(format!("version must be 2 or 3, got {}", self.version))
        })?;
        if self.group_size > i32::MAX as u64 {
            return Err(BridgeError::Argument(format!(
                "group size {} exceeds INT32_MAX",
                self.group_size
            )));
        }

        // v2 has no SESSIONINFO negotiation: it only ever understands
        // FCOORDS, so any caller-supplied toggles are overridden rather
        // than silently sending blocks a v2 viewer can't parse.
        let toggles = match version {
            ProtocolVersion::V2 => SessionToggles {
                time: false,
                box_: false,
                coordinates: true,
                velocities: false,
                forces: false,
            },
            ProtocolVersion::V3 => self.toggles,
        };

        Ok(BridgeConfig {
            instance_id: self.instance_id,
            group_id: self.group_id,
            port: self.port as u16,
            unwrap: self.unwrap,
            nowait: self.nowait,
            fscale: self.fscale,
            trate: self.trate as u32,
            version,
            toggles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_port_below_1024() {
        let err = BridgeConfigBuilder::new("imd1", "imdgroup", 80).build().unwrap_err();
        assert!(matches!(err, BridgeError::Argument(_)));
    }

    #[test]
    fn rejects_trate_below_1() {
        let err = BridgeConfigBuilder::new("imd1", "imdgroup", 8888)
            .trate(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, BridgeError::Argument(_)));
    }

    #[test]
    fn rejects_bad_version() {
        let err = BridgeConfigBuilder::new("imd1", "imdgroup", 8888)
            .version(4)
            .build()
            .unwrap_err();
        assert!(matches!(err, BridgeError::Argument(_)));
    }

    #[test]
    fn rejects_oversized_group() {
        let err = BridgeConfigBuilder::new("imd1", "imdgroup", 8888)
            .group_size(i32::MAX as u64 + 1)
            .build()
            .unwrap_err();
        assert!(matches!(err, BridgeError::Argument(_)));
    }

    #[test]
    fn accepts_valid_defaults() {
        let cfg = BridgeConfigBuilder::new("imd1", "imdgroup", 8888).build().unwrap();
        assert_eq!(cfg.port, 8888);
        assert_eq!(cfg.trate, 1);
        assert_eq!(cfg.version, ProtocolVersion::V2);
        assert_eq!(cfg.fscale, 1.0);
    }
}
