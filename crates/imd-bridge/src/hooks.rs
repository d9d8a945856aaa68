// hooks.rs — host-integrator hook glue.
//
// Ties the wire, collective, session, frame, steering, and async-I/O
// layers together behind the handful of entry points a host MD loop
// actually calls: `setup` once, then `post_force`/`end_of_step` (and the
// RESPA-gated variant) once per step. v2 sessions do everything —
// accept/handshake, steering, emission — inside `post_force`, since v2
// only has the one hook point; v3 sessions split emission into
// `end_of_step` so coordinates reflect the fully-integrated step rather
// than the pre-integration force state.
//
// Every method that touches the collective communicator is called by
// every rank on every step, symmetrically, even when only rank 0 has
// actual work to do — that's what keeps `Communicator::gather_to_root`
// and `::broadcast` from deadlocking a non-root rank waiting at a barrier
// nobody else reached.

use std::time::Duration;

use imd_wire::{
    codec, sort_tags, ClientEndpoint, ListenEndpoint, MessageType, ProtocolVersion, TagIndex,
    Triple, HEADER_SIZE,
};

use crate::asyncio::AsyncWriter;
use crate::collective::{self, Communicator};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::frame::{self, StepInfo};
use crate::particle::ParticleView;
use crate::session::{Session, SessionState};
use crate::steering;

/// The assembled bridge: one instance per rank, sharing a `Communicator`
/// of the same concrete type across the process group.
pub struct Bridge<C: Communicator> {
    config: BridgeConfig,
    comm: C,
    session: Session,
    idx: Option<TagIndex>,
    listener: Option<ListenEndpoint>,
    client: Option<ClientEndpoint>,
    writer: Option<AsyncWriter>,
    /// The steering force buffer: replaced wholesale on each `MDCOMM`
    /// message, reapplied on every `post_force` until the next `MDCOMM`
    /// replaces it or a disconnect clears it. Only ever populated on root —
    /// every other rank's copy stays empty and is ignored.
    recv_force_buf: Vec<(i64, Triple)>,
}

impl<C: Communicator> Bridge<C> {
    /// Bind the listen socket (root only) and build the session state
    /// machine. Does not block and does not touch particle data yet —
    /// call [`Bridge::setup`] once the host's particle group membership is
    /// finalized.
    pub fn new(config: BridgeConfig, comm: C) -> BridgeResult<Self> {
        let listener = if comm.is_root() {
            Some(ListenEndpoint::bind(config.port).map_err(BridgeError::Bind)?)
        } else {
            None
        };
        let session = Session::new(config.version, config.trate, config.nowait);
        Ok(Self {
            config,
            comm,
            session,
            idx: None,
            listener,
            client: None,
            writer: None,
            recv_force_buf: Vec::new(),
        })
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    /// The listener's actual bound port, e.g. to discover an OS-assigned
    /// port after binding to `0`. `None` on non-root ranks.
    pub fn local_port(&self) -> Option<u16> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok()).map(|a| a.port())
    }

    /// Build the canonical tag index once, gathering every rank's in-group
    /// tags to rank 0.
    pub fn setup(&mut self, view: &impl ParticleView) -> BridgeResult<()> {
        let local_tags: Vec<i64> = (0..view.num_local())
            .filter(|&i| view.in_group(i))
            .map(|i| view.tag(i))
            .collect();
        if let Some(mut gathered) = collective::gather_tags(&self.comm, &local_tags) {
            sort_tags(&mut gathered);
            let idx = TagIndex::build_from_sorted_tags(&gathered).map_err(|_| {
                BridgeError::Argument("duplicate particle tag in IMD reporting group".into())
            })?;
            self.idx = Some(idx);
        }
        Ok(())
    }

    /// v2: accept/handshake, drain+apply steering, then emit if due.
    /// v3: accept/handshake and drain+apply steering only; emission is
    /// driven separately by [`Bridge::end_of_step`].
    pub fn post_force(&mut self, view: &mut impl ParticleView, step_info: StepInfo) -> BridgeResult<()> {
        self.service_listen()?;
        self.drive_steering(&mut *view)?;
        if self.session.version() == ProtocolVersion::V2 {
            self.drive_emission(&*view, step_info)?;
        }
        Ok(())
    }

    /// v3's emission point, run after the integrator has finished the
    /// step. A no-op under v2 (whose emission already happened in
    /// `post_force`).
    pub fn end_of_step(&mut self, view: &impl ParticleView, step_info: StepInfo) -> BridgeResult<()> {
        if self.session.version() == ProtocolVersion::V3 {
            self.drive_emission(view, step_info)?;
        }
        Ok(())
    }

    /// RESPA outer-loop gate: only the outermost level (`ilevel + 1 ==
    /// nlevels`) runs the bridge; inner levels are skipped so steering
    /// forces aren't applied multiple times per outer step.
    pub fn post_force_respa(
        &mut self,
        view: &mut impl ParticleView,
        step_info: StepInfo,
        ilevel: usize,
        nlevels: usize,
    ) -> BridgeResult<()> {
        if ilevel + 1 == nlevels {
            self.post_force(view, step_info)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // internals
    // -------------------------------------------------------------------

    fn service_listen(&mut self) -> BridgeResult<()> {
        if !self.comm.is_root() {
            return Ok(());
        }
        if !matches!(self.session.state(), SessionState::Listening | SessionState::Inactive) {
            return Ok(());
        }

        let listener = self.listener.as_ref().expect("root always owns a listener");
        let accepted = if self.config.nowait {
            self.session.poll_accept(listener, self.config.port)?
        } else {
            self.session.blocking_accept_attempt(listener, self.config.port)?
        };

        let Some(mut client) = accepted else { return Ok(()) };
        match self.session.handshake(&mut client, self.config.session_flags()) {
            Ok(()) => {
                let write_half = client.try_clone().map_err(BridgeError::Stream)?;
                self.writer = Some(AsyncWriter::spawn(write_half));
                self.client = Some(client);
            }
            Err(BridgeError::Killed) => return Err(BridgeError::Killed),
            Err(e) => log::warn!("IMD handshake failed, dropping connection attempt: {}", e),
        }
        Ok(())
    }

    /// Drain every message currently buffered on the client socket without
    /// blocking. An MDCOMM message replaces `recv_force_buf` wholesale; a
    /// DISCONNECT clears it. On error (stream fault or KILL) the client is
    /// torn down and the session state updated before propagating.
    fn drain_incoming(&mut self) -> BridgeResult<()> {
        let result = self.drain_incoming_inner();
        if let Err(ref e) = result {
            if !matches!(e, BridgeError::Killed) {
                self.session.on_disconnect();
                self.recv_force_buf.clear();
            }
            self.drop_client();
        }
        result
    }

    fn drain_incoming_inner(&mut self) -> BridgeResult<()> {
        let idx_snapshot = self.idx.clone();
        let Some(client) = self.client.as_mut() else { return Ok(()) };

        loop {
            if !client.selread(Duration::ZERO)? {
                break;
            }
            let mut header_buf = [0u8; HEADER_SIZE];
            client.read_exact(&mut header_buf)?;
            let header = codec::read_header(&header_buf)?;

            match MessageType::from_i32(header.msg_type) {
                Some(MessageType::MdComm) => {
                    let count = header.length.max(0) as usize;
                    let mut payload = vec![0u8; codec::mdcomm_payload_len(count)];
                    client.read_exact(&mut payload)?;
                    let decoded = codec::decode_mdcomm(&payload, count)?;
                    let mut replacement = Vec::new();
                    if let Some(idx) = &idx_snapshot {
                        for r in decoded {
                            if let Some(tag) = idx.tag_of(r.index) {
                                replacement.push((tag, [r.fx, r.fy, r.fz]));
                            }
                        }
                    }
                    // Replace wholesale: an MDCOMM describes the full active
                    // force set, not a delta on top of the previous one.
                    self.recv_force_buf = replacement;
                }
                Some(MessageType::Pause) => {
                    self.session.on_pause();
                }
                Some(MessageType::Resume) => {
                    self.session.on_resume();
                }
                Some(MessageType::Trate) => {
                    // A non-positive length is dropped rather than coerced
                    // to 1; `on_trate` enforces this too.
                    if header.length >= 1 {
                        self.session.on_trate(header.length);
                    }
                }
                Some(MessageType::Disconnect) => {
                    self.session.on_disconnect();
                    self.recv_force_buf.clear();
                    self.drop_client();
                    break;
                }
                Some(MessageType::Kill) => {
                    self.session.on_kill();
                    self.drop_client();
                    return Err(BridgeError::Killed);
                }
                other => {
                    log::warn!("IMD: ignoring message with unexpected type {:?}", other);
                }
            }
        }
        Ok(())
    }

    fn drop_client(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.shutdown();
        }
        if let Some(client) = self.client.take() {
            client.destroy();
        }
    }

    /// The steering half shared by `post_force` under both protocol
    /// versions: collectively agree whether a session is active, drain any
    /// pending MDCOMM into `recv_force_buf`, then broadcast and apply
    /// whatever that buffer currently holds. The buffer is reapplied every
    /// step it's active, not just the step it arrived on — it persists
    /// until the next MDCOMM replaces it or a disconnect clears it.
    fn drive_steering(&mut self, view: &mut impl ParticleView) -> BridgeResult<()> {
        let locally_active = self.comm.is_root() && self.session.is_active();
        let active = collective::broadcast_flag(&self.comm, self.comm.is_root().then_some(locally_active));
        if !active {
            return Ok(());
        }

        let drain_err = if self.comm.is_root() { self.drain_incoming().err() } else { None };

        let local_count = self.recv_force_buf.len() as i32;
        let count = collective::broadcast_i32(&self.comm, self.comm.is_root().then_some(local_count));
        let broadcasted = if count > 0 {
            collective::broadcast_force_records(
                &self.comm,
                self.comm.is_root().then_some(self.recv_force_buf.as_slice()),
            )
        } else {
            Vec::new()
        };
        steering::apply_forces(view, &broadcasted, self.config.fscale);

        let killed_locally = matches!(drain_err, Some(BridgeError::Killed));
        let killed = collective::broadcast_flag(&self.comm, self.comm.is_root().then_some(killed_locally));
        if killed {
            return Err(BridgeError::Killed);
        }
        if let Some(e) = drain_err {
            log::warn!("IMD: client connection dropped: {}", e);
        }
        Ok(())
    }

    /// Collectively agree whether this step is an emission boundary, then
    /// gather the enabled sub-blocks, assemble a frame on rank 0, and hand
    /// it to the async writer.
    fn drive_emission(&mut self, view: &impl ParticleView, step_info: StepInfo) -> BridgeResult<()> {
        let locally_due = self.comm.is_root() && self.session.should_emit(step_info.step);
        let due = collective::broadcast_flag(&self.comm, self.comm.is_root().then_some(locally_due));
        if !due {
            return Ok(());
        }

        let gathered_coords = if self.config.toggles.coordinates {
            let local_coords = frame::collect_local_coords(view, self.config.unwrap);
            collective::gather_block(&self.comm, &local_coords)
        } else {
            None
        };

        let gathered_velocities = if self.config.toggles.velocities {
            let local = frame::collect_local_velocities(view);
            collective::gather_block(&self.comm, &local)
        } else {
            None
        };

        let gathered_forces = if self.config.toggles.forces {
            let local = frame::collect_local_forces(view);
            collective::gather_block(&self.comm, &local)
        } else {
            None
        };

        if !self.comm.is_root() {
            return Ok(());
        }

        let idx = self.idx.as_ref().expect("tag index must be built by Bridge::setup before emission");
        let mut coords = vec![[0.0f32; 3]; idx.len()];
        collective::scatter_into_dense(&gathered_coords.unwrap_or_default(), idx, &mut coords);

        let mut velocities = vec![[0.0f32; 3]; idx.len()];
        if let Some(g) = gathered_velocities {
            collective::scatter_into_dense(&g, idx, &mut velocities);
        }

        let mut forces = vec![[0.0f32; 3]; idx.len()];
        if let Some(g) = gathered_forces {
            collective::scatter_into_dense(&g, idx, &mut forces);
        }

        let mut buf = Vec::with_capacity(frame::worst_case_frame_size(idx.len()));
        frame::assemble(
            &mut buf,
            self.config.toggles,
            idx,
            step_info,
            view.domain(),
            &coords,
            &velocities,
            &forces,
        );

        if let Some(writer) = &self.writer {
            writer.try_send(buf);
        }
        Ok(())
    }
}
