// asyncio.rs — the background async I/O worker.
//
// One writer thread owns the client socket's write half and drains a
// capacity-1 handoff queue. The simulation-stepping thread never blocks on
// the network: it hands a freshly assembled frame to `try_send`, which
// drops the frame instead of queuing it if the writer hasn't drained the
// previous one yet — the producer never blocks past a full slot; a slow
// client costs dropped frames, never a stall. Mirrors myq2's
// `net_queue.rs` producer/consumer packet handoff
// (`crates/myq2-sys/src/net_queue.rs`), built here on `crossbeam::channel`
// instead of a hand-rolled ring buffer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, TrySendError};

use imd_wire::ClientEndpoint;

/// How long the writer waits for the socket to become writable before
/// giving up on one frame.
const WRITE_READY_TIMEOUT: Duration = Duration::from_millis(200);

/// How often the writer thread wakes up to check the shutdown flag when
/// no frame is pending.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct AsyncWriter {
    sender: channel::Sender<Vec<u8>>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AsyncWriter {
    /// Spawn the writer thread, taking ownership of the client's write
    /// half. `client` must already be the caller's only handle to this
    /// socket (use `ClientEndpoint::try_clone` beforehand if the read side
    /// is still needed elsewhere).
    pub fn spawn(mut client: ClientEndpoint) -> Self {
        let (sender, receiver) = channel::bounded::<Vec<u8>>(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_for_thread = shutdown.clone();

        let handle = thread::spawn(move || {
            while !shutdown_for_thread.load(Ordering::Acquire) {
                match receiver.recv_timeout(IDLE_POLL_INTERVAL) {
                    Ok(frame) => match client.selwrite(WRITE_READY_TIMEOUT) {
                        Ok(true) => {
                            if let Err(e) = client.write_all(&frame) {
                                log::warn!("IMD async writer: send failed, dropping client: {}", e);
                                break;
                            }
                        }
                        Ok(false) => {
                            log::debug!("IMD async writer: client not write-ready, dropping frame");
                        }
                        Err(e) => {
                            log::warn!("IMD async writer: selwrite error: {}", e);
                            break;
                        }
                    },
                    Err(channel::RecvTimeoutError::Timeout) => continue,
                    Err(channel::RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        Self { sender, shutdown, handle: Some(handle) }
    }

    /// Hand a frame to the writer thread. Returns `false` if the single
    /// slot was still occupied by an undrained frame — the new frame was
    /// dropped, not queued.
    pub fn try_send(&self, frame: Vec<u8>) -> bool {
        match self.sender.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::debug!("IMD async writer: previous frame still in flight, dropping");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Signal the writer thread to stop and wait for it to exit.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for AsyncWriter {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::bounded;
    use imd_wire::ListenEndpoint;
    use std::io::Read;
    use std::net::TcpStream as StdTcpStream;
    use std::time::Instant;

    #[test]
    fn full_slot_drops_rather_than_queues() {
        // Exercises the channel primitive directly: a bounded(1) channel
        // rejects a second send while the first is unread.
        let (tx, _rx) = bounded::<Vec<u8>>(1);
        assert!(tx.try_send(vec![1]).is_ok());
        match tx.try_send(vec![2]) {
            Err(TrySendError::Full(_)) => {}
            other => panic!("expected Full, got {:?}", other),
        }
    }

    #[test]
    fn writer_thread_delivers_frame_to_client() {
        let listener = ListenEndpoint::bind(0).unwrap();
        let port = listener.local_addr().unwrap().port();

        let client_thread = thread::spawn(move || {
            let mut s = StdTcpStream::connect(("127.0.0.1", port)).unwrap();
            let mut buf = [0u8; 4];
            s.read_exact(&mut buf).unwrap();
            buf
        });

        let server_side = {
            let deadline = Instant::now() + Duration::from_secs(2);
            loop {
                if let Some(c) = listener.try_accept().unwrap() {
                    break c;
                }
                assert!(Instant::now() < deadline, "client never connected");
                thread::sleep(Duration::from_millis(5));
            }
        };

        let writer = AsyncWriter::spawn(server_side);
        assert!(writer.try_send(vec![9, 9, 9, 9]));

        let received = client_thread.join().unwrap();
        assert_eq!(received, [9, 9, 9, 9]);
        writer.shutdown();
    }
}
