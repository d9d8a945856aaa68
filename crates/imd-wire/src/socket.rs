// socket.rs — stream socket endpoint.
//
// Converted in spirit from myq2-sys::net_tcp's TCP_OpenSocket (socket2,
// non-blocking, TCP_NODELAY) and net_io_thread's poll-with-timeout loop,
// generalized into a listen/accept/read/write/selread/selwrite surface.
// Unlike myq2's listener, this endpoint serves exactly one client
// connection at a time — no fan-out to multiple simultaneous viewers.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::Once;
use std::time::{Duration, Instant};

use socket2::{Domain, Socket, Type};

use crate::error::{WireError, WireResult};

static PLATFORM_INIT: Once = Once::new();

/// NET_Init() equivalent: a lazily-initialized, process-wide one-time setup
/// hook. On this platform there is nothing to do (no WinSock-style startup
/// call), but the hook is kept so callers follow the same setup/teardown
/// shape as a platform that does need one.
pub fn platform_init() {
    PLATFORM_INIT.call_once(|| {
        log::debug!("imd-wire: platform socket layer initialized");
    });
}

/// A listening endpoint bound to one TCP port.
pub struct ListenEndpoint {
    listener: TcpListener,
}

impl ListenEndpoint {
    /// `create` + `bind` + `listen` collapsed into one call: callers only
    /// ever open this once, at setup. Built through `socket2::Socket` so
    /// `SO_REUSEADDR` can be set before binding, matching how myq2's
    /// `TCP_OpenSocket` configures a listener before handing it to `std`.
    pub fn bind(port: u16) -> WireResult<Self> {
        platform_init();
        let socket = Socket::new(Domain::IPV4, Type::STREAM, None).map_err(WireError::Io)?;
        socket.set_reuse_address(true).map_err(WireError::Io)?;
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        socket.bind(&addr.into()).map_err(WireError::Io)?;
        socket.listen(128).map_err(WireError::Io)?;
        socket.set_nonblocking(true).map_err(WireError::Io)?;
        let listener: TcpListener = socket.into();
        Ok(Self { listener })
    }

    /// Non-blocking accept attempt. Returns `Ok(None)` if no connection is
    /// pending yet (used by `nowait` polling while listening).
    pub fn try_accept(&self) -> WireResult<Option<ClientEndpoint>> {
        match self.listener.accept() {
            Ok((stream, addr)) => Ok(Some(ClientEndpoint::from_stream(stream, addr)?)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(WireError::Readiness(e)),
        }
    }

    /// Block (with a `timeout` ceiling) until a connection is ready, or
    /// return `Ok(None)` if the timeout elapses without one. The
    /// blocking-accept path retries in 60-second windows by calling this
    /// repeatedly; this call itself never blocks longer than `timeout`.
    pub fn accept_with_timeout(&self, timeout: Duration) -> WireResult<Option<ClientEndpoint>> {
        if self.selread(timeout)? {
            self.try_accept()
        } else {
            Ok(None)
        }
    }

    /// `selread(seconds)`: is a connection pending within `timeout`?
    /// `Duration::ZERO` means poll-only, no blocking.
    pub fn selread(&self, timeout: Duration) -> WireResult<bool> {
        poll_fd(self.listener.as_raw_fd(), PollFor::Read, timeout)
    }

    /// The bound local address, e.g. to discover the actual port after
    /// binding to `0` in tests.
    pub fn local_addr(&self) -> WireResult<SocketAddr> {
        self.listener.local_addr().map_err(WireError::Io)
    }

    pub fn destroy(self) {
        let _ = self.listener.set_nonblocking(false);
    }
}

/// A connected endpoint: exactly the one client socket the bridge serves.
pub struct ClientEndpoint {
    stream: TcpStream,
    pub peer: SocketAddr,
}

impl ClientEndpoint {
    fn from_stream(stream: TcpStream, peer: SocketAddr) -> WireResult<Self> {
        stream.set_nonblocking(true).map_err(WireError::Io)?;
        stream.set_nodelay(true).map_err(WireError::Io)?;
        Ok(Self { stream, peer })
    }

    /// Read exactly `buf.len()` bytes, looping past `EINTR`/`WouldBlock`
    /// until satisfied, the stream hits EOF, or a non-EINTR error occurs.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> WireResult<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.stream.read(&mut buf[filled..]) {
                Ok(0) => return Err(WireError::Io(io::Error::new(ErrorKind::UnexpectedEof, "peer closed"))),
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    // Non-blocking socket: caller is expected to have gated
                    // this with selread first, but guard against a busy
                    // spin by yielding briefly.
                    std::thread::yield_now();
                }
                Err(e) => return Err(WireError::Io(e)),
            }
        }
        Ok(())
    }

    /// Write the whole buffer, looping past `EINTR`/`WouldBlock`.
    pub fn write_all(&mut self, buf: &[u8]) -> WireResult<()> {
        let mut sent = 0;
        while sent < buf.len() {
            match self.stream.write(&buf[sent..]) {
                Ok(0) => return Err(WireError::Io(io::Error::new(ErrorKind::WriteZero, "zero-length write"))),
                Ok(n) => sent += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => std::thread::yield_now(),
                Err(e) => return Err(WireError::Io(e)),
            }
        }
        Ok(())
    }

    /// `selread(seconds)`: is at least one byte available within `timeout`?
    pub fn selread(&self, timeout: Duration) -> WireResult<bool> {
        poll_fd(self.stream.as_raw_fd(), PollFor::Read, timeout)
    }

    /// `selwrite(seconds)`: can we write without blocking within `timeout`?
    /// Used by the async writer to gate the send and drop the frame,
    /// rather than queue it, when the client is slow.
    pub fn selwrite(&self, timeout: Duration) -> WireResult<bool> {
        poll_fd(self.stream.as_raw_fd(), PollFor::Write, timeout)
    }

    pub fn shutdown(&self) -> WireResult<()> {
        self.stream.shutdown(std::net::Shutdown::Both).or_else(|e| {
            // Already-disconnected sockets report NotConnected; that's fine.
            if e.kind() == ErrorKind::NotConnected {
                Ok(())
            } else {
                Err(e)
            }
        }).map_err(WireError::Io)
    }

    pub fn destroy(self) {
        let _ = self.shutdown();
    }

    pub fn try_clone(&self) -> WireResult<Self> {
        Ok(Self {
            stream: self.stream.try_clone().map_err(WireError::Io)?,
            peer: self.peer,
        })
    }
}

enum PollFor {
    Read,
    Write,
}

/// `libc::poll` wrapper shared by `selread`/`selwrite`. A zero timeout
/// polls once without blocking.
fn poll_fd(fd: std::os::unix::io::RawFd, which: PollFor, timeout: Duration) -> WireResult<bool> {
    let events = match which {
        PollFor::Read => libc::POLLIN,
        PollFor::Write => libc::POLLOUT,
    };
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    let mut remaining = timeout;
    let started = Instant::now();
    loop {
        let millis = i32::try_from(remaining.as_millis()).unwrap_or(i32::MAX);
        let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                let elapsed = started.elapsed();
                if elapsed >= timeout {
                    return Ok(false);
                }
                remaining = timeout - elapsed;
                continue;
            }
            return Err(WireError::Readiness(err));
        }
        return Ok(rc > 0 && (pfd.revents & events) != 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::net::TcpStream as StdTcpStream;

    #[test]
    fn listen_accept_and_echo_roundtrip() {
        let _ = env_logger::try_init();
        let listener = ListenEndpoint::bind(0).unwrap();
        let port = listener.listener.local_addr().unwrap().port();

        let client_thread = std::thread::spawn(move || {
            let mut s = StdTcpStream::connect(("127.0.0.1", port)).unwrap();
            s.write_all(b"hello").unwrap();
        });

        let mut server_side = None;
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Some(c) = listener.try_accept().unwrap() {
                server_side = Some(c);
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let mut server_side = server_side.expect("client connected");
        let mut buf = [0u8; 5];
        server_side.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        client_thread.join().unwrap();
    }

    #[test]
    fn selread_times_out_with_no_data() {
        let listener = ListenEndpoint::bind(0).unwrap();
        let port = listener.listener.local_addr().unwrap().port();
        let _client = StdTcpStream::connect(("127.0.0.1", port)).unwrap();
        let server_side = loop {
            if let Some(c) = listener.try_accept().unwrap() {
                break c;
            }
        };
        assert!(!server_side.selread(Duration::from_millis(20)).unwrap());
    }
}
