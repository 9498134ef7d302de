//! LAN transport over std sockets, configured through socket2.

use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};

use super::{CancelToken, Connection, StationError, Transport, CANCEL_POLL};

/// Largest datagram expected in answer to a SEARCH broadcast.
const DISCOVERY_BUFFER: usize = 1024;

/// Pending connections the listener queues.
const LISTEN_BACKLOG: i32 = 5;

/// Map an I/O error to a timeout or a transport failure.
fn io_error(action: &'static str, timeout: Duration) -> impl Fn(std::io::Error) -> StationError {
    move |e| match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => StationError::Timeout(timeout),
        _ => StationError::Transport(format!("failed to {}: {}", action, e)),
    }
}

fn setup_error(action: &'static str) -> impl Fn(std::io::Error) -> StationError {
    move |e| StationError::Transport(format!("failed to {}: {}", action, e))
}

/// Sockets never accept a zero timeout.
fn socket_timeout(timeout: Duration) -> Option<Duration> {
    Some(timeout.max(Duration::from_millis(1)))
}

/// Run a blocking read in slices of at most [`CANCEL_POLL`] until it succeeds, fails, the
/// overall `timeout` runs out or `cancel` fires. `read` gets the slice to set as its socket
/// timeout.
fn sliced_read<R>(
    action: &'static str,
    timeout: Duration,
    cancel: &CancelToken,
    mut read: impl FnMut(Duration) -> std::io::Result<R>,
) -> Result<R, StationError> {
    let deadline = Instant::now() + timeout;
    loop {
        cancel.check()?;
        let now = Instant::now();
        if now >= deadline {
            return Err(StationError::Timeout(timeout));
        }
        match read((deadline - now).min(CANCEL_POLL)) {
            Ok(value) => return Ok(value),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => return Err(io_error(action, timeout)(e)),
        }
    }
}

/// Talks to a real station on the local network.
#[derive(Debug, Clone)]
pub struct LanTransport {
    bind_ip: Ipv4Addr,
}

impl Default for LanTransport {
    fn default() -> Self {
        Self {
            bind_ip: Ipv4Addr::UNSPECIFIED,
        }
    }
}

impl LanTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict sockets to one local interface.
    pub fn bind_to(bind_ip: Ipv4Addr) -> Self {
        Self { bind_ip }
    }

    fn udp_socket(&self) -> Result<UdpSocket, StationError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(setup_error("create UDP socket"))?;
        socket
            .set_reuse_address(true)
            .map_err(setup_error("set SO_REUSEADDR"))?;
        socket
            .set_broadcast(true)
            .map_err(setup_error("enable broadcast"))?;
        let local = SocketAddr::V4(SocketAddrV4::new(self.bind_ip, 0));
        socket
            .bind(&local.into())
            .map_err(setup_error("bind UDP socket"))?;
        Ok(socket.into())
    }

    fn tcp_listener(&self, port: u16) -> Result<TcpListener, StationError> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(setup_error("create TCP socket"))?;
        socket
            .set_reuse_address(true)
            .map_err(setup_error("set SO_REUSEADDR"))?;
        let local = SocketAddr::V4(SocketAddrV4::new(self.bind_ip, port));
        socket
            .bind(&local.into())
            .map_err(setup_error("bind data port"))?;
        socket
            .listen(LISTEN_BACKLOG)
            .map_err(setup_error("listen on data port"))?;
        socket
            .set_nonblocking(true)
            .map_err(setup_error("make listener non-blocking"))?;
        Ok(socket.into())
    }
}

impl Transport for LanTransport {
    type Conn = TcpConnection;

    fn broadcast(
        &mut self,
        payload: &[u8],
        target: SocketAddrV4,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<(Vec<u8>, SocketAddr), StationError> {
        cancel.check()?;
        let socket = self.udp_socket()?;

        tracing::debug!("Broadcasting {} bytes to {}", payload.len(), target);
        socket
            .send_to(payload, target)
            .map_err(io_error("send broadcast", timeout))?;

        let mut buf = [0u8; DISCOVERY_BUFFER];
        let (n, from) = sliced_read("receive discovery reply", timeout, cancel, |slice| {
            socket.set_read_timeout(socket_timeout(slice))?;
            socket.recv_from(&mut buf)
        })?;
        Ok((buf[..n].to_vec(), from))
    }

    fn listen_and_accept(
        &mut self,
        port: u16,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<TcpConnection, StationError> {
        let listener = self.tcp_listener(port)?;
        let deadline = Instant::now() + timeout;

        loop {
            cancel.check()?;
            match listener.accept() {
                Ok((stream, peer)) => {
                    stream
                        .set_nonblocking(false)
                        .map_err(setup_error("configure data connection"))?;
                    tracing::debug!("Accepted data connection from {}", peer);
                    return Ok(TcpConnection { stream, peer });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(StationError::Timeout(timeout));
                    }
                    thread::sleep((deadline - now).min(CANCEL_POLL));
                }
                Err(e) => return Err(io_error("accept data connection", timeout)(e)),
            }
        }
    }
}

/// The TCP connection a station opened to us.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Connection for TcpConnection {
    fn send(&mut self, bytes: &[u8]) -> Result<(), StationError> {
        self.stream
            .write_all(bytes)
            .map_err(setup_error("send request"))
    }

    fn receive(
        &mut self,
        max_bytes: usize,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, StationError> {
        let stream = &mut self.stream;
        let mut buf = vec![0u8; max_bytes];
        let n = sliced_read("receive reply", timeout, cancel, |slice| {
            stream.set_read_timeout(socket_timeout(slice))?;
            stream.read(&mut buf)
        })?;
        buf.truncate(n);
        Ok(buf)
    }

    fn peer_ip(&self) -> Option<IpAddr> {
        Some(self.peer.ip())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let timeout = Duration::from_secs(2);
        let map = io_error("receive reply", timeout);
        assert!(matches!(
            map(std::io::Error::from(ErrorKind::WouldBlock)),
            StationError::Timeout(t) if t == timeout
        ));
        assert!(matches!(
            map(std::io::Error::from(ErrorKind::TimedOut)),
            StationError::Timeout(_)
        ));
        match map(std::io::Error::from(ErrorKind::ConnectionReset)) {
            StationError::Transport(msg) => assert!(msg.starts_with("failed to receive reply")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_socket_timeout_is_never_zero() {
        assert_eq!(socket_timeout(Duration::ZERO), Some(Duration::from_millis(1)));
        assert_eq!(
            socket_timeout(Duration::from_secs(5)),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_accept_and_exchange_over_loopback() {
        let mut transport = LanTransport::bind_to(Ipv4Addr::LOCALHOST);
        let port = {
            let spare = TcpListener::bind("127.0.0.1:0").unwrap();
            spare.local_addr().unwrap().port()
        };

        let station = thread::spawn(move || {
            let mut stream = loop {
                match TcpStream::connect(("127.0.0.1", port)) {
                    Ok(stream) => break stream,
                    Err(_) => thread::sleep(Duration::from_millis(10)),
                }
            };
            let mut request = [0u8; 4];
            stream.read_exact(&mut request).unwrap();
            stream.write_all(b"pong").unwrap();
            request
        });

        let cancel = CancelToken::new();
        let mut conn = transport
            .listen_and_accept(port, Duration::from_secs(5), &cancel)
            .unwrap();
        assert_eq!(conn.peer_ip(), Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        conn.send(b"ping").unwrap();
        let reply = conn.receive(16, Duration::from_secs(5), &cancel).unwrap();

        assert_eq!(reply, b"pong");
        assert_eq!(&station.join().unwrap(), b"ping");
    }

    #[test]
    fn test_accept_times_out() {
        let mut transport = LanTransport::bind_to(Ipv4Addr::LOCALHOST);
        let port = {
            let spare = TcpListener::bind("127.0.0.1:0").unwrap();
            spare.local_addr().unwrap().port()
        };
        let result =
            transport.listen_and_accept(port, Duration::from_millis(50), &CancelToken::new());
        assert!(matches!(result, Err(StationError::Timeout(_))));
    }

    #[test]
    fn test_cancel_interrupts_silent_broadcast() {
        // Receives the SEARCH but never answers.
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = match silent.local_addr().unwrap() {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => unreachable!(),
        };

        let mut transport = LanTransport::bind_to(Ipv4Addr::LOCALHOST);
        let cancel = CancelToken::new();
        let canceller = {
            let cancel = cancel.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                cancel.cancel();
            })
        };

        let started = Instant::now();
        let result = transport.broadcast(b"SEARCH", target, Duration::from_secs(5), &cancel);
        canceller.join().unwrap();

        assert!(matches!(result, Err(StationError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_cancel_interrupts_receive() {
        let mut transport = LanTransport::bind_to(Ipv4Addr::LOCALHOST);
        let port = {
            let spare = TcpListener::bind("127.0.0.1:0").unwrap();
            spare.local_addr().unwrap().port()
        };
        // Connects, then stays quiet until told to hang up.
        let (hang_up, quiet) = std::sync::mpsc::channel::<()>();
        let station = thread::spawn(move || {
            let _stream = loop {
                match TcpStream::connect(("127.0.0.1", port)) {
                    Ok(stream) => break stream,
                    Err(_) => thread::sleep(Duration::from_millis(10)),
                }
            };
            let _ = quiet.recv();
        });

        let cancel = CancelToken::new();
        let mut conn = transport
            .listen_and_accept(port, Duration::from_secs(5), &cancel)
            .unwrap();
        let canceller = {
            let cancel = cancel.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                cancel.cancel();
            })
        };

        let started = Instant::now();
        let result = conn.receive(16, Duration::from_secs(5), &cancel);
        assert!(matches!(result, Err(StationError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(2));

        canceller.join().unwrap();
        hang_up.send(()).unwrap();
        station.join().unwrap();
    }

    #[test]
    fn test_receive_times_out() {
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = match silent.local_addr().unwrap() {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => unreachable!(),
        };
        let mut transport = LanTransport::bind_to(Ipv4Addr::LOCALHOST);
        let result = transport.broadcast(
            b"SEARCH",
            target,
            Duration::from_millis(250),
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(StationError::Timeout(_))));
    }

    #[test]
    fn test_accept_honours_cancel() {
        let mut transport = LanTransport::bind_to(Ipv4Addr::LOCALHOST);
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = transport.listen_and_accept(0, Duration::from_secs(30), &cancel);
        assert!(matches!(result, Err(StationError::Cancelled)));
    }
}
