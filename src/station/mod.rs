//! Station session management.
//!
//! The driver talks to exactly one station over exactly one conversation. Discovery is a UDP
//! broadcast; the station then opens a TCP connection back to us and every request after that
//! is a strict request/response exchange on it.

mod cancel;
mod fixture;
mod net;
mod retry;
mod session;

pub use cancel::*;
pub use fixture::*;
pub use net::*;
pub use retry::*;
pub use session::*;

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

use crate::protocol::DecodeError;
use crate::units::UnitProfile;

/// Session and transport errors.
#[derive(Error, Debug)]
pub enum StationError {
    #[error("malformed packet: {0}")]
    Malformed(#[from] DecodeError),
    #[error("station timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("retries exceeded: {0}")]
    RetriesExceeded(String),
    #[error("cancelled")]
    Cancelled,
}

impl StationError {
    /// Timeouts and socket failures are worth another attempt; nothing else is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StationError::Timeout(_) | StationError::Transport(_))
    }
}

/// An accepted data connection.
pub trait Connection: Send {
    fn send(&mut self, bytes: &[u8]) -> Result<(), StationError>;

    /// Receive up to `max_bytes`, waiting at most `timeout` and watching `cancel` meanwhile.
    /// An empty result means the station closed the connection.
    fn receive(
        &mut self,
        max_bytes: usize,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, StationError>;

    /// Address of the remote end, if known.
    fn peer_ip(&self) -> Option<IpAddr>;
}

/// The two halves of the discovery handshake.
///
/// Implementations return only [`StationError::Timeout`], [`StationError::Transport`] or
/// [`StationError::Cancelled`]. Waits poll the cancel token at least every [`CANCEL_POLL`].
pub trait Transport: Send {
    type Conn: Connection;

    /// Broadcast `payload` to `target` and wait for the first reply.
    fn broadcast(
        &mut self,
        payload: &[u8],
        target: SocketAddrV4,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<(Vec<u8>, SocketAddr), StationError>;

    /// Listen on `port` and accept the connection the station opens.
    fn listen_and_accept(
        &mut self,
        port: u16,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Self::Conn, StationError>;
}

/// Supplies the address discovery broadcasts are sent to.
pub trait SubnetProvider: Send {
    fn broadcast_address(&self) -> Ipv4Addr;
}

impl SubnetProvider for Ipv4Addr {
    fn broadcast_address(&self) -> Ipv4Addr {
        *self
    }
}

/// Shared handle to a session. Each request/response round-trip holds the lock, so live
/// polling and archive replay can share one station.
pub struct Station<T: Transport> {
    inner: Arc<Mutex<SessionManager<T>>>,
    cancel: CancelToken,
}

impl<T: Transport> Clone for Station<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<T: Transport> Station<T> {
    pub fn new(session: SessionManager<T>) -> Self {
        let cancel = session.cancel_token();
        Self {
            inner: Arc::new(Mutex::new(session)),
            cancel,
        }
    }

    /// Lock the session. A panic in another holder leaves the session usable.
    pub fn lock(&self) -> MutexGuard<'_, SessionManager<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn policy(&self) -> RetryPolicy {
        *self.lock().policy()
    }

    /// Bring the session to `Ready` if needed and return the station's units.
    pub fn connect(&self) -> Result<UnitProfile, StationError> {
        self.lock().connect()
    }

    /// One request/response round-trip on a ready session.
    pub fn exchange(&self, request: &[u8], framing: Framing) -> Result<Vec<u8>, StationError> {
        self.lock().exchange(request, framing)
    }

    /// Drop the current connection; the next `connect` starts over with discovery.
    pub fn reset(&self) {
        self.lock().teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(StationError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(StationError::Transport("reset".into()).is_retryable());
        assert!(!StationError::RetriesExceeded("discovery".into()).is_retryable());
        assert!(!StationError::Cancelled.is_retryable());
        let decode = DecodeError::TooShort {
            shape: "live",
            expected: 104,
            actual: 0,
        };
        assert!(!StationError::from(decode).is_retryable());
    }

    #[test]
    fn test_station_handles_share_session() {
        let fixture = FixtureStation::new();
        let session = SessionManager::new(
            fixture,
            Ipv4Addr::LOCALHOST,
            RetryPolicy::immediate(),
            CancelToken::new(),
        );
        let station = Station::new(session);
        let other = station.clone();

        station.connect().unwrap();
        assert_eq!(other.lock().phase(), Phase::Ready);
        other.reset();
        assert_eq!(station.lock().phase(), Phase::Disconnected);
    }
}
