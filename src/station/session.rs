//! The connection state machine.
//!
//! `Disconnected -> Discovering -> AwaitingConnection -> ReadingSetup -> Ready`. Any failure
//! drops back to `Disconnected`; `connect` restarts the whole sequence up to
//! `connect_attempts` times.

use std::net::{IpAddr, SocketAddrV4};
use std::time::Duration;

use super::{
    CancelToken, Connection, RetryBudget, RetryPolicy, StationError, SubnetProvider, Transport,
};
use crate::protocol::{
    archive_reply_len, check_reply, decode_discovery_reply, decode_setup_reply, Command,
    DiscoveryReply, COMPACT_SETUP_REPLY_LEN, DATA_PORT, DISCOVERY_PORT, SETUP_REPLY_LEN,
};
use crate::units::UnitProfile;

/// Largest single read from the data connection.
const RECEIVE_CHUNK: usize = 8192;

/// Bytes needed before a HISTORY_DATA reply announces its length.
const LENGTH_PREFIX_LEN: usize = 0x24;

/// How long a compact-sized SETUP reply waits for the rest of the documented layout.
const SETUP_SETTLE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Discovering,
    AwaitingConnection,
    ReadingSetup,
    Ready,
}

/// How much of a reply to wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Fixed-size reply of at least this many bytes.
    AtLeast(usize),
    /// HISTORY_DATA: the u32 at 0x20 carries the total length.
    LengthPrefixed,
    /// SETUP: the compact layout, or the documented one if the rest follows shortly.
    Setup,
}

pub struct SessionManager<T: Transport> {
    transport: T,
    subnet: Box<dyn SubnetProvider>,
    policy: RetryPolicy,
    cancel: CancelToken,
    phase: Phase,
    conn: Option<T::Conn>,
    device: Option<DiscoveryReply>,
    profile: Option<UnitProfile>,
}

impl<T: Transport> SessionManager<T> {
    pub fn new(
        transport: T,
        subnet: impl SubnetProvider + 'static,
        policy: RetryPolicy,
        cancel: CancelToken,
    ) -> Self {
        Self {
            transport,
            subnet: Box::new(subnet),
            policy,
            cancel,
            phase: Phase::Disconnected,
            conn: None,
            device: None,
            profile: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The station found by the last discovery.
    pub fn device(&self) -> Option<&DiscoveryReply> {
        self.device.as_ref()
    }

    /// Units of the current session; `None` unless ready.
    pub fn profile(&self) -> Option<UnitProfile> {
        self.profile
    }

    /// Bring the session to `Ready` and return the station's unit profile.
    pub fn connect(&mut self) -> Result<UnitProfile, StationError> {
        if let (Phase::Ready, Some(profile)) = (self.phase, self.profile) {
            return Ok(profile);
        }

        let attempts = self.policy.connect_attempts.max(1);
        let mut budget = self.policy.budget();
        for attempt in 1..=attempts {
            match self.establish(&mut budget) {
                Ok(profile) => return Ok(profile),
                Err(err @ (StationError::Cancelled | StationError::RetriesExceeded(_))) => {
                    self.teardown();
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!("Connection attempt {}/{} failed: {}", attempt, attempts, err);
                    self.teardown();
                }
            }
        }

        self.cancel.check()?;
        Err(StationError::RetriesExceeded(format!(
            "no session after {} connection attempts",
            attempts
        )))
    }

    fn establish(&mut self, budget: &mut RetryBudget) -> Result<UnitProfile, StationError> {
        let timeout = self.policy.timeout;

        self.enter(Phase::Discovering);
        let target = SocketAddrV4::new(self.subnet.broadcast_address(), DISCOVERY_PORT);
        let search = Command::Search.encode();
        let transport = &mut self.transport;
        let cancel = &self.cancel;
        let (reply, from) = retry_phase(&self.policy, cancel, budget, "discovery", || {
            transport.broadcast(&search, target, timeout, cancel)
        })?;
        let device = decode_discovery_reply(&reply)?;
        tracing::info!(
            "Found station {} ({}) at {}, reply from {}",
            device.name,
            device.mac,
            device.ip,
            from
        );

        self.enter(Phase::AwaitingConnection);
        let transport = &mut self.transport;
        let cancel = &self.cancel;
        let conn = retry_phase(&self.policy, cancel, budget, "accept", || {
            transport.listen_and_accept(DATA_PORT, timeout, cancel)
        })?;
        check_peer(&device, conn.peer_ip());
        self.conn = Some(conn);

        self.enter(Phase::ReadingSetup);
        let reply = self.round_trip(&Command::Setup.encode(), Framing::Setup)?;
        let setup = decode_setup_reply(&reply)?;
        let profile = UnitProfile::from(&setup);
        tracing::info!("Station units: {:?}", profile);
        tracing::debug!("Station setup: {:?}", setup);

        self.device = Some(device);
        self.profile = Some(profile);
        self.enter(Phase::Ready);
        Ok(profile)
    }

    /// Send `request` and collect its reply. Any failure tears the session down.
    pub fn exchange(&mut self, request: &[u8], framing: Framing) -> Result<Vec<u8>, StationError> {
        if self.phase != Phase::Ready {
            return Err(StationError::Transport("session is not connected".into()));
        }
        match self.round_trip(request, framing) {
            Ok(reply) => Ok(reply),
            Err(err) => {
                tracing::warn!("Exchange failed, dropping connection: {}", err);
                self.teardown();
                Err(err)
            }
        }
    }

    /// Forget the connection and unit profile.
    pub fn teardown(&mut self) {
        self.conn = None;
        self.profile = None;
        self.enter(Phase::Disconnected);
    }

    fn enter(&mut self, phase: Phase) {
        if self.phase != phase {
            tracing::debug!("Session {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    /// Send `request` and collect a reply that answers it.
    fn round_trip(&mut self, request: &[u8], framing: Framing) -> Result<Vec<u8>, StationError> {
        self.cancel.check()?;
        let cancel = &self.cancel;
        let timeout = self.policy.timeout;
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| StationError::Transport("no data connection".into()))?;
        conn.send(request)?;

        let mut reply = Vec::new();
        loop {
            let wanted = match framing {
                Framing::AtLeast(n) => n,
                Framing::LengthPrefixed => archive_reply_len(&reply)
                    .unwrap_or(LENGTH_PREFIX_LEN)
                    .max(LENGTH_PREFIX_LEN),
                Framing::Setup => COMPACT_SETUP_REPLY_LEN,
            };
            if reply.len() >= wanted {
                break;
            }

            let chunk = conn.receive(RECEIVE_CHUNK, timeout, cancel)?;
            if chunk.is_empty() {
                return Err(StationError::Transport("connection closed by station".into()));
            }
            reply.extend_from_slice(&chunk);
        }

        if framing == Framing::Setup && reply.len() < SETUP_REPLY_LEN {
            match conn.receive(RECEIVE_CHUNK, SETUP_SETTLE.min(timeout), cancel) {
                Ok(rest) => reply.extend_from_slice(&rest),
                Err(StationError::Timeout(_)) => {}
                Err(err) => return Err(err),
            }
        }

        check_reply(request, &reply)?;
        Ok(reply)
    }
}

/// Run one phase operation, absorbing timeouts and socket failures into `budget`.
fn retry_phase<R>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    budget: &mut RetryBudget,
    phase: &str,
    mut op: impl FnMut() -> Result<R, StationError>,
) -> Result<R, StationError> {
    let mut current = budget.with_timeouts(policy.retry_count);
    loop {
        cancel.check()?;
        let err = match op() {
            Ok(value) => {
                *budget = current;
                return Ok(value);
            }
            Err(err) => err,
        };

        let cooldown = matches!(err, StationError::Transport(_));
        tracing::warn!("{} failed: {}", phase, err);
        current = match current.absorb(err, phase) {
            Ok(next) => next,
            Err(err) => {
                *budget = current;
                return Err(err);
            }
        };
        if cooldown {
            cancel.sleep(policy.retry_wait)?;
        }
    }
}

fn check_peer(device: &DiscoveryReply, peer: Option<IpAddr>) {
    let (Ok(announced), Some(peer)) = (device.ip.parse::<IpAddr>(), peer) else {
        return;
    };
    if announced != peer {
        tracing::warn!(
            "Data connection from {} but station {} announced {}",
            peer,
            device.name,
            announced
        );
    }
}
