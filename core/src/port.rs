//! Port allocation and reservation system
//!
//! This module finds free loopback TCP ports for the supervised servers:
//! - Try a preferred port first when one is configured
//! - Otherwise let the OS assign an ephemeral port by binding port 0
//! - Maintain in-process reservations so concurrent allocations never collide
//! - Hold every probe listener of one allocation open until the whole set is
//!   collected, so the OS cannot hand out the same port twice
//!
//! Ports are only guaranteed free at the instant of the check. Nothing stops
//! another process from taking one before the server binds it.

use crate::{CoreError, Result};
use dashmap::DashMap;
use std::{
    fmt,
    net::{Ipv4Addr, SocketAddr, TcpListener},
    process,
    sync::LazyLock,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, warn};

/// Maximum number of consecutive failed binds before giving up
pub const MAX_ALLOCATION_ATTEMPTS: usize = 64;

/// Metadata about a port reservation
#[derive(Debug, Clone, Copy)]
pub struct ReservationMeta {
    /// Process ID that made the reservation
    pub pid: u32,
    /// Timestamp when the reservation was made
    pub timestamp: u64,
}

/// Global reservation table to track allocated ports in-process
static RESERVATIONS: LazyLock<DashMap<u16, ReservationMeta>> = LazyLock::new(DashMap::new);

/// A guard that holds a port reservation and the underlying TCP listener
///
/// The port is automatically released when this guard is dropped.
#[derive(Debug)]
pub struct PortGuard {
    port: u16,
    listener: TcpListener,
}

impl PortGuard {
    /// Get the allocated port number
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Get the socket address this port is bound to
    ///
    /// # Errors
    ///
    /// Returns an error if retrieving the local address fails.
    pub fn addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(CoreError::from)
    }
}

impl Drop for PortGuard {
    fn drop(&mut self) {
        release_port(self.port);
        debug!("Released port {} on drop", self.port);
    }
}

/// The two ports of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortPair {
    api: u16,
    web: u16,
}

impl PortPair {
    /// Create a pair, rejecting zero and duplicate ports
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ValidationError`] if either port is 0 or both are equal.
    pub fn new(api: u16, web: u16) -> Result<Self> {
        if api == 0 || web == 0 {
            return Err(CoreError::ValidationError(format!(
                "ports must be non-zero (api={api}, web={web})"
            )));
        }
        if api == web {
            return Err(CoreError::ValidationError(format!(
                "api and web ports must differ (both {api})"
            )));
        }
        Ok(Self { api, web })
    }

    /// Port of the API server
    #[must_use]
    pub const fn api(&self) -> u16 {
        self.api
    }

    /// Port of the web frontend server
    #[must_use]
    pub const fn web(&self) -> u16 {
        self.web
    }

    /// Port for a role
    #[must_use]
    pub const fn for_role(&self, role: schema::ServerRole) -> u16 {
        match role {
            schema::ServerRole::Api => self.api,
            schema::ServerRole::Web => self.web,
        }
    }
}

impl fmt::Display for PortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "api={} web={}", self.api, self.web)
    }
}

/// Source of free ports for the orchestrator
pub trait PortSource: Send + Sync {
    /// Return one distinct free port per entry, trying each preferred port first
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoAvailablePort`] when the OS keeps refusing binds.
    fn allocate(&self, preferred: &[Option<u16>]) -> Result<Vec<u16>>;
}

/// Port allocator backed by real loopback binds
#[derive(Debug, Clone, Copy)]
pub struct PortAllocator {
    host: Ipv4Addr,
    max_attempts: usize,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PortAllocator {
    /// Create a new port allocator probing the loopback interface
    #[must_use]
    pub const fn new() -> Self {
        Self {
            host: Ipv4Addr::LOCALHOST,
            max_attempts: MAX_ALLOCATION_ATTEMPTS,
        }
    }

    /// Override the number of consecutive failed binds tolerated
    ///
    /// # Panics
    ///
    /// Panics if `attempts` is 0.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        assert!(attempts > 0, "at least one bind attempt is required");
        self.max_attempts = attempts;
        self
    }

    /// Reserve a port, optionally trying a preferred port first
    ///
    /// If a preferred port is provided and available, it will be used.
    /// Otherwise the OS assigns an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoAvailablePort`] if `max_attempts` consecutive
    /// binds fail.
    pub fn reserve(&self, preferred: Option<u16>) -> Result<PortGuard> {
        if let Some(port) = preferred.filter(|p| *p != 0) {
            match self.try_reserve_port_internal(port) {
                Ok(guard) => {
                    debug!("Successfully reserved preferred port {}", port);
                    return Ok(guard);
                }
                Err(e) => {
                    debug!(
                        "Preferred port {} unavailable ({}), falling back to an OS-assigned port",
                        port, e
                    );
                }
            }
        }

        let mut attempts = 0;
        while attempts < self.max_attempts {
            attempts += 1;
            match self.try_reserve_port_internal(0) {
                Ok(guard) => {
                    debug!(
                        "Reserved ephemeral port {} after {} attempts",
                        guard.port, attempts
                    );
                    return Ok(guard);
                }
                Err(CoreError::PortInUse(port)) => {
                    debug!("OS offered port {} which is reserved in-process", port);
                }
                Err(e) => {
                    warn!("Ephemeral bind attempt {} failed: {}", attempts, e);
                }
            }
        }

        Err(CoreError::NoAvailablePort { tried: attempts })
    }

    /// Reserve `n` distinct ports at once
    ///
    /// All guards are alive together, so the returned ports never repeat.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoAvailablePort`] if any reservation fails; guards
    /// already taken are released.
    pub fn reserve_many(&self, preferred: &[Option<u16>]) -> Result<Vec<PortGuard>> {
        let mut guards: Vec<PortGuard> = Vec::with_capacity(preferred.len());
        for pref in preferred {
            // A preferred port listed twice must not be handed out twice
            let pref = pref.filter(|p| !guards.iter().any(|g| g.port == *p));
            guards.push(self.reserve(pref)?);
        }
        Ok(guards)
    }

    /// Reserve `n` distinct OS-assigned ports
    ///
    /// # Errors
    ///
    /// See [`PortAllocator::reserve_many`].
    pub fn allocate(&self, n: usize) -> Result<Vec<u16>> {
        PortSource::allocate(self, &vec![None; n])
    }

    /// Try to reserve a specific port, or an OS-assigned one when `port` is 0
    fn try_reserve_port_internal(&self, port: u16) -> Result<PortGuard> {
        if port != 0 && RESERVATIONS.contains_key(&port) {
            return Err(CoreError::PortInUse(port));
        }

        let addr = SocketAddr::from((self.host, port));
        let listener = TcpListener::bind(addr).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                CoreError::PortInUse(port)
            } else {
                CoreError::from(e)
            }
        })?;
        let bound = listener.local_addr()?.port();

        let meta = ReservationMeta {
            pid: process::id(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        };

        // Double-check reservation to handle race conditions
        if RESERVATIONS.insert(bound, meta).is_some() {
            warn!("Port {} already reserved in-process, releasing", bound);
            return Err(CoreError::PortInUse(bound));
        }

        Ok(PortGuard {
            port: bound,
            listener,
        })
    }
}

impl PortSource for PortAllocator {
    fn allocate(&self, preferred: &[Option<u16>]) -> Result<Vec<u16>> {
        let guards = self.reserve_many(preferred)?;
        let ports: Vec<u16> = guards.iter().map(PortGuard::port).collect();
        debug!("Allocated ports {:?}", ports);
        // Dropping the guards closes the probe listeners so the servers can bind
        drop(guards);
        Ok(ports)
    }
}

/// Explicitly release a reserved port
///
/// Called automatically when a `PortGuard` is dropped.
pub fn release_port(port: u16) {
    if let Some(_meta) = RESERVATIONS.remove(&port) {
        debug!("Explicitly released port {}", port);
    }
}

/// Whether a port is currently reserved in-process
pub fn is_reserved(port: u16) -> bool {
    RESERVATIONS.contains_key(&port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_allocate_returns_distinct_bindable_ports() {
        let allocator = PortAllocator::new();
        for n in [1usize, 2, 5, 16] {
            let ports = allocator.allocate(n).expect("allocation should succeed");
            assert_eq!(ports.len(), n);

            let unique: HashSet<u16> = ports.iter().copied().collect();
            assert_eq!(unique.len(), n, "duplicate ports in {ports:?}");

            // Every port must be bindable right after allocation
            let listeners: Vec<TcpListener> = ports
                .iter()
                .map(|p| {
                    TcpListener::bind((Ipv4Addr::LOCALHOST, *p))
                        .unwrap_or_else(|e| panic!("port {p} not bindable: {e}"))
                })
                .collect();
            assert_eq!(listeners.len(), n);
        }
    }

    #[test]
    fn test_allocate_zero_is_empty() {
        let ports = PortAllocator::new().allocate(0).expect("nothing to allocate");
        assert!(ports.is_empty());
    }

    #[test]
    fn test_guard_reserves_until_drop() {
        let allocator = PortAllocator::new();
        let port = {
            let guard = allocator.reserve(None).expect("reserve");
            assert!(is_reserved(guard.port()));
            assert_eq!(guard.addr().expect("addr").port(), guard.port());
            guard.port()
        };
        assert!(!is_reserved(port));
    }

    #[test]
    fn test_preferred_port_used_when_free() {
        let allocator = PortAllocator::new();
        // Find a free port, release it, then ask for it explicitly
        let free = allocator.allocate(1).expect("allocate")[0];
        match allocator.reserve(Some(free)) {
            Ok(guard) => assert_eq!(guard.port(), free),
            Err(e) => panic!("Unexpected error: {e}"),
        }
    }

    #[test]
    fn test_busy_preferred_port_falls_back() {
        let occupied = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("bind");
        let busy = occupied.local_addr().expect("addr").port();

        let guard = PortAllocator::new()
            .reserve(Some(busy))
            .expect("fallback should succeed");
        assert_ne!(guard.port(), busy);
    }

    #[test]
    fn test_duplicate_preferred_ports_are_split() {
        let allocator = PortAllocator::new();
        let free = allocator.allocate(1).expect("allocate")[0];
        let ports = PortSource::allocate(&allocator, &[Some(free), Some(free)]).expect("allocate");
        assert_eq!(ports.len(), 2);
        assert_ne!(ports[0], ports[1]);
    }

    #[test]
    fn test_port_pair_invariants() {
        let pair = PortPair::new(51342, 51343).expect("valid pair");
        assert_eq!(pair.api(), 51342);
        assert_eq!(pair.web(), 51343);
        assert_eq!(pair.for_role(schema::ServerRole::Web), 51343);
        assert_eq!(pair.to_string(), "api=51342 web=51343");

        assert!(matches!(
            PortPair::new(8000, 8000),
            Err(CoreError::ValidationError(_))
        ));
        assert!(PortPair::new(0, 8000).is_err());
    }
}
