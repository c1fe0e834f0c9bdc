//! Link status shared between the async network tasks and the main
//! loop, published lock-free through atomics.

use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use stride_core::connectivity::ConnectionState;
use stride_core::ws::TransportState;

/// Immutable status snapshot for the main loop and logs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LinkSnapshot {
    pub wifi: ConnectionState,
    pub transport: TransportState,
    pub has_ipv4: bool,
    pub time_synced: bool,
    pub revision: u32,
}

impl LinkSnapshot {
    pub const fn down() -> Self {
        Self {
            wifi: ConnectionState::Disconnected,
            transport: TransportState::Disconnected,
            has_ipv4: false,
            time_synced: false,
            revision: 0,
        }
    }

    /// Usable network for the startup sequencer: associated + IPv4.
    pub const fn wifi_usable(self) -> bool {
        matches!(self.wifi, ConnectionState::Connected) && self.has_ipv4
    }

    pub const fn transport_connected(self) -> bool {
        matches!(self.transport, TransportState::Connected)
    }
}

/// Lock-free shared link status. Each field has a single writer task;
/// any task may read.
#[derive(Debug)]
pub struct LinkHandle {
    wifi: AtomicU8,
    transport: AtomicU8,
    has_ipv4: AtomicBool,
    time_synced: AtomicBool,
    revision: AtomicU32,
}

impl LinkHandle {
    pub const fn new() -> Self {
        Self {
            wifi: AtomicU8::new(ConnectionState::Disconnected as u8),
            transport: AtomicU8::new(TransportState::Disconnected as u8),
            has_ipv4: AtomicBool::new(false),
            time_synced: AtomicBool::new(false),
            revision: AtomicU32::new(0),
        }
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            wifi: ConnectionState::from_raw(self.wifi.load(Ordering::Acquire)),
            transport: TransportState::from_raw(self.transport.load(Ordering::Acquire)),
            has_ipv4: self.has_ipv4.load(Ordering::Acquire),
            time_synced: self.time_synced.load(Ordering::Acquire),
            revision: self.revision.load(Ordering::Acquire),
        }
    }

    pub fn set_wifi(&self, next: ConnectionState) {
        if self.wifi.swap(next as u8, Ordering::AcqRel) != next as u8 {
            self.bump_revision();
        }
    }

    pub fn set_transport(&self, next: TransportState) {
        if self.transport.swap(next as u8, Ordering::AcqRel) != next as u8 {
            self.bump_revision();
        }
    }

    pub fn set_ipv4(&self, has_ipv4: bool) {
        if self.has_ipv4.swap(has_ipv4, Ordering::AcqRel) != has_ipv4 {
            self.bump_revision();
        }
    }

    pub fn set_time_synced(&self, synced: bool) {
        if self.time_synced.swap(synced, Ordering::AcqRel) != synced {
            self.bump_revision();
        }
    }

    /// Wi-Fi dropped: IPv4 and the transport are gone with it.
    pub fn mark_wifi_lost(&self) {
        self.set_ipv4(false);
        self.set_transport(TransportState::Disconnected);
        self.set_wifi(ConnectionState::Disconnected);
    }

    fn bump_revision(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
    }
}

impl Default for LinkHandle {
    fn default() -> Self {
        Self::new()
    }
}
