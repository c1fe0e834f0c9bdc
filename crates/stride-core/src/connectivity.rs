//! Wi-Fi connection policy. The supervisor decides *what* to try next;
//! the firmware's Wi-Fi task owns the radio driver and reports attempt
//! outcomes back.

use crate::backoff::RetryState;

/// Per-SSID association + DHCP budget before moving to the next stored
/// network.
pub const CONNECT_TIMEOUT_MS: u64 = 12_000;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    /// Provisioning fallback: the device is serving its own network so
    /// the user can store credentials. User-recoverable, not fatal.
    ApMode = 3,
}

impl ConnectionState {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::ApMode,
            _ => Self::Disconnected,
        }
    }
}

/// What the Wi-Fi task should do next.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WifiCommand {
    /// Nothing to do right now (connected, suspended, or backing off).
    Idle,
    /// Attempt the credential at `index` in trial order, giving up
    /// after `timeout_ms`.
    TryCredential { index: usize, timeout_ms: u64 },
    /// Switch the radio to access-point provisioning mode.
    StartAccessPoint,
}

/// Tries stored credentials in ascending priority order; a full failed
/// pass either falls back to provisioning (never connected since boot)
/// or arms the shared exponential backoff before the next pass.
#[derive(Debug)]
pub struct ConnectivitySupervisor {
    state: ConnectionState,
    credential_count: usize,
    trial_index: usize,
    ever_connected: bool,
    suspended: bool,
    want_ap: bool,
    retry: RetryState,
}

impl ConnectivitySupervisor {
    pub const fn new(credential_count: usize) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            credential_count,
            trial_index: 0,
            ever_connected: false,
            suspended: false,
            want_ap: false,
            retry: RetryState::new(),
        }
    }

    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    pub const fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected)
    }

    /// Credentials were added or removed (provisioning, settings sync).
    pub fn set_credential_count(&mut self, count: usize) {
        self.credential_count = count;
        if self.trial_index >= count {
            self.trial_index = 0;
        }
    }

    /// Next action for the Wi-Fi task. Pure decision; the caller reports
    /// back through `on_attempt_result` / `on_link_lost`.
    pub fn next_command(&mut self, now_ms: u64) -> WifiCommand {
        if self.suspended
            || matches!(self.state, ConnectionState::Connected | ConnectionState::ApMode)
        {
            return WifiCommand::Idle;
        }

        // Nothing to try: distinct from "all credentials failed".
        if self.credential_count == 0 || self.want_ap {
            self.want_ap = false;
            self.state = ConnectionState::ApMode;
            return WifiCommand::StartAccessPoint;
        }

        if !self.retry.ready(now_ms) {
            return WifiCommand::Idle;
        }

        self.state = ConnectionState::Connecting;
        WifiCommand::TryCredential {
            index: self.trial_index,
            timeout_ms: CONNECT_TIMEOUT_MS,
        }
    }

    /// Outcome of the last `TryCredential` command.
    pub fn on_attempt_result(&mut self, success: bool, now_ms: u64) {
        if success {
            self.state = ConnectionState::Connected;
            self.ever_connected = true;
            self.trial_index = 0;
            self.retry.record_success();
            return;
        }

        self.state = ConnectionState::Disconnected;
        self.trial_index += 1;
        if self.trial_index < self.credential_count {
            return;
        }

        // Full pass over every stored network failed.
        self.trial_index = 0;
        if self.ever_connected {
            self.retry.record_failure(now_ms);
        } else {
            self.want_ap = true;
        }
    }

    /// Established link dropped; restart the trial cycle immediately.
    pub fn on_link_lost(&mut self) {
        if !self.suspended {
            self.state = ConnectionState::Disconnected;
        }
        self.trial_index = 0;
        self.retry.record_success();
    }

    /// Power governor took the radio down. Idempotent.
    pub fn disconnect(&mut self) {
        self.suspended = true;
        self.state = ConnectionState::Disconnected;
    }

    /// Re-arms the trial cycle after a governor-driven radio-off. The
    /// driver stays initialized; only association is redone.
    pub fn reconnect(&mut self) {
        self.suspended = false;
        self.trial_index = 0;
        self.retry.record_success();
        if !matches!(self.state, ConnectionState::ApMode) {
            self.state = ConnectionState::Disconnected;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::backoff_delay_ms;

    #[test]
    fn no_stored_credentials_goes_straight_to_provisioning() {
        let mut sup = ConnectivitySupervisor::new(0);
        assert_eq!(sup.next_command(0), WifiCommand::StartAccessPoint);
        assert_eq!(sup.state(), ConnectionState::ApMode);
        assert_eq!(sup.next_command(1_000), WifiCommand::Idle);
    }

    #[test]
    fn credentials_are_tried_in_order() {
        let mut sup = ConnectivitySupervisor::new(3);

        assert_eq!(
            sup.next_command(0),
            WifiCommand::TryCredential { index: 0, timeout_ms: CONNECT_TIMEOUT_MS }
        );
        sup.on_attempt_result(false, 100);
        assert_eq!(
            sup.next_command(200),
            WifiCommand::TryCredential { index: 1, timeout_ms: CONNECT_TIMEOUT_MS }
        );
        sup.on_attempt_result(false, 300);
        assert_eq!(
            sup.next_command(400),
            WifiCommand::TryCredential { index: 2, timeout_ms: CONNECT_TIMEOUT_MS }
        );
    }

    #[test]
    fn first_boot_full_failure_falls_back_to_ap() {
        let mut sup = ConnectivitySupervisor::new(2);
        for now in [0, 100] {
            sup.next_command(now);
            sup.on_attempt_result(false, now + 50);
        }
        assert_eq!(sup.next_command(200), WifiCommand::StartAccessPoint);
        assert_eq!(sup.state(), ConnectionState::ApMode);
    }

    #[test]
    fn failed_pass_after_a_prior_success_backs_off_instead() {
        let mut sup = ConnectivitySupervisor::new(1);
        sup.next_command(0);
        sup.on_attempt_result(true, 10);
        assert!(sup.is_connected());

        sup.on_link_lost();
        sup.next_command(1_000);
        sup.on_attempt_result(false, 1_050);

        // Backoff gate holds the next pass, never AP fallback.
        assert_eq!(sup.next_command(1_100), WifiCommand::Idle);
        let ready_at = 1_050 + backoff_delay_ms(1);
        assert_eq!(
            sup.next_command(ready_at),
            WifiCommand::TryCredential { index: 0, timeout_ms: CONNECT_TIMEOUT_MS }
        );
    }

    #[test]
    fn success_resets_the_trial_cycle() {
        let mut sup = ConnectivitySupervisor::new(3);
        sup.next_command(0);
        sup.on_attempt_result(false, 10);
        sup.next_command(20);
        sup.on_attempt_result(true, 30);
        assert!(sup.is_connected());

        sup.on_link_lost();
        assert_eq!(
            sup.next_command(40),
            WifiCommand::TryCredential { index: 0, timeout_ms: CONNECT_TIMEOUT_MS }
        );
    }

    #[test]
    fn disconnect_suspends_and_reconnect_rearms() {
        let mut sup = ConnectivitySupervisor::new(1);
        sup.next_command(0);
        sup.on_attempt_result(true, 10);

        sup.disconnect();
        sup.disconnect();
        assert_eq!(sup.state(), ConnectionState::Disconnected);
        assert_eq!(sup.next_command(20), WifiCommand::Idle);

        sup.reconnect();
        assert_eq!(
            sup.next_command(30),
            WifiCommand::TryCredential { index: 0, timeout_ms: CONNECT_TIMEOUT_MS }
        );
    }

    #[test]
    fn provisioning_a_credential_leaves_ap_mode_via_reconnect() {
        let mut sup = ConnectivitySupervisor::new(0);
        assert_eq!(sup.next_command(0), WifiCommand::StartAccessPoint);

        sup.set_credential_count(1);
        sup.reconnect();
        // ApMode persists until the task reports it tore the AP down.
        assert_eq!(sup.next_command(10), WifiCommand::Idle);
        sup.on_link_lost();
        assert_eq!(
            sup.next_command(20),
            WifiCommand::TryCredential { index: 0, timeout_ms: CONNECT_TIMEOUT_MS }
        );
    }

    #[test]
    fn state_round_trips_through_raw() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::ApMode,
        ] {
            assert_eq!(ConnectionState::from_raw(state as u8), state);
        }
    }
}
