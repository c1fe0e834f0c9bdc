//! Boot orchestration: Wi-Fi first, then time sync, then the transport,
//! then steady-state. Losing Wi-Fi demotes all the way back; a
//! transport retry against a dead link is never issued.

/// Give up on time sync after this long and run on monotonic
/// timestamps instead.
pub const TIME_SYNC_TIMEOUT_MS: u64 = 30_000;
/// Re-command a transport connect at this cadence until it lands.
pub const TRANSPORT_RETRY_INTERVAL_MS: u64 = 10_000;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StartupPhase {
    WaitWifi,
    SyncTime,
    ConnectTransport,
    Running,
}

/// Snapshot of the collaborators the sequencer decides on.
#[derive(Clone, Copy, Debug)]
pub struct SequencerInputs {
    pub now_ms: u64,
    pub wifi_connected: bool,
    pub time_synced: bool,
    pub transport_connected: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SequencerCommand {
    StartTimeSync,
    ConnectTransport,
    /// Wi-Fi is gone; tear the session down rather than retrying into
    /// a dead link.
    StopTransport,
}

#[derive(Debug)]
pub struct StartupSequencer {
    phase: StartupPhase,
    phase_entered_ms: u64,
    last_connect_ms: u64,
}

impl StartupSequencer {
    pub const fn new() -> Self {
        Self {
            phase: StartupPhase::WaitWifi,
            phase_entered_ms: 0,
            last_connect_ms: 0,
        }
    }

    pub const fn phase(&self) -> StartupPhase {
        self.phase
    }

    /// One transition. At most one command per call; callers run this
    /// from the main loop at tick cadence.
    pub fn step(&mut self, inputs: SequencerInputs) -> Option<SequencerCommand> {
        // Wi-Fi loss wins over everything past WaitWifi.
        if !inputs.wifi_connected && !matches!(self.phase, StartupPhase::WaitWifi) {
            let had_transport = matches!(
                self.phase,
                StartupPhase::ConnectTransport | StartupPhase::Running
            );
            self.enter(StartupPhase::WaitWifi, inputs.now_ms);
            return had_transport.then_some(SequencerCommand::StopTransport);
        }

        match self.phase {
            StartupPhase::WaitWifi => {
                if inputs.wifi_connected {
                    self.enter(StartupPhase::SyncTime, inputs.now_ms);
                    return Some(SequencerCommand::StartTimeSync);
                }
                None
            }
            StartupPhase::SyncTime => {
                let timed_out =
                    inputs.now_ms.saturating_sub(self.phase_entered_ms) >= TIME_SYNC_TIMEOUT_MS;
                if inputs.time_synced || timed_out {
                    self.enter(StartupPhase::ConnectTransport, inputs.now_ms);
                    self.last_connect_ms = inputs.now_ms;
                    return Some(SequencerCommand::ConnectTransport);
                }
                None
            }
            StartupPhase::ConnectTransport => {
                if inputs.transport_connected {
                    self.enter(StartupPhase::Running, inputs.now_ms);
                    return None;
                }
                if inputs.now_ms.saturating_sub(self.last_connect_ms)
                    >= TRANSPORT_RETRY_INTERVAL_MS
                {
                    self.last_connect_ms = inputs.now_ms;
                    return Some(SequencerCommand::ConnectTransport);
                }
                None
            }
            StartupPhase::Running => {
                if !inputs.transport_connected {
                    // Wi-Fi is still up, so only the session is redone.
                    self.enter(StartupPhase::ConnectTransport, inputs.now_ms);
                    self.last_connect_ms = inputs.now_ms;
                    return Some(SequencerCommand::ConnectTransport);
                }
                None
            }
        }
    }

    fn enter(&mut self, phase: StartupPhase, now_ms: u64) {
        self.phase = phase;
        self.phase_entered_ms = now_ms;
    }
}

impl Default for StartupSequencer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(now_ms: u64, wifi: bool, time: bool, transport: bool) -> SequencerInputs {
        SequencerInputs {
            now_ms,
            wifi_connected: wifi,
            time_synced: time,
            transport_connected: transport,
        }
    }

    #[test]
    fn happy_path_reaches_running() {
        let mut seq = StartupSequencer::new();
        assert_eq!(seq.step(inputs(0, false, false, false)), None);
        assert_eq!(seq.phase(), StartupPhase::WaitWifi);

        assert_eq!(
            seq.step(inputs(1_000, true, false, false)),
            Some(SequencerCommand::StartTimeSync)
        );
        assert_eq!(seq.phase(), StartupPhase::SyncTime);

        assert_eq!(
            seq.step(inputs(3_000, true, true, false)),
            Some(SequencerCommand::ConnectTransport)
        );
        assert_eq!(seq.phase(), StartupPhase::ConnectTransport);

        assert_eq!(seq.step(inputs(4_000, true, true, true)), None);
        assert_eq!(seq.phase(), StartupPhase::Running);
    }

    #[test]
    fn time_sync_times_out_into_degraded_mode() {
        let mut seq = StartupSequencer::new();
        seq.step(inputs(0, true, false, false));
        assert_eq!(seq.phase(), StartupPhase::SyncTime);

        assert_eq!(seq.step(inputs(29_999, true, false, false)), None);
        assert_eq!(
            seq.step(inputs(30_000, true, false, false)),
            Some(SequencerCommand::ConnectTransport)
        );
    }

    #[test]
    fn transport_connect_is_recommanded_every_ten_seconds() {
        let mut seq = StartupSequencer::new();
        seq.step(inputs(0, true, false, false));
        seq.step(inputs(1_000, true, true, false));
        assert_eq!(seq.phase(), StartupPhase::ConnectTransport);

        assert_eq!(seq.step(inputs(5_000, true, true, false)), None);
        assert_eq!(
            seq.step(inputs(11_000, true, true, false)),
            Some(SequencerCommand::ConnectTransport)
        );
        assert_eq!(seq.step(inputs(12_000, true, true, false)), None);
        assert_eq!(
            seq.step(inputs(21_000, true, true, false)),
            Some(SequencerCommand::ConnectTransport)
        );
    }

    #[test]
    fn wifi_loss_demotes_running_to_wait_wifi() {
        let mut seq = StartupSequencer::new();
        seq.step(inputs(0, true, true, false));
        seq.step(inputs(1_000, true, true, false));
        seq.step(inputs(2_000, true, true, true));
        assert_eq!(seq.phase(), StartupPhase::Running);

        assert_eq!(
            seq.step(inputs(3_000, false, true, true)),
            Some(SequencerCommand::StopTransport)
        );
        assert_eq!(seq.phase(), StartupPhase::WaitWifi);

        // No transport retry while the link is down.
        assert_eq!(seq.step(inputs(4_000, false, true, false)), None);
        assert_eq!(seq.phase(), StartupPhase::WaitWifi);
    }

    #[test]
    fn wifi_recovery_skips_straight_through_an_already_synced_clock() {
        let mut seq = StartupSequencer::new();
        seq.step(inputs(0, true, true, false));
        seq.step(inputs(1_000, true, true, false));
        seq.step(inputs(2_000, false, true, false));
        assert_eq!(seq.phase(), StartupPhase::WaitWifi);

        assert_eq!(
            seq.step(inputs(10_000, true, true, false)),
            Some(SequencerCommand::StartTimeSync)
        );
        assert_eq!(
            seq.step(inputs(10_100, true, true, false)),
            Some(SequencerCommand::ConnectTransport)
        );
    }

    #[test]
    fn transport_drop_with_wifi_up_reconnects_the_session_only() {
        let mut seq = StartupSequencer::new();
        seq.step(inputs(0, true, true, false));
        seq.step(inputs(1_000, true, true, false));
        seq.step(inputs(2_000, true, true, true));
        assert_eq!(seq.phase(), StartupPhase::Running);

        assert_eq!(
            seq.step(inputs(3_000, true, true, false)),
            Some(SequencerCommand::ConnectTransport)
        );
        assert_eq!(seq.phase(), StartupPhase::ConnectTransport);
    }

    #[test]
    fn wifi_loss_during_sync_does_not_stop_an_unstarted_transport() {
        let mut seq = StartupSequencer::new();
        seq.step(inputs(0, true, false, false));
        assert_eq!(seq.phase(), StartupPhase::SyncTime);

        assert_eq!(seq.step(inputs(1_000, false, false, false)), None);
        assert_eq!(seq.phase(), StartupPhase::WaitWifi);
    }
}
