//! Drains the backlog through a connected transport, oldest first, and
//! removes an event only after its send was confirmed.

use log::{debug, warn};

use crate::backlog::Backlog;
use crate::storage::KvStore;
use crate::wire::{StepMessage, step_message};

/// Upper bound on sends per tick so a long offline backlog drains
/// without starving the rest of the main loop.
pub const MAX_SENDS_PER_TICK: usize = 8;

/// Transport seam consumed by the coordinator. The firmware binary
/// implements it over the live WebSocket session.
pub trait StepSender {
    type Error;

    fn is_connected(&self) -> bool;

    /// Queues one text message; `Ok` means the frame was handed to the
    /// transport, which is the delivery confirmation the backlog needs.
    fn send_text(&mut self, message: &str) -> Result<(), Self::Error>;
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TickOutcome {
    /// Events confirmed and removed this tick.
    pub sent: usize,
    /// A send failed; the transport should reconnect before retrying.
    pub reconnect_requested: bool,
}

/// Owns the device identity half of the wire message; the backlog and
/// transport are passed per tick.
#[derive(Debug)]
pub struct DeliveryCoordinator {
    device_mac: crate::wire::MacString,
}

impl DeliveryCoordinator {
    pub const fn new(device_mac: crate::wire::MacString) -> Self {
        Self { device_mac }
    }

    /// The wire message for the oldest queued event, if any.
    pub fn next_message(&self, backlog: &Backlog) -> Option<StepMessage> {
        backlog
            .peek()
            .map(|event| step_message(event.timestamp_ms, self.device_mac.as_str()))
    }

    /// Removes the oldest event after its send was confirmed.
    pub fn confirm_sent<S: KvStore>(&self, backlog: &mut Backlog, store: &mut S) {
        backlog.pop_confirmed(store);
    }

    /// One delivery pass: sends the oldest events in FIFO order until
    /// the backlog empties, a send fails, or the per-tick cap is hit.
    /// An event leaves the backlog iff its send returned `Ok`.
    pub fn tick<S, T>(&self, backlog: &mut Backlog, sender: &mut T, store: &mut S) -> TickOutcome
    where
        S: KvStore,
        T: StepSender,
    {
        let mut outcome = TickOutcome::default();
        if !sender.is_connected() {
            return outcome;
        }

        while outcome.sent < MAX_SENDS_PER_TICK {
            let Some(message) = self.next_message(backlog) else {
                break;
            };

            if sender.send_text(message.as_str()).is_err() {
                warn!("step send failed; {} event(s) stay queued", backlog.len());
                outcome.reconnect_requested = true;
                break;
            }

            self.confirm_sent(backlog, store);
            outcome.sent += 1;
        }

        if outcome.sent > 0 {
            debug!("delivered {} step(s), {} queued", outcome.sent, backlog.len());
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlog::StepEvent;
    use crate::storage::MemKv;
    use crate::wire::format_mac;

    struct FakeSender {
        connected: bool,
        fail_after: Option<usize>,
        sent: Vec<String>,
    }

    impl FakeSender {
        fn connected() -> Self {
            Self {
                connected: true,
                fail_after: None,
                sent: Vec::new(),
            }
        }
    }

    impl StepSender for FakeSender {
        type Error = ();

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn send_text(&mut self, message: &str) -> Result<(), ()> {
            if self.fail_after == Some(self.sent.len()) {
                return Err(());
            }
            self.sent.push(message.to_owned());
            Ok(())
        }
    }

    fn coordinator() -> DeliveryCoordinator {
        DeliveryCoordinator::new(format_mac(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]))
    }

    fn queue(backlog: &mut Backlog, kv: &mut MemKv, timestamps: &[u64]) {
        for &ts in timestamps {
            backlog.push(StepEvent { timestamp_ms: ts }, kv).unwrap();
        }
    }

    #[test]
    fn disconnected_sender_leaves_the_backlog_alone() {
        let mut kv = MemKv::new();
        let mut backlog = Backlog::new();
        queue(&mut backlog, &mut kv, &[1_000]);

        let mut sender = FakeSender::connected();
        sender.connected = false;

        let outcome = coordinator().tick(&mut backlog, &mut sender, &mut kv);
        assert_eq!(outcome, TickOutcome::default());
        assert_eq!(backlog.len(), 1);
    }

    #[test]
    fn drains_fifo_up_to_the_per_tick_cap() {
        let mut kv = MemKv::new();
        let mut backlog = Backlog::new();
        let timestamps: Vec<u64> = (0..12).map(|i| i * 1_000).collect();
        queue(&mut backlog, &mut kv, &timestamps);

        let mut sender = FakeSender::connected();
        let outcome = coordinator().tick(&mut backlog, &mut sender, &mut kv);

        assert_eq!(outcome.sent, MAX_SENDS_PER_TICK);
        assert!(!outcome.reconnect_requested);
        assert_eq!(backlog.len(), 12 - MAX_SENDS_PER_TICK);
        assert!(sender.sent[0].contains("\"sent_at\":0.000,"));
        assert!(sender.sent[7].contains("\"sent_at\":7.000,"));

        let outcome = coordinator().tick(&mut backlog, &mut sender, &mut kv);
        assert_eq!(outcome.sent, 4);
        assert!(backlog.is_empty());
    }

    #[test]
    fn send_failure_keeps_the_event_and_requests_reconnect() {
        let mut kv = MemKv::new();
        let mut backlog = Backlog::new();
        queue(&mut backlog, &mut kv, &[1_000, 2_000, 3_000]);

        let mut sender = FakeSender::connected();
        sender.fail_after = Some(1);

        let outcome = coordinator().tick(&mut backlog, &mut sender, &mut kv);
        assert_eq!(outcome.sent, 1);
        assert!(outcome.reconnect_requested);
        assert_eq!(backlog.len(), 2);
        assert_eq!(backlog.peek(), Some(StepEvent { timestamp_ms: 2_000 }));
    }

    #[test]
    fn offline_event_is_delivered_exactly_once_on_reconnect() {
        let mut kv = MemKv::new();
        let mut backlog = Backlog::new();
        let coord = coordinator();

        // Offline: the event is queued and survives a reboot.
        queue(&mut backlog, &mut kv, &[1_700_000_000_123]);
        let mut offline = FakeSender::connected();
        offline.connected = false;
        assert_eq!(coord.tick(&mut backlog, &mut offline, &mut kv).sent, 0);

        let mut backlog = Backlog::load(&mut kv);
        assert_eq!(backlog.len(), 1);

        // Reconnected: drained exactly once with the exact schema.
        let mut sender = FakeSender::connected();
        let outcome = coord.tick(&mut backlog, &mut sender, &mut kv);
        assert_eq!(outcome.sent, 1);
        assert_eq!(
            sender.sent,
            ["{\"action\":\"sendStep\",\"data\":{\"sent_at\":1700000000.123,\"deviceMAC\":\"AA:BB:CC:DD:EE:FF\"}}"]
        );

        assert_eq!(coord.tick(&mut backlog, &mut sender, &mut kv).sent, 0);
        assert_eq!(sender.sent.len(), 1);
    }
}
