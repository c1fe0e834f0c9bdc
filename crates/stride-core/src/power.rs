//! Idle-based power gating for the radio and the display. Battery
//! budget comes from everything being off by default; a step wakes the
//! device, inactivity shuts it back down.

/// Radio idle budget. Short, because the radio dominates draw.
pub const WIFI_IDLE_TIMEOUT_MS: u64 = 30_000;
/// Display idle budget; the panel is cheap to keep lit a while longer.
pub const DISPLAY_IDLE_TIMEOUT_MS: u64 = 60_000;

/// Display on/off seam. The firmware binary implements it over the
/// panel's power-enable pin; panel bring-up stays outside this crate.
pub trait DisplayPower {
    fn set_powered(&mut self, on: bool);
}

/// What the governor wants done with the radio this tick. The Wi-Fi
/// and transport tasks carry it out.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RadioAction {
    None,
    /// Idle-expired with an empty backlog: radio goes down.
    PowerDown,
    /// New activity while the radio was down: bring Wi-Fi back and
    /// reconnect the transport.
    PowerUp,
}

/// Tracks the activity clock and the commanded power state. Display
/// state is a pure function of elapsed idle time; the radio
/// additionally requires an empty backlog before it may go down.
#[derive(Debug)]
pub struct PowerGovernor {
    last_activity_ms: u64,
    wifi_powered: bool,
    display_powered: bool,
}

impl PowerGovernor {
    /// Boot counts as activity; everything starts powered.
    pub const fn new(now_ms: u64) -> Self {
        Self {
            last_activity_ms: now_ms,
            wifi_powered: true,
            display_powered: true,
        }
    }

    pub const fn wifi_powered(&self) -> bool {
        self.wifi_powered
    }

    /// A confirmed step. Resets the idle clock, restores the display
    /// immediately, and asks for a radio power-up if it was down.
    pub fn record_activity<D: DisplayPower>(&mut self, now_ms: u64, display: &mut D) -> RadioAction {
        self.last_activity_ms = now_ms;

        if !self.display_powered {
            display.set_powered(true);
            self.display_powered = true;
        }
        if !self.wifi_powered {
            self.wifi_powered = true;
            return RadioAction::PowerUp;
        }
        RadioAction::None
    }

    /// Periodic evaluation. Pending backlog entries always suppress the
    /// radio shutdown; delivery must finish first.
    pub fn tick<D: DisplayPower>(
        &mut self,
        now_ms: u64,
        backlog_len: usize,
        display: &mut D,
    ) -> RadioAction {
        let idle_ms = now_ms.saturating_sub(self.last_activity_ms);

        let display_should_be_on = idle_ms < DISPLAY_IDLE_TIMEOUT_MS;
        if display_should_be_on != self.display_powered {
            display.set_powered(display_should_be_on);
            self.display_powered = display_should_be_on;
        }

        if self.wifi_powered && idle_ms >= WIFI_IDLE_TIMEOUT_MS && backlog_len == 0 {
            self.wifi_powered = false;
            return RadioAction::PowerDown;
        }
        RadioAction::None
    }
}
