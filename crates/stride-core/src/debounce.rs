//! Confirm-then-accept debounce for the magnetic switch input.
//!
//! A transition is only committed after the pin has held the new level
//! for the full debounce window; bouncing back to the known stable
//! level cancels the pending confirmation. The first edge seen after
//! boot only seeds the stable level so power-up never fabricates a step.

use crate::backlog::StepEvent;

pub const DEBOUNCE_WINDOW_MS: u64 = 80;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EdgeLevel {
    Low,
    High,
}

/// What the caller should do with its one-shot confirmation timer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EdgeAction {
    None,
    ArmTimer { deadline_ms: u64 },
    CancelTimer,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DebounceFilter {
    stable_level: Option<EdgeLevel>,
    pending_level: Option<EdgeLevel>,
    pending_since_ms: u64,
}

impl DebounceFilter {
    pub const fn new() -> Self {
        Self {
            stable_level: None,
            pending_level: None,
            pending_since_ms: 0,
        }
    }

    /// Invoked once per raw electrical transition. Runs in interrupt
    /// context in the firmware, so it only compares and records.
    pub fn on_edge(&mut self, level: EdgeLevel, now_ms: u64) -> EdgeAction {
        let Some(stable) = self.stable_level else {
            self.stable_level = Some(level);
            return EdgeAction::None;
        };

        if level == stable {
            // Bounced back to the known state.
            if self.pending_level.take().is_some() {
                return EdgeAction::CancelTimer;
            }
            return EdgeAction::None;
        }

        if self.pending_level == Some(level) {
            // Already awaiting confirmation of this level.
            return EdgeAction::None;
        }

        self.pending_level = Some(level);
        self.pending_since_ms = now_ms;
        EdgeAction::ArmTimer {
            deadline_ms: now_ms.saturating_add(DEBOUNCE_WINDOW_MS),
        }
    }

    /// Invoked when the one-shot timer fires, with the level read at
    /// that moment. Commits the transition and emits the event iff the
    /// pin still sits at the pending level and it differs from stable.
    pub fn confirm(&mut self, level_now: EdgeLevel, now_ms: u64) -> Option<StepEvent> {
        let pending = self.pending_level.take()?;
        if level_now != pending {
            return None;
        }
        if self.stable_level == Some(pending) {
            return None;
        }
        self.stable_level = Some(pending);
        Some(StepEvent {
            timestamp_ms: now_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_edge_only_seeds_stable_level() {
        let mut filter = DebounceFilter::new();
        assert_eq!(filter.on_edge(EdgeLevel::Low, 0), EdgeAction::None);
        // No pending confirmation, so a stray timer fire emits nothing.
        assert_eq!(filter.confirm(EdgeLevel::Low, 100), None);
    }

    #[test]
    fn clean_transition_commits_exactly_one_event() {
        let mut filter = DebounceFilter::new();
        filter.on_edge(EdgeLevel::High, 0);

        assert_eq!(
            filter.on_edge(EdgeLevel::Low, 1_000),
            EdgeAction::ArmTimer {
                deadline_ms: 1_080
            }
        );
        let event = filter.confirm(EdgeLevel::Low, 1_080);
        assert_eq!(event, Some(StepEvent { timestamp_ms: 1_080 }));

        // A second fire without a new edge produces nothing.
        assert_eq!(filter.confirm(EdgeLevel::Low, 1_200), None);
    }

    #[test]
    fn bounce_back_cancels_pending_confirmation() {
        let mut filter = DebounceFilter::new();
        filter.on_edge(EdgeLevel::High, 0);

        assert!(matches!(
            filter.on_edge(EdgeLevel::Low, 1_000),
            EdgeAction::ArmTimer { .. }
        ));
        assert_eq!(filter.on_edge(EdgeLevel::High, 1_020), EdgeAction::CancelTimer);

        // Even if the timer fires anyway, nothing is committed.
        assert_eq!(filter.confirm(EdgeLevel::High, 1_080), None);
    }

    #[test]
    fn bounce_burst_collapses_to_one_event() {
        let mut filter = DebounceFilter::new();
        filter.on_edge(EdgeLevel::High, 0);

        // Contact chatter: repeated Low/High edges inside the window,
        // settling at Low. The caller re-arms per the returned actions;
        // only the final confirmation commits.
        filter.on_edge(EdgeLevel::Low, 1_000);
        filter.on_edge(EdgeLevel::High, 1_010);
        filter.on_edge(EdgeLevel::Low, 1_025);
        filter.on_edge(EdgeLevel::High, 1_032);
        assert!(matches!(
            filter.on_edge(EdgeLevel::Low, 1_041),
            EdgeAction::ArmTimer { deadline_ms: 1_121 }
        ));

        assert_eq!(
            filter.confirm(EdgeLevel::Low, 1_121),
            Some(StepEvent { timestamp_ms: 1_121 })
        );
    }

    #[test]
    fn level_changed_again_by_timer_fire_commits_nothing() {
        let mut filter = DebounceFilter::new();
        filter.on_edge(EdgeLevel::High, 0);
        filter.on_edge(EdgeLevel::Low, 1_000);

        // Pin no longer at the pending level when the timer fires.
        assert_eq!(filter.confirm(EdgeLevel::High, 1_080), None);
    }

    #[test]
    fn repeated_edges_at_pending_level_do_not_rearm() {
        let mut filter = DebounceFilter::new();
        filter.on_edge(EdgeLevel::High, 0);

        assert!(matches!(
            filter.on_edge(EdgeLevel::Low, 1_000),
            EdgeAction::ArmTimer { .. }
        ));
        assert_eq!(filter.on_edge(EdgeLevel::Low, 1_030), EdgeAction::None);
    }
}
