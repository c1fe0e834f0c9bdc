//! Edge watcher for the magnetic switch: raw edges feed the debounce
//! filter, confirmed steps go through a bounded channel to the main
//! loop. No storage I/O happens here.

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Instant, Timer};
use esp_hal::gpio::{Input, Level};
use log::debug;
use stride_core::backlog::StepEvent;
use stride_core::debounce::{DebounceFilter, EdgeAction, EdgeLevel};

use crate::timesync::SharedClock;

pub const STEP_CHANNEL_DEPTH: usize = 16;

pub type StepChannel = Channel<CriticalSectionRawMutex, StepEvent, STEP_CHANNEL_DEPTH>;

fn edge_level(level: Level) -> EdgeLevel {
    match level {
        Level::Low => EdgeLevel::Low,
        Level::High => EdgeLevel::High,
    }
}

pub async fn edge_watcher(
    mut switch: Input<'static>,
    clock: &'static SharedClock,
    events: &'static StepChannel,
) -> ! {
    let mut filter = DebounceFilter::new();
    let mut deadline_ms: Option<u64> = None;

    loop {
        match deadline_ms {
            None => {
                switch.wait_for_any_edge().await;
                apply_edge(&mut filter, &mut deadline_ms, switch.level());
            }
            Some(deadline) => {
                let confirm_timer = Timer::at(Instant::from_millis(deadline));
                match select(confirm_timer, switch.wait_for_any_edge()).await {
                    Either::First(()) => {
                        deadline_ms = None;
                        let level = edge_level(switch.level());
                        if filter.confirm(level, Instant::now().as_millis()).is_some() {
                            let event = StepEvent {
                                timestamp_ms: clock.now_ms(),
                            };
                            debug!("step confirmed at {}", event.timestamp_ms);
                            events.send(event).await;
                        }
                    }
                    Either::Second(()) => {
                        apply_edge(&mut filter, &mut deadline_ms, switch.level());
                    }
                }
            }
        }
    }
}

fn apply_edge(filter: &mut DebounceFilter, deadline_ms: &mut Option<u64>, level: Level) {
    match filter.on_edge(edge_level(level), Instant::now().as_millis()) {
        EdgeAction::None => {}
        EdgeAction::ArmTimer { deadline_ms: at } => *deadline_ms = Some(at),
        EdgeAction::CancelTimer => *deadline_ms = None,
    }
}
