//! Status LED: a short blink per delivered step, a slow double pulse
//! when the backlog rejects an event.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::Timer;
use esp_hal::gpio::Output;

const SEND_FLASH_MS: u64 = 30;
const DROP_PULSE_MS: u64 = 400;

pub const LED_CHANNEL_DEPTH: usize = 4;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LedEvent {
    StepSent,
    BacklogFull,
}

pub type LedChannel = Channel<CriticalSectionRawMutex, LedEvent, LED_CHANNEL_DEPTH>;

pub async fn led_loop(mut led: Output<'static>, events: &'static LedChannel) -> ! {
    loop {
        match events.receive().await {
            LedEvent::StepSent => {
                led.set_high();
                Timer::after_millis(SEND_FLASH_MS).await;
                led.set_low();
            }
            LedEvent::BacklogFull => {
                for _ in 0..2 {
                    led.set_high();
                    Timer::after_millis(DROP_PULSE_MS).await;
                    led.set_low();
                    Timer::after_millis(DROP_PULSE_MS).await;
                }
            }
        }
    }
}
