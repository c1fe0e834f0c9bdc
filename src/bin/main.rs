#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_time::{Instant, Timer};
use esp_hal::{
    clock::CpuClock,
    gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull},
    rng::Rng,
    timer::timg::TimerGroup,
};
use log::{LevelFilter, info, warn};
use static_cell::StaticCell;
use stride_core::backlog::{Backlog, BacklogError, StepTally};
use stride_core::credentials::CredentialStore;
use stride_core::delivery::DeliveryCoordinator;
use stride_core::power::{DisplayPower, PowerGovernor, RadioAction};
use stride_core::startup::{SequencerCommand, SequencerInputs, StartupSequencer};
use stride_core::wire::format_mac;
use stride_hal_esp32s3::network::LinkHandle;

use edges::StepChannel;
use led::{LedChannel, LedEvent};
use store::{BootStore, SharedState, StepState};
use timesync::{SharedClock, SyncRequestSignal};
use transport::{TransportCommand, TransportCommandSignal};
use wifi::{RadioControl, RadioControlSignal};

#[path = "main/edges.rs"]
mod edges;
#[path = "main/led.rs"]
mod led;
#[path = "main/store.rs"]
mod store;
#[path = "main/timesync.rs"]
mod timesync;
#[path = "main/transport.rs"]
mod transport;
#[path = "main/wifi.rs"]
mod wifi;

const TICK_INTERVAL_MS: u64 = 50;
const AP_SSID: &str = "Stride-Setup";

// Delivery endpoint; override at build time for a local server.
const WS_HOST: &str = match option_env!("STRIDE_WS_HOST") {
    Some(host) => host,
    None => "steps-ws.barneyparker.com",
};
const WS_PORT: u16 = parse_port(option_env!("STRIDE_WS_PORT"));
const WS_PATH: &str = match option_env!("STRIDE_WS_PATH") {
    Some(path) => path,
    None => "/",
};

const fn parse_port(raw: Option<&str>) -> u16 {
    let Some(raw) = raw else {
        return 80;
    };
    let bytes = raw.as_bytes();
    assert!(!bytes.is_empty(), "STRIDE_WS_PORT must be a decimal port");
    let mut value: u32 = 0;
    let mut i = 0;
    while i < bytes.len() {
        assert!(
            bytes[i].is_ascii_digit(),
            "STRIDE_WS_PORT must be a decimal port"
        );
        value = value * 10 + (bytes[i] - b'0') as u32;
        i += 1;
    }
    assert!(value <= u16::MAX as u32, "STRIDE_WS_PORT out of range");
    value as u16
}

static LINK: LinkHandle = LinkHandle::new();
static CLOCK: SharedClock = SharedClock::new();
static STEP_EVENTS: StepChannel = StepChannel::new();
static LED_EVENTS: LedChannel = LedChannel::new();
static TRANSPORT_COMMANDS: TransportCommandSignal = TransportCommandSignal::new();
static RADIO_CONTROL: RadioControlSignal = RadioControlSignal::new();
static TIME_SYNC_REQUESTS: SyncRequestSignal = SyncRequestSignal::new();
static NET_RESOURCES: StaticCell<embassy_net::StackResources<4>> = StaticCell::new();
static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();

/// Display power rail behind the governor's on/off decisions.
struct PanelPower {
    pin: Output<'static>,
}

impl DisplayPower for PanelPower {
    fn set_powered(&mut self, on: bool) {
        if on {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
    }
}

#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    loop {}
}

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(_spawner: Spawner) -> ! {
    esp_println::logger::init_logger(LevelFilter::Info);
    esp_println::println!("boot: stride starting");

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    // esp-radio requires an allocator.
    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 65536);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    // Wiring: reed switch=GPIO18 (active low, pull-up), status LED=GPIO2,
    // display power rail=GPIO21.
    let switch = Input::new(
        peripherals.GPIO18,
        InputConfig::default().with_pull(Pull::Up),
    );
    let status_led = Output::new(peripherals.GPIO2, Level::Low, OutputConfig::default());
    let panel_pin = Output::new(peripherals.GPIO21, Level::High, OutputConfig::default());
    let mut panel = PanelPower { pin: panel_pin };

    let mut kv = BootStore::open();
    let backlog = Backlog::load(&mut kv);
    let tally = StepTally::load(&mut kv);
    let credentials = CredentialStore::load(&mut kv);
    info!(
        "boot state: backlog={} total_steps={} credentials={}",
        backlog.len(),
        tally.count(),
        credentials.len()
    );
    let state: SharedState = SharedState::new(StepState { kv, backlog, tally });

    let radio = match esp_radio::init() {
        Ok(radio) => &*RADIO.init(radio),
        Err(err) => {
            warn!("esp-radio init failed: {:?}", err);
            loop {
                Timer::after_secs(1).await;
            }
        }
    };

    let (mut wifi_controller, interfaces) =
        match esp_radio::wifi::new(radio, peripherals.WIFI, esp_radio::wifi::Config::default()) {
            Ok(parts) => parts,
            Err(err) => {
                warn!("wifi peripheral init failed: {:?}", err);
                loop {
                    Timer::after_secs(1).await;
                }
            }
        };

    let device_mac = format_mac(&interfaces.sta.mac_address());
    info!("device mac: {}", device_mac);
    let coordinator = DeliveryCoordinator::new(device_mac);

    let mut rng = Rng::new();
    let seed = (rng.random() as u64) << 32 | rng.random() as u64;
    let stack_config = embassy_net::Config::dhcpv4(Default::default());
    let (stack, mut net_runner) = embassy_net::new(
        interfaces.sta,
        stack_config,
        NET_RESOURCES.init(embassy_net::StackResources::<4>::new()),
        seed,
    );

    info!(
        "delivery endpoint: ws://{}:{}{} ap_ssid={}",
        WS_HOST, WS_PORT, WS_PATH, AP_SSID
    );

    let net_future = net_runner.run();
    let wifi_future = wifi::wifi_loop(
        &mut wifi_controller,
        stack,
        &credentials,
        AP_SSID,
        &LINK,
        &RADIO_CONTROL,
    );
    let transport_future = transport::transport_loop(
        stack,
        &state,
        &coordinator,
        &LINK,
        &TRANSPORT_COMMANDS,
        &LED_EVENTS,
        rng,
        WS_HOST,
        WS_PORT,
        WS_PATH,
    );
    let timesync_future = timesync::timesync_loop(stack, &CLOCK, &LINK, &TIME_SYNC_REQUESTS);
    let edge_future = edges::edge_watcher(switch, &CLOCK, &STEP_EVENTS);
    let led_future = led::led_loop(status_led, &LED_EVENTS);

    let app_future = async {
        let mut governor = PowerGovernor::new(Instant::now().as_millis());
        let mut sequencer = StartupSequencer::new();

        loop {
            let now_ms = Instant::now().as_millis();

            while let Ok(event) = STEP_EVENTS.try_receive() {
                {
                    let mut guard = state.lock().await;
                    let StepState { kv, backlog, tally } = &mut *guard;
                    match backlog.push(event, kv) {
                        Ok(()) => {
                            let total = tally.increment(kv);
                            info!(
                                "step queued at {} (total={} backlog={})",
                                event.timestamp_ms,
                                total,
                                backlog.len()
                            );
                        }
                        Err(BacklogError::Full) => {
                            warn!("backlog full; dropping step at {}", event.timestamp_ms);
                            let _ = LED_EVENTS.try_send(LedEvent::BacklogFull);
                        }
                    }
                }
                if governor.record_activity(now_ms, &mut panel) == RadioAction::PowerUp {
                    RADIO_CONTROL.signal(RadioControl::PowerUp);
                }
            }

            let snapshot = LINK.snapshot();
            let inputs = SequencerInputs {
                now_ms,
                wifi_connected: snapshot.wifi_usable(),
                time_synced: snapshot.time_synced,
                transport_connected: snapshot.transport_connected(),
            };
            match sequencer.step(inputs) {
                Some(SequencerCommand::StartTimeSync) => TIME_SYNC_REQUESTS.signal(()),
                Some(SequencerCommand::ConnectTransport) => {
                    TRANSPORT_COMMANDS.signal(TransportCommand::Connect)
                }
                Some(SequencerCommand::StopTransport) => {
                    TRANSPORT_COMMANDS.signal(TransportCommand::Stop)
                }
                None => {}
            }

            let backlog_len = state.lock().await.backlog.len();
            if governor.tick(now_ms, backlog_len, &mut panel) == RadioAction::PowerDown {
                info!("idle with empty backlog; powering radio down");
                RADIO_CONTROL.signal(RadioControl::PowerDown);
            }

            Timer::after_millis(TICK_INTERVAL_MS).await;
        }
    };

    let _ = embassy_futures::join::join4(
        embassy_futures::join::join4(net_future, wifi_future, transport_future, timesync_future),
        edge_future,
        led_future,
        app_future,
    )
    .await;

    unreachable!()
}
