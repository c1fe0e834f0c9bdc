//! Wi-Fi task: carries out the connectivity supervisor's commands
//! against the esp-radio driver and publishes link state.

use embassy_net::Stack;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration as EmbassyDuration, Instant, Timer, WithTimeout};
use esp_radio::wifi::{AccessPointConfig, ClientConfig, ModeConfig, WifiController};
use log::{info, warn};
use stride_core::connectivity::{ConnectionState, ConnectivitySupervisor, WifiCommand};
use stride_core::credentials::CredentialStore;
use stride_hal_esp32s3::network::LinkHandle;

const LINK_POLL_INTERVAL_MS: u64 = 500;
const IDLE_POLL_INTERVAL_MS: u64 = 200;

/// Power governor verdicts delivered to this task.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RadioControl {
    PowerDown,
    PowerUp,
}

pub type RadioControlSignal = Signal<CriticalSectionRawMutex, RadioControl>;

fn now_ms() -> u64 {
    Instant::now().as_millis()
}

/// Runs forever: tries stored credentials in the supervisor's order,
/// monitors an established link, honors radio power commands, and
/// falls back to provisioning when the supervisor says so.
pub async fn wifi_loop(
    controller: &mut WifiController<'static>,
    stack: Stack<'_>,
    credentials: &CredentialStore,
    ap_ssid: &str,
    link: &'static LinkHandle,
    radio_control: &RadioControlSignal,
) -> ! {
    let mut supervisor = ConnectivitySupervisor::new(credentials.len());

    loop {
        if let Some(control) = radio_control.try_take() {
            handle_radio_control(control, controller, &mut supervisor, link).await;
        }

        match supervisor.next_command(now_ms()) {
            WifiCommand::Idle => {
                if supervisor.is_connected() {
                    monitor_link(controller, stack, &mut supervisor, link, radio_control).await;
                } else {
                    Timer::after_millis(IDLE_POLL_INTERVAL_MS).await;
                }
            }
            WifiCommand::TryCredential { index, timeout_ms } => {
                let Some(credential) = credentials.get(index) else {
                    supervisor.on_attempt_result(false, now_ms());
                    continue;
                };

                link.set_wifi(ConnectionState::Connecting);
                info!(
                    "wifi trying ssid \"{}\" (priority {})",
                    credential.ssid, credential.priority
                );

                let connected = try_connect(
                    controller,
                    stack,
                    credential.ssid.as_str(),
                    credential.password.as_str(),
                    timeout_ms,
                )
                .await;

                supervisor.on_attempt_result(connected, now_ms());
                if connected {
                    link.set_wifi(ConnectionState::Connected);
                    link.set_ipv4(stack.config_v4().is_some());
                    info!("wifi connected to \"{}\"", credential.ssid);
                } else {
                    link.set_wifi(ConnectionState::Disconnected);
                    let _ = controller.disconnect_async().await;
                }
            }
            WifiCommand::StartAccessPoint => {
                warn!("no network reachable; starting provisioning access point");
                start_access_point(controller, ap_ssid, link).await;
            }
        }
    }
}

async fn handle_radio_control(
    control: RadioControl,
    controller: &mut WifiController<'static>,
    supervisor: &mut ConnectivitySupervisor,
    link: &'static LinkHandle,
) {
    match control {
        RadioControl::PowerDown => {
            info!("radio powering down");
            supervisor.disconnect();
            let _ = controller.disconnect_async().await;
            let _ = controller.stop_async().await;
            link.mark_wifi_lost();
        }
        RadioControl::PowerUp => {
            info!("radio powering up");
            supervisor.reconnect();
        }
    }
}

/// Association plus DHCP inside the per-SSID budget.
async fn try_connect(
    controller: &mut WifiController<'static>,
    stack: Stack<'_>,
    ssid: &str,
    password: &str,
    timeout_ms: u64,
) -> bool {
    let client_config = ClientConfig::default()
        .with_ssid(ssid.into())
        .with_password(password.into());
    if let Err(err) = controller.set_config(&ModeConfig::Client(client_config)) {
        warn!("wifi config failed: {:?}", err);
        return false;
    }

    if !controller.is_started().unwrap_or(false) {
        if let Err(err) = controller.start_async().await {
            warn!("wifi start failed: {:?}", err);
            return false;
        }
    }

    let attempt = async {
        if controller.connect_async().await.is_err() {
            return false;
        }
        stack.wait_config_up().await;
        true
    };
    matches!(
        attempt
            .with_timeout(EmbassyDuration::from_millis(timeout_ms))
            .await,
        Ok(true)
    )
}

/// Polls an established link until it drops or the governor powers the
/// radio down.
async fn monitor_link(
    controller: &mut WifiController<'static>,
    stack: Stack<'_>,
    supervisor: &mut ConnectivitySupervisor,
    link: &'static LinkHandle,
    radio_control: &RadioControlSignal,
) {
    loop {
        if let Some(control) = radio_control.try_take() {
            handle_radio_control(control, controller, supervisor, link).await;
            return;
        }

        let associated = matches!(controller.is_connected(), Ok(true));
        let has_ipv4 = stack.config_v4().is_some();
        link.set_ipv4(has_ipv4);

        if !(associated && stack.is_link_up()) {
            warn!(
                "wifi link lost (associated={} link_up={}); restarting credential trial",
                associated,
                stack.is_link_up()
            );
            supervisor.on_link_lost();
            link.mark_wifi_lost();
            let _ = controller.disconnect_async().await;
            return;
        }

        Timer::after_millis(LINK_POLL_INTERVAL_MS).await;
    }
}

/// Open provisioning network; credential intake happens out of band.
/// The device stays here until new credentials arrive with a restart.
async fn start_access_point(
    controller: &mut WifiController<'static>,
    ap_ssid: &str,
    link: &'static LinkHandle,
) {
    let ap_config = AccessPointConfig::default().with_ssid(ap_ssid.into());
    if let Err(err) = controller.set_config(&ModeConfig::AccessPoint(ap_config)) {
        warn!("access point config failed: {:?}", err);
        return;
    }
    if !controller.is_started().unwrap_or(false) {
        if let Err(err) = controller.start_async().await {
            warn!("access point start failed: {:?}", err);
            return;
        }
    }

    link.set_wifi(ConnectionState::ApMode);
    info!("provisioning access point \"{}\" is up", ap_ssid);
}
