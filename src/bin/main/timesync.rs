//! Minimal SNTP client: one request/response exchange pins the epoch
//! to the monotonic clock. Until that lands, timestamps stay monotonic.

use core::cell::Cell;

use embassy_net::Stack;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::dns::DnsQueryType;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration as EmbassyDuration, Instant, Timer, WithTimeout};
use log::{info, warn};
use stride_hal_esp32s3::network::LinkHandle;

const NTP_SERVERS: [&str; 4] = [
    "pool.ntp.org",
    "time.nist.gov",
    "time.google.com",
    "time.cloudflare.com",
];
const NTP_PORT: u16 = 123;
const NTP_PACKET_BYTES: usize = 48;
const NTP_RESPONSE_TIMEOUT_MS: u64 = 5_000;
const RETRY_PAUSE_MS: u64 = 2_000;
// Seconds between the NTP era (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET_SECS: u64 = 2_208_988_800;

pub type SyncRequestSignal = Signal<CriticalSectionRawMutex, ()>;

/// Epoch anchor shared across tasks. Written once per successful sync
/// under a critical section; read from the edge watcher and main loop.
pub struct SharedClock {
    anchor: critical_section::Mutex<Cell<Option<ClockAnchor>>>,
}

#[derive(Clone, Copy)]
struct ClockAnchor {
    epoch_ms: u64,
    instant_ms: u64,
}

impl SharedClock {
    pub const fn new() -> Self {
        Self {
            anchor: critical_section::Mutex::new(Cell::new(None)),
        }
    }

    pub fn set_epoch(&self, epoch_ms: u64) {
        let anchor = ClockAnchor {
            epoch_ms,
            instant_ms: Instant::now().as_millis(),
        };
        critical_section::with(|cs| self.anchor.borrow(cs).set(Some(anchor)));
    }

    pub fn is_synced(&self) -> bool {
        critical_section::with(|cs| self.anchor.borrow(cs).get()).is_some()
    }

    /// Epoch milliseconds when synced; monotonic milliseconds since
    /// boot otherwise (degraded mode).
    pub fn now_ms(&self) -> u64 {
        let now = Instant::now().as_millis();
        match critical_section::with(|cs| self.anchor.borrow(cs).get()) {
            Some(anchor) => anchor.epoch_ms + now.saturating_sub(anchor.instant_ms),
            None => now,
        }
    }
}

/// Waits for sync requests from the startup sequencer and walks the
/// server list until one answers.
pub async fn timesync_loop(
    stack: Stack<'_>,
    clock: &'static SharedClock,
    link: &'static LinkHandle,
    request: &SyncRequestSignal,
) -> ! {
    loop {
        request.wait().await;

        if clock.is_synced() {
            link.set_time_synced(true);
            continue;
        }

        let mut synced = false;
        while !synced {
            for server in NTP_SERVERS {
                match query_server(stack, server).await {
                    Ok(epoch_ms) => {
                        clock.set_epoch(epoch_ms);
                        link.set_time_synced(true);
                        info!("time synced from {}: epoch_ms={}", server, epoch_ms);
                        synced = true;
                        break;
                    }
                    Err(err) => {
                        warn!("sntp query to {} failed: {:?}", server, err);
                    }
                }
            }
            if !synced {
                // The sequencer owns the overall sync timeout; this
                // loop just keeps trying while the request stands.
                Timer::after_millis(RETRY_PAUSE_MS).await;
                if !link.snapshot().wifi_usable() {
                    break;
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SntpError {
    DnsFailed,
    Bind,
    Send,
    Timeout,
    BadResponse,
}

async fn query_server(stack: Stack<'_>, server: &str) -> Result<u64, SntpError> {
    let addrs = stack
        .dns_query(server, DnsQueryType::A)
        .await
        .map_err(|_| SntpError::DnsFailed)?;
    let addr = addrs.first().copied().ok_or(SntpError::DnsFailed)?;

    let mut rx_meta = [PacketMetadata::EMPTY; 2];
    let mut tx_meta = [PacketMetadata::EMPTY; 2];
    let mut rx_buffer = [0u8; 128];
    let mut tx_buffer = [0u8; 128];
    let mut socket = UdpSocket::new(
        stack,
        &mut rx_meta,
        &mut rx_buffer,
        &mut tx_meta,
        &mut tx_buffer,
    );
    socket.bind(0).map_err(|_| SntpError::Bind)?;

    // LI=0, VN=3, Mode=3 (client); the rest of the request is zeros.
    let mut request = [0u8; NTP_PACKET_BYTES];
    request[0] = 0x1B;
    socket
        .send_to(&request, (addr, NTP_PORT))
        .await
        .map_err(|_| SntpError::Send)?;

    let mut response = [0u8; NTP_PACKET_BYTES];
    let (len, _) = socket
        .recv_from(&mut response)
        .with_timeout(EmbassyDuration::from_millis(NTP_RESPONSE_TIMEOUT_MS))
        .await
        .map_err(|_| SntpError::Timeout)?
        .map_err(|_| SntpError::BadResponse)?;
    if len < NTP_PACKET_BYTES {
        return Err(SntpError::BadResponse);
    }

    // Transmit timestamp: seconds since 1900 plus a 32-bit fraction.
    let secs = u64::from(u32::from_be_bytes([
        response[40],
        response[41],
        response[42],
        response[43],
    ]));
    let frac = u64::from(u32::from_be_bytes([
        response[44],
        response[45],
        response[46],
        response[47],
    ]));
    if secs < NTP_UNIX_OFFSET_SECS {
        return Err(SntpError::BadResponse);
    }

    let unix_secs = secs - NTP_UNIX_OFFSET_SECS;
    let millis = (frac * 1_000) >> 32;
    Ok(unix_secs * 1_000 + millis)
}
