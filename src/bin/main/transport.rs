//! WebSocket session over embassy-net TCP: handshake, frame I/O, and
//! keepalive. The pure codec lives in `stride_core::ws`; this module
//! owns the socket.

use embassy_net::{IpEndpoint, Stack, dns::DnsQueryType, tcp::TcpSocket};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration as EmbassyDuration, Instant, WithTimeout};
use embedded_io_async::Write;
use esp_hal::rng::Rng;
use log::{debug, info, warn};
use stride_core::backoff::RetryState;
use stride_core::delivery::{DeliveryCoordinator, MAX_SENDS_PER_TICK};
use stride_core::wire::STEP_MESSAGE_BYTES;
use stride_core::ws::{
    CLIENT_KEY_BYTES, FrameError, HANDSHAKE_RESPONSE_TIMEOUT_MS, HandshakeError,
    KEEPALIVE_INTERVAL_MS, MAX_HEADER_BYTES, Opcode, TransportState, check_upgrade_response,
    encode_client_key, encode_masked_frame, encode_unmasked_frame, parse_frame_header,
    response_complete, unmask_payload, upgrade_request,
};
use stride_hal_esp32s3::network::LinkHandle;

use crate::led::{LedChannel, LedEvent};
use crate::store::{SharedState, StepState};

pub const TCP_RX_BUFFER_BYTES: usize = 2048;
pub const TCP_TX_BUFFER_BYTES: usize = 1024;

const CONNECT_TIMEOUT_MS: u64 = 10_000;
const SERVICE_READ_TIMEOUT_MS: u64 = 500;
const RECV_BUFFER_BYTES: usize = 1024;
const SEND_FRAME_BYTES: usize = MAX_HEADER_BYTES + STEP_MESSAGE_BYTES;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportError {
    DnsFailed,
    ConnectFailed,
    Tcp,
    Timeout,
    Handshake(HandshakeError),
    Frame(FrameError),
    /// Server sent a close frame or dropped the connection.
    Closed,
}

impl From<HandshakeError> for TransportError {
    fn from(err: HandshakeError) -> Self {
        Self::Handshake(err)
    }
}

/// One established WebSocket connection. Dropped (and the socket
/// aborted) on any error; the caller reconnects with backoff.
pub struct WsSession<'a> {
    socket: TcpSocket<'a>,
    rng: Rng,
    recv: [u8; RECV_BUFFER_BYTES],
    recv_len: usize,
    last_frame: Instant,
    last_ping: Instant,
}

impl<'a> WsSession<'a> {
    /// Resolves the host, opens the TCP connection, and completes the
    /// HTTP Upgrade. Only a `101` response yields a session.
    pub async fn connect(
        stack: Stack<'a>,
        rx_buffer: &'a mut [u8; TCP_RX_BUFFER_BYTES],
        tx_buffer: &'a mut [u8; TCP_TX_BUFFER_BYTES],
        host: &str,
        port: u16,
        path: &str,
        mut rng: Rng,
    ) -> Result<WsSession<'a>, TransportError> {
        let addrs = stack
            .dns_query(host, DnsQueryType::A)
            .await
            .map_err(|_| TransportError::DnsFailed)?;
        let addr = addrs.first().copied().ok_or(TransportError::DnsFailed)?;

        let mut socket = TcpSocket::new(stack, rx_buffer, tx_buffer);
        socket.set_timeout(Some(EmbassyDuration::from_millis(CONNECT_TIMEOUT_MS)));

        socket
            .connect(IpEndpoint::new(addr, port))
            .await
            .map_err(|_| TransportError::ConnectFailed)?;

        let mut key_bytes = [0u8; CLIENT_KEY_BYTES];
        for chunk in key_bytes.chunks_exact_mut(4) {
            chunk.copy_from_slice(&rng.random().to_be_bytes());
        }
        let key = encode_client_key(&key_bytes);
        let request = upgrade_request(host, path, key.as_str());

        socket
            .write_all(request.as_bytes())
            .await
            .map_err(|_| TransportError::Tcp)?;
        socket.flush().await.map_err(|_| TransportError::Tcp)?;

        // Read headers to the blank line, bounded by the handshake
        // timeout.
        let mut response = [0u8; 512];
        let mut response_len = 0usize;
        let deadline = Instant::now() + EmbassyDuration::from_millis(HANDSHAKE_RESPONSE_TIMEOUT_MS);
        while !response_complete(&response[..response_len]) {
            if response_len == response.len() {
                return Err(TransportError::Handshake(HandshakeError::Malformed));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let read = socket
                .read(&mut response[response_len..])
                .with_timeout(remaining)
                .await
                .map_err(|_| TransportError::Timeout)?
                .map_err(|_| TransportError::Tcp)?;
            if read == 0 {
                return Err(TransportError::Closed);
            }
            response_len += read;
        }
        check_upgrade_response(&response[..response_len])?;

        info!("websocket connected to {}:{}{}", host, port, path);
        let now = Instant::now();
        Ok(WsSession {
            socket,
            rng,
            recv: [0u8; RECV_BUFFER_BYTES],
            recv_len: 0,
            last_frame: now,
            last_ping: now,
        })
    }

    /// Sends one masked text frame.
    pub async fn send_text(&mut self, payload: &str) -> Result<(), TransportError> {
        self.send_masked(Opcode::Text, payload.as_bytes()).await
    }

    async fn send_masked(&mut self, opcode: Opcode, payload: &[u8]) -> Result<(), TransportError> {
        let mask = self.rng.random().to_be_bytes();
        let mut frame = [0u8; SEND_FRAME_BYTES];
        let len = encode_masked_frame(opcode, mask, payload, &mut frame)
            .map_err(TransportError::Frame)?;

        self.socket
            .write_all(&frame[..len])
            .await
            .map_err(|_| TransportError::Tcp)?;
        self.socket.flush().await.map_err(|_| TransportError::Tcp)
    }

    /// One service pass: pulls incoming bytes for a bounded interval,
    /// dispatches complete frames, and pings when the link has been
    /// idle past the keepalive interval.
    pub async fn service(&mut self) -> Result<(), TransportError> {
        match self
            .socket
            .read(&mut self.recv[self.recv_len..])
            .with_timeout(EmbassyDuration::from_millis(SERVICE_READ_TIMEOUT_MS))
            .await
        {
            Ok(Ok(0)) => return Err(TransportError::Closed),
            Ok(Ok(read)) => self.recv_len += read,
            Ok(Err(_)) => return Err(TransportError::Tcp),
            // Nothing arrived this pass.
            Err(_) => {}
        }

        self.dispatch_frames().await?;

        let idle = Instant::now().saturating_duration_since(self.last_frame);
        let since_ping = Instant::now().saturating_duration_since(self.last_ping);
        if idle.as_millis() >= KEEPALIVE_INTERVAL_MS
            && since_ping.as_millis() >= KEEPALIVE_INTERVAL_MS
        {
            debug!("keepalive ping after {}ms idle", idle.as_millis());
            self.send_masked(Opcode::Ping, b"").await?;
            self.last_ping = Instant::now();
        }
        Ok(())
    }

    async fn dispatch_frames(&mut self) -> Result<(), TransportError> {
        loop {
            let header = match parse_frame_header(&self.recv[..self.recv_len]) {
                Ok(header) => header,
                Err(FrameError::Truncated) => return Ok(()),
                Err(err) => return Err(TransportError::Frame(err)),
            };
            if header.payload_len > self.recv.len() - header.header_len {
                return Err(TransportError::Frame(FrameError::PayloadTooLong));
            }
            let frame_len = header.header_len + header.payload_len;
            if self.recv_len < frame_len {
                return Ok(());
            }

            let payload = &mut self.recv[header.header_len..frame_len];
            if header.masked {
                unmask_payload(header.mask, payload);
            }

            match header.opcode {
                Opcode::Text => {
                    if let Ok(text) = core::str::from_utf8(payload) {
                        if text.contains("\"command\"") {
                            info!("server command message: {}", text);
                        } else {
                            info!("server message: {}", text);
                        }
                    } else {
                        warn!("server text frame is not valid utf-8");
                    }
                }
                Opcode::Ping => {
                    let mut echo = [0u8; 125];
                    let echo_len = payload.len().min(echo.len());
                    echo[..echo_len].copy_from_slice(&payload[..echo_len]);

                    let mut frame = [0u8; MAX_HEADER_BYTES + 125];
                    let len = encode_unmasked_frame(Opcode::Pong, &echo[..echo_len], &mut frame)
                        .map_err(TransportError::Frame)?;
                    self.socket
                        .write_all(&frame[..len])
                        .await
                        .map_err(|_| TransportError::Tcp)?;
                    self.socket.flush().await.map_err(|_| TransportError::Tcp)?;
                }
                Opcode::Pong => {
                    debug!("keepalive pong");
                }
                Opcode::Close => {
                    info!("server closed the websocket");
                    return Err(TransportError::Closed);
                }
                Opcode::Continuation | Opcode::Binary => {
                    debug!("ignoring {:?} frame ({} bytes)", header.opcode, payload.len());
                }
            }

            self.last_frame = Instant::now();
            self.recv.copy_within(frame_len..self.recv_len, 0);
            self.recv_len -= frame_len;
        }
    }

    pub fn close(mut self) {
        self.socket.abort();
    }
}

/// Startup sequencer verdicts delivered to the transport task.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportCommand {
    Connect,
    Stop,
}

pub type TransportCommandSignal = Signal<CriticalSectionRawMutex, TransportCommand>;

/// Runs forever: connects on command, then alternates between servicing
/// the socket and draining the backlog until the link drops or a stop
/// arrives. Reconnect attempts back off independently of the
/// sequencer's command cadence.
#[allow(clippy::too_many_arguments)]
pub async fn transport_loop(
    stack: Stack<'_>,
    state: &SharedState,
    coordinator: &DeliveryCoordinator,
    link: &'static LinkHandle,
    commands: &TransportCommandSignal,
    led: &'static LedChannel,
    rng: Rng,
    host: &str,
    port: u16,
    path: &str,
) -> ! {
    let mut retry = RetryState::new();

    loop {
        match commands.wait().await {
            TransportCommand::Stop => {
                link.set_transport(TransportState::Disconnected);
                continue;
            }
            TransportCommand::Connect => {}
        }

        if !retry.ready(Instant::now().as_millis()) {
            continue;
        }
        if !link.snapshot().wifi_usable() {
            continue;
        }

        link.set_transport(TransportState::Connecting);
        let mut rx_buffer = [0u8; TCP_RX_BUFFER_BYTES];
        let mut tx_buffer = [0u8; TCP_TX_BUFFER_BYTES];
        let mut session =
            match WsSession::connect(stack, &mut rx_buffer, &mut tx_buffer, host, port, path, rng)
                .await
            {
                Ok(session) => session,
                Err(err) => {
                    warn!("websocket connect to {}:{} failed: {:?}", host, port, err);
                    retry.record_failure(Instant::now().as_millis());
                    link.set_transport(TransportState::Error);
                    continue;
                }
            };
        retry.record_success();
        link.set_transport(TransportState::Connected);

        'session: loop {
            if let Some(TransportCommand::Stop) = commands.try_take() {
                info!("transport stop requested");
                break 'session;
            }

            if let Err(err) = session.service().await {
                warn!("websocket session ended: {:?}", err);
                break 'session;
            }

            for _ in 0..MAX_SENDS_PER_TICK {
                let message = {
                    let guard = state.lock().await;
                    coordinator.next_message(&guard.backlog)
                };
                let Some(message) = message else {
                    break;
                };

                match session.send_text(message.as_str()).await {
                    Ok(()) => {
                        let mut guard = state.lock().await;
                        let StepState { kv, backlog, .. } = &mut *guard;
                        coordinator.confirm_sent(backlog, kv);
                        let _ = led.try_send(LedEvent::StepSent);
                    }
                    Err(err) => {
                        warn!("step send failed: {:?}; reconnecting", err);
                        break 'session;
                    }
                }
            }
        }

        session.close();
        link.set_transport(TransportState::Disconnected);
    }
}
