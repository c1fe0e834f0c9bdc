//! Hardware-independent logic for the stride step counter: debounce,
//! durable backlog, retry backoff, WebSocket codec, delivery, power
//! policy, and startup sequencing. No I/O lives here; the firmware
//! binary and the ESP32-S3 HAL crate plug in at the seam traits.

#![cfg_attr(not(test), no_std)]

pub mod backlog;
pub mod backoff;
pub mod connectivity;
pub mod credentials;
pub mod debounce;
pub mod delivery;
pub mod power;
pub mod startup;
pub mod storage;
pub mod wire;
pub mod ws;
