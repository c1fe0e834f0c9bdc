//! ESP32-S3 glue for the stride firmware: raw-flash key/value
//! persistence and the lock-free link status handle shared between the
//! network tasks and the main loop.

#![no_std]

pub mod network;
pub mod storage;
